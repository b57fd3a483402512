pub mod arguments;
pub mod connector;
pub mod error;
pub mod known_hosts;
pub mod russh_transport;
pub mod session;
pub mod transport;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::crypto::GuardedSecret;
pub use error::{ErrorKind, SshError};

pub const DEFAULT_PORT: u16 = 22;

/// SSH connector configuration.
///
/// Built once by the hosting environment, validated, then read-only.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<GuardedSecret>,
    pub authentication_scheme: AuthScheme,
    /// Identity used by `public-key` authentication. Without it the keys
    /// held by the running SSH agent are offered instead.
    pub private_key_path: Option<PathBuf>,
    pub private_key_passphrase: Option<GuardedSecret>,
    /// Blocks in `known_hosts` file format, each holding one or more entries.
    ///
    /// WARNING: when this holds no entries, any host key is accepted.
    /// `null` counts as no entries.
    #[serde(deserialize_with = "null_as_empty")]
    pub known_hosts: Vec<String>,
    pub argument_style: ArgumentStyle,
    pub null_argument_policy: NullArgumentPolicy,
    pub connect_timeout_secs: u64,
    pub exit_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: None,
            authentication_scheme: AuthScheme::Password,
            private_key_path: None,
            private_key_passphrase: None,
            known_hosts: Vec::new(),
            argument_style: ArgumentStyle::Dash,
            null_argument_policy: NullArgumentPolicy::AsOmitted,
            connect_timeout_secs: 30,
            exit_timeout_secs: 5,
        }
    }
}

impl SshConfig {
    /// Parse a JSON configuration document and validate it.
    pub fn from_json(json: &str) -> Result<Self, SshError> {
        let config: SshConfig = serde_json::from_str(json)
            .map_err(|e| SshError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::Configuration("No host configured".to_string()));
        }
        if self.port == 0 {
            return Err(SshError::Configuration("Port must not be 0".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::Configuration("No username configured".to_string()));
        }
        match self.authentication_scheme {
            AuthScheme::Password if self.password.is_none() => Err(SshError::Configuration(format!(
                "No authentication password configured for scheme '{}'",
                self.authentication_scheme
            ))),
            AuthScheme::PublicKey if self.private_key_passphrase.is_some() && self.private_key_path.is_none() => {
                Err(SshError::Configuration(
                    "A private key passphrase needs a private key path".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// `host`, or `host:port` when not on the default port.
    pub fn host_description(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `username@host[:port]`
    pub fn connection_description(&self) -> String {
        format!("{}@{}", self.username, self.host_description())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_secs(self.exit_timeout_secs)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// How the connector authenticates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum AuthScheme {
    Password,
    /// Uses the identity at [`SshConfig::private_key_path`], or the SSH agent.
    PublicKey,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Password => "password",
            AuthScheme::PublicKey => "public-key",
        }
    }
}

impl FromStr for AuthScheme {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(AuthScheme::Password),
            "public-key" | "publicKey" => Ok(AuthScheme::PublicKey),
            other => Err(SshError::Configuration(format!(
                "Unknown authentication scheme '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for AuthScheme {
    type Error = SshError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dialect used to turn script arguments into a command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ArgumentStyle {
    /// `command -f foo -b bar`
    Dash,
    /// `command /f foo /b bar`
    Slash,
    /// `f='foo'; b='bar'; command`
    VariablesBash,
    /// `$f = 'foo'; $b = 'bar'; command`
    VariablesPowerShell,
}

impl ArgumentStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgumentStyle::Dash => "dash",
            ArgumentStyle::Slash => "slash",
            ArgumentStyle::VariablesBash => "variables-bash",
            ArgumentStyle::VariablesPowerShell => "variables-powershell",
        }
    }
}

impl FromStr for ArgumentStyle {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dash" => Ok(ArgumentStyle::Dash),
            "slash" => Ok(ArgumentStyle::Slash),
            "variables-bash" => Ok(ArgumentStyle::VariablesBash),
            "variables-powershell" => Ok(ArgumentStyle::VariablesPowerShell),
            other => Err(SshError::Configuration(format!(
                "Unknown value of argument style: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ArgumentStyle {
    type Error = SshError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ArgumentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What variable-assignment styles do with a named argument whose value is null.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum NullArgumentPolicy {
    /// Assign an empty quoted string: `name=''`.
    AsEmptyString,
    /// Leave the assignment out.
    AsOmitted,
}

impl NullArgumentPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NullArgumentPolicy::AsEmptyString => "as-empty-string",
            NullArgumentPolicy::AsOmitted => "as-omitted",
        }
    }
}

impl FromStr for NullArgumentPolicy {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "as-empty-string" => Ok(NullArgumentPolicy::AsEmptyString),
            "as-omitted" => Ok(NullArgumentPolicy::AsOmitted),
            other => Err(SshError::Configuration(format!(
                "Unknown null argument policy '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for NullArgumentPolicy {
    type Error = SshError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for NullArgumentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
