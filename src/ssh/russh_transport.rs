//! Default transport built on russh.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::*;
use russh::{AgentAuthError, Channel, ChannelMsg, CryptoVec, Disconnect, Sig, Signer};

use super::known_hosts::KnownHostsVerifier;
use super::transport::{CommandOutput, ExitReport, RemoteCommand, Transport, TransportConnector};
use super::{AuthScheme, SshConfig, SshError};
use crate::crypto::GuardedSecret;

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Where `public-key` authentication takes its key from.
#[derive(Clone, Default)]
pub enum KeyIdentity {
    /// Private key read from disk when the connector was built.
    File { path: PathBuf, key: Arc<PrivateKey> },
    /// Keys held by the running SSH agent.
    #[default]
    Agent,
}

impl KeyIdentity {
    /// Read and decrypt the key at `path`. Failures are configuration errors.
    pub fn load(path: &Path, passphrase: Option<&GuardedSecret>) -> Result<Self, SshError> {
        let loaded = match passphrase {
            Some(passphrase) => passphrase
                .access(|p| load_secret_key(path, Some(p)))
                .map_err(|e| SshError::Configuration(format!("Unable to access private key passphrase: {}", e)))?,
            None => load_secret_key(path, None),
        };
        let key = loaded.map_err(|e| {
            SshError::Configuration(format!("Unable to load private key {}: {}", path.display(), e))
        })?;
        log::debug!("Loaded {} private key from {}", key.algorithm().as_str(), path.display());
        Ok(KeyIdentity::File {
            path: path.to_path_buf(),
            key: Arc::new(key),
        })
    }
}

impl fmt::Debug for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyIdentity::File { path, .. } => write!(f, "KeyIdentity::File({})", path.display()),
            KeyIdentity::Agent => write!(f, "KeyIdentity::Agent"),
        }
    }
}

/// Connects with russh, checking server keys against the configured known hosts.
#[derive(Clone, Debug, Default)]
pub struct RusshConnector {
    identity: KeyIdentity,
}

impl RusshConnector {
    pub fn new(identity: KeyIdentity) -> Self {
        Self { identity }
    }

    /// Load the configured private key now, so a bad path or passphrase is
    /// reported before any connection is made.
    pub fn from_config(config: &SshConfig) -> Result<Self, SshError> {
        let identity = match (config.authentication_scheme, &config.private_key_path) {
            (AuthScheme::PublicKey, Some(path)) => {
                KeyIdentity::load(path, config.private_key_passphrase.as_ref())?
            }
            _ => KeyIdentity::Agent,
        };
        Ok(Self::new(identity))
    }
}

/// Client handler that defers host key decisions to the verifier.
struct VerifyingHandler {
    host: String,
    port: u16,
    verifier: Arc<KnownHostsVerifier>,
}

impl client::Handler for VerifyingHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let accepted = self.verifier.verify(&self.host, self.port, server_public_key);
        if !accepted {
            log::error!(
                "Host key {} of {}:{} is not trusted",
                server_public_key.fingerprint(ssh_key::HashAlg::Sha256),
                self.host,
                self.port
            );
        }
        Ok(accepted)
    }
}

#[async_trait]
impl TransportConnector for RusshConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        verifier: Arc<KnownHostsVerifier>,
        timeout: Duration,
    ) -> anyhow::Result<Box<dyn Transport>> {
        let ssh_config = client::Config::default();
        let handler = VerifyingHandler {
            host: host.to_string(),
            port,
            verifier,
        };

        let handle = tokio::time::timeout(
            timeout,
            client::connect(Arc::new(ssh_config), (host, port), handler),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {}s", timeout.as_secs()))??;

        Ok(Box::new(RusshTransport {
            handle,
            identity: self.identity.clone(),
        }))
    }
}

/// An open russh client connection.
pub struct RusshTransport {
    handle: Handle<VerifyingHandler>,
    identity: KeyIdentity,
}

impl RusshTransport {
    /// Offer every agent key in turn until the server accepts one.
    async fn authenticate_with_agent(&mut self, username: &str) -> anyhow::Result<bool> {
        let mut agent = connect_agent().await?;
        let keys = agent.request_identities().await?;
        if keys.is_empty() {
            anyhow::bail!("SSH agent holds no keys");
        }
        log::debug!("SSH agent offers {} key(s)", keys.len());

        let rsa_hash = self.handle.best_supported_rsa_hash().await?.flatten();
        for key in keys {
            let hash_alg = if key.algorithm().is_rsa() { rsa_hash } else { None };
            let result = self
                .handle
                .authenticate_publickey_with(username, key.clone(), hash_alg, &mut AgentSigner { agent: &mut agent })
                .await;
            match result {
                Ok(client::AuthResult::Success) => return Ok(true),
                Ok(_) => log::debug!("Agent key {} rejected by server", key.comment()),
                Err(e) => log::warn!("Agent signing failed for key {}: {}", key.comment(), e),
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn authenticate_password(&mut self, username: &str, password: &str) -> anyhow::Result<bool> {
        let result = self.handle.authenticate_password(username, password).await?;
        Ok(matches!(result, client::AuthResult::Success))
    }

    async fn authenticate_public_key(&mut self, username: &str) -> anyhow::Result<bool> {
        let key = match &self.identity {
            KeyIdentity::File { key, .. } => Arc::clone(key),
            KeyIdentity::Agent => return self.authenticate_with_agent(username).await,
        };

        let hash_alg = self.handle.best_supported_rsa_hash().await?.flatten();
        let pk = PrivateKeyWithHashAlg::new(key, hash_alg);
        let result = self.handle.authenticate_publickey(username, pk).await?;
        Ok(matches!(result, client::AuthResult::Success))
    }

    async fn open_session(&mut self) -> anyhow::Result<Box<dyn RemoteCommand>> {
        let channel = self.handle.channel_open_session().await?;
        Ok(Box::new(RusshCommand::new(channel)))
    }

    fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

async fn connect_agent() -> anyhow::Result<DynAgent> {
    #[cfg(unix)]
    {
        let agent = AgentClient::connect_env()
            .await
            .map_err(|e| anyhow::anyhow!("SSH agent not available (is SSH_AUTH_SOCK set?): {}", e))?;
        Ok(agent.dynamic())
    }

    #[cfg(windows)]
    {
        let agent = AgentClient::connect_named_pipe(r"\\.\pipe\openssh-ssh-agent")
            .await
            .map_err(|e| anyhow::anyhow!("SSH agent not available: {}", e))?;
        Ok(agent.dynamic())
    }

    #[cfg(not(any(unix, windows)))]
    {
        anyhow::bail!("SSH agent is not supported on this platform")
    }
}

/// Signs with the agent. Clones the requested key so the signing future
/// holds no borrow across its await point and stays `Send`.
struct AgentSigner<'a> {
    agent: &'a mut DynAgent,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key = key.clone();
        async move {
            self.agent
                .sign_request(&key, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

/// Stream state of an exec channel, fed one message at a time.
#[derive(Debug, Default)]
struct ChannelState {
    exit: ExitReport,
    eof: bool,
    closed: bool,
}

impl ChannelState {
    fn drained(&self) -> bool {
        self.eof || self.closed
    }

    fn exited(&self) -> bool {
        self.exit.is_known() || self.closed
    }

    /// Take one message while reading output. `None` means the channel is gone.
    fn on_output(&mut self, msg: Option<ChannelMsg>, output: &mut CommandOutput) -> anyhow::Result<()> {
        match msg {
            Some(ChannelMsg::Data { data }) => output.stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // 1 = SSH_EXTENDED_DATA_STDERR
                if ext == 1 {
                    output.stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::Failure) => {
                anyhow::bail!("remote side refused to execute the command");
            }
            other => self.record(other),
        }
        Ok(())
    }

    /// Take one control message. Stream data is ignored here.
    fn record(&mut self, msg: Option<ChannelMsg>) {
        match msg {
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                self.exit.status = Some(exit_status);
            }
            Some(ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            }) => {
                self.exit.signal = Some(signal_wire_name(&signal_name).to_string());
                if !error_message.is_empty() {
                    self.exit.error_message = Some(error_message);
                }
            }
            Some(ChannelMsg::Eof) => self.eof = true,
            Some(ChannelMsg::Close) | None => self.closed = true,
            Some(_) => {}
        }
    }
}

/// Signal name as sent on the wire (RFC 4254 §6.10), without the `SIG` prefix.
fn signal_wire_name(sig: &Sig) -> &str {
    match sig {
        Sig::ABRT => "ABRT",
        Sig::ALRM => "ALRM",
        Sig::FPE => "FPE",
        Sig::HUP => "HUP",
        Sig::ILL => "ILL",
        Sig::INT => "INT",
        Sig::KILL => "KILL",
        Sig::PIPE => "PIPE",
        Sig::QUIT => "QUIT",
        Sig::SEGV => "SEGV",
        Sig::TERM => "TERM",
        Sig::USR1 => "USR1",
        Sig::Custom(name) => name,
    }
}

/// Exec channel. Tracks stream state so draining and waiting can be split.
pub struct RusshCommand {
    channel: Channel<Msg>,
    state: ChannelState,
}

impl RusshCommand {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            state: ChannelState::default(),
        }
    }
}

#[async_trait]
impl RemoteCommand for RusshCommand {
    async fn exec(&mut self, command: &str) -> anyhow::Result<()> {
        self.channel.exec(true, command).await?;
        Ok(())
    }

    async fn drain(&mut self) -> anyhow::Result<CommandOutput> {
        let mut output = CommandOutput::default();
        while !self.state.drained() {
            let msg = self.channel.wait().await;
            self.state.on_output(msg, &mut output)?;
        }
        Ok(output)
    }

    async fn wait_exit(&mut self) -> anyhow::Result<ExitReport> {
        while !self.state.exited() {
            let msg = self.channel.wait().await;
            self.state.record(msg);
        }
        Ok(self.state.exit.clone())
    }

    fn is_open(&self) -> bool {
        !self.state.closed
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.state.closed = true;
        self.channel.close().await?;
        Ok(())
    }
}
