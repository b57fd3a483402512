//! Public entry point: configuration in, script output out.

use std::sync::{Arc, OnceLock};

use super::arguments::{encode, ScriptRequest};
use super::known_hosts::KnownHostsVerifier;
use super::russh_transport::RusshConnector;
use super::session::CommandSession;
use super::transport::TransportConnector;
use super::{SshConfig, SshError};

const OPERATION_LOG: &str = "sshexec::operation";

/// Global tokio runtime for the blocking entry points.
pub(crate) fn ssh_runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to create SSH tokio runtime")
    })
}

/// Runs scripts on one configured host.
///
/// Holds no connection between calls; every operation opens and closes its
/// own transport, so a connector can be shared freely.
pub struct SshConnector {
    config: SshConfig,
    verifier: Arc<KnownHostsVerifier>,
    transport: Box<dyn TransportConnector>,
    description: OnceLock<String>,
}

impl SshConnector {
    /// Validate `config` and set up the default russh transport. A configured
    /// private key is loaded here, before any connection is attempted.
    pub fn new(config: SshConfig) -> Result<Self, SshError> {
        config.validate()?;
        let transport = RusshConnector::from_config(&config)?;
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: SshConfig,
        transport: impl TransportConnector + 'static,
    ) -> Result<Self, SshError> {
        config.validate()?;
        let verifier = KnownHostsVerifier::parse(config.known_hosts.as_slice())?;
        let connector = Self {
            config,
            verifier: Arc::new(verifier),
            transport: Box::new(transport),
            description: OnceLock::new(),
        };
        log::info!("Initialized SSH connector for {}", connector.connection_description());
        Ok(connector)
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// `username@host[:port]`, computed once.
    pub fn connection_description(&self) -> &str {
        self.description
            .get_or_init(|| self.config.connection_description())
    }

    /// Liveness check. There is no long-lived connection to check, so this
    /// always succeeds.
    pub fn check_alive(&self) -> Result<(), SshError> {
        Ok(())
    }

    /// Connect and authenticate without running anything.
    pub async fn test(&self) -> Result<(), SshError> {
        log::info!("Testing SSH connection to {}", self.connection_description());
        self.session().check_login().await
    }

    /// Render the request into a command line, run it and return its standard output.
    pub async fn run_script(&self, request: &ScriptRequest) -> Result<String, SshError> {
        let description = self.connection_description();
        let command = self.encode(request);

        log::info!(target: OPERATION_LOG, "{} Script REQ {}: {}", description, request.language, command);

        match self.session().execute(&command).await {
            Ok(result) => {
                let summary = if result.stdout.is_empty() {
                    "no output".to_string()
                } else {
                    format!("output {} chars", result.stdout.chars().count())
                };
                log::info!(target: OPERATION_LOG, "{} Script RES: {}", description, summary);
                log::debug!("Script returned output\n{}", result.stdout);
                Ok(result.stdout)
            }
            Err(e) => {
                log::error!(target: OPERATION_LOG, "{} Script ERR {}", description, e);
                Err(e)
            }
        }
    }

    /// Command line `run_script` would execute for `request`.
    pub fn encode(&self, request: &ScriptRequest) -> String {
        encode(
            &request.script,
            request.arguments.as_ref(),
            self.config.argument_style,
            self.config.null_argument_policy,
        )
    }

    /// [`SshConnector::test`] on the shared runtime. Must not be called from
    /// inside another tokio runtime.
    pub fn test_blocking(&self) -> Result<(), SshError> {
        ssh_runtime().block_on(self.test())
    }

    /// [`SshConnector::run_script`] on the shared runtime. Must not be called
    /// from inside another tokio runtime.
    pub fn run_script_blocking(&self, request: &ScriptRequest) -> Result<String, SshError> {
        ssh_runtime().block_on(self.run_script(request))
    }

    fn session(&self) -> CommandSession<'_> {
        CommandSession::new(
            &self.config,
            Arc::clone(&self.verifier),
            self.transport.as_ref(),
            self.connection_description(),
        )
    }
}
