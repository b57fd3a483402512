//! Per-call session lifecycle.
//!
//! connect → verify host → authenticate → open session → exec → drain →
//! wait for exit → close session → disconnect.
//!
//! Nothing outlives a call: every run opens its own transport and tears it
//! down again, whatever the outcome. Teardown failures are logged and
//! dropped so they never replace the result of the command itself.

use std::sync::Arc;
use std::time::Duration;

use super::known_hosts::KnownHostsVerifier;
use super::transport::{ExitReport, RemoteCommand, Transport, TransportConnector};
use super::{AuthScheme, SshConfig, SshError};

/// Outcome of a command that completed without writing to standard error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitReport,
}

/// Drives one connect/execute/disconnect sequence.
pub struct CommandSession<'a> {
    config: &'a SshConfig,
    verifier: Arc<KnownHostsVerifier>,
    connector: &'a dyn TransportConnector,
    description: &'a str,
}

impl<'a> CommandSession<'a> {
    pub fn new(
        config: &'a SshConfig,
        verifier: Arc<KnownHostsVerifier>,
        connector: &'a dyn TransportConnector,
        description: &'a str,
    ) -> Self {
        Self {
            config,
            verifier,
            connector,
            description,
        }
    }

    /// Connect and authenticate, then tear everything down.
    pub async fn check_login(&self) -> Result<(), SshError> {
        let mut transport = self.connect().await?;
        let result = self.authenticate(transport.as_mut()).await;
        self.disconnect(transport.as_mut()).await;
        result
    }

    /// Run `command` in a fresh session and return its output.
    ///
    /// Any standard error output fails the call, whatever the exit status.
    pub async fn execute(&self, command: &str) -> Result<CommandResult, SshError> {
        let mut transport = self.connect().await?;

        let result = match self.authenticate(transport.as_mut()).await {
            Ok(()) => self.run_in_session(transport.as_mut(), command).await,
            Err(e) => Err(e),
        };

        self.disconnect(transport.as_mut()).await;
        result
    }

    async fn connect(&self) -> Result<Box<dyn Transport>, SshError> {
        log::debug!("Connecting to {}", self.description);
        let host_desc = self.config.host_description();

        let transport = self
            .connector
            .connect(
                &self.config.host,
                self.config.port,
                Arc::clone(&self.verifier),
                self.config.connect_timeout(),
            )
            .await
            .map_err(|e| {
                SshError::classify(e, |reason| {
                    log::error!("Error creating SSH connection to {}: {}", host_desc, reason);
                    SshError::connection_failed(
                        &host_desc,
                        format!("Error creating SSH connection: {}", reason),
                    )
                })
            })?;

        Ok(transport)
    }

    async fn authenticate(&self, transport: &mut dyn Transport) -> Result<(), SshError> {
        let username = self.config.username.as_str();
        let host_desc = self.config.host_description();
        let scheme = self.config.authentication_scheme;

        let outcome = match scheme {
            AuthScheme::Password => {
                let password = self.config.password.as_ref().ok_or_else(|| {
                    SshError::Configuration(format!(
                        "No authentication password configured for scheme '{}'",
                        scheme
                    ))
                })?;
                log::debug!("Authenticating to {} using password authentication", self.description);
                password
                    .access_async(|pw| async move { transport.authenticate_password(username, &pw).await })
                    .await
                    .map_err(|e| SshError::Configuration(format!("Unable to access password: {}", e)))?
            }
            AuthScheme::PublicKey => {
                log::debug!("Authenticating to {} using public key authentication", self.description);
                transport.authenticate_public_key(username).await
            }
        };

        let fail = |reason: String| {
            log::error!("SSH {} authentication as {} to {} failed: {}", scheme, username, host_desc, reason);
            SshError::connection_failed(
                self.description,
                format!("SSH {} authentication as {} to {} failed: {}", scheme, username, host_desc, reason),
            )
        };

        match outcome {
            Ok(true) => {
                log::debug!("Authentication to {} successful", self.description);
                Ok(())
            }
            Ok(false) => Err(fail("credentials rejected by server".to_string())),
            Err(e) => Err(SshError::classify(e, fail)),
        }
    }

    async fn run_in_session(&self, transport: &mut dyn Transport, command: &str) -> Result<CommandResult, SshError> {
        let mut remote = transport.open_session().await.map_err(|e| {
            SshError::classify(e, |reason| {
                log::error!("Communication error while creating SSH session for {}: {}", self.description, reason);
                SshError::connection_failed(
                    self.description,
                    format!("Communication error while creating SSH session: {}", reason),
                )
            })
        })?;
        log::info!("Connection to {} fully established", self.description);

        let result = self.exec_and_drain(remote.as_mut(), command).await;
        self.close_session(remote.as_mut()).await;
        result
    }

    async fn exec_and_drain(&self, remote: &mut dyn RemoteCommand, command: &str) -> Result<CommandResult, SshError> {
        log::debug!("Executing SSH command: {}", command);

        remote.exec(command).await.map_err(|e| {
            SshError::classify(e, |reason| {
                SshError::Io(format!("Network error while executing SSH command: {}", reason))
            })
        })?;

        let output = remote.drain().await.map_err(|e| {
            SshError::classify(e, |reason| {
                SshError::Io(format!("Error reading output of SSH command: {}", reason))
            })
        })?;
        let stdout = output.stdout_string();
        let stderr = output.stderr_string();
        log::debug!("SSH command output: {}", stdout);

        // Exit status is never a failure signal here, only stderr output is.
        if !stderr.is_empty() {
            log::error!(
                "Error executing SSH command on {}\n-- command: {}\n-- output: {}\n-- error: {}",
                self.description,
                command,
                stdout,
                stderr
            );
            return Err(SshError::RemoteExecution(stderr));
        }

        let exit = wait_for_exit(remote, self.config.exit_timeout()).await?;
        log::debug!(
            "SSH command exit status: {:?}, signal: {:?}",
            exit.status,
            exit.signal
        );

        Ok(CommandResult { stdout, stderr, exit })
    }

    async fn close_session(&self, remote: &mut dyn RemoteCommand) {
        if !remote.is_open() {
            return;
        }
        log::debug!("Closing session to {}", self.description);
        if let Err(e) = remote.close().await {
            log::warn!("Error closing SSH session for {}: {} (ignoring)", self.description, e);
        }
    }

    async fn disconnect(&self, transport: &mut dyn Transport) {
        if !transport.is_connected() {
            return;
        }
        log::debug!("Disconnecting from {}", self.description);
        match transport.disconnect().await {
            Ok(()) => log::info!("Connection to {} disconnected", self.description),
            Err(e) => log::warn!("Error disconnecting SSH session for {}: {} (ignoring)", self.description, e),
        }
    }
}

async fn wait_for_exit(remote: &mut dyn RemoteCommand, limit: Duration) -> Result<ExitReport, SshError> {
    match tokio::time::timeout(limit, remote.wait_exit()).await {
        Ok(Ok(exit)) => Ok(exit),
        Ok(Err(e)) => Err(SshError::classify(e, |reason| {
            SshError::Io(format!("Error \"joining\" SSH command: {}", reason))
        })),
        Err(_) => Err(SshError::Io(format!(
            "SSH command did not exit within {}s",
            limit.as_secs()
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::GuardedSecret;
    use crate::ssh::transport::CommandOutput;
    use crate::ssh::ErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted behaviour of the mock transport.
    #[derive(Clone, Default)]
    pub(crate) struct Script {
        pub connect_error: Option<&'static str>,
        pub reject_auth: bool,
        pub auth_error: Option<&'static str>,
        pub session_error: Option<&'static str>,
        pub exec_error: Option<&'static str>,
        pub drain_error: Option<&'static str>,
        pub stdout: &'static str,
        pub stderr: &'static str,
        pub exit: ExitReport,
        pub hang_on_exit: bool,
        pub close_error: bool,
        pub disconnect_error: bool,
    }

    /// Connector whose transports follow a [`Script`] and log every call.
    #[derive(Clone, Default)]
    pub(crate) struct MockConnector {
        pub script: Script,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockConnector {
        pub fn new(script: Script) -> Self {
            Self {
                script,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn push(calls: &Arc<Mutex<Vec<String>>>, call: impl Into<String>) {
        calls.lock().unwrap().push(call.into());
    }

    #[async_trait]
    impl TransportConnector for MockConnector {
        async fn connect(
            &self,
            host: &str,
            port: u16,
            _verifier: Arc<KnownHostsVerifier>,
            _timeout: Duration,
        ) -> anyhow::Result<Box<dyn Transport>> {
            push(&self.calls, format!("connect {}:{}", host, port));
            if let Some(e) = self.script.connect_error {
                anyhow::bail!(e);
            }
            Ok(Box::new(MockTransport {
                script: self.script.clone(),
                calls: Arc::clone(&self.calls),
                connected: true,
            }))
        }
    }

    struct MockTransport {
        script: Script,
        calls: Arc<Mutex<Vec<String>>>,
        connected: bool,
    }

    impl MockTransport {
        fn auth_result(&self) -> anyhow::Result<bool> {
            match self.script.auth_error {
                Some(e) => Err(anyhow::anyhow!(e)),
                None => Ok(!self.script.reject_auth),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn authenticate_password(&mut self, username: &str, password: &str) -> anyhow::Result<bool> {
            push(&self.calls, format!("auth-password {} {}", username, password));
            self.auth_result()
        }

        async fn authenticate_public_key(&mut self, username: &str) -> anyhow::Result<bool> {
            push(&self.calls, format!("auth-public-key {}", username));
            self.auth_result()
        }

        async fn open_session(&mut self) -> anyhow::Result<Box<dyn RemoteCommand>> {
            push(&self.calls, "open-session");
            if let Some(e) = self.script.session_error {
                anyhow::bail!(e);
            }
            Ok(Box::new(MockCommand {
                script: self.script.clone(),
                calls: Arc::clone(&self.calls),
                open: true,
            }))
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn disconnect(&mut self) -> anyhow::Result<()> {
            push(&self.calls, "disconnect");
            self.connected = false;
            if self.script.disconnect_error {
                anyhow::bail!("connection reset");
            }
            Ok(())
        }
    }

    struct MockCommand {
        script: Script,
        calls: Arc<Mutex<Vec<String>>>,
        open: bool,
    }

    #[async_trait]
    impl RemoteCommand for MockCommand {
        async fn exec(&mut self, command: &str) -> anyhow::Result<()> {
            push(&self.calls, format!("exec {}", command));
            if let Some(e) = self.script.exec_error {
                anyhow::bail!(e);
            }
            Ok(())
        }

        async fn drain(&mut self) -> anyhow::Result<CommandOutput> {
            push(&self.calls, "drain");
            if let Some(e) = self.script.drain_error {
                anyhow::bail!(e);
            }
            Ok(CommandOutput {
                stdout: self.script.stdout.as_bytes().to_vec(),
                stderr: self.script.stderr.as_bytes().to_vec(),
            })
        }

        async fn wait_exit(&mut self) -> anyhow::Result<ExitReport> {
            push(&self.calls, "wait-exit");
            if self.script.hang_on_exit {
                std::future::pending::<()>().await;
            }
            Ok(self.script.exit.clone())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            push(&self.calls, "close-session");
            self.open = false;
            if self.script.close_error {
                anyhow::bail!("channel already gone");
            }
            Ok(())
        }
    }

    pub(crate) fn test_config() -> SshConfig {
        SshConfig {
            host: "localhost".to_string(),
            username: "jack".to_string(),
            password: Some(GuardedSecret::new("qwe123").unwrap()),
            ..Default::default()
        }
    }

    async fn run(config: &SshConfig, connector: &MockConnector, command: &str) -> Result<CommandResult, SshError> {
        let verifier = Arc::new(KnownHostsVerifier::default());
        CommandSession::new(config, verifier, connector, "jack@localhost")
            .execute(command)
            .await
    }

    #[tokio::test]
    async fn test_full_sequence() {
        let connector = MockConnector::new(Script {
            stdout: "Hello World\n",
            exit: ExitReport {
                status: Some(0),
                ..Default::default()
            },
            ..Default::default()
        });

        let result = run(&test_config(), &connector, "echo \"Hello World\"").await.unwrap();
        assert_eq!(result.stdout, "Hello World\n");
        assert_eq!(result.exit.status, Some(0));
        assert_eq!(
            connector.calls(),
            vec![
                "connect localhost:22",
                "auth-password jack qwe123",
                "open-session",
                "exec echo \"Hello World\"",
                "drain",
                "wait-exit",
                "close-session",
                "disconnect",
            ]
        );
    }

    #[tokio::test]
    async fn test_stderr_fails_even_with_zero_exit() {
        let connector = MockConnector::new(Script {
            stdout: "partial\n",
            stderr: "warning: something\n",
            exit: ExitReport {
                status: Some(0),
                ..Default::default()
            },
            ..Default::default()
        });

        let err = run(&test_config(), &connector, "cmd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteExecution);
        match err {
            SshError::RemoteExecution(text) => assert_eq!(text, "warning: something\n"),
            other => panic!("unexpected error {:?}", other),
        }
        let calls = connector.calls();
        assert!(!calls.contains(&"wait-exit".to_string()));
        assert!(calls.ends_with(&["close-session".to_string(), "disconnect".to_string()]));
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_succeeds() {
        let connector = MockConnector::new(Script {
            exit: ExitReport {
                status: Some(1),
                ..Default::default()
            },
            ..Default::default()
        });
        let result = run(&test_config(), &connector, "grep nothing /etc/hosts").await.unwrap();
        assert_eq!(result.stdout, "");
        assert_eq!(result.exit.status, Some(1));
    }

    #[tokio::test]
    async fn test_missing_exit_status_succeeds() {
        let connector = MockConnector::new(Script {
            stdout: "ok",
            ..Default::default()
        });
        let result = run(&test_config(), &connector, "Get-Date").await.unwrap();
        assert_eq!(result.exit, ExitReport::default());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let connector = MockConnector::new(Script {
            connect_error: Some("connection refused"),
            ..Default::default()
        });
        let err = run(&test_config(), &connector, "cmd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(connector.calls(), vec!["connect localhost:22"]);
    }

    #[tokio::test]
    async fn test_auth_rejected_disconnects() {
        let connector = MockConnector::new(Script {
            reject_auth: true,
            ..Default::default()
        });
        let err = run(&test_config(), &connector, "cmd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(err.to_string().contains("authentication as jack to localhost failed"));
        assert_eq!(
            connector.calls(),
            vec!["connect localhost:22", "auth-password jack qwe123", "disconnect"]
        );
    }

    #[tokio::test]
    async fn test_auth_transport_error() {
        let connector = MockConnector::new(Script {
            auth_error: Some("broken pipe"),
            ..Default::default()
        });
        let err = run(&test_config(), &connector, "cmd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(err.to_string().contains("broken pipe"));
    }

    #[tokio::test]
    async fn test_public_key_scheme() {
        let config = SshConfig {
            authentication_scheme: AuthScheme::PublicKey,
            password: None,
            private_key_path: Some("/home/jack/.ssh/id_ed25519".into()),
            ..test_config()
        };
        let connector = MockConnector::new(Script::default());
        run(&config, &connector, "id").await.unwrap();
        assert_eq!(connector.calls()[1], "auth-public-key jack");
    }

    #[tokio::test]
    async fn test_missing_password_is_configuration_error() {
        let config = SshConfig {
            password: None,
            ..test_config()
        };
        let connector = MockConnector::new(Script::default());
        let err = run(&config, &connector, "id").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(connector.calls(), vec!["connect localhost:22", "disconnect"]);
    }

    #[tokio::test]
    async fn test_session_open_failure() {
        let connector = MockConnector::new(Script {
            session_error: Some("administratively prohibited"),
            ..Default::default()
        });
        let err = run(&test_config(), &connector, "cmd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(connector.calls().last().unwrap(), "disconnect");
    }

    #[tokio::test]
    async fn test_exec_and_drain_failures_are_io() {
        for script in [
            Script {
                exec_error: Some("channel closed"),
                ..Default::default()
            },
            Script {
                drain_error: Some("read failed"),
                ..Default::default()
            },
        ] {
            let connector = MockConnector::new(script);
            let err = run(&test_config(), &connector, "cmd").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Io);
            let calls = connector.calls();
            assert!(calls.ends_with(&["close-session".to_string(), "disconnect".to_string()]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_wait_times_out() {
        let connector = MockConnector::new(Script {
            stdout: "done",
            hang_on_exit: true,
            ..Default::default()
        });
        let err = run(&test_config(), &connector, "sleep 600").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("did not exit within 5s"));
        assert!(connector.calls().ends_with(&["close-session".to_string(), "disconnect".to_string()]));
    }

    #[tokio::test]
    async fn test_teardown_errors_are_swallowed() {
        let connector = MockConnector::new(Script {
            stdout: "fine",
            close_error: true,
            disconnect_error: true,
            ..Default::default()
        });
        let result = run(&test_config(), &connector, "cmd").await.unwrap();
        assert_eq!(result.stdout, "fine");
    }

    #[tokio::test]
    async fn test_check_login_does_not_open_session() {
        let connector = MockConnector::new(Script::default());
        let verifier = Arc::new(KnownHostsVerifier::default());
        let config = test_config();
        CommandSession::new(&config, verifier, &connector, "jack@localhost")
            .check_login()
            .await
            .unwrap();
        assert_eq!(
            connector.calls(),
            vec!["connect localhost:22", "auth-password jack qwe123", "disconnect"]
        );
    }
}
