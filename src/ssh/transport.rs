//! Seams between the session lifecycle and the SSH implementation underneath.
//!
//! Implementations report plain `anyhow` errors; the lifecycle decides which
//! [`SshError`](super::SshError) class they belong to based on the step that
//! failed. An implementation may return an `SshError` inside the `anyhow`
//! error to force a class (e.g. a configuration problem found while
//! authenticating).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::known_hosts::KnownHostsVerifier;

/// Opens authenticated-capable transports.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a transport to `host:port`. The server key must be checked
    /// with `verifier` before this returns.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        verifier: Arc<KnownHostsVerifier>,
        timeout: Duration,
    ) -> anyhow::Result<Box<dyn Transport>>;
}

/// A connected, not yet authenticated, transport.
#[async_trait]
pub trait Transport: Send {
    /// `Ok(false)` when the server rejected the credentials.
    async fn authenticate_password(&mut self, username: &str, password: &str) -> anyhow::Result<bool>;

    /// Authenticate with the identity the transport was set up with.
    async fn authenticate_public_key(&mut self, username: &str) -> anyhow::Result<bool>;

    async fn open_session(&mut self) -> anyhow::Result<Box<dyn RemoteCommand>>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> anyhow::Result<()>;
}

/// One session channel able to run a single command.
#[async_trait]
pub trait RemoteCommand: Send {
    async fn exec(&mut self, command: &str) -> anyhow::Result<()>;

    /// Read standard output and standard error until the remote side closes them.
    async fn drain(&mut self) -> anyhow::Result<CommandOutput>;

    /// Wait for the exit status or signal. Both may stay unset if the
    /// remote side closes without reporting them.
    async fn wait_exit(&mut self) -> anyhow::Result<ExitReport>;

    fn is_open(&self) -> bool;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Raw output streams of a command.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// How the remote process ended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExitReport {
    pub status: Option<u32>,
    pub signal: Option<String>,
    pub error_message: Option<String>,
}

impl ExitReport {
    pub fn is_known(&self) -> bool {
        self.status.is_some() || self.signal.is_some()
    }
}
