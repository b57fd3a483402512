//! Error taxonomy surfaced to callers of the connector.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of an [`SshError`], stable across messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Configuration,
    ConnectionFailed,
    Io,
    RemoteExecution,
}

/// SSH connector errors.
#[derive(Debug, Error)]
pub enum SshError {
    /// Bad or missing configuration. Raised before any network activity.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport connect, authentication or session-open failure.
    #[error("Connection to {target} failed: {reason}")]
    ConnectionFailed { target: String, reason: String },

    /// Submitting the command, reading its output or waiting for it to exit.
    #[error("I/O error: {0}")]
    Io(String),

    /// The remote process wrote to standard error. Carries that text verbatim.
    #[error("Error executing SSH command: {0}")]
    RemoteExecution(String),
}

impl SshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SshError::Configuration(_) => ErrorKind::Configuration,
            SshError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            SshError::Io(_) => ErrorKind::Io,
            SshError::RemoteExecution(_) => ErrorKind::RemoteExecution,
        }
    }

    pub(crate) fn connection_failed(target: &str, reason: impl Into<String>) -> Self {
        SshError::ConnectionFailed {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Keep an `SshError` raised below a transport seam, otherwise build one
    /// with `fallback` from the error text.
    pub(crate) fn classify(error: anyhow::Error, fallback: impl FnOnce(String) -> SshError) -> Self {
        match error.downcast::<SshError>() {
            Ok(inner) => inner,
            Err(other) => fallback(format!("{:#}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SshError::Configuration("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(
            SshError::connection_failed("jack@localhost", "refused").kind(),
            ErrorKind::ConnectionFailed
        );
        assert_eq!(SshError::Io("x".into()).kind(), ErrorKind::Io);
        assert_eq!(SshError::RemoteExecution("x".into()).kind(), ErrorKind::RemoteExecution);
    }

    #[test]
    fn test_remote_execution_message_is_verbatim() {
        let err = SshError::RemoteExecution("grep: foo: No such file\n".into());
        assert_eq!(err.to_string(), "Error executing SSH command: grep: foo: No such file\n");
    }

    #[test]
    fn test_classify_keeps_typed_error() {
        let inner = anyhow::Error::new(SshError::Configuration("bad key file".into()));
        let err = SshError::classify(inner, SshError::Io);
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_classify_falls_back() {
        let err = SshError::classify(anyhow::anyhow!("broken pipe"), SshError::Io);
        assert_eq!(err.to_string(), "I/O error: broken pipe");
    }

    #[test]
    fn test_kind_json() {
        let json = serde_json::to_string(&ErrorKind::ConnectionFailed).unwrap();
        assert_eq!(json, "\"connection-failed\"");
    }
}
