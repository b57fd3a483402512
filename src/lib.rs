//! sshexec core: runs scripts on remote hosts over SSH
//!
//! Renders a script plus named/positional arguments into one command line,
//! runs it in a fresh, host-key-verified SSH session and returns its standard
//! output. Exposed to Rust callers through [`ssh::connector::SshConnector`]
//! and to other hosting environments through a C FFI interface.

pub mod crypto;
pub mod ffi;
pub mod ssh;

pub use ssh::arguments::{ScriptArguments, ScriptRequest};
pub use ssh::connector::SshConnector;
pub use ssh::{ArgumentStyle, AuthScheme, ErrorKind, NullArgumentPolicy, SshConfig, SshError};
