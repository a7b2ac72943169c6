//! Transport abstraction underneath the session manager
//!
//! A transport knows how to perform the one expensive authentication that
//! creates a master channel, and how to run commands, transfers and shells
//! as secondary streams over that channel. It never decides *when* to
//! authenticate; that policy lives in [`crate::SessionManager`].

mod openssh;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub use openssh::OpenSshTransport;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use ct_core::Endpoint;

/// Identifies the master channel for one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    /// Endpoint the channel is bound to
    pub endpoint: Endpoint,
    /// Control socket of the master connection
    pub control_path: PathBuf,
}

/// Raw result of a command run over the channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Direction of a path transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local → remote
    Upload,
    /// Remote → local
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// A recursive path transfer request
///
/// Directories are synchronised by content: the *contents* of the source
/// directory land inside the destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub local: PathBuf,
    pub remote: String,
    pub direction: Direction,
}

/// Transport-level failures, before endpoint/operation context is attached
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote side refused the credentials or the user aborted the prompt
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The master channel is gone; reconnecting may help
    #[error("channel lost: {0}")]
    ChannelLost(String),

    /// The operation itself failed
    #[error("{0}")]
    Failed(String),

    /// Spawning a local helper process failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations a channel-capable transport must provide
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform the interactive authentication and leave a master channel
    /// listening on `handle.control_path` for `ttl`.
    async fn authenticate(&self, handle: &ChannelHandle, ttl: Duration)
        -> Result<(), TransportError>;

    /// Check that the master channel answers
    async fn probe(&self, handle: &ChannelHandle) -> bool;

    /// Run a command over the channel
    async fn exec(&self, handle: &ChannelHandle, argv: &[String])
        -> Result<ExecOutput, TransportError>;

    /// Transfer a path over the channel, returning the bytes of changed data sent
    async fn transfer(&self, handle: &ChannelHandle, spec: &TransferSpec)
        -> Result<u64, TransportError>;

    /// Run an interactive TTY session (or `command` with a TTY) over the channel
    async fn shell(&self, handle: &ChannelHandle, command: &[String])
        -> Result<i32, TransportError>;

    /// Tear the master channel down
    async fn close(&self, handle: &ChannelHandle) -> Result<(), TransportError>;
}

/// Quote one word for a POSIX shell
///
/// ssh joins its arguments into a single string that the remote login
/// shell re-parses, so each argv element is quoted to arrive intact.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Quote and join an argv into a remote command line
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}
