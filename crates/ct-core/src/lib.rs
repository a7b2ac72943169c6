//! ct-core: Core types and configuration for chtc-tools
//!
//! This crate provides the shared identifiers, error taxonomy, configuration
//! structures and small filesystem helpers used by the session manager,
//! the correlation ledger and the CLI.

pub mod config;
pub mod error;
pub mod lockfile;
pub mod time;
pub mod types;

pub use error::{ConfigError, LedgerError, SessionError, SubmitError};
pub use types::{Endpoint, JobId, RunId};
