//! chtc-tools: Command-line interface for running jobs on CHTC
//!
//! Provides the `chtc` binary: one interactive authentication per ttl,
//! then submission, monitoring, file transfer and experiment tracking over
//! the shared channel.

pub mod commands;
pub mod context;
pub mod exit;
pub mod output;
pub mod scheduler;
