//! ct-ledger: Correlation ledger between scheduler jobs and tracking runs
//!
//! A job submitted with tracking gets two rows: a placeholder with an empty
//! run id written right after submission, and the row carrying the run id
//! once the tracking service has created it. Rows are never edited, so the
//! authoritative row for a job is the most recent one ([`Ledger::latest`]).

mod entry;
mod ledger;

pub use entry::LedgerEntry;
pub use ledger::{Entries, Ledger};
