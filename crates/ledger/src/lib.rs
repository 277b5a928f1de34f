//! Durable custody and escrow ledger.
//!
//! The append-only event log in SQLite is the source of truth; batch and
//! escrow projections are folded from it and can be rebuilt at any time.
//! [`Ledger`] is the service handle the API (or a CLI) drives.

#![warn(missing_docs)]

pub mod config;
pub mod ledger;
pub mod storage;

pub use config::LedgerConfig;
pub use ledger::{Ledger, RebuildSummary, RegisterBatch};
pub use storage::Storage;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
