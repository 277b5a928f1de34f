//! Error taxonomy for the ledger.
//!
//! Every write operation detects its first violation *before* anything is
//! appended to the event log, so a returned error always means the request
//! took no effect.

use alloy_primitives::Address;
use thiserror::Error;

use crate::types::{BatchStatus, Role};

/// Ledger error type.
///
/// `ConcurrentModification` is the only kind callers are expected to retry
/// (with refreshed state); everything else is a definitive rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No batch with this id has been registered.
    #[error("batch {0} not found")]
    BatchNotFound(u64),

    /// Quantity must be a positive number of kilograms.
    #[error("invalid quantity: {0} kg (must be positive)")]
    InvalidQuantity(i64),

    /// Quality score out of the accepted range.
    #[error("invalid quality score: {0} (must be between 0 and 100)")]
    InvalidQualityScore(i64),

    /// Custody may only be relinquished by its current holder.
    #[error("unauthorized transfer of batch {batch_id}: {caller} is not the current handler")]
    UnauthorizedTransfer {
        /// The batch whose custody was requested.
        batch_id: u64,
        /// The identity that issued the request.
        caller: Address,
    },

    /// The batch is disputed or settled; no further transfers are accepted.
    #[error("batch {batch_id} is finalized (status {status})")]
    BatchFinalized {
        /// The batch whose custody was requested.
        batch_id: u64,
        /// The status that blocks the transfer.
        status: BatchStatus,
    },

    /// A transfer must advance to exactly the next role in the chain.
    #[error("role sequence violation for batch {batch_id}: no valid transfer out of {current_role}")]
    RoleSequenceViolation {
        /// The batch whose custody was requested.
        batch_id: u64,
        /// The role the batch currently sits at.
        current_role: Role,
    },

    /// Event timestamps per batch are strictly increasing; no backdating.
    #[error("non-monotonic timestamp for batch {batch_id}: {timestamp} is not after {last_timestamp}")]
    NonMonotonicTimestamp {
        /// The batch whose custody was requested.
        batch_id: u64,
        /// The rejected timestamp.
        timestamp: u64,
        /// The batch's latest accepted event timestamp.
        last_timestamp: u64,
    },

    /// Another write for the same batch landed first; retry with refreshed state.
    #[error("concurrent modification of batch {batch_id} (expected version {expected_version})")]
    ConcurrentModification {
        /// The contended batch.
        batch_id: u64,
        /// The projection version the write was validated against.
        expected_version: u64,
    },

    /// At most one non-terminal escrow may exist per batch.
    #[error("a non-terminal escrow already exists for batch {0}")]
    EscrowAlreadyExists(u64),

    /// Escrow amount must be positive.
    #[error("invalid escrow amount: {0} (must be positive)")]
    InvalidAmount(i64),

    /// The operation needs an escrow in a specific live state that is absent.
    #[error("no active escrow for batch {0}")]
    NoActiveEscrow(u64),

    /// The event log refused a structurally invalid event. Fatal to the
    /// request, never to the process; the write took no effect.
    #[error("event rejected by the log: {0}")]
    RejectedEvent(String),
}

impl LedgerError {
    /// Stable machine-readable code, used as the `error.code` field on the wire.
    pub const fn code(&self) -> &'static str {
        match self {
            LedgerError::BatchNotFound(_) => "batch_not_found",
            LedgerError::InvalidQuantity(_) => "invalid_quantity",
            LedgerError::InvalidQualityScore(_) => "invalid_quality_score",
            LedgerError::UnauthorizedTransfer { .. } => "unauthorized_transfer",
            LedgerError::BatchFinalized { .. } => "batch_finalized",
            LedgerError::RoleSequenceViolation { .. } => "role_sequence_violation",
            LedgerError::NonMonotonicTimestamp { .. } => "non_monotonic_timestamp",
            LedgerError::ConcurrentModification { .. } => "concurrent_modification",
            LedgerError::EscrowAlreadyExists(_) => "escrow_already_exists",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::NoActiveEscrow(_) => "no_active_escrow",
            LedgerError::RejectedEvent(_) => "rejected_event",
        }
    }
}

/// Result type alias for LedgerError.
pub type Result<T> = std::result::Result<T, LedgerError>;
