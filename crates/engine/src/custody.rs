//! Custody state machine rules.
//!
//! This is the only path by which a batch's role advances: no transition
//! skips a level, regresses, or happens without the current holder's
//! authorization. Preconditions are checked in a fixed order and the first
//! violation wins, so callers see deterministic errors.

use shonali_core::{Address, Batch, BatchStatus, LedgerError, QualityScore, Role};

/// Validated outcome of a custody transfer, ready to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// Role the batch arrives at.
    pub to_role: Role,
    /// Batch status after the transfer.
    pub new_status: BatchStatus,
    /// True when the transfer lands at the retailer; the escrow engine
    /// reacts to this in the same write.
    pub completes_delivery: bool,
}

/// Validate registration inputs.
///
/// Returns the checked quantity and score; `InvalidQuantity` for
/// non-positive kilograms, `InvalidQualityScore` for values outside 0..=100.
pub fn validate_registration(
    quantity_kg: i64,
    quality_score: i64,
) -> Result<(u64, QualityScore), LedgerError> {
    if quantity_kg <= 0 {
        return Err(LedgerError::InvalidQuantity(quantity_kg));
    }
    let score = QualityScore::new(quality_score)?;
    Ok((quantity_kg as u64, score))
}

/// Check a transfer request against the batch's current projection.
///
/// Precondition order (first violation wins):
/// 1. caller is the relinquishing handler and that handler currently holds
///    the batch (`UnauthorizedTransfer`)
/// 2. the batch is not disputed or settled (`BatchFinalized`)
/// 3. a next role exists in the chain (`RoleSequenceViolation`)
/// 4. the timestamp is strictly after the batch's last accepted event
///    (`NonMonotonicTimestamp`)
///
/// Batch existence (precondition zero) is checked by the ledger before a
/// projection can be handed in here.
pub fn plan_transfer(
    batch: &Batch,
    caller: Address,
    from_handler: Address,
    timestamp: u64,
) -> Result<TransferPlan, LedgerError> {
    if caller != from_handler || from_handler != batch.current_handler {
        return Err(LedgerError::UnauthorizedTransfer {
            batch_id: batch.batch_id,
            caller,
        });
    }

    if matches!(batch.status, BatchStatus::Disputed | BatchStatus::Settled) {
        return Err(LedgerError::BatchFinalized {
            batch_id: batch.batch_id,
            status: batch.status,
        });
    }

    let to_role = batch
        .current_role
        .next()
        .ok_or(LedgerError::RoleSequenceViolation {
            batch_id: batch.batch_id,
            current_role: batch.current_role,
        })?;

    if timestamp <= batch.last_event_timestamp {
        return Err(LedgerError::NonMonotonicTimestamp {
            batch_id: batch.batch_id,
            timestamp,
            last_timestamp: batch.last_event_timestamp,
        });
    }

    let completes_delivery = to_role == Role::Retailer;
    let new_status = if completes_delivery {
        BatchStatus::Delivered
    } else {
        BatchStatus::InTransit
    };

    Ok(TransferPlan {
        to_role,
        new_status,
        completes_delivery,
    })
}
