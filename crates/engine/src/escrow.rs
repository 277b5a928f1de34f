//! Escrow transition rules.
//!
//! Per record: `Funded -> Released | Refunded | Disputed`, and
//! `Disputed -> Released | Refunded`. Released and Refunded are final.

use shonali_core::{
    BatchStatus, DisputeOutcome, EscrowRecord, EscrowState, LedgerError, Role,
};

/// What `expire` should do with an escrow at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireAction {
    /// Still `Funded` past the deadline: auto-refund the buyer.
    Refund,
    /// Nothing to do. Terminal and disputed records are left alone, as are
    /// funded records whose deadline has not passed.
    Noop,
}

/// Validate funding inputs.
///
/// `InvalidAmount` for non-positive amounts, `EscrowAlreadyExists` when a
/// non-terminal record is already tied to the batch.
pub fn validate_fund(
    batch_id: u64,
    amount: i64,
    active_exists: bool,
) -> Result<u64, LedgerError> {
    if active_exists {
        return Err(LedgerError::EscrowAlreadyExists(batch_id));
    }
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(amount as u64)
}

/// The designed happy path: payment unlocks when the final custody
/// transfer lands. True iff the escrow is still `Funded` and the batch
/// just reached `Delivered`.
pub fn releases_on_delivery(escrow: &EscrowRecord, batch_status: BatchStatus) -> bool {
    escrow.state == EscrowState::Funded && batch_status == BatchStatus::Delivered
}

/// Check that a dispute may be raised: only a `Funded` escrow can be
/// contested.
pub fn plan_dispute(batch_id: u64, state: EscrowState) -> Result<(), LedgerError> {
    if state != EscrowState::Funded {
        return Err(LedgerError::NoActiveEscrow(batch_id));
    }
    Ok(())
}

/// Map an arbiter outcome onto a disputed escrow.
pub fn plan_resolution(
    batch_id: u64,
    state: EscrowState,
    outcome: DisputeOutcome,
) -> Result<EscrowState, LedgerError> {
    if state != EscrowState::Disputed {
        return Err(LedgerError::NoActiveEscrow(batch_id));
    }
    Ok(match outcome {
        DisputeOutcome::Release => EscrowState::Released,
        DisputeOutcome::Refund => EscrowState::Refunded,
    })
}

/// Deadline check for `expire`. Idempotent by construction: anything not
/// strictly `Funded` past its deadline is a no-op, never an error.
pub fn plan_expiry(state: EscrowState, deadline: u64, now: u64) -> ExpireAction {
    if state == EscrowState::Funded && now > deadline {
        ExpireAction::Refund
    } else {
        ExpireAction::Noop
    }
}

/// Batch status after a dispute resolves into a refund.
///
/// Custody did not complete, so the batch returns to the status its role
/// implies and the chain can continue (or a new escrow can be funded).
pub const fn status_after_refund(current_role: Role) -> BatchStatus {
    match current_role {
        Role::Farmer => BatchStatus::Created,
        Role::Transporter | Role::Wholesaler => BatchStatus::InTransit,
        Role::Retailer => BatchStatus::Delivered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shonali_core::Address;

    fn escrow(state: EscrowState) -> EscrowRecord {
        EscrowRecord {
            escrow_id: 1,
            batch_id: 1,
            buyer: Address::from([0x22; 20]),
            seller: Address::from([0x11; 20]),
            amount: 225_000,
            deadline: 1_700_086_400,
            state,
        }
    }

    #[test]
    fn funding_validates_amount_and_uniqueness() {
        assert_eq!(validate_fund(1, 0, false), Err(LedgerError::InvalidAmount(0)));
        assert_eq!(
            validate_fund(1, -5, false),
            Err(LedgerError::InvalidAmount(-5))
        );
        assert_eq!(
            validate_fund(1, 100, true),
            Err(LedgerError::EscrowAlreadyExists(1))
        );
        assert_eq!(validate_fund(1, 100, false), Ok(100));
    }

    #[test]
    fn uniqueness_is_checked_before_amount() {
        // Both violated: the duplicate-escrow violation wins.
        assert_eq!(
            validate_fund(1, 0, true),
            Err(LedgerError::EscrowAlreadyExists(1))
        );
    }

    #[test]
    fn release_requires_funded_and_delivered() {
        assert!(releases_on_delivery(
            &escrow(EscrowState::Funded),
            BatchStatus::Delivered
        ));
        assert!(!releases_on_delivery(
            &escrow(EscrowState::Disputed),
            BatchStatus::Delivered
        ));
        assert!(!releases_on_delivery(
            &escrow(EscrowState::Funded),
            BatchStatus::InTransit
        ));
    }

    #[test]
    fn only_funded_escrows_can_be_disputed() {
        assert!(plan_dispute(1, EscrowState::Funded).is_ok());
        for state in [
            EscrowState::Disputed,
            EscrowState::Released,
            EscrowState::Refunded,
        ] {
            assert_eq!(plan_dispute(1, state), Err(LedgerError::NoActiveEscrow(1)));
        }
    }

    #[test]
    fn resolution_requires_a_dispute() {
        assert_eq!(
            plan_resolution(1, EscrowState::Disputed, DisputeOutcome::Release),
            Ok(EscrowState::Released)
        );
        assert_eq!(
            plan_resolution(1, EscrowState::Disputed, DisputeOutcome::Refund),
            Ok(EscrowState::Refunded)
        );
        for state in [
            EscrowState::Funded,
            EscrowState::Released,
            EscrowState::Refunded,
        ] {
            assert_eq!(
                plan_resolution(1, state, DisputeOutcome::Release),
                Err(LedgerError::NoActiveEscrow(1))
            );
        }
    }

    #[test]
    fn expiry_refunds_only_funded_past_deadline() {
        let deadline = 1_700_086_400;
        assert_eq!(
            plan_expiry(EscrowState::Funded, deadline, deadline + 1),
            ExpireAction::Refund
        );
        // Exactly at the deadline is not past it.
        assert_eq!(
            plan_expiry(EscrowState::Funded, deadline, deadline),
            ExpireAction::Noop
        );
        for state in [
            EscrowState::Disputed,
            EscrowState::Released,
            EscrowState::Refunded,
        ] {
            assert_eq!(
                plan_expiry(state, deadline, deadline + 1_000_000),
                ExpireAction::Noop
            );
        }
    }

    #[test]
    fn refund_restores_the_role_derived_status() {
        assert_eq!(status_after_refund(Role::Farmer), BatchStatus::Created);
        assert_eq!(status_after_refund(Role::Transporter), BatchStatus::InTransit);
        assert_eq!(status_after_refund(Role::Wholesaler), BatchStatus::InTransit);
        assert_eq!(status_after_refund(Role::Retailer), BatchStatus::Delivered);
    }
}
