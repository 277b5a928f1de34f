//! The append-only event model.
//!
//! Every accepted state-changing request is recorded as exactly one
//! `LedgerEvent`. The event log is the source of truth; batch and escrow
//! projections are deterministic folds over it.

use std::collections::BTreeSet;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::types::{CropType, CustodyEvent, DisputeOutcome, QualityScore, Role};

/// A state-changing fact accepted into the ledger.
///
/// Serialized as tagged JSON (`"type"` discriminator) into the durable log
/// alongside the indexed columns, so the log stays auditable as plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A farmer registered a new batch. Doubles as the genesis custody
    /// event: `from_handler == to_handler == producer` at role Farmer.
    BatchRegistered {
        /// Assigned batch id.
        batch_id: u64,
        /// Registering farmer.
        producer: Address,
        /// Crop variety.
        crop_type: CropType,
        /// Kilograms in the batch.
        quantity_kg: u64,
        /// Asking price per kilogram, smallest currency unit.
        unit_price: u64,
        /// Upazila-level origin.
        origin_location: String,
        /// District of origin.
        origin_district: String,
        /// Initial certification labels.
        certifications: BTreeSet<String>,
        /// Quality score fixed at creation.
        quality_score: QualityScore,
        /// Unix seconds of registration.
        timestamp: u64,
    },

    /// Custody moved one role down the chain.
    CustodyTransferred {
        /// The batch changing hands.
        batch_id: u64,
        /// Relinquishing handler.
        from_handler: Address,
        /// Receiving handler.
        to_handler: Address,
        /// Role custody left.
        from_role: Role,
        /// Role custody arrived at.
        to_role: Role,
        /// Handover location.
        location: String,
        /// Unix seconds of the handover.
        timestamp: u64,
    },

    /// The current handler attached a certification label.
    CertificationAdded {
        /// The certified batch.
        batch_id: u64,
        /// Handler that added the label.
        handler: Address,
        /// The label. The set only ever grows.
        certification: String,
        /// Unix seconds.
        timestamp: u64,
    },

    /// A buyer locked funds for one sale leg of the batch.
    EscrowFunded {
        /// The batch being bought.
        batch_id: u64,
        /// Assigned escrow id.
        escrow_id: u64,
        /// Paying party.
        buyer: Address,
        /// Receiving party.
        seller: Address,
        /// Locked amount, smallest currency unit.
        amount: u64,
        /// Refund deadline, unix seconds.
        deadline: u64,
        /// Unix seconds of funding.
        timestamp: u64,
    },

    /// The funded escrow was contested.
    DisputeRaised {
        /// The disputed batch.
        batch_id: u64,
        /// The disputed escrow.
        escrow_id: u64,
        /// Free-form reason supplied by the caller.
        reason: String,
        /// Unix seconds.
        timestamp: u64,
    },

    /// An arbiter closed the dispute.
    DisputeResolved {
        /// The disputed batch.
        batch_id: u64,
        /// The disputed escrow.
        escrow_id: u64,
        /// Release or refund.
        outcome: DisputeOutcome,
        /// Unix seconds.
        timestamp: u64,
    },

    /// Funds paid out to the seller (delivery confirmed or dispute won).
    EscrowReleased {
        /// The settled batch.
        batch_id: u64,
        /// The released escrow.
        escrow_id: u64,
        /// Unix seconds.
        timestamp: u64,
    },

    /// Funds returned to the buyer (deadline passed or dispute lost).
    EscrowRefunded {
        /// The batch whose sale leg fell through.
        batch_id: u64,
        /// The refunded escrow.
        escrow_id: u64,
        /// Unix seconds.
        timestamp: u64,
    },
}

impl LedgerEvent {
    /// The batch this event belongs to.
    pub const fn batch_id(&self) -> u64 {
        match self {
            LedgerEvent::BatchRegistered { batch_id, .. }
            | LedgerEvent::CustodyTransferred { batch_id, .. }
            | LedgerEvent::CertificationAdded { batch_id, .. }
            | LedgerEvent::EscrowFunded { batch_id, .. }
            | LedgerEvent::DisputeRaised { batch_id, .. }
            | LedgerEvent::DisputeResolved { batch_id, .. }
            | LedgerEvent::EscrowReleased { batch_id, .. }
            | LedgerEvent::EscrowRefunded { batch_id, .. } => *batch_id,
        }
    }

    /// When the event happened (unix seconds).
    pub const fn timestamp(&self) -> u64 {
        match self {
            LedgerEvent::BatchRegistered { timestamp, .. }
            | LedgerEvent::CustodyTransferred { timestamp, .. }
            | LedgerEvent::CertificationAdded { timestamp, .. }
            | LedgerEvent::EscrowFunded { timestamp, .. }
            | LedgerEvent::DisputeRaised { timestamp, .. }
            | LedgerEvent::DisputeResolved { timestamp, .. }
            | LedgerEvent::EscrowReleased { timestamp, .. }
            | LedgerEvent::EscrowRefunded { timestamp, .. } => *timestamp,
        }
    }

    /// Stable event kind string (the indexed `kind` column).
    pub const fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::BatchRegistered { .. } => "batch_registered",
            LedgerEvent::CustodyTransferred { .. } => "custody_transferred",
            LedgerEvent::CertificationAdded { .. } => "certification_added",
            LedgerEvent::EscrowFunded { .. } => "escrow_funded",
            LedgerEvent::DisputeRaised { .. } => "dispute_raised",
            LedgerEvent::DisputeResolved { .. } => "dispute_resolved",
            LedgerEvent::EscrowReleased { .. } => "escrow_released",
            LedgerEvent::EscrowRefunded { .. } => "escrow_refunded",
        }
    }

    /// View this event as a custody fact, if it is one.
    ///
    /// Registration maps to the genesis custody event; transfers map
    /// one-to-one; everything else is not part of the custody timeline.
    pub fn as_custody_event(&self) -> Option<CustodyEvent> {
        match self {
            LedgerEvent::BatchRegistered {
                batch_id,
                producer,
                origin_location,
                timestamp,
                ..
            } => Some(CustodyEvent {
                batch_id: *batch_id,
                from_handler: *producer,
                to_handler: *producer,
                from_role: Role::Farmer,
                to_role: Role::Farmer,
                location: origin_location.clone(),
                timestamp: *timestamp,
            }),
            LedgerEvent::CustodyTransferred {
                batch_id,
                from_handler,
                to_handler,
                from_role,
                to_role,
                location,
                timestamp,
            } => Some(CustodyEvent {
                batch_id: *batch_id,
                from_handler: *from_handler,
                to_handler: *to_handler,
                from_role: *from_role,
                to_role: *to_role,
                location: location.clone(),
                timestamp: *timestamp,
            }),
            _ => None,
        }
    }
}

/// An event together with its position in the total order.
///
/// Sequence numbers are assigned by the log on append, increase
/// monotonically, and are never reused, even across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedEvent {
    /// Position in the log's total order.
    pub seq: u64,
    /// The recorded fact.
    pub event: LedgerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    #[test]
    fn registration_is_the_genesis_custody_event() {
        let event = LedgerEvent::BatchRegistered {
            batch_id: 1,
            producer: addr(0x11),
            crop_type: CropType::Jute,
            quantity_kg: 5000,
            unit_price: 45,
            origin_location: "Bogura Sadar".to_string(),
            origin_district: "bogura".to_string(),
            certifications: BTreeSet::new(),
            quality_score: QualityScore::new(95).unwrap(),
            timestamp: 1_700_000_000,
        };

        let genesis = event.as_custody_event().unwrap();
        assert_eq!(genesis.from_handler, genesis.to_handler);
        assert_eq!(genesis.from_role, Role::Farmer);
        assert_eq!(genesis.to_role, Role::Farmer);
        assert_eq!(genesis.location, "Bogura Sadar");
    }

    #[test]
    fn escrow_events_are_not_custody_events() {
        let event = LedgerEvent::EscrowFunded {
            batch_id: 1,
            escrow_id: 1,
            buyer: addr(0x22),
            seller: addr(0x11),
            amount: 225_000,
            deadline: 1_700_086_400,
            timestamp: 1_700_000_000,
        };
        assert!(event.as_custody_event().is_none());
    }

    #[test]
    fn event_json_is_tagged_and_stable() {
        let event = LedgerEvent::CustodyTransferred {
            batch_id: 7,
            from_handler: addr(0x11),
            to_handler: addr(0x22),
            from_role: Role::Farmer,
            to_role: Role::Transporter,
            location: "Sherpur".to_string(),
            timestamp: 1_700_086_400,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "custody_transferred");
        assert_eq!(json["from_role"], "farmer");
        assert_eq!(json["to_role"], "transporter");

        let back: LedgerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), "custody_transferred");
        assert_eq!(back.batch_id(), 7);
    }
}
