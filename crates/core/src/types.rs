//! Core domain types for the custody ledger.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_QUALITY_SCORE;
use crate::error::LedgerError;

/// A custodian's position in the fixed farm-to-retail sequence.
///
/// The order is total and closed: Farmer(0) < Transporter(1) <
/// Wholesaler(2) < Retailer(3). Custody only ever advances to the
/// immediate successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Registers batches; every chain starts here.
    Farmer,
    /// Moves the batch from farm gate to market.
    Transporter,
    /// Buys in bulk and holds inventory.
    Wholesaler,
    /// Final custodian; arrival here completes delivery.
    Retailer,
}

impl Role {
    /// Numeric position in the chain (0-based).
    pub const fn index(self) -> u8 {
        match self {
            Role::Farmer => 0,
            Role::Transporter => 1,
            Role::Wholesaler => 2,
            Role::Retailer => 3,
        }
    }

    /// Role at a numeric position, if any.
    pub const fn from_index(value: u8) -> Option<Self> {
        match value {
            0 => Some(Role::Farmer),
            1 => Some(Role::Transporter),
            2 => Some(Role::Wholesaler),
            3 => Some(Role::Retailer),
            _ => None,
        }
    }

    /// The next custodian role, or `None` at the end of the chain.
    pub const fn next(self) -> Option<Self> {
        match self {
            Role::Farmer => Some(Role::Transporter),
            Role::Transporter => Some(Role::Wholesaler),
            Role::Wholesaler => Some(Role::Retailer),
            Role::Retailer => None,
        }
    }

    /// Canonical lowercase string form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Farmer => "farmer",
            Role::Transporter => "transporter",
            Role::Wholesaler => "wholesaler",
            Role::Retailer => "retailer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crop variety a batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropType {
    /// Jute fiber.
    Jute,
    /// Potato.
    Potato,
    /// Paddy rice.
    Rice,
    /// Wheat.
    Wheat,
}

impl CropType {
    /// Canonical lowercase string form.
    pub const fn as_str(self) -> &'static str {
        match self {
            CropType::Jute => "jute",
            CropType::Potato => "potato",
            CropType::Rice => "rice",
            CropType::Wheat => "wheat",
        }
    }
}

impl FromStr for CropType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jute" => Ok(CropType::Jute),
            "potato" => Ok(CropType::Potato),
            "rice" => Ok(CropType::Rice),
            "wheat" => Ok(CropType::Wheat),
            other => Err(LedgerError::RejectedEvent(format!(
                "unknown crop type: {other}"
            ))),
        }
    }
}

impl fmt::Display for CropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a batch.
///
/// `Settled` is terminal; `Disputed` suspends custody until the escrow
/// dispute resolves. Batches are never deleted, only finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Registered, still at the farm.
    Created,
    /// Somewhere between farmer and retailer.
    InTransit,
    /// Final transfer into Retailer accepted.
    Delivered,
    /// An escrow dispute is open; custody is frozen.
    Disputed,
    /// Escrow released; the batch's life is over.
    Settled,
}

impl BatchStatus {
    /// Canonical lowercase string form (also the database encoding).
    pub const fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Created => "created",
            BatchStatus::InTransit => "in_transit",
            BatchStatus::Delivered => "delivered",
            BatchStatus::Disputed => "disputed",
            BatchStatus::Settled => "settled",
        }
    }

    /// Terminal statuses end the batch's lifecycle.
    pub const fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Settled)
    }
}

impl FromStr for BatchStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(BatchStatus::Created),
            "in_transit" => Ok(BatchStatus::InTransit),
            "delivered" => Ok(BatchStatus::Delivered),
            "disputed" => Ok(BatchStatus::Disputed),
            "settled" => Ok(BatchStatus::Settled),
            other => Err(LedgerError::RejectedEvent(format!(
                "unknown batch status: {other}"
            ))),
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an escrow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    /// Funds locked, waiting on delivery or deadline.
    Funded,
    /// Funds paid out to the seller. Terminal.
    Released,
    /// Funds returned to the buyer. Terminal.
    Refunded,
    /// A dispute is open; an arbiter decides release or refund.
    Disputed,
}

impl EscrowState {
    /// Canonical lowercase string form (also the database encoding).
    pub const fn as_str(self) -> &'static str {
        match self {
            EscrowState::Funded => "funded",
            EscrowState::Released => "released",
            EscrowState::Refunded => "refunded",
            EscrowState::Disputed => "disputed",
        }
    }

    /// Released and Refunded are final and immutable thereafter.
    pub const fn is_terminal(self) -> bool {
        matches!(self, EscrowState::Released | EscrowState::Refunded)
    }
}

impl FromStr for EscrowState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "funded" => Ok(EscrowState::Funded),
            "released" => Ok(EscrowState::Released),
            "refunded" => Ok(EscrowState::Refunded),
            "disputed" => Ok(EscrowState::Disputed),
            other => Err(LedgerError::RejectedEvent(format!(
                "unknown escrow state: {other}"
            ))),
        }
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arbiter decision when resolving a disputed escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Pay the seller.
    Release,
    /// Return funds to the buyer.
    Refund,
}

/// Quality score assigned at registration, 0 to 100.
///
/// Validation is enforced during both construction and deserialization so
/// out-of-range values never enter the system, and the score is immutable
/// for the batch's entire lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualityScore(u8);

impl QualityScore {
    /// Create a new score, validating the range.
    pub fn new(value: i64) -> Result<Self, LedgerError> {
        if value < 0 || value > i64::from(MAX_QUALITY_SCORE) {
            return Err(LedgerError::InvalidQualityScore(value));
        }
        Ok(QualityScore(value as u8))
    }

    /// Get the raw value.
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for QualityScore {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for QualityScore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        QualityScore::new(value).map_err(serde::de::Error::custom)
    }
}

/// A single registered unit of harvested crop, tracked end-to-end.
///
/// This is the projected state the registry folds out of the event log;
/// `version` increments on every accepted write and backs the
/// optimistic-concurrency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Unique, monotonically assigned identifier.
    pub batch_id: u64,
    /// Wallet address of the registering farmer.
    pub producer: Address,
    /// Crop variety. Immutable.
    pub crop_type: CropType,
    /// Kilograms in the batch. Positive, immutable (no splitting/merging).
    pub quantity_kg: u64,
    /// Asking price per kilogram in the smallest currency unit (poisha).
    pub unit_price: u64,
    /// Upazila-level origin (e.g. "Bogura Sadar").
    pub origin_location: String,
    /// District of origin.
    pub origin_district: String,
    /// Unix seconds at registration.
    pub harvest_timestamp: u64,
    /// Grow-only set of certification labels.
    pub certifications: BTreeSet<String>,
    /// Quality score fixed at creation.
    pub quality_score: QualityScore,
    /// Identity currently responsible for the batch.
    pub current_handler: Address,
    /// Role of the current handler; strictly increases over the lifecycle.
    pub current_role: Role,
    /// Lifecycle status.
    pub status: BatchStatus,
    /// Timestamp of the batch's latest accepted event.
    pub last_event_timestamp: u64,
    /// Optimistic-concurrency version, bumped on every accepted write.
    pub version: u64,
}

/// An immutable custody fact: who handed the batch to whom, where, when.
///
/// The registration genesis event has `from_handler == to_handler` and
/// `from_role == to_role == Farmer`; every later event advances the role by
/// exactly one and carries a strictly larger timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodyEvent {
    /// The batch changing hands.
    pub batch_id: u64,
    /// Relinquishing handler.
    pub from_handler: Address,
    /// Receiving handler.
    pub to_handler: Address,
    /// Role custody left.
    pub from_role: Role,
    /// Role custody arrived at.
    pub to_role: Role,
    /// Where the handover happened.
    pub location: String,
    /// Unix seconds of the handover.
    pub timestamp: u64,
}

/// Funds held pending confirmed delivery for one sale leg of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRecord {
    /// Unique escrow identifier.
    pub escrow_id: u64,
    /// The batch this sale leg belongs to. At most one non-terminal
    /// escrow exists per batch at a time.
    pub batch_id: u64,
    /// Paying party.
    pub buyer: Address,
    /// Receiving party.
    pub seller: Address,
    /// Locked amount in the smallest currency unit. Fixed at funding.
    pub amount: u64,
    /// Unix seconds after which an undelivered escrow auto-refunds.
    pub deadline: u64,
    /// Current state.
    pub state: EscrowState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_order_is_total_and_closed() {
        assert!(Role::Farmer < Role::Transporter);
        assert!(Role::Transporter < Role::Wholesaler);
        assert!(Role::Wholesaler < Role::Retailer);

        assert_eq!(Role::Farmer.next(), Some(Role::Transporter));
        assert_eq!(Role::Transporter.next(), Some(Role::Wholesaler));
        assert_eq!(Role::Wholesaler.next(), Some(Role::Retailer));
        assert_eq!(Role::Retailer.next(), None);

        for i in 0..=3 {
            assert_eq!(Role::from_index(i).unwrap().index(), i);
        }
        assert_eq!(Role::from_index(4), None);
    }

    #[test]
    fn quality_score_bounds() {
        assert!(QualityScore::new(-1).is_err());
        assert!(QualityScore::new(101).is_err());
        assert_eq!(QualityScore::new(0).unwrap().value(), 0);
        assert_eq!(QualityScore::new(100).unwrap().value(), 100);
    }

    #[test]
    fn quality_score_deserialization_rejects_out_of_range() {
        for invalid in ["-5", "101", "1000"] {
            let result: Result<QualityScore, _> = serde_json::from_str(invalid);
            assert!(result.is_err(), "expected {invalid} to be rejected");
        }
        let score: QualityScore = serde_json::from_str("95").unwrap();
        assert_eq!(score.value(), 95);
    }

    #[test]
    fn status_roundtrips_through_str() {
        for status in [
            BatchStatus::Created,
            BatchStatus::InTransit,
            BatchStatus::Delivered,
            BatchStatus::Disputed,
            BatchStatus::Settled,
        ] {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
        assert!("shipped".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn escrow_terminal_states() {
        assert!(!EscrowState::Funded.is_terminal());
        assert!(!EscrowState::Disputed.is_terminal());
        assert!(EscrowState::Released.is_terminal());
        assert!(EscrowState::Refunded.is_terminal());
    }

    #[test]
    fn only_settled_finalizes_a_batch() {
        assert!(BatchStatus::Settled.is_terminal());
        for status in [
            BatchStatus::Created,
            BatchStatus::InTransit,
            BatchStatus::Delivered,
            BatchStatus::Disputed,
        ] {
            assert!(!status.is_terminal());
        }
    }
}
