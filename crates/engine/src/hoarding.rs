//! Hoarding heuristic.
//!
//! A batch sitting at one custodian longer than that role's threshold is
//! flagged as a supply-manipulation risk. The signal is advisory metadata
//! only: it never blocks a transition or mutates ledger state, and it
//! clears the instant a new custody event lands (the dwell clock restarts).

use serde::{Deserialize, Serialize};
use shonali_core::{
    Address, Batch, BatchStatus, Role, DEFAULT_FARMER_DWELL_SECS, DEFAULT_RETAILER_DWELL_SECS,
    DEFAULT_TRANSPORTER_DWELL_SECS, DEFAULT_WHOLESALER_DWELL_SECS,
};

/// Per-role dwell-time thresholds in seconds.
///
/// Values are deployment configuration, not correctness: the rule is fixed
/// (`dwell > threshold[currentRole]`), the numbers are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoardingThresholds {
    /// Threshold while the farmer still holds the batch.
    #[serde(default = "default_farmer_secs")]
    pub farmer_secs: u64,
    /// Threshold at the transporter.
    #[serde(default = "default_transporter_secs")]
    pub transporter_secs: u64,
    /// Threshold at the wholesaler.
    #[serde(default = "default_wholesaler_secs")]
    pub wholesaler_secs: u64,
    /// Threshold at the retailer.
    #[serde(default = "default_retailer_secs")]
    pub retailer_secs: u64,
}

fn default_farmer_secs() -> u64 {
    DEFAULT_FARMER_DWELL_SECS
}

fn default_transporter_secs() -> u64 {
    DEFAULT_TRANSPORTER_DWELL_SECS
}

fn default_wholesaler_secs() -> u64 {
    DEFAULT_WHOLESALER_DWELL_SECS
}

fn default_retailer_secs() -> u64 {
    DEFAULT_RETAILER_DWELL_SECS
}

impl Default for HoardingThresholds {
    fn default() -> Self {
        Self {
            farmer_secs: default_farmer_secs(),
            transporter_secs: default_transporter_secs(),
            wholesaler_secs: default_wholesaler_secs(),
            retailer_secs: default_retailer_secs(),
        }
    }
}

impl HoardingThresholds {
    /// Threshold for a role, in seconds.
    pub const fn for_role(&self, role: Role) -> u64 {
        match role {
            Role::Farmer => self.farmer_secs,
            Role::Transporter => self.transporter_secs,
            Role::Wholesaler => self.wholesaler_secs,
            Role::Retailer => self.retailer_secs,
        }
    }
}

/// An advisory hoarding signal for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoardingFlag {
    /// The flagged batch.
    pub batch_id: u64,
    /// Who is sitting on it.
    pub current_handler: Address,
    /// At which role.
    pub current_role: Role,
    /// Seconds since the batch's last custody movement.
    pub dwell_secs: u64,
    /// The threshold the dwell time exceeded.
    pub threshold_secs: u64,
}

/// Evaluate one batch against the thresholds.
///
/// Returns a flag iff the batch is in a non-terminal status and
/// `now - lastEventTimestamp > threshold[currentRole]`. Clocks that appear
/// to run backwards yield a dwell of zero rather than wrapping.
pub fn evaluate_dwell(
    batch: &Batch,
    thresholds: &HoardingThresholds,
    now: u64,
) -> Option<HoardingFlag> {
    if batch.status.is_terminal() {
        return None;
    }

    let dwell_secs = now.saturating_sub(batch.last_event_timestamp);
    let threshold_secs = thresholds.for_role(batch.current_role);
    if dwell_secs <= threshold_secs {
        return None;
    }

    Some(HoardingFlag {
        batch_id: batch.batch_id,
        current_handler: batch.current_handler,
        current_role: batch.current_role,
        dwell_secs,
        threshold_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shonali_core::{CropType, QualityScore};
    use std::collections::BTreeSet;

    const T0: u64 = 1_700_000_000;

    fn batch(role: Role, status: BatchStatus, last_event_timestamp: u64) -> Batch {
        Batch {
            batch_id: 1,
            producer: Address::from([0x11; 20]),
            crop_type: CropType::Potato,
            quantity_kg: 3000,
            unit_price: 35,
            origin_location: "Munshiganj Sadar".to_string(),
            origin_district: "munshiganj".to_string(),
            harvest_timestamp: T0,
            certifications: BTreeSet::new(),
            quality_score: QualityScore::new(88).unwrap(),
            current_handler: Address::from([0x33; 20]),
            current_role: role,
            status,
            last_event_timestamp,
            version: 2,
        }
    }

    #[test]
    fn flag_is_true_iff_dwell_exceeds_threshold() {
        let thresholds = HoardingThresholds::default();
        let b = batch(Role::Wholesaler, BatchStatus::InTransit, T0);

        // Exactly at the threshold: not hoarding.
        let at = T0 + thresholds.wholesaler_secs;
        assert!(evaluate_dwell(&b, &thresholds, at).is_none());

        // One second past: hoarding.
        let flag = evaluate_dwell(&b, &thresholds, at + 1).unwrap();
        assert_eq!(flag.batch_id, 1);
        assert_eq!(flag.current_role, Role::Wholesaler);
        assert_eq!(flag.dwell_secs, thresholds.wholesaler_secs + 1);
        assert_eq!(flag.threshold_secs, thresholds.wholesaler_secs);
    }

    #[test]
    fn flag_clears_when_a_custody_event_lands() {
        let thresholds = HoardingThresholds::default();
        let now = T0 + thresholds.transporter_secs + 10;

        let stale = batch(Role::Transporter, BatchStatus::InTransit, T0);
        assert!(evaluate_dwell(&stale, &thresholds, now).is_some());

        // Same wall clock, fresh custody event: the dwell clock restarted.
        let fresh = batch(Role::Transporter, BatchStatus::InTransit, now - 1);
        assert!(evaluate_dwell(&fresh, &thresholds, now).is_none());
    }

    #[test]
    fn thresholds_are_role_specific() {
        let thresholds = HoardingThresholds::default();
        let now = T0 + thresholds.transporter_secs + 1;

        let transporter = batch(Role::Transporter, BatchStatus::InTransit, T0);
        assert!(evaluate_dwell(&transporter, &thresholds, now).is_some());

        // Same dwell is fine for the wholesaler's longer threshold.
        let wholesaler = batch(Role::Wholesaler, BatchStatus::InTransit, T0);
        assert!(evaluate_dwell(&wholesaler, &thresholds, now).is_none());
    }

    #[test]
    fn settled_batches_are_never_flagged() {
        let thresholds = HoardingThresholds::default();
        let b = batch(Role::Retailer, BatchStatus::Settled, T0);
        assert!(evaluate_dwell(&b, &thresholds, T0 + 10 * thresholds.retailer_secs).is_none());
    }

    #[test]
    fn clock_skew_does_not_wrap() {
        let thresholds = HoardingThresholds::default();
        let b = batch(Role::Farmer, BatchStatus::Created, T0);
        assert!(evaluate_dwell(&b, &thresholds, T0 - 100).is_none());
    }

    #[test]
    fn thresholds_deserialize_with_defaults() {
        let thresholds: HoardingThresholds =
            serde_json::from_str(r#"{"transporter_secs": 3600}"#).unwrap();
        assert_eq!(thresholds.transporter_secs, 3600);
        assert_eq!(thresholds.wholesaler_secs, DEFAULT_WHOLESALER_DWELL_SECS);
    }
}
