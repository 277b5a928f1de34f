//! Canonical constants for the ShonaliChain ledger.

/// Lowest accepted quality score.
pub const MIN_QUALITY_SCORE: u8 = 0;

/// Highest accepted quality score.
pub const MAX_QUALITY_SCORE: u8 = 100;

// Default per-role dwell-time thresholds for the hoarding heuristic.
// Deployments override these through `[hoarding]` config; the values here
// only anchor the advisory signal when nothing is configured.

/// Default dwell threshold while the farmer still holds the batch (72h).
pub const DEFAULT_FARMER_DWELL_SECS: u64 = 72 * 3600;

/// Default dwell threshold at the transporter (48h).
pub const DEFAULT_TRANSPORTER_DWELL_SECS: u64 = 48 * 3600;

/// Default dwell threshold at the wholesaler (96h).
pub const DEFAULT_WHOLESALER_DWELL_SECS: u64 = 96 * 3600;

/// Default dwell threshold at the retailer (120h).
pub const DEFAULT_RETAILER_DWELL_SECS: u64 = 120 * 3600;
