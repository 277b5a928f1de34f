//! The write and read service over the event log.
//!
//! Every write follows the same discipline: read the projected state
//! inside a transaction, validate against the pure rules in
//! `shonali-engine`, append the resulting event(s), then write the
//! projection back guarded by the version the validation saw. A guard
//! miss rolls the whole transaction back as `ConcurrentModification`.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use shonali_core::{
    Address, Batch, BatchStatus, CropType, CustodyEvent, DisputeOutcome, EscrowRecord,
    EscrowState, LedgerError, LedgerEvent, Role, SequencedEvent,
};
use shonali_engine::{
    evaluate_dwell, plan_dispute, plan_expiry, plan_resolution, plan_transfer,
    releases_on_delivery, status_after_refund, validate_fund, validate_registration,
    ExpireAction, HoardingFlag, HoardingThresholds,
};

use crate::storage::Storage;

/// Inputs for registering a new batch.
#[derive(Debug, Clone)]
pub struct RegisterBatch {
    /// Registering farmer; becomes the genesis custodian.
    pub producer: Address,
    /// Crop variety.
    pub crop_type: CropType,
    /// Kilograms; validated positive.
    pub quantity_kg: i64,
    /// Asking price per kilogram, smallest currency unit.
    pub unit_price: u64,
    /// Upazila-level origin.
    pub origin_location: String,
    /// District of origin.
    pub origin_district: String,
    /// Initial certification labels.
    pub certifications: BTreeSet<String>,
    /// Quality score; validated into 0..=100.
    pub quality_score: i64,
    /// Unix seconds of registration.
    pub timestamp: u64,
}

/// Counts reported by a projection rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildSummary {
    /// Events replayed from the log.
    pub events_applied: u64,
    /// Batch rows written.
    pub batches: u64,
    /// Escrow rows written.
    pub escrows: u64,
}

/// The ledger service: one handle per process, cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    storage: Storage,
    thresholds: HoardingThresholds,
}

impl Ledger {
    /// Wrap an opened storage handle.
    pub fn new(storage: Storage, thresholds: HoardingThresholds) -> Self {
        Self {
            storage,
            thresholds,
        }
    }

    /// The underlying storage handle.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Register a new batch, assigning it the next batch id.
    pub async fn register_batch(&self, req: RegisterBatch) -> Result<Batch> {
        let (quantity_kg, quality_score) =
            validate_registration(req.quantity_kg, req.quality_score)?;

        let mut tx = self.storage.begin().await?;
        let batch_id = Storage::next_batch_id(&mut tx).await?;

        let event = LedgerEvent::BatchRegistered {
            batch_id,
            producer: req.producer,
            crop_type: req.crop_type,
            quantity_kg,
            unit_price: req.unit_price,
            origin_location: req.origin_location.clone(),
            origin_district: req.origin_district.clone(),
            certifications: req.certifications.clone(),
            quality_score,
            timestamp: req.timestamp,
        };
        let seq = Storage::append_event(&mut tx, &event).await?;

        let batch = Batch {
            batch_id,
            producer: req.producer,
            crop_type: req.crop_type,
            quantity_kg,
            unit_price: req.unit_price,
            origin_location: req.origin_location,
            origin_district: req.origin_district,
            harvest_timestamp: req.timestamp,
            certifications: req.certifications,
            quality_score,
            current_handler: req.producer,
            current_role: Role::Farmer,
            status: BatchStatus::Created,
            last_event_timestamp: req.timestamp,
            version: 1,
        };
        Storage::insert_batch(&mut tx, &batch).await?;
        tx.commit().await.context("Failed to commit registration")?;

        info!(batch_id, seq, crop = %batch.crop_type, "batch registered");
        Ok(batch)
    }

    /// Move custody one role down the chain.
    ///
    /// A transfer that lands at the retailer completes delivery; if a
    /// funded escrow is waiting on it, the release happens in the same
    /// transaction and the batch settles.
    pub async fn transfer_custody(
        &self,
        batch_id: u64,
        caller: Address,
        from_handler: Address,
        to_handler: Address,
        location: String,
        timestamp: u64,
    ) -> Result<Batch> {
        let mut tx = self.storage.begin().await?;
        let batch = Storage::get_batch_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;

        let plan = plan_transfer(&batch, caller, from_handler, timestamp)?;

        let event = LedgerEvent::CustodyTransferred {
            batch_id,
            from_handler,
            to_handler,
            from_role: batch.current_role,
            to_role: plan.to_role,
            location,
            timestamp,
        };
        Storage::append_event(&mut tx, &event).await?;

        let mut updated = batch.clone();
        updated.current_handler = to_handler;
        updated.current_role = plan.to_role;
        updated.status = plan.new_status;
        updated.last_event_timestamp = timestamp;
        updated.version = batch.version + 1;

        if plan.completes_delivery {
            if let Some(escrow) = Storage::active_escrow_for_update(&mut tx, batch_id).await? {
                if releases_on_delivery(&escrow, plan.new_status) {
                    let release = LedgerEvent::EscrowReleased {
                        batch_id,
                        escrow_id: escrow.escrow_id,
                        timestamp,
                    };
                    Storage::append_event(&mut tx, &release).await?;
                    let moved = Storage::update_escrow_state(
                        &mut tx,
                        escrow.escrow_id,
                        EscrowState::Funded,
                        EscrowState::Released,
                    )
                    .await?;
                    if !moved {
                        return Err(LedgerError::ConcurrentModification {
                            batch_id,
                            expected_version: batch.version,
                        }
                        .into());
                    }
                    updated.status = BatchStatus::Settled;
                    updated.version += 1;
                    info!(
                        batch_id,
                        escrow_id = escrow.escrow_id,
                        "escrow released on delivery"
                    );
                }
            }
        }

        let stored = Storage::update_batch_guarded(&mut tx, &updated, batch.version).await?;
        if !stored {
            return Err(LedgerError::ConcurrentModification {
                batch_id,
                expected_version: batch.version,
            }
            .into());
        }
        tx.commit().await.context("Failed to commit transfer")?;

        info!(batch_id, to_role = %updated.current_role, status = %updated.status, "custody transferred");
        Ok(updated)
    }

    /// Attach a certification label to a batch.
    ///
    /// Only the current handler may add labels, the set only grows, and
    /// re-adding an existing label is a no-op that appends nothing.
    pub async fn add_certification(
        &self,
        batch_id: u64,
        caller: Address,
        certification: String,
        timestamp: u64,
    ) -> Result<Batch> {
        let mut tx = self.storage.begin().await?;
        let batch = Storage::get_batch_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;

        if caller != batch.current_handler {
            return Err(LedgerError::UnauthorizedTransfer { batch_id, caller }.into());
        }
        if batch.status.is_terminal() {
            return Err(LedgerError::BatchFinalized {
                batch_id,
                status: batch.status,
            }
            .into());
        }
        if batch.certifications.contains(&certification) {
            return Ok(batch);
        }

        let event = LedgerEvent::CertificationAdded {
            batch_id,
            handler: caller,
            certification: certification.clone(),
            timestamp,
        };
        Storage::append_event(&mut tx, &event).await?;

        let mut updated = batch.clone();
        updated.certifications.insert(certification);
        updated.version = batch.version + 1;

        let stored = Storage::update_batch_guarded(&mut tx, &updated, batch.version).await?;
        if !stored {
            return Err(LedgerError::ConcurrentModification {
                batch_id,
                expected_version: batch.version,
            }
            .into());
        }
        tx.commit().await.context("Failed to commit certification")?;

        info!(batch_id, "certification added");
        Ok(updated)
    }

    /// Lock funds for one sale leg of a batch.
    pub async fn fund_escrow(
        &self,
        batch_id: u64,
        buyer: Address,
        seller: Address,
        amount: i64,
        deadline: u64,
        timestamp: u64,
    ) -> Result<EscrowRecord> {
        let mut tx = self.storage.begin().await?;
        let batch = Storage::get_batch_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;
        if batch.status.is_terminal() {
            return Err(LedgerError::BatchFinalized {
                batch_id,
                status: batch.status,
            }
            .into());
        }

        let active = Storage::active_escrow_for_update(&mut tx, batch_id).await?;
        let amount = validate_fund(batch_id, amount, active.is_some())?;
        let escrow_id = Storage::next_escrow_id(&mut tx).await?;

        let event = LedgerEvent::EscrowFunded {
            batch_id,
            escrow_id,
            buyer,
            seller,
            amount,
            deadline,
            timestamp,
        };
        Storage::append_event(&mut tx, &event).await?;

        let record = EscrowRecord {
            escrow_id,
            batch_id,
            buyer,
            seller,
            amount,
            deadline,
            state: EscrowState::Funded,
        };
        Storage::insert_escrow(&mut tx, &record).await?;
        self.bump_batch_version(&mut tx, &batch).await?;
        tx.commit().await.context("Failed to commit escrow funding")?;

        info!(batch_id, escrow_id, amount, "escrow funded");
        Ok(record)
    }

    /// Contest the batch's funded escrow. Freezes custody until resolved.
    pub async fn raise_dispute(
        &self,
        batch_id: u64,
        reason: String,
        timestamp: u64,
    ) -> Result<EscrowRecord> {
        let mut tx = self.storage.begin().await?;
        let batch = Storage::get_batch_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;
        let escrow = Storage::active_escrow_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::NoActiveEscrow(batch_id))?;
        plan_dispute(batch_id, escrow.state)?;

        let event = LedgerEvent::DisputeRaised {
            batch_id,
            escrow_id: escrow.escrow_id,
            reason,
            timestamp,
        };
        Storage::append_event(&mut tx, &event).await?;
        Storage::update_escrow_state(
            &mut tx,
            escrow.escrow_id,
            EscrowState::Funded,
            EscrowState::Disputed,
        )
        .await?;

        let mut updated = batch.clone();
        updated.status = BatchStatus::Disputed;
        updated.version = batch.version + 1;
        let stored = Storage::update_batch_guarded(&mut tx, &updated, batch.version).await?;
        if !stored {
            return Err(LedgerError::ConcurrentModification {
                batch_id,
                expected_version: batch.version,
            }
            .into());
        }
        tx.commit().await.context("Failed to commit dispute")?;

        warn!(batch_id, escrow_id = escrow.escrow_id, "dispute raised");
        Ok(EscrowRecord {
            state: EscrowState::Disputed,
            ..escrow
        })
    }

    /// Close a dispute with an arbiter decision.
    ///
    /// Release settles the batch; refund reopens it at the status its
    /// current role implies, so custody (or a new escrow) can continue.
    pub async fn resolve_dispute(
        &self,
        batch_id: u64,
        outcome: DisputeOutcome,
        timestamp: u64,
    ) -> Result<EscrowRecord> {
        let mut tx = self.storage.begin().await?;
        let batch = Storage::get_batch_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;
        let escrow = Storage::active_escrow_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::NoActiveEscrow(batch_id))?;
        let new_state = plan_resolution(batch_id, escrow.state, outcome)?;

        let event = LedgerEvent::DisputeResolved {
            batch_id,
            escrow_id: escrow.escrow_id,
            outcome,
            timestamp,
        };
        Storage::append_event(&mut tx, &event).await?;
        Storage::update_escrow_state(&mut tx, escrow.escrow_id, EscrowState::Disputed, new_state)
            .await?;

        let mut updated = batch.clone();
        updated.status = match outcome {
            DisputeOutcome::Release => BatchStatus::Settled,
            DisputeOutcome::Refund => status_after_refund(batch.current_role),
        };
        updated.version = batch.version + 1;
        let stored = Storage::update_batch_guarded(&mut tx, &updated, batch.version).await?;
        if !stored {
            return Err(LedgerError::ConcurrentModification {
                batch_id,
                expected_version: batch.version,
            }
            .into());
        }
        tx.commit().await.context("Failed to commit resolution")?;

        info!(batch_id, escrow_id = escrow.escrow_id, outcome = ?outcome, "dispute resolved");
        Ok(EscrowRecord {
            state: new_state,
            ..escrow
        })
    }

    /// Refund the batch's escrow if it is still funded past its deadline.
    ///
    /// Idempotent: absent, disputed, or already-terminal escrows (and
    /// deadlines not yet passed) return `Ok(None)` and write nothing. The
    /// batch's status is untouched; only its version advances.
    pub async fn expire_escrow(&self, batch_id: u64, now: u64) -> Result<Option<EscrowRecord>> {
        let mut tx = self.storage.begin().await?;
        let batch = Storage::get_batch_for_update(&mut tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;
        let Some(escrow) = Storage::active_escrow_for_update(&mut tx, batch_id).await? else {
            return Ok(None);
        };
        match plan_expiry(escrow.state, escrow.deadline, now) {
            ExpireAction::Noop => Ok(None),
            ExpireAction::Refund => {
                let event = LedgerEvent::EscrowRefunded {
                    batch_id,
                    escrow_id: escrow.escrow_id,
                    timestamp: now,
                };
                Storage::append_event(&mut tx, &event).await?;
                Storage::update_escrow_state(
                    &mut tx,
                    escrow.escrow_id,
                    EscrowState::Funded,
                    EscrowState::Refunded,
                )
                .await?;
                self.bump_batch_version(&mut tx, &batch).await?;
                tx.commit().await.context("Failed to commit expiry")?;

                info!(batch_id, escrow_id = escrow.escrow_id, "escrow expired, buyer refunded");
                Ok(Some(EscrowRecord {
                    state: EscrowState::Refunded,
                    ..escrow
                }))
            }
        }
    }

    /// Sweep every funded escrow past its deadline. Individual failures
    /// are logged and skipped so one contended batch cannot stall the
    /// sweep. Returns the number of escrows refunded.
    pub async fn expire_due_escrows(&self, now: u64) -> Result<u64> {
        let due = self.storage.funded_escrows_due(now).await?;
        let mut refunded = 0u64;
        for escrow in due {
            match self.expire_escrow(escrow.batch_id, now).await {
                Ok(Some(_)) => refunded += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(batch_id = escrow.batch_id, error = %e, "expiry sweep skipped batch")
                }
            }
        }
        if refunded > 0 {
            info!(refunded, "expiry sweep refunded escrows");
        }
        Ok(refunded)
    }

    /// Read one batch's projected state.
    pub async fn get_batch(&self, batch_id: u64) -> Result<Batch> {
        self.storage
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| LedgerError::BatchNotFound(batch_id).into())
    }

    /// All projected batches.
    pub async fn list_batches(&self) -> Result<Vec<Batch>> {
        self.storage.list_batches().await
    }

    /// The batch's most recent escrow, any state.
    pub async fn get_escrow(&self, batch_id: u64) -> Result<EscrowRecord> {
        self.storage
            .latest_escrow_for_batch(batch_id)
            .await?
            .ok_or_else(|| LedgerError::NoActiveEscrow(batch_id).into())
    }

    /// The batch's full custody timeline, genesis event first.
    pub async fn trace_batch(&self, batch_id: u64) -> Result<Vec<CustodyEvent>> {
        let events = self.storage.events_for_batch(batch_id).await?;
        if events.is_empty() {
            return Err(LedgerError::BatchNotFound(batch_id).into());
        }
        Ok(events
            .iter()
            .filter_map(|e| e.event.as_custody_event())
            .collect())
    }

    /// Events from the log, starting at `from`.
    pub async fn events_from(&self, from: u64) -> Result<Vec<SequencedEvent>> {
        self.storage.read_events_from(from).await
    }

    /// Advisory hoarding flags across all non-terminal batches.
    pub async fn hoarding_flags(&self, now: u64) -> Result<Vec<HoardingFlag>> {
        let batches = self.storage.list_open_batches().await?;
        Ok(batches
            .iter()
            .filter_map(|b| evaluate_dwell(b, &self.thresholds, now))
            .collect())
    }

    /// Throw away both projections and refold them from the event log.
    ///
    /// The fold is deterministic, so the rebuilt rows (including versions)
    /// are identical to the ones the write paths maintained.
    pub async fn rebuild_projection(&self) -> Result<RebuildSummary> {
        let mut tx = self.storage.begin().await?;
        Storage::clear_projections(&mut tx).await?;
        let events = Storage::all_events(&mut tx).await?;

        let mut batches: BTreeMap<u64, Batch> = BTreeMap::new();
        let mut escrows: BTreeMap<u64, EscrowRecord> = BTreeMap::new();
        for sequenced in &events {
            apply_event(&mut batches, &mut escrows, &sequenced.event)?;
        }

        let summary = RebuildSummary {
            events_applied: events.len() as u64,
            batches: batches.len() as u64,
            escrows: escrows.len() as u64,
        };
        for batch in batches.values() {
            Storage::insert_batch(&mut tx, batch).await?;
        }
        for escrow in escrows.values() {
            Storage::insert_escrow(&mut tx, escrow).await?;
        }
        tx.commit().await.context("Failed to commit rebuild")?;

        info!(
            events = summary.events_applied,
            batches = summary.batches,
            escrows = summary.escrows,
            "projection rebuilt from event log"
        );
        Ok(summary)
    }

    /// Bump only the version column, guarded. Used by escrow writes that
    /// leave the rest of the batch row alone but must still contend with
    /// concurrent writers.
    async fn bump_batch_version(
        &self,
        conn: &mut sqlx::SqliteConnection,
        batch: &Batch,
    ) -> Result<()> {
        let mut updated = batch.clone();
        updated.version = batch.version + 1;
        let stored = Storage::update_batch_guarded(conn, &updated, batch.version).await?;
        if !stored {
            return Err(LedgerError::ConcurrentModification {
                batch_id: batch.batch_id,
                expected_version: batch.version,
            }
            .into());
        }
        Ok(())
    }
}

/// One step of the projection fold. Mirrors exactly what the write paths
/// do to the rows, event by event.
fn apply_event(
    batches: &mut BTreeMap<u64, Batch>,
    escrows: &mut BTreeMap<u64, EscrowRecord>,
    event: &LedgerEvent,
) -> Result<()> {
    match event {
        LedgerEvent::BatchRegistered {
            batch_id,
            producer,
            crop_type,
            quantity_kg,
            unit_price,
            origin_location,
            origin_district,
            certifications,
            quality_score,
            timestamp,
        } => {
            batches.insert(
                *batch_id,
                Batch {
                    batch_id: *batch_id,
                    producer: *producer,
                    crop_type: *crop_type,
                    quantity_kg: *quantity_kg,
                    unit_price: *unit_price,
                    origin_location: origin_location.clone(),
                    origin_district: origin_district.clone(),
                    harvest_timestamp: *timestamp,
                    certifications: certifications.clone(),
                    quality_score: *quality_score,
                    current_handler: *producer,
                    current_role: Role::Farmer,
                    status: BatchStatus::Created,
                    last_event_timestamp: *timestamp,
                    version: 1,
                },
            );
        }
        LedgerEvent::CustodyTransferred {
            batch_id,
            to_handler,
            to_role,
            timestamp,
            ..
        } => {
            let batch = fold_batch(batches, *batch_id)?;
            batch.current_handler = *to_handler;
            batch.current_role = *to_role;
            batch.status = if *to_role == Role::Retailer {
                BatchStatus::Delivered
            } else {
                BatchStatus::InTransit
            };
            batch.last_event_timestamp = *timestamp;
            batch.version += 1;
        }
        LedgerEvent::CertificationAdded {
            batch_id,
            certification,
            ..
        } => {
            let batch = fold_batch(batches, *batch_id)?;
            batch.certifications.insert(certification.clone());
            batch.version += 1;
        }
        LedgerEvent::EscrowFunded {
            batch_id,
            escrow_id,
            buyer,
            seller,
            amount,
            deadline,
            ..
        } => {
            escrows.insert(
                *escrow_id,
                EscrowRecord {
                    escrow_id: *escrow_id,
                    batch_id: *batch_id,
                    buyer: *buyer,
                    seller: *seller,
                    amount: *amount,
                    deadline: *deadline,
                    state: EscrowState::Funded,
                },
            );
            fold_batch(batches, *batch_id)?.version += 1;
        }
        LedgerEvent::DisputeRaised {
            batch_id,
            escrow_id,
            ..
        } => {
            fold_escrow(escrows, *escrow_id)?.state = EscrowState::Disputed;
            let batch = fold_batch(batches, *batch_id)?;
            batch.status = BatchStatus::Disputed;
            batch.version += 1;
        }
        LedgerEvent::DisputeResolved {
            batch_id,
            escrow_id,
            outcome,
            ..
        } => {
            fold_escrow(escrows, *escrow_id)?.state = match outcome {
                DisputeOutcome::Release => EscrowState::Released,
                DisputeOutcome::Refund => EscrowState::Refunded,
            };
            let batch = fold_batch(batches, *batch_id)?;
            batch.status = match outcome {
                DisputeOutcome::Release => BatchStatus::Settled,
                DisputeOutcome::Refund => status_after_refund(batch.current_role),
            };
            batch.version += 1;
        }
        LedgerEvent::EscrowReleased {
            batch_id,
            escrow_id,
            ..
        } => {
            fold_escrow(escrows, *escrow_id)?.state = EscrowState::Released;
            let batch = fold_batch(batches, *batch_id)?;
            batch.status = BatchStatus::Settled;
            batch.version += 1;
        }
        LedgerEvent::EscrowRefunded {
            batch_id,
            escrow_id,
            ..
        } => {
            // Deadline expiry: the batch keeps its status, only the escrow
            // leg closes.
            fold_escrow(escrows, *escrow_id)?.state = EscrowState::Refunded;
            fold_batch(batches, *batch_id)?.version += 1;
        }
    }
    Ok(())
}

fn fold_batch(batches: &mut BTreeMap<u64, Batch>, batch_id: u64) -> Result<&mut Batch> {
    batches
        .get_mut(&batch_id)
        .ok_or_else(|| anyhow!("event log references unknown batch {batch_id}"))
}

fn fold_escrow(
    escrows: &mut BTreeMap<u64, EscrowRecord>,
    escrow_id: u64,
) -> Result<&mut EscrowRecord> {
    escrows
        .get_mut(&escrow_id)
        .ok_or_else(|| anyhow!("event log references unknown escrow {escrow_id}"))
}
