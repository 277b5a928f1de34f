//! Batch projection rows.

use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use shonali_core::{Address, Batch, BatchStatus, CropType, QualityScore, Role};

use super::Storage;

fn column_address(row: &SqliteRow, column: &str) -> Result<Address> {
    let bytes: Vec<u8> = row.get(column);
    Address::try_from(bytes.as_slice())
        .with_context(|| format!("Invalid address in column {column}"))
}

fn row_to_batch(row: &SqliteRow) -> Result<Batch> {
    let batch_id: i64 = row.get("batch_id");
    let crop_type: String = row.get("crop_type");
    let quantity_kg: i64 = row.get("quantity_kg");
    let unit_price: i64 = row.get("unit_price");
    let harvest_ts: i64 = row.get("harvest_ts");
    let certifications: String = row.get("certifications");
    let quality_score: i64 = row.get("quality_score");
    let current_role: i64 = row.get("current_role");
    let status: String = row.get("status");
    let last_custody_ts: i64 = row.get("last_custody_ts");
    let version: i64 = row.get("version");

    let certifications: BTreeSet<String> =
        serde_json::from_str(&certifications).context("Failed to decode certifications column")?;

    Ok(Batch {
        batch_id: batch_id as u64,
        producer: column_address(row, "producer")?,
        crop_type: CropType::from_str(&crop_type)?,
        quantity_kg: quantity_kg as u64,
        unit_price: unit_price as u64,
        origin_location: row.get("origin_location"),
        origin_district: row.get("origin_district"),
        harvest_timestamp: harvest_ts as u64,
        certifications,
        quality_score: QualityScore::new(quality_score)?,
        current_handler: column_address(row, "current_handler")?,
        current_role: Role::from_index(current_role as u8)
            .ok_or_else(|| anyhow!("invalid role index {current_role} in batches row"))?,
        status: BatchStatus::from_str(&status)?,
        last_event_timestamp: last_custody_ts as u64,
        version: version as u64,
    })
}

impl Storage {
    /// Next batch id. Derived from the event log, not the projection, so
    /// ids stay unique across projection rebuilds.
    pub async fn next_batch_id(conn: &mut SqliteConnection) -> Result<u64> {
        let next: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(batch_id), 0) + 1 FROM events")
            .fetch_one(&mut *conn)
            .await
            .context("Failed to allocate batch id")?;
        Ok(next as u64)
    }

    /// Insert a freshly registered batch row.
    pub async fn insert_batch(conn: &mut SqliteConnection, batch: &Batch) -> Result<()> {
        let certifications = serde_json::to_string(&batch.certifications)
            .context("Failed to encode certifications")?;
        sqlx::query(
            r#"
            INSERT INTO batches (
                batch_id, producer, crop_type, quantity_kg, unit_price,
                origin_location, origin_district, harvest_ts, certifications,
                quality_score, current_handler, current_role, status,
                last_custody_ts, version
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch.batch_id as i64)
        .bind(batch.producer.as_slice())
        .bind(batch.crop_type.as_str())
        .bind(batch.quantity_kg as i64)
        .bind(batch.unit_price as i64)
        .bind(&batch.origin_location)
        .bind(&batch.origin_district)
        .bind(batch.harvest_timestamp as i64)
        .bind(&certifications)
        .bind(i64::from(batch.quality_score.value()))
        .bind(batch.current_handler.as_slice())
        .bind(i64::from(batch.current_role.index()))
        .bind(batch.status.as_str())
        .bind(batch.last_event_timestamp as i64)
        .bind(batch.version as i64)
        .execute(&mut *conn)
        .await
        .context("Failed to insert batch")?;
        Ok(())
    }

    /// Write back the mutable columns of a batch row, guarded by the
    /// version the write was validated against. Returns false when another
    /// write got there first.
    pub async fn update_batch_guarded(
        conn: &mut SqliteConnection,
        batch: &Batch,
        expected_version: u64,
    ) -> Result<bool> {
        let certifications = serde_json::to_string(&batch.certifications)
            .context("Failed to encode certifications")?;
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET certifications = ?, current_handler = ?, current_role = ?,
                status = ?, last_custody_ts = ?, version = ?
            WHERE batch_id = ? AND version = ?
            "#,
        )
        .bind(&certifications)
        .bind(batch.current_handler.as_slice())
        .bind(i64::from(batch.current_role.index()))
        .bind(batch.status.as_str())
        .bind(batch.last_event_timestamp as i64)
        .bind(batch.version as i64)
        .bind(batch.batch_id as i64)
        .bind(expected_version as i64)
        .execute(&mut *conn)
        .await
        .context("Failed to update batch")?;
        Ok(result.rows_affected() == 1)
    }

    /// Read one batch through the pool.
    pub async fn get_batch(&self, batch_id: u64) -> Result<Option<Batch>> {
        let row = sqlx::query("SELECT * FROM batches WHERE batch_id = ?")
            .bind(batch_id as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read batch")?;
        row.as_ref().map(row_to_batch).transpose()
    }

    /// Read one batch inside an open write transaction.
    pub async fn get_batch_for_update(
        conn: &mut SqliteConnection,
        batch_id: u64,
    ) -> Result<Option<Batch>> {
        let row = sqlx::query("SELECT * FROM batches WHERE batch_id = ?")
            .bind(batch_id as i64)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to read batch")?;
        row.as_ref().map(row_to_batch).transpose()
    }

    /// All batches still moving through the chain (non-terminal status),
    /// ordered by id. Feeds the hoarding sweep.
    pub async fn list_open_batches(&self) -> Result<Vec<Batch>> {
        let rows = sqlx::query("SELECT * FROM batches WHERE status != ? ORDER BY batch_id")
            .bind(BatchStatus::Settled.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list open batches")?;
        rows.iter().map(row_to_batch).collect()
    }

    /// All batches, ordered by id.
    pub async fn list_batches(&self) -> Result<Vec<Batch>> {
        let rows = sqlx::query("SELECT * FROM batches ORDER BY batch_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list batches")?;
        rows.iter().map(row_to_batch).collect()
    }

    /// Wipe both projection tables ahead of a rebuild. The event log is
    /// untouched.
    pub async fn clear_projections(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DELETE FROM batches")
            .execute(&mut *conn)
            .await
            .context("Failed to clear batch projection")?;
        sqlx::query("DELETE FROM escrows")
            .execute(&mut *conn)
            .await
            .context("Failed to clear escrow projection")?;
        Ok(())
    }
}
