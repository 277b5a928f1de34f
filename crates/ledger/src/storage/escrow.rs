//! Escrow projection rows.

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use shonali_core::{Address, EscrowRecord, EscrowState};

use super::Storage;

fn row_to_escrow(row: &SqliteRow) -> Result<EscrowRecord> {
    let escrow_id: i64 = row.get("escrow_id");
    let batch_id: i64 = row.get("batch_id");
    let buyer: Vec<u8> = row.get("buyer");
    let seller: Vec<u8> = row.get("seller");
    let amount: i64 = row.get("amount");
    let deadline: i64 = row.get("deadline");
    let state: String = row.get("state");

    Ok(EscrowRecord {
        escrow_id: escrow_id as u64,
        batch_id: batch_id as u64,
        buyer: Address::try_from(buyer.as_slice()).context("Invalid buyer address")?,
        seller: Address::try_from(seller.as_slice()).context("Invalid seller address")?,
        amount: amount as u64,
        deadline: deadline as u64,
        state: EscrowState::from_str(&state)?,
    })
}

impl Storage {
    /// Next escrow id, derived from the funding events in the log so ids
    /// stay unique across projection rebuilds.
    pub async fn next_escrow_id(conn: &mut SqliteConnection) -> Result<u64> {
        let next: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(json_extract(event_json, '$.escrow_id')), 0) + 1
            FROM events WHERE kind = 'escrow_funded'
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .context("Failed to allocate escrow id")?;
        Ok(next as u64)
    }

    /// Insert a freshly funded escrow row.
    pub async fn insert_escrow(conn: &mut SqliteConnection, escrow: &EscrowRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO escrows (escrow_id, batch_id, buyer, seller, amount, deadline, state)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(escrow.escrow_id as i64)
        .bind(escrow.batch_id as i64)
        .bind(escrow.buyer.as_slice())
        .bind(escrow.seller.as_slice())
        .bind(escrow.amount as i64)
        .bind(escrow.deadline as i64)
        .bind(escrow.state.as_str())
        .execute(&mut *conn)
        .await
        .context("Failed to insert escrow")?;
        Ok(())
    }

    /// Move an escrow from one state to another, guarded by the expected
    /// current state. Returns false if the row was not in `from`.
    pub async fn update_escrow_state(
        conn: &mut SqliteConnection,
        escrow_id: u64,
        from: EscrowState,
        to: EscrowState,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE escrows SET state = ? WHERE escrow_id = ? AND state = ?")
            .bind(to.as_str())
            .bind(escrow_id as i64)
            .bind(from.as_str())
            .execute(&mut *conn)
            .await
            .context("Failed to update escrow state")?;
        Ok(result.rows_affected() == 1)
    }

    /// The batch's non-terminal escrow, if one exists. At most one row can
    /// match: funding enforces the uniqueness invariant.
    pub async fn active_escrow_for_update(
        conn: &mut SqliteConnection,
        batch_id: u64,
    ) -> Result<Option<EscrowRecord>> {
        let row = sqlx::query(
            "SELECT * FROM escrows WHERE batch_id = ? AND state IN ('funded', 'disputed')",
        )
        .bind(batch_id as i64)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read active escrow")?;
        row.as_ref().map(row_to_escrow).transpose()
    }

    /// The batch's most recent escrow (any state), through the pool.
    pub async fn latest_escrow_for_batch(&self, batch_id: u64) -> Result<Option<EscrowRecord>> {
        let row =
            sqlx::query("SELECT * FROM escrows WHERE batch_id = ? ORDER BY escrow_id DESC LIMIT 1")
                .bind(batch_id as i64)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read escrow")?;
        row.as_ref().map(row_to_escrow).transpose()
    }

    /// Funded escrows whose deadline has passed. Feeds the expiry sweep.
    pub async fn funded_escrows_due(&self, now: u64) -> Result<Vec<EscrowRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM escrows WHERE state = 'funded' AND deadline < ? ORDER BY escrow_id",
        )
        .bind(now as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list due escrows")?;
        rows.iter().map(row_to_escrow).collect()
    }
}
