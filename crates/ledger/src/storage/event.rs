//! The append-only event log.
//!
//! Rows are never updated or deleted. The `seq` column (SQLite
//! AUTOINCREMENT) is the total order; `event_json` carries the tagged
//! payload, with `batch_id`, `kind` and `event_ts` denormalized for
//! indexing.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use shonali_core::{LedgerError, LedgerEvent, SequencedEvent};

use super::Storage;

/// Custody-timeline kinds must carry a strictly larger timestamp than
/// every prior event of their batch. Other kinds (escrow activity) may
/// share an instant with the custody event that caused them.
fn is_custody_kind(event: &LedgerEvent) -> bool {
    matches!(
        event,
        LedgerEvent::BatchRegistered { .. } | LedgerEvent::CustodyTransferred { .. }
    )
}

fn row_to_sequenced(row: &SqliteRow) -> Result<SequencedEvent> {
    let seq: i64 = row.get("seq");
    let event_json: String = row.get("event_json");
    let event = serde_json::from_str(&event_json).context("Failed to decode stored event")?;
    Ok(SequencedEvent {
        seq: seq as u64,
        event,
    })
}

impl Storage {
    /// Append one event inside an open transaction and return its assigned
    /// sequence number.
    ///
    /// Structural validation happens here, before the insert: an
    /// unserializable payload or an out-of-order timestamp fails with
    /// [`LedgerError::RejectedEvent`] and nothing is written.
    pub async fn append_event(conn: &mut SqliteConnection, event: &LedgerEvent) -> Result<u64> {
        let event_json = serde_json::to_string(event)
            .map_err(|e| LedgerError::RejectedEvent(format!("unserializable event: {e}")))?;

        let last_ts: Option<i64> =
            sqlx::query_scalar("SELECT MAX(event_ts) FROM events WHERE batch_id = ?")
                .bind(event.batch_id() as i64)
                .fetch_one(&mut *conn)
                .await
                .context("Failed to read last event timestamp")?;

        if let Some(last) = last_ts {
            let last = last as u64;
            let ts = event.timestamp();
            let ordered = if is_custody_kind(event) {
                ts > last
            } else {
                ts >= last
            };
            if !ordered {
                return Err(LedgerError::RejectedEvent(format!(
                    "timestamp {ts} is out of order for batch {} (last accepted {last})",
                    event.batch_id()
                ))
                .into());
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO events (batch_id, kind, event_ts, event_json, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.batch_id() as i64)
        .bind(event.kind())
        .bind(event.timestamp() as i64)
        .bind(&event_json)
        .bind(crate::unix_now() as i64)
        .execute(&mut *conn)
        .await
        .context("Failed to append event")?;

        Ok(result.last_insert_rowid() as u64)
    }

    /// All events with `seq >= from`, in log order.
    pub async fn read_events_from(&self, from: u64) -> Result<Vec<SequencedEvent>> {
        let rows = sqlx::query("SELECT seq, event_json FROM events WHERE seq >= ? ORDER BY seq")
            .bind(from as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read events")?;
        rows.iter().map(row_to_sequenced).collect()
    }

    /// Every event of one batch, in log order.
    pub async fn events_for_batch(&self, batch_id: u64) -> Result<Vec<SequencedEvent>> {
        let rows =
            sqlx::query("SELECT seq, event_json FROM events WHERE batch_id = ? ORDER BY seq")
                .bind(batch_id as i64)
                .fetch_all(&self.pool)
                .await
                .context("Failed to read batch events")?;
        rows.iter().map(row_to_sequenced).collect()
    }

    /// Full log scan inside an open transaction; used by projection rebuild.
    pub async fn all_events(conn: &mut SqliteConnection) -> Result<Vec<SequencedEvent>> {
        let rows = sqlx::query("SELECT seq, event_json FROM events ORDER BY seq")
            .fetch_all(&mut *conn)
            .await
            .context("Failed to scan event log")?;
        rows.iter().map(row_to_sequenced).collect()
    }

    /// Number of events in the log.
    pub async fn event_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count events")?;
        Ok(count as u64)
    }
}
