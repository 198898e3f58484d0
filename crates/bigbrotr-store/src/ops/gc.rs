//! Orphan and retention garbage collection (§4.1, Testable Property 7).

use crate::error::StorageError;
use crate::store::Store;
use chrono::Utc;

impl Store {
    /// Deletes metadata rows with no relay_metadata reference, in batches
    /// of `batch_size` until drained. Returns the total number deleted.
    pub async fn orphan_metadata_delete(&self, batch_size: i64) -> Result<u64, StorageError> {
        let mut total = 0u64;
        loop {
            let result = sqlx::query(
                "DELETE FROM metadata
                 WHERE (id, type) IN (
                     SELECT m.id, m.type FROM metadata m
                     LEFT JOIN relay_metadata rm ON rm.metadata_id = m.id AND rm.metadata_type = m.type
                     WHERE rm.relay_url IS NULL
                     LIMIT $1
                 )",
            )
            .bind(batch_size)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

            let affected = result.rows_affected();
            total += affected;
            if affected == 0 || affected < batch_size as u64 {
                break;
            }
        }
        tracing::debug!(deleted = total, "orphan_metadata_delete");
        Ok(total)
    }

    /// Deletes events with no event_relay rows. Returns the number
    /// deleted.
    pub async fn orphan_event_delete(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM event
             WHERE id IN (
                 SELECT e.id FROM event e
                 LEFT JOIN event_relay er ON er.event_id = e.id
                 WHERE er.relay_url IS NULL
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::debug!(deleted = result.rows_affected(), "orphan_event_delete");
        Ok(result.rows_affected())
    }

    /// Deletes relay_metadata rows older than `max_age_seconds`, in
    /// batches of `batch_size` until drained. Returns the total deleted.
    pub async fn relay_metadata_delete_expired(&self, max_age_seconds: i64, batch_size: i64) -> Result<u64, StorageError> {
        let cutoff = Utc::now().timestamp() - max_age_seconds;
        let mut total = 0u64;
        loop {
            let result = sqlx::query(
                "DELETE FROM relay_metadata
                 WHERE (relay_url, generated_at, metadata_type) IN (
                     SELECT relay_url, generated_at, metadata_type FROM relay_metadata
                     WHERE generated_at < $1
                     LIMIT $2
                 )",
            )
            .bind(cutoff)
            .bind(batch_size)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

            let affected = result.rows_affected();
            total += affected;
            if affected == 0 || affected < batch_size as u64 {
                break;
            }
        }
        tracing::debug!(deleted = total, cutoff, "relay_metadata_delete_expired");
        Ok(total)
    }
}
