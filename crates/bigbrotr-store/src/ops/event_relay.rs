//! `event_relay_insert` (§4.1, §3 EventRelay). Requires the referenced
//! `event` and `relay` rows to pre-exist; updates are no-ops, keeping the
//! earliest `seen_at` per (event_id, relay_url) pair.

use crate::error::StorageError;
use crate::store::Store;

impl Store {
    pub async fn event_relay_insert(&self, event_id: &[String], relay_url: &[String], seen_at: &[i64]) -> Result<u64, StorageError> {
        assert_eq!(event_id.len(), relay_url.len());
        assert_eq!(event_id.len(), seen_at.len());
        if event_id.is_empty() {
            return Ok(0);
        }

        let keys: Vec<(String, String)> = event_id.iter().cloned().zip(relay_url.iter().cloned()).collect();
        let keep = crate::store::dedup_indices_first_wins(&keys);

        let event_id: Vec<&str> = keep.iter().map(|&i| event_id[i].as_str()).collect();
        let relay_url: Vec<&str> = keep.iter().map(|&i| relay_url[i].as_str()).collect();
        let seen_at: Vec<i64> = keep.iter().map(|&i| seen_at[i]).collect();

        let inserted: Vec<(String, String)> = sqlx::query_as(
            "INSERT INTO event_relay (event_id, relay_url, seen_at)
             SELECT * FROM UNNEST($1::char(64)[], $2::text[], $3::bigint[])
             ON CONFLICT (event_id, relay_url) DO NOTHING
             RETURNING event_id, relay_url",
        )
        .bind(&event_id)
        .bind(&relay_url)
        .bind(&seen_at)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::debug!(requested = event_id.len(), inserted = inserted.len(), "event_relay_insert");
        Ok(inserted.len() as u64)
    }
}
