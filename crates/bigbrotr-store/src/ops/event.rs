//! `event_insert` (§4.1). `tagvalues` is a generated column (see
//! `migrations/0001_init.sql`); the storage layer never computes or binds
//! it directly.

use crate::error::StorageError;
use crate::store::{dedup_indices_first_wins, Store};
use bigbrotr_models::Event;

impl Store {
    /// Bulk-inserts events, skipping ids that already exist. Returns the
    /// number of rows actually inserted.
    pub async fn event_insert(&self, events: &[Event]) -> Result<u64, StorageError> {
        if events.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = events.iter().map(|e| e.id.to_string()).collect();
        let keep = dedup_indices_first_wins(&ids);

        let ids: Vec<&str> = keep.iter().map(|&i| ids[i].as_str()).collect();
        let pubkeys: Vec<String> = keep.iter().map(|&i| events[i].pubkey.to_string()).collect();
        let created_at: Vec<i64> = keep.iter().map(|&i| events[i].created_at).collect();
        let kind: Vec<i32> = keep.iter().map(|&i| events[i].kind as i32).collect();
        let tags: Vec<serde_json::Value> = keep.iter().map(|&i| serde_json::to_value(&events[i].tags).unwrap_or(serde_json::Value::Null)).collect();
        let content: Vec<&str> = keep.iter().map(|&i| events[i].content.as_str()).collect();
        let sig: Vec<String> = keep.iter().map(|&i| events[i].sig.to_string()).collect();

        let inserted: Vec<(String,)> = sqlx::query_as(
            "INSERT INTO event (id, pubkey, created_at, kind, tags, content, sig)
             SELECT * FROM UNNEST($1::char(64)[], $2::char(64)[], $3::bigint[], $4::int[], $5::jsonb[], $6::text[], $7::char(128)[])
             ON CONFLICT (id) DO NOTHING
             RETURNING id",
        )
        .bind(&ids)
        .bind(&pubkeys)
        .bind(&created_at)
        .bind(&kind)
        .bind(&tags)
        .bind(&content)
        .bind(&sig)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::debug!(requested = ids.len(), inserted = inserted.len(), "event_insert");
        Ok(inserted.len() as u64)
    }
}
