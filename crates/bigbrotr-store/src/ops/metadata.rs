//! `metadata_insert` (§4.1). Idempotent on (id, type); identical bytes
//! under different types coexist since the primary key is composite.

use crate::error::StorageError;
use crate::store::Store;
use bigbrotr_models::Metadata;

impl Store {
    /// Bulk-inserts metadata rows, skipping (id, type) pairs that already
    /// exist. Returns the number of rows actually inserted.
    pub async fn metadata_insert(&self, items: &[Metadata]) -> Result<u64, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }

        let keys: Vec<(String, &'static str)> = items.iter().map(|m| (m.id_hex(), m.metadata_type.as_str())).collect();
        let keep = crate::store::dedup_indices_first_wins(&keys);

        let ids: Vec<String> = keep.iter().map(|&i| items[i].id_hex()).collect();
        let types: Vec<&str> = keep.iter().map(|&i| items[i].metadata_type.as_str()).collect();
        let data: Vec<serde_json::Value> = keep.iter().map(|&i| items[i].data.clone()).collect();

        let inserted: Vec<(String,)> = sqlx::query_as(
            "INSERT INTO metadata (id, type, data)
             SELECT * FROM UNNEST($1::char(64)[], $2::text[], $3::jsonb[])
             ON CONFLICT (id, type) DO NOTHING
             RETURNING id",
        )
        .bind(&ids)
        .bind(&types)
        .bind(&data)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::debug!(requested = ids.len(), inserted = inserted.len(), "metadata_insert");
        Ok(inserted.len() as u64)
    }
}
