//! `relay_metadata_insert` (§4.1, §3 RelayMetadata). Requires the
//! referenced `relay` and `metadata` rows to pre-exist. One type is
//! recorded at most once per (relay, second).

use crate::error::StorageError;
use crate::store::Store;
use bigbrotr_models::MetadataType;

impl Store {
    pub async fn relay_metadata_insert(
        &self,
        relay_url: &[String],
        metadata_id: &[String],
        metadata_type: &[MetadataType],
        generated_at: &[i64],
    ) -> Result<u64, StorageError> {
        assert_eq!(relay_url.len(), metadata_id.len());
        assert_eq!(relay_url.len(), metadata_type.len());
        assert_eq!(relay_url.len(), generated_at.len());
        if relay_url.is_empty() {
            return Ok(0);
        }

        let keys: Vec<(String, i64, &'static str)> =
            relay_url.iter().cloned().zip(generated_at.iter().cloned()).zip(metadata_type.iter().map(|t| t.as_str())).map(|((u, g), t)| (u, g, t)).collect();
        let keep = crate::store::dedup_indices_first_wins(&keys);

        let relay_url: Vec<&str> = keep.iter().map(|&i| relay_url[i].as_str()).collect();
        let metadata_id: Vec<&str> = keep.iter().map(|&i| metadata_id[i].as_str()).collect();
        let metadata_type: Vec<&str> = keep.iter().map(|&i| metadata_type[i].as_str()).collect();
        let generated_at: Vec<i64> = keep.iter().map(|&i| generated_at[i]).collect();

        let inserted: Vec<(String,)> = sqlx::query_as(
            "INSERT INTO relay_metadata (relay_url, generated_at, metadata_type, metadata_id)
             SELECT * FROM UNNEST($1::text[], $2::bigint[], $3::text[], $4::char(64)[])
             ON CONFLICT (relay_url, generated_at, metadata_type) DO NOTHING
             RETURNING relay_url",
        )
        .bind(&relay_url)
        .bind(&generated_at)
        .bind(&metadata_type)
        .bind(&metadata_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::debug!(requested = relay_url.len(), inserted = inserted.len(), "relay_metadata_insert");
        Ok(inserted.len() as u64)
    }
}
