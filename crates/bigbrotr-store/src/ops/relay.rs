//! `relay_insert` (§4.1).

use crate::error::StorageError;
use crate::store::{dedup_indices_first_wins, Store};
use bigbrotr_models::Network;

impl Store {
    /// Bulk-inserts relays, skipping urls that already exist. Returns the
    /// number of rows actually inserted.
    pub async fn relay_insert(&self, urls: &[String], networks: &[Network], discovered_at: &[i64]) -> Result<u64, StorageError> {
        assert_eq!(urls.len(), networks.len());
        assert_eq!(urls.len(), discovered_at.len());
        if urls.is_empty() {
            return Ok(0);
        }

        let keep = dedup_indices_first_wins(urls);
        let urls: Vec<&str> = keep.iter().map(|&i| urls[i].as_str()).collect();
        let networks: Vec<&str> = keep.iter().map(|&i| networks[i].as_str()).collect();
        let discovered_at: Vec<i64> = keep.iter().map(|&i| discovered_at[i]).collect();

        let inserted: Vec<(String,)> = sqlx::query_as(
            "INSERT INTO relay (url, network, discovered_at)
             SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[])
             ON CONFLICT (url) DO NOTHING
             RETURNING url",
        )
        .bind(&urls)
        .bind(&networks)
        .bind(&discovered_at)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::debug!(requested = urls.len(), inserted = inserted.len(), "relay_insert");
        Ok(inserted.len() as u64)
    }
}
