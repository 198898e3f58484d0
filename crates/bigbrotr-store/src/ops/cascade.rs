//! Cascade inserts (§4.1): atomic multi-table writes so a caller never has
//! to sequence parent-then-child inserts itself, and a failure partway
//! through never leaves a dangling foreign key.

use crate::error::StorageError;
use crate::store::{dedup_indices_first_wins, Store};
use bigbrotr_models::{Event, Metadata, MetadataType, Relay};

impl Store {
    /// Atomically inserts relays, events, and their event_relay junction
    /// rows in one transaction (§4.1 "event_relay_insert_cascade").
    /// `events`, `relays`, and `seen_at` are parallel: row `i` is "event[i]
    /// was seen at relay[i] at seen_at[i]".
    pub async fn event_relay_insert_cascade(&self, events: &[Event], relays: &[Relay], seen_at: &[i64]) -> Result<u64, StorageError> {
        assert_eq!(events.len(), relays.len());
        assert_eq!(events.len(), seen_at.len());
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        let relay_urls: Vec<String> = relays.iter().map(|r| r.url.clone()).collect();
        let keep = dedup_indices_first_wins(&relay_urls);
        let urls: Vec<&str> = keep.iter().map(|&i| relays[i].url.as_str()).collect();
        let networks: Vec<&str> = keep.iter().map(|&i| relays[i].network.as_str()).collect();
        let discovered_at: Vec<i64> = keep.iter().map(|&i| relays[i].discovered_at).collect();
        sqlx::query(
            "INSERT INTO relay (url, network, discovered_at)
             SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[])
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(&urls)
        .bind(&networks)
        .bind(&discovered_at)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        let event_ids: Vec<String> = events.iter().map(|e| e.id.to_string()).collect();
        let keep = dedup_indices_first_wins(&event_ids);
        let ids: Vec<&str> = keep.iter().map(|&i| event_ids[i].as_str()).collect();
        let pubkeys: Vec<String> = keep.iter().map(|&i| events[i].pubkey.to_string()).collect();
        let created_at: Vec<i64> = keep.iter().map(|&i| events[i].created_at).collect();
        let kind: Vec<i32> = keep.iter().map(|&i| events[i].kind as i32).collect();
        let tags: Vec<serde_json::Value> = keep.iter().map(|&i| serde_json::to_value(&events[i].tags).unwrap_or(serde_json::Value::Null)).collect();
        let content: Vec<&str> = keep.iter().map(|&i| events[i].content.as_str()).collect();
        let sig: Vec<String> = keep.iter().map(|&i| events[i].sig.to_string()).collect();
        sqlx::query(
            "INSERT INTO event (id, pubkey, created_at, kind, tags, content, sig)
             SELECT * FROM UNNEST($1::char(64)[], $2::char(64)[], $3::bigint[], $4::int[], $5::jsonb[], $6::text[], $7::char(128)[])
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&ids)
        .bind(&pubkeys)
        .bind(&created_at)
        .bind(&kind)
        .bind(&tags)
        .bind(&content)
        .bind(&sig)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        let junction_event_ids: Vec<String> = events.iter().map(|e| e.id.to_string()).collect();
        let keys: Vec<(String, String)> = junction_event_ids.iter().cloned().zip(relay_urls.iter().cloned()).collect();
        let keep = dedup_indices_first_wins(&keys);
        let j_event_id: Vec<&str> = keep.iter().map(|&i| junction_event_ids[i].as_str()).collect();
        let j_relay_url: Vec<&str> = keep.iter().map(|&i| relay_urls[i].as_str()).collect();
        let j_seen_at: Vec<i64> = keep.iter().map(|&i| seen_at[i]).collect();
        let inserted: Vec<(String, String)> = sqlx::query_as(
            "INSERT INTO event_relay (event_id, relay_url, seen_at)
             SELECT * FROM UNNEST($1::char(64)[], $2::text[], $3::bigint[])
             ON CONFLICT (event_id, relay_url) DO NOTHING
             RETURNING event_id, relay_url",
        )
        .bind(&j_event_id)
        .bind(&j_relay_url)
        .bind(&j_seen_at)
        .fetch_all(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        tx.commit().await.map_err(StorageError::from)?;
        tracing::debug!(requested = events.len(), inserted = inserted.len(), "event_relay_insert_cascade");
        Ok(inserted.len() as u64)
    }

    /// Atomically inserts relays, metadata, and their relay_metadata
    /// junction rows in one transaction (§4.1
    /// "relay_metadata_insert_cascade"). `relays`, `metadata`, and
    /// `generated_at` are parallel.
    pub async fn relay_metadata_insert_cascade(&self, relays: &[Relay], metadata: &[Metadata], generated_at: &[i64]) -> Result<u64, StorageError> {
        assert_eq!(relays.len(), metadata.len());
        assert_eq!(relays.len(), generated_at.len());
        if relays.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        let relay_urls: Vec<String> = relays.iter().map(|r| r.url.clone()).collect();
        let keep = dedup_indices_first_wins(&relay_urls);
        let urls: Vec<&str> = keep.iter().map(|&i| relays[i].url.as_str()).collect();
        let networks: Vec<&str> = keep.iter().map(|&i| relays[i].network.as_str()).collect();
        let discovered_at: Vec<i64> = keep.iter().map(|&i| relays[i].discovered_at).collect();
        sqlx::query(
            "INSERT INTO relay (url, network, discovered_at)
             SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[])
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(&urls)
        .bind(&networks)
        .bind(&discovered_at)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        let metadata_keys: Vec<(String, &'static str)> = metadata.iter().map(|m| (m.id_hex(), m.metadata_type.as_str())).collect();
        let keep = dedup_indices_first_wins(&metadata_keys);
        let m_ids: Vec<String> = keep.iter().map(|&i| metadata[i].id_hex()).collect();
        let m_types: Vec<&str> = keep.iter().map(|&i| metadata[i].metadata_type.as_str()).collect();
        let m_data: Vec<serde_json::Value> = keep.iter().map(|&i| metadata[i].data.clone()).collect();
        sqlx::query(
            "INSERT INTO metadata (id, type, data)
             SELECT * FROM UNNEST($1::char(64)[], $2::text[], $3::jsonb[])
             ON CONFLICT (id, type) DO NOTHING",
        )
        .bind(&m_ids)
        .bind(&m_types)
        .bind(&m_data)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        let junction_metadata_ids: Vec<String> = metadata.iter().map(|m| m.id_hex()).collect();
        let junction_types: Vec<MetadataType> = metadata.iter().map(|m| m.metadata_type).collect();
        let keys: Vec<(String, i64, &'static str)> = relay_urls
            .iter()
            .cloned()
            .zip(generated_at.iter().cloned())
            .zip(junction_types.iter().map(|t| t.as_str()))
            .map(|((u, g), t)| (u, g, t))
            .collect();
        let keep = dedup_indices_first_wins(&keys);
        let j_relay_url: Vec<&str> = keep.iter().map(|&i| relay_urls[i].as_str()).collect();
        let j_generated_at: Vec<i64> = keep.iter().map(|&i| generated_at[i]).collect();
        let j_type: Vec<&str> = keep.iter().map(|&i| junction_types[i].as_str()).collect();
        let j_metadata_id: Vec<&str> = keep.iter().map(|&i| junction_metadata_ids[i].as_str()).collect();
        let inserted: Vec<(String,)> = sqlx::query_as(
            "INSERT INTO relay_metadata (relay_url, generated_at, metadata_type, metadata_id)
             SELECT * FROM UNNEST($1::text[], $2::bigint[], $3::text[], $4::char(64)[])
             ON CONFLICT (relay_url, generated_at, metadata_type) DO NOTHING
             RETURNING relay_url",
        )
        .bind(&j_relay_url)
        .bind(&j_generated_at)
        .bind(&j_type)
        .bind(&j_metadata_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        tx.commit().await.map_err(StorageError::from)?;
        tracing::debug!(requested = relays.len(), inserted = inserted.len(), "relay_metadata_insert_cascade");
        Ok(inserted.len() as u64)
    }
}
