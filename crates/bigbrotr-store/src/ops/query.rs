//! Read paths used by Finder/Validator that don't fit the write-procedure
//! table in §4.1 (cursor-based event pagination, existence checks).

use crate::error::StorageError;
use crate::store::Store;
use bigbrotr_models::{Event, EventId, Network, PubKey, Signature};
use std::collections::HashSet;

impl Store {
    /// Every known relay, optionally restricted to `networks` (empty =
    /// all). Used by Monitor's per-cycle relay scan (§4.7).
    pub async fn relay_list(&self, networks: &[Network]) -> Result<Vec<bigbrotr_models::Relay>, StorageError> {
        let rows: Vec<(String, String, i64)> = if networks.is_empty() {
            sqlx::query_as("SELECT url, network, discovered_at FROM relay ORDER BY url").fetch_all(&self.pool).await.map_err(StorageError::from)?
        } else {
            let networks: Vec<&str> = networks.iter().map(|n| n.as_str()).collect();
            sqlx::query_as("SELECT url, network, discovered_at FROM relay WHERE network = ANY($1::text[]) ORDER BY url")
                .bind(&networks)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from)?
        };

        rows.into_iter()
            .map(|(url, network, discovered_at)| {
                let network = network.parse::<Network>().map_err(StorageError::Permanent)?;
                Ok(bigbrotr_models::Relay { url, network, discovered_at })
            })
            .collect()
    }

    /// Relays whose most recent `nip66_rtt` record (within
    /// `max_age_seconds`) has a non-null `rtt_read`, or every known relay
    /// if no `nip66_rtt` rows exist yet at all (§4.8 step 1).
    pub async fn relay_list_readable(&self, max_age_seconds: i64, networks: &[Network]) -> Result<Vec<bigbrotr_models::Relay>, StorageError> {
        let (any_rtt,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM relay_metadata WHERE metadata_type = 'nip66_rtt')")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from)?;
        if !any_rtt {
            return self.relay_list(networks).await;
        }

        let cutoff = chrono::Utc::now().timestamp() - max_age_seconds;
        let network_filter: Vec<&str> = networks.iter().map(|n| n.as_str()).collect();
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT DISTINCT r.url, r.network, r.discovered_at
             FROM relay r
             JOIN LATERAL (
                 SELECT rm.metadata_id FROM relay_metadata rm
                 WHERE rm.relay_url = r.url AND rm.metadata_type = 'nip66_rtt' AND rm.generated_at >= $1
                 ORDER BY rm.generated_at DESC LIMIT 1
             ) latest ON true
             JOIN metadata m ON m.id = latest.metadata_id AND m.type = 'nip66_rtt'
             WHERE (m.data ->> 'rtt_read') IS NOT NULL
               AND ($2::text[] IS NULL OR array_length($2::text[], 1) IS NULL OR r.network = ANY($2::text[]))
             ORDER BY r.url",
        )
        .bind(cutoff)
        .bind(&network_filter)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|(url, network, discovered_at)| {
                let network = network.parse::<Network>().map_err(StorageError::Permanent)?;
                Ok(bigbrotr_models::Relay { url, network, discovered_at })
            })
            .collect()
    }

    /// Events with `(created_at, id) > after`, ordered ascending, at most
    /// `page_size` rows, restricted to `kinds` (§4.5 "Event scan", §4.8
    /// "time-window stack" both page this way).
    pub async fn event_page_since(&self, after: Option<(i64, &str)>, kinds: &[i32], page_size: i64) -> Result<Vec<Event>, StorageError> {
        let rows: Vec<(String, String, i64, i32, serde_json::Value, String, String)> = match after {
            Some((created_at, id)) => {
                sqlx::query_as(
                    "SELECT id, pubkey, created_at, kind, tags, content, sig FROM event
                     WHERE kind = ANY($1::int[]) AND (created_at, id) > ($2, $3)
                     ORDER BY created_at ASC, id ASC LIMIT $4",
                )
                .bind(kinds)
                .bind(created_at)
                .bind(id)
                .bind(page_size)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from)?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, pubkey, created_at, kind, tags, content, sig FROM event
                     WHERE kind = ANY($1::int[])
                     ORDER BY created_at ASC, id ASC LIMIT $2",
                )
                .bind(kinds)
                .bind(page_size)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from)?
            }
        };

        rows.into_iter()
            .map(|(id, pubkey, created_at, kind, tags, content, sig)| {
                Ok(Event {
                    id: EventId::from_hex(&id).map_err(|e| StorageError::Permanent(e.to_string()))?,
                    pubkey: PubKey::from_hex(&pubkey).map_err(|e| StorageError::Permanent(e.to_string()))?,
                    created_at,
                    kind: kind as u32,
                    tags: serde_json::from_value(tags).unwrap_or_default(),
                    content,
                    sig: Signature::from_hex(&sig).map_err(|e| StorageError::Permanent(e.to_string()))?,
                })
            })
            .collect()
    }

    /// Which of `urls` already have a row in `relay` (§4.5 "drop URLs
    /// already present in relay").
    pub async fn relay_urls_existing(&self, urls: &[String]) -> Result<HashSet<String>, StorageError> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM relay WHERE url = ANY($1::text[])").bind(urls).fetch_all(&self.pool).await.map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Which `(state_type, key)` pairs already exist for `service`
    /// (§4.5 "or in service_state/candidate").
    pub async fn service_state_keys_existing(&self, service: &str, state_type: &str, keys: &[String]) -> Result<HashSet<String>, StorageError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT state_key FROM service_state
             WHERE service_name = $1 AND state_type = $2 AND state_key = ANY($3::text[])",
        )
        .bind(service)
        .bind(state_type)
        .bind(keys)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
