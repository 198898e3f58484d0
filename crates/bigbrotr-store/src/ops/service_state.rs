//! `service_state_upsert` / `service_state_get` / `service_state_delete`
//! (§4.1, §3 ServiceState).

use crate::error::StorageError;
use crate::store::Store;
use bigbrotr_models::ServiceState;
use std::collections::HashMap;

/// Dedups by (service, type, key), keeping the row with the highest
/// `updated_at` (ties broken by later position in the input) — §4.1
/// "within-batch dedup by highest updated_at".
fn dedup_by_highest_updated_at(rows: &[ServiceState]) -> Vec<usize> {
    let mut winners: HashMap<(&str, &str, &str), usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let key = (row.service_name.as_str(), row.state_type.as_str(), row.state_key.as_str());
        match winners.get(&key) {
            Some(&existing) if rows[existing].updated_at > row.updated_at => {}
            _ => {
                winners.insert(key, i);
            }
        }
    }
    let mut indices: Vec<usize> = winners.into_values().collect();
    indices.sort_unstable();
    indices
}

impl Store {
    /// Upserts service-state rows, replacing the payload and timestamp on
    /// conflict. Returns the number of rows written.
    pub async fn service_state_upsert(&self, rows: &[ServiceState]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let keep = dedup_by_highest_updated_at(rows);
        let service: Vec<&str> = keep.iter().map(|&i| rows[i].service_name.as_str()).collect();
        let state_type: Vec<&str> = keep.iter().map(|&i| rows[i].state_type.as_str()).collect();
        let state_key: Vec<&str> = keep.iter().map(|&i| rows[i].state_key.as_str()).collect();
        let payload: Vec<serde_json::Value> = keep.iter().map(|&i| rows[i].payload.clone()).collect();
        let updated_at: Vec<i64> = keep.iter().map(|&i| rows[i].updated_at).collect();

        sqlx::query(
            "INSERT INTO service_state (service_name, state_type, state_key, payload, updated_at)
             SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::jsonb[], $5::bigint[])
             ON CONFLICT (service_name, state_type, state_key)
             DO UPDATE SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at",
        )
        .bind(&service)
        .bind(&state_type)
        .bind(&state_key)
        .bind(&payload)
        .bind(&updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        tracing::debug!(rows = service.len(), "service_state_upsert");
        Ok(service.len() as u64)
    }

    /// Reads service-state rows. With `key = None`, returns every row for
    /// (service, state_type) ordered by `updated_at` ascending; with a key,
    /// returns exactly the matching row (at most one).
    pub async fn service_state_get(&self, service: &str, state_type: &str, key: Option<&str>) -> Result<Vec<ServiceState>, StorageError> {
        let rows: Vec<(String, String, String, serde_json::Value, i64)> = match key {
            Some(key) => sqlx::query_as(
                "SELECT service_name, state_type, state_key, payload, updated_at
                 FROM service_state WHERE service_name = $1 AND state_type = $2 AND state_key = $3",
            )
            .bind(service)
            .bind(state_type)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?,
            None => sqlx::query_as(
                "SELECT service_name, state_type, state_key, payload, updated_at
                 FROM service_state WHERE service_name = $1 AND state_type = $2
                 ORDER BY updated_at ASC",
            )
            .bind(service)
            .bind(state_type)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?,
        };

        Ok(rows
            .into_iter()
            .map(|(service_name, state_type, state_key, payload, updated_at)| ServiceState { service_name, state_type, state_key, payload, updated_at })
            .collect())
    }

    /// Bulk-deletes service-state rows by composite key. Returns the
    /// number of rows actually deleted.
    pub async fn service_state_delete(&self, service: &[String], state_type: &[String], key: &[String]) -> Result<u64, StorageError> {
        assert_eq!(service.len(), state_type.len());
        assert_eq!(service.len(), key.len());
        if service.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "DELETE FROM service_state
             WHERE (service_name, state_type, state_key) IN (
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])
             )",
        )
        .bind(service)
        .bind(state_type)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(service: &str, key: &str, updated_at: i64) -> ServiceState {
        ServiceState { service_name: service.into(), state_type: "candidate".into(), state_key: key.into(), payload: json!({}), updated_at }
    }

    #[test]
    fn keeps_highest_updated_at_per_key() {
        let rows = vec![row("validator", "a", 10), row("validator", "a", 20), row("validator", "b", 5)];
        let keep = dedup_by_highest_updated_at(&rows);
        let kept_updated_at: Vec<i64> = keep.iter().map(|&i| rows[i].updated_at).collect();
        assert_eq!(kept_updated_at.len(), 2);
        assert!(kept_updated_at.contains(&20));
        assert!(kept_updated_at.contains(&5));
    }
}
