//! Finder (§4.5): produces new candidates from API sources and the event
//! store, running both concurrently per cycle.

use crate::util::{now_unix, store_err};
use async_trait::async_trait;
use bigbrotr_core::service::{CommonConfig, ConfigError, Service, ServiceConfig, ServiceError};
use bigbrotr_models::{CursorPayload, Event, Relay, ServiceState};
use bigbrotr_store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Kinds Finder extracts relay URLs from (§4.5 "Event scan"): legacy
/// relay recommendation, contacts, relay lists, NIP-66 monitor events.
const EVENT_SCAN_KINDS: [i32; 4] = [2, 3, 10002, 10166];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSourceConfig {
    pub url: String,
    #[serde(default = "default_api_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinderConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub api_sources: Vec<ApiSourceConfig>,
    #[serde(default = "default_event_scan_page_size")]
    pub event_scan_page_size: i64,
}

fn default_event_scan_page_size() -> i64 {
    500
}

impl ServiceConfig for FinderConfig {
    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.event_scan_page_size <= 0 {
            errors.push(ConfigError { field: "event_scan_page_size".into(), reason: "must be positive".into() });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn interval_floor_seconds() -> u64 {
        30
    }
}

pub struct Finder {
    config: FinderConfig,
    store: Store,
    http: reqwest::Client,
}

impl Finder {
    pub fn new(config: FinderConfig, store: Store) -> Self {
        Finder { config, store, http: reqwest::Client::new() }
    }

    async fn scan_api_sources(&self) -> Vec<String> {
        let mut found = Vec::new();
        for source in &self.config.api_sources {
            match self.fetch_one_source(source).await {
                Ok(urls) => found.extend(urls),
                Err(e) => tracing::warn!(source = source.url, error = %e, "finder: api source fetch failed"),
            }
        }
        found
    }

    async fn fetch_one_source(&self, source: &ApiSourceConfig) -> Result<Vec<String>, String> {
        let response = self
            .http
            .get(&source.url)
            .timeout(Duration::from_millis(source.timeout_ms))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(extract_urls_from_json(&body))
    }

    async fn scan_events(&self) -> Result<Vec<String>, ServiceError> {
        let cursor_rows = self.store.service_state_get("finder", "cursor", Some("events")).await.map_err(|e| store_err(self.name(), e))?;
        let mut cursor: CursorPayload = cursor_rows.first().and_then(|row| serde_json::from_value(row.payload.clone()).ok()).unwrap_or_default();

        let after = cursor.last_id.as_deref().map(|id| (cursor.since, id));
        let events = self.store.event_page_since(after, &EVENT_SCAN_KINDS, self.config.event_scan_page_size).await.map_err(|e| store_err(self.name(), e))?;

        let mut found = Vec::new();
        for event in &events {
            found.extend(extract_relay_urls_from_event(event));
            cursor.since = event.created_at;
            cursor.last_id = Some(event.id.to_hex());
        }

        if !events.is_empty() {
            let row = ServiceState {
                service_name: "finder".to_string(),
                state_type: "cursor".to_string(),
                state_key: "events".to_string(),
                payload: serde_json::to_value(&cursor).expect("cursor payload always serializes"),
                updated_at: now_unix(),
            };
            self.store.service_state_upsert(&[row]).await.map_err(|e| store_err(self.name(), e))?;
        }

        Ok(found)
    }
}

#[async_trait]
impl Service for Finder {
    fn name(&self) -> &'static str {
        "finder"
    }

    fn common_config(&self) -> &CommonConfig {
        &self.config.common
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<(), ServiceError> {
        if token.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let (from_api, from_events) = tokio::join!(self.scan_api_sources(), self.scan_events());
        let from_events = from_events?;

        metrics::counter!("candidates_from_api", "service" => "finder").increment(from_api.len() as u64);
        metrics::counter!("candidates_from_events", "service" => "finder").increment(from_events.len() as u64);

        let mut seen = HashSet::new();
        let mut candidates: Vec<Relay> = Vec::new();
        let now = now_unix();
        for raw_url in from_api.into_iter().chain(from_events) {
            let Ok(relay) = Relay::new(&raw_url, now) else { continue };
            if seen.insert(relay.url.clone()) {
                candidates.push(relay);
            }
        }

        if token.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let urls: Vec<String> = candidates.iter().map(|r| r.url.clone()).collect();
        let (already_relays, already_candidates) = tokio::try_join!(
            async { self.store.relay_urls_existing(&urls).await.map_err(|e| store_err(self.name(), e)) },
            async { self.store.service_state_keys_existing("validator", "candidate", &urls).await.map_err(|e| store_err(self.name(), e)) },
        )?;

        let rows: Vec<ServiceState> = candidates
            .into_iter()
            .filter(|r| !already_relays.contains(&r.url) && !already_candidates.contains(&r.url))
            .map(|relay| ServiceState {
                service_name: "validator".to_string(),
                state_type: "candidate".to_string(),
                state_key: relay.url.clone(),
                payload: serde_json::json!({ "network": relay.network.as_str(), "failed_attempts": 0, "discovered_at": now }),
                updated_at: now,
            })
            .collect();

        let written = self.store.service_state_upsert(&rows).await.map_err(|e| store_err(self.name(), e))?;
        tracing::info!(new_candidates = written, "finder: cycle complete");
        Ok(())
    }
}

/// Recursively collects every string value that looks like a `ws(s)://`
/// URL. API sources are source-specific in shape (plain array, array of
/// objects, nested), so this is deliberately permissive.
fn extract_urls_from_json(value: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    match value {
        serde_json::Value::String(s) if s.starts_with("ws://") || s.starts_with("wss://") => out.push(s.clone()),
        serde_json::Value::Array(items) => {
            for item in items {
                out.extend(extract_urls_from_json(item));
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                out.extend(extract_urls_from_json(v));
            }
        }
        _ => {}
    }
    out
}

/// Extracts candidate relay URLs per §4.5's per-kind rules.
fn extract_relay_urls_from_event(event: &Event) -> Vec<String> {
    match event.kind {
        2 => {
            if event.content.starts_with("ws://") || event.content.starts_with("wss://") {
                vec![event.content.clone()]
            } else {
                Vec::new()
            }
        }
        3 => serde_json::from_str::<serde_json::Value>(&event.content)
            .ok()
            .and_then(|v| v.as_object().map(|o| o.keys().cloned().collect()))
            .unwrap_or_default(),
        10002 | 10166 => event.tags.iter().filter(|t| t.first().map(String::as_str) == Some("r")).filter_map(|t| t.get(1).cloned()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigbrotr_models::{EventId, PubKey, Signature};

    fn base_event(kind: u32, content: &str, tags: Vec<Vec<String>>) -> Event {
        Event { id: EventId([0u8; 32]), pubkey: PubKey([0u8; 32]), created_at: 0, kind, tags, content: content.to_string(), sig: Signature([0u8; 64]) }
    }

    #[test]
    fn extracts_kind_2_relay_recommendation() {
        let event = base_event(2, "wss://relay.example.com", vec![]);
        assert_eq!(extract_relay_urls_from_event(&event), vec!["wss://relay.example.com"]);
    }

    #[test]
    fn extracts_kind_3_contacts_relay_keys() {
        let event = base_event(3, r#"{"wss://a.example.com": {"read": true}, "wss://b.example.com": {"write": true}}"#, vec![]);
        let mut urls = extract_relay_urls_from_event(&event);
        urls.sort();
        assert_eq!(urls, vec!["wss://a.example.com", "wss://b.example.com"]);
    }

    #[test]
    fn extracts_kind_10002_r_tags() {
        let event = base_event(10002, "", vec![vec!["r".into(), "wss://relay.example.com".into()], vec!["nonce".into(), "x".into()]]);
        assert_eq!(extract_relay_urls_from_event(&event), vec!["wss://relay.example.com"]);
    }

    #[test]
    fn extracts_urls_nested_in_arbitrary_json() {
        let body = serde_json::json!([{"url": "wss://relay.example.com"}, "wss://other.example.com", {"ignored": 1}]);
        let mut urls = extract_urls_from_json(&body);
        urls.sort();
        assert_eq!(urls, vec!["wss://other.example.com", "wss://relay.example.com"]);
    }
}
