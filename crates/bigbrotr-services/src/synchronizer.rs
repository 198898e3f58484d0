//! Synchronizer (§4.8): archives events from relays flagged readable by
//! recent Monitor checks, using a time-window stack to work around
//! relay-side `limit` caps without missing events.

use crate::util::now_unix;
use crate::worker_pool::run_bounded;
use async_trait::async_trait;
use bigbrotr_core::service::{record_error_kind, CommonConfig, ConfigError, Service, ServiceConfig, ServiceError};
use bigbrotr_core::{ErrorKind, TypedError};
use bigbrotr_models::{CursorPayload, Event, EventKindCategory, Network, Relay, ServiceState};
use bigbrotr_store::Store;
use bigbrotr_transport::protocol::{parse_relay_message, ClientMessage, RelayMessage};
use bigbrotr_transport::{dial, NetworkConfig};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const SERVICE_NAME: &str = "synchronizer";

/// The NIP-01 kind categories Synchronizer archives by default: regular,
/// replaceable, addressable. Ephemeral (20000-29999) is never a target
/// (§4.8 step 4 "not ephemeral").
fn default_kinds() -> Option<Vec<i32>> {
    None
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Drop,
    Flush,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Drop
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardConfig {
    pub count: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynchronizerConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub network: NetworkConfig,
    #[serde(default = "default_enabled_networks")]
    pub enabled_networks: Vec<Network>,
    /// Exact kind allowlist sent in the REQ filter. `None` means no
    /// server-side kind filter; ephemeral events are always dropped
    /// client-side before persistence regardless.
    #[serde(default = "default_kinds")]
    pub kinds: Option<Vec<i32>>,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "default_readable_max_age_seconds")]
    pub readable_max_age_seconds: i64,
    pub shard: Option<ShardConfig>,
}

fn default_enabled_networks() -> Vec<Network> {
    vec![Network::Clearnet, Network::Tor, Network::I2p, Network::Loki]
}
fn default_worker_pool_size() -> usize {
    20
}
fn default_page_limit() -> u32 {
    500
}
fn default_batch_size() -> usize {
    200
}
fn default_idle_timeout_secs() -> u64 {
    20
}
fn default_total_timeout_secs() -> u64 {
    120
}
fn default_max_queue_len() -> usize {
    10_000
}
fn default_readable_max_age_seconds() -> i64 {
    24 * 3600
}

impl ServiceConfig for SynchronizerConfig {
    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.worker_pool_size == 0 {
            errors.push(ConfigError { field: "worker_pool_size".into(), reason: "must be positive".into() });
        }
        if !(100..=500).contains(&self.batch_size) {
            errors.push(ConfigError { field: "batch_size".into(), reason: "must be between 100 and 500".into() });
        }
        if let Some(shard) = &self.shard {
            if shard.count == 0 || shard.index >= shard.count {
                errors.push(ConfigError { field: "shard".into(), reason: "index must be < count, count must be positive".into() });
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// `relay_url_hash % shard_count == shard_index` (§5 "multi-process
/// variant"). Uses SHA-256 rather than `DefaultHasher` because the shard
/// assignment must be stable across separate process invocations, not
/// just within one.
fn shard_owns(relay_url: &str, shard: &ShardConfig) -> bool {
    let digest = Sha256::digest(relay_url.as_bytes());
    let bucket = u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is at least 8 bytes"));
    (bucket % shard.count as u64) as u32 == shard.index
}

pub struct Synchronizer {
    config: SynchronizerConfig,
    store: Store,
}

#[derive(Debug, Default)]
struct RelayCounters {
    events_received: u64,
    events_new: u64,
    events_duplicate: u64,
    errors_by_kind: HashMap<ErrorKind, u64>,
}

impl RelayCounters {
    fn record_error(&mut self, kind: ErrorKind) {
        *self.errors_by_kind.entry(kind).or_insert(0) += 1;
        record_error_kind(SERVICE_NAME, kind);
    }

    fn total_errors(&self) -> u64 {
        self.errors_by_kind.values().sum()
    }
}

impl Synchronizer {
    pub fn new(config: SynchronizerConfig, store: Store) -> Self {
        Synchronizer { config, store }
    }
}

#[async_trait]
impl Service for Synchronizer {
    fn name(&self) -> &'static str {
        "synchronizer"
    }

    fn common_config(&self) -> &CommonConfig {
        &self.config.common
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<(), ServiceError> {
        if token.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let mut relays = self.store.relay_list_readable(self.config.readable_max_age_seconds, &self.config.enabled_networks).await.map_err(|e| ServiceError::Failed(e.to_string()))?;

        if let Some(shard) = &self.config.shard {
            relays.retain(|r| shard_owns(&r.url, shard));
        }

        let pool_size = self.config.worker_pool_size;
        let store = self.store.clone();
        let network_config = self.config.network.clone();
        let kinds = self.config.kinds.clone();
        let page_limit = self.config.page_limit;
        let batch_size = self.config.batch_size;
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let total_timeout = Duration::from_secs(self.config.total_timeout_secs);
        let max_queue_len = self.config.max_queue_len;
        let overflow_policy = self.config.overflow_policy;
        let token = token.clone();

        let counters = run_bounded(relays, pool_size, move |relay| {
            let store = store.clone();
            let network_config = network_config.clone();
            let kinds = kinds.clone();
            let token = token.clone();
            async move {
                sync_one_relay(relay, store, network_config, kinds, page_limit, batch_size, idle_timeout, total_timeout, max_queue_len, overflow_policy, token).await
            }
        })
        .await;

        let totals = counters.iter().fold(RelayCounters::default(), |mut acc, c| {
            acc.events_received += c.events_received;
            acc.events_new += c.events_new;
            acc.events_duplicate += c.events_duplicate;
            for (kind, count) in &c.errors_by_kind {
                *acc.errors_by_kind.entry(*kind).or_insert(0) += count;
            }
            acc
        });

        tracing::info!(
            relays = counters.len(),
            events_received = totals.events_received,
            events_new = totals.events_new,
            events_duplicate = totals.events_duplicate,
            errors = totals.total_errors(),
            errors_by_kind = ?totals.errors_by_kind,
            "synchronizer: cycle complete"
        );
        Ok(())
    }
}

/// One window `[since, until)` in the time-window stack (§4.8 step 5).
struct Window {
    since: i64,
    until: i64,
}

#[allow(clippy::too_many_arguments)]
async fn sync_one_relay(
    relay: Relay,
    store: Store,
    network_config: NetworkConfig,
    kinds: Option<Vec<i32>>,
    page_limit: u32,
    batch_size: usize,
    idle_timeout: Duration,
    total_timeout: Duration,
    max_queue_len: usize,
    overflow_policy: OverflowPolicy,
    token: CancellationToken,
) -> RelayCounters {
    let mut counters = RelayCounters::default();
    let now = now_unix();

    let cursor_rows = match store.service_state_get("synchronizer", "cursor", Some(&relay.url)).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(relay = relay.url, error = %e, "synchronizer: failed to load cursor");
            counters.record_error(e.kind());
            return counters;
        }
    };
    let mut cursor: CursorPayload = cursor_rows.first().and_then(|row| serde_json::from_value(row.payload.clone()).ok()).unwrap_or_default();

    let mut stream = match dial(&relay.url, relay.network, &network_config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(relay = relay.url, error = %e, "synchronizer: dial failed");
            counters.record_error(e.kind());
            return counters;
        }
    };

    let mut stack = vec![Window { since: cursor.since, until: now }];
    let mut pending: Vec<Event> = Vec::new();
    let deadline = Instant::now() + total_timeout;

    while let Some(window) = stack.pop() {
        if token.is_cancelled() || Instant::now() >= deadline {
            break;
        }

        let sub_id = "bigbrotr-sync";
        let mut filter = serde_json::json!({ "since": window.since, "until": window.until, "limit": page_limit });
        if let Some(kinds) = &kinds {
            filter["kinds"] = serde_json::json!(kinds);
        }
        let req = ClientMessage::Req { sub_id: sub_id.to_string(), filters: vec![filter] };
        if stream.send(Message::Text(req.to_frame())).await.is_err() {
            counters.record_error(ErrorKind::TransientNet);
            break;
        }

        let mut received = Vec::new();
        loop {
            if Instant::now() >= deadline {
                break;
            }
            let frame = match tokio::time::timeout(idle_timeout, stream.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) | Err(_) => break,
            };
            match parse_relay_message(&frame) {
                Ok(RelayMessage::Event { sub_id: sid, event }) if sid == sub_id => {
                    if !EventKindCategory::is_ephemeral(event.kind) {
                        received.push(event);
                    }
                }
                Ok(RelayMessage::Eose { sub_id: sid }) if sid == sub_id => break,
                Ok(_) => continue,
                Err(_) => continue,
            }
        }

        counters.events_received += received.len() as u64;

        if received.len() as u32 >= page_limit && !received.is_empty() {
            let mut created_ats: Vec<i64> = received.iter().map(|e| e.created_at).collect();
            created_ats.sort_unstable();
            let median = created_ats[created_ats.len() / 2];

            stack.push(Window { since: window.since, until: median });
            pending.extend(received.into_iter().filter(|e| e.created_at > median));
        } else {
            pending.extend(received);
        }

        if pending.len() >= max_queue_len {
            match overflow_policy {
                OverflowPolicy::Flush => {
                    flush_batch(&store, &relay, &mut pending, &mut cursor, batch_size, &mut counters).await;
                }
                OverflowPolicy::Drop => {
                    let excess = pending.len() - max_queue_len;
                    pending.drain(0..excess);
                    tracing::warn!(relay = relay.url, dropped = excess, "synchronizer: in-memory queue overflow, dropping oldest");
                }
            }
        }

        if pending.len() >= batch_size {
            flush_batch(&store, &relay, &mut pending, &mut cursor, batch_size, &mut counters).await;
        }
    }

    if !pending.is_empty() {
        flush_batch(&store, &relay, &mut pending, &mut cursor, pending.len(), &mut counters).await;
    }

    let _ = stream.close().await;
    counters
}

async fn flush_batch(store: &Store, relay: &Relay, pending: &mut Vec<Event>, cursor: &mut CursorPayload, batch_size: usize, counters: &mut RelayCounters) {
    while !pending.is_empty() {
        let take = batch_size.min(pending.len());
        let batch: Vec<Event> = pending.drain(0..take).collect();
        let seen_at = now_unix();
        let relays: Vec<Relay> = batch.iter().map(|_| relay.clone()).collect();
        let seen_ats: Vec<i64> = batch.iter().map(|_| seen_at).collect();

        match store.event_relay_insert_cascade(&batch, &relays, &seen_ats).await {
            Ok(inserted) => {
                counters.events_new += inserted;
                counters.events_duplicate += batch.len() as u64 - inserted;
            }
            Err(e) => {
                let kind = e.kind();
                tracing::warn!(relay = relay.url, error = %e, "synchronizer: batch commit failed");
                counters.record_error(kind);
                continue;
            }
        }

        if let Some(max_created_at) = batch.iter().map(|e| e.created_at).max() {
            cursor.since = cursor.since.max(max_created_at);
            cursor.last_id = batch.iter().max_by_key(|e| e.created_at).map(|e| e.id.to_hex());
        }

        let row = ServiceState {
            service_name: "synchronizer".to_string(),
            state_type: "cursor".to_string(),
            state_key: relay.url.clone(),
            payload: serde_json::to_value(&*cursor).expect("cursor payload always serializes"),
            updated_at: now_unix(),
        };
        if let Err(e) = store.service_state_upsert(&[row]).await {
            let kind = e.kind();
            tracing::warn!(relay = relay.url, error = %e, "synchronizer: cursor persist failed");
            counters.record_error(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_assignment_is_deterministic_and_covers_the_space() {
        let shard_a = ShardConfig { count: 4, index: 0 };
        let shard_b = ShardConfig { count: 4, index: 1 };
        let url = "wss://relay.example.com/";
        let owned_by_a = shard_owns(url, &shard_a);
        let owned_by_b = shard_owns(url, &shard_b);
        assert_ne!(owned_by_a, owned_by_b);
        assert_eq!(shard_owns(url, &shard_a), shard_owns(url, &shard_a));
    }

    #[test]
    fn every_relay_is_owned_by_exactly_one_shard() {
        let urls: Vec<String> = (0..50).map(|i| format!("wss://relay{i}.example.com/")).collect();
        for count in [2u32, 3, 5] {
            for url in &urls {
                let owners: Vec<u32> = (0..count).filter(|&index| shard_owns(url, &ShardConfig { count, index })).collect();
                assert_eq!(owners.len(), 1, "relay {url} should belong to exactly one of {count} shards");
            }
        }
    }
}
