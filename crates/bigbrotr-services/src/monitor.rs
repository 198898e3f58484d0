//! Monitor (§4.7): keeps fresh NIP-11 and NIP-66 checks for every known
//! relay.

use crate::util::{now_unix, store_err};
use crate::worker_pool::run_bounded;
use async_trait::async_trait;
use bigbrotr_core::service::{CommonConfig, ConfigError, Service, ServiceConfig, ServiceError};
use bigbrotr_models::{
    Event, EventId, Metadata, MetadataType, Network, Nip66Dns, Nip66Geo, Nip66Http, Nip66Net, Nip66Rtt, Nip66Ssl, PubKey, Relay, Signature,
};
use bigbrotr_store::Store;
use bigbrotr_transport::{dial, NetworkConfig};
use futures_util::SinkExt;
use secp256k1::{Keypair, Message as SchnorrMessage, Secp256k1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Which NIP-11/NIP-66 checks run, and separately which of the computed
/// results get persisted. `persist` must be a subset of `compute`
/// (Pydantic-style "store ⊆ compute" cross-field rule, enforced in
/// [`MonitorConfig::validate`] since `deny_unknown_fields` alone can't).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CheckSet {
    #[serde(default)]
    pub nip11: bool,
    #[serde(default)]
    pub rtt: bool,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub dns: bool,
    #[serde(default)]
    pub geo: bool,
    #[serde(default)]
    pub net: bool,
    #[serde(default)]
    pub http: bool,
}

impl CheckSet {
    fn all() -> CheckSet {
        CheckSet { nip11: true, rtt: true, ssl: true, dns: true, geo: false, net: true, http: true }
    }

    fn is_subset_of(&self, other: &CheckSet) -> bool {
        (!self.nip11 || other.nip11)
            && (!self.rtt || other.rtt)
            && (!self.ssl || other.ssl)
            && (!self.dns || other.dns)
            && (!self.geo || other.geo)
            && (!self.net || other.net)
            && (!self.http || other.http)
    }
}

fn default_compute() -> CheckSet {
    CheckSet::all()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    pub private_key_hex: String,
    pub relays: Vec<String>,
    #[serde(default)]
    pub publish_online: bool,
    #[serde(default)]
    pub publish_full: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub network: NetworkConfig,
    #[serde(default = "default_enabled_networks")]
    pub enabled_networks: Vec<Network>,
    #[serde(default = "default_compute")]
    pub compute: CheckSet,
    #[serde(default)]
    pub persist: CheckSet,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: i64,
    #[serde(default = "default_gc_batch_size")]
    pub gc_batch_size: i64,
    pub geoip_db_path: Option<PathBuf>,
    pub publish: Option<PublishConfig>,
}

fn default_enabled_networks() -> Vec<Network> {
    vec![Network::Clearnet, Network::Tor, Network::I2p, Network::Loki]
}
fn default_worker_pool_size() -> usize {
    20
}
fn default_retention_seconds() -> i64 {
    30 * 24 * 3600
}
fn default_gc_batch_size() -> i64 {
    1000
}

impl ServiceConfig for MonitorConfig {
    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.worker_pool_size == 0 {
            errors.push(ConfigError { field: "worker_pool_size".into(), reason: "must be positive".into() });
        }
        if !self.persist.is_subset_of(&self.compute) {
            errors.push(ConfigError { field: "persist".into(), reason: "must be a subset of compute: cannot store a check that was never computed".into() });
        }
        if self.compute.geo && self.geoip_db_path.is_none() {
            errors.push(ConfigError { field: "geoip_db_path".into(), reason: "required when compute.geo is enabled".into() });
        }
        if self.compute.geo && !self.compute.dns {
            errors.push(ConfigError { field: "compute.dns".into(), reason: "required when compute.geo is enabled: geo resolves the relay's IP from the DNS check".into() });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub struct Monitor {
    config: MonitorConfig,
    store: Store,
    http: reqwest::Client,
    geoip: Option<Arc<maxminddb::Reader<Vec<u8>>>>,
    keypair: Option<Keypair>,
}

struct RelayCheckOutcome {
    relay: Relay,
    persisted: Vec<(MetadataType, serde_json::Value)>,
    all_computed: HashMap<&'static str, serde_json::Value>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, store: Store) -> Result<Self, String> {
        let geoip = config
            .geoip_db_path
            .as_ref()
            .map(maxminddb::Reader::open_readfile)
            .transpose()
            .map_err(|e| format!("opening geoip db: {e}"))?
            .map(Arc::new);
        let keypair = config
            .publish
            .as_ref()
            .map(|p| {
                let secp = Secp256k1::new();
                let bytes = hex::decode(&p.private_key_hex).map_err(|e| format!("decoding private_key_hex: {e}"))?;
                secp256k1::SecretKey::from_slice(&bytes).map(|sk| Keypair::from_secret_key(&secp, &sk)).map_err(|e| format!("invalid private key: {e}"))
            })
            .transpose()?;
        Ok(Monitor { config, store, http: reqwest::Client::new(), geoip, keypair })
    }

    async fn publish_for_relay(&self, outcome: &RelayCheckOutcome) {
        let Some(publish) = &self.config.publish else { return };
        let Some(keypair) = &self.keypair else { return };
        let now = now_unix();

        if publish.publish_online {
            let content = serde_json::json!({ "status": "online" });
            let event = build_monitor_event(keypair, 10166, &outcome.relay.url, &content, now);
            self.publish_to_configured_relays(event).await;
        }
        if publish.publish_full {
            let content = serde_json::to_value(&outcome.all_computed).unwrap_or_default();
            let event = build_monitor_event(keypair, 30166, &outcome.relay.url, &content, now);
            self.publish_to_configured_relays(event).await;
        }
    }

    async fn publish_to_configured_relays(&self, event: Event) {
        let Some(publish) = &self.config.publish else { return };
        for target in &publish.relays {
            let Ok(relay) = Relay::new(target, 0) else { continue };
            publish_event(event.clone(), &relay.url, relay.network, &self.config.network).await;
        }
    }
}

#[async_trait]
impl Service for Monitor {
    fn name(&self) -> &'static str {
        "monitor"
    }

    fn common_config(&self) -> &CommonConfig {
        &self.config.common
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<(), ServiceError> {
        if token.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let relays = self.store.relay_list(&self.config.enabled_networks).await.map_err(|e| store_err(self.name(), e))?;

        let mut by_network: HashMap<Network, Vec<Relay>> = HashMap::new();
        for relay in relays {
            by_network.entry(relay.network).or_default().push(relay);
        }

        let mut outcomes = Vec::new();
        for (_network, group) in by_network {
            let pool_size = self.config.worker_pool_size;
            let http = self.http.clone();
            let network_config = self.config.network.clone();
            let compute = self.config.compute;
            let persist = self.config.persist;
            let keypair = self.keypair.clone();
            let geoip = self.geoip.clone();
            let group_outcomes = run_bounded(group, pool_size, move |relay| {
                let http = http.clone();
                let network_config = network_config.clone();
                let geoip = geoip.clone();
                let keypair = keypair.clone();
                async move { check_relay(relay, http, network_config, compute, persist, keypair, geoip).await }
            })
            .await;
            outcomes.extend(group_outcomes);
        }

        let now = now_unix();
        let mut relay_rows = Vec::new();
        let mut metadata_rows = Vec::new();
        let mut generated_ats = Vec::new();
        for outcome in &outcomes {
            for (metadata_type, value) in &outcome.persisted {
                relay_rows.push(outcome.relay.clone());
                metadata_rows.push(Metadata::new(*metadata_type, value.clone()));
                generated_ats.push(now);
            }
        }

        if !relay_rows.is_empty() {
            self.store.relay_metadata_insert_cascade(&relay_rows, &metadata_rows, &generated_ats).await.map_err(|e| store_err(self.name(), e))?;
        }

        if self.config.publish.is_some() {
            for outcome in &outcomes {
                self.publish_for_relay(outcome).await;
            }
        }

        self.store.relay_metadata_delete_expired(self.config.retention_seconds, self.config.gc_batch_size).await.map_err(|e| store_err(self.name(), e))?;
        self.store.orphan_metadata_delete(self.config.gc_batch_size).await.map_err(|e| store_err(self.name(), e))?;

        tracing::info!(relays_checked = outcomes.len(), metadata_written = relay_rows.len(), "monitor: cycle complete");
        Ok(())
    }
}

async fn check_relay(
    relay: Relay,
    http: reqwest::Client,
    network_config: NetworkConfig,
    compute: CheckSet,
    persist: CheckSet,
    keypair: Option<Keypair>,
    geoip: Option<Arc<maxminddb::Reader<Vec<u8>>>>,
) -> RelayCheckOutcome {
    let timeout = network_config.timeout_for(relay.network);
    let mut persisted = Vec::new();
    let mut all_computed = HashMap::new();

    if compute.nip11 {
        if let Some(doc) = check_nip11(&http, &relay, timeout).await {
            all_computed.insert("nip11_info", doc.clone());
            if persist.nip11 {
                persisted.push((MetadataType::Nip11Info, doc));
            }
        }
    }

    if compute.rtt {
        let rtt = check_rtt(&relay, &network_config, keypair.as_ref()).await;
        let value = serde_json::to_value(&rtt).expect("Nip66Rtt always serializes");
        all_computed.insert("nip66_rtt", value.clone());
        if persist.rtt {
            persisted.push((MetadataType::Nip66Rtt, value));
        }
    }

    if compute.ssl && relay.network == Network::Clearnet {
        let ssl = check_ssl(&relay, &network_config).await;
        let value = serde_json::to_value(&ssl).expect("Nip66Ssl always serializes");
        all_computed.insert("nip66_ssl", value.clone());
        if persist.ssl {
            persisted.push((MetadataType::Nip66Ssl, value));
        }
    }

    let dns = if compute.dns { check_dns(&relay).await } else { None };
    if let Some(dns) = &dns {
        let value = serde_json::to_value(dns).expect("Nip66Dns always serializes");
        all_computed.insert("nip66_dns", value.clone());
        if persist.dns {
            persisted.push((MetadataType::Nip66Dns, value));
        }
    }

    if compute.geo {
        if let Some(geo) = check_geo(dns.as_ref(), geoip.as_deref()) {
            let value = serde_json::to_value(&geo).expect("Nip66Geo always serializes");
            all_computed.insert("nip66_geo", value.clone());
            if persist.geo {
                persisted.push((MetadataType::Nip66Geo, value));
            }
        }
    }

    if compute.net && relay.network == Network::Clearnet {
        let net = check_net(&relay).await;
        let value = serde_json::to_value(&net).expect("Nip66Net always serializes");
        all_computed.insert("nip66_net", value.clone());
        if persist.net {
            persisted.push((MetadataType::Nip66Net, value));
        }
    }

    if compute.http {
        let http_check = check_http(&http, &relay, timeout).await;
        let value = serde_json::to_value(&http_check).expect("Nip66Http always serializes");
        all_computed.insert("nip66_http", value.clone());
        if persist.http {
            persisted.push((MetadataType::Nip66Http, value));
        }
    }

    RelayCheckOutcome { relay, persisted, all_computed }
}

fn to_http_url(relay_url: &str) -> Option<String> {
    let mut parsed = url::Url::parse(relay_url).ok()?;
    let scheme = if parsed.scheme() == "wss" { "https" } else { "http" };
    parsed.set_scheme(scheme).ok()?;
    Some(parsed.to_string())
}

async fn check_nip11(client: &reqwest::Client, relay: &Relay, timeout: Duration) -> Option<serde_json::Value> {
    let url = to_http_url(&relay.url)?;
    let response = client.get(&url).header("Accept", "application/nostr+json").timeout(timeout).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json::<serde_json::Value>().await.ok()
}

async fn check_rtt(relay: &Relay, network_config: &NetworkConfig, keypair: Option<&Keypair>) -> Nip66Rtt {
    let timeout = network_config.timeout_for(relay.network);

    let dial_start = Instant::now();
    let mut stream = match bigbrotr_transport::probes::dial_ok(&relay.url, relay.network, network_config).await {
        Ok(s) => s,
        Err(_) => return Nip66Rtt::default(),
    };
    let rtt_dial = Some(dial_start.elapsed().as_millis() as u64);

    let read_start = Instant::now();
    let rtt_read = match bigbrotr_transport::probes::read_ok(&mut stream, timeout).await {
        Ok(true) => Some(read_start.elapsed().as_millis() as u64),
        _ => None,
    };

    let rtt_write = match keypair {
        Some(kp) => {
            let write_start = Instant::now();
            match bigbrotr_transport::probes::write_ok(&mut stream, kp, timeout).await {
                Ok(true) => Some(write_start.elapsed().as_millis() as u64),
                _ => None,
            }
        }
        None => None,
    };

    Nip66Rtt { rtt_dial, rtt_read, rtt_write }
}

async fn check_ssl(relay: &Relay, network_config: &NetworkConfig) -> Nip66Ssl {
    match bigbrotr_transport::probes::dial_ok(&relay.url, relay.network, network_config).await {
        Ok(stream) => match bigbrotr_transport::tls::inspect(&stream) {
            Ok(info) => Nip66Ssl { expires_at: Some(info.not_after_unix), issuer: Some(info.issuer), subject: Some(info.subject), sans: info.san, error: None },
            Err(e) => Nip66Ssl { error: Some(e.to_string()), ..Default::default() },
        },
        Err(e) => Nip66Ssl { error: Some(e.to_string()), ..Default::default() },
    }
}

async fn check_dns(relay: &Relay) -> Option<Nip66Dns> {
    if relay.network != Network::Clearnet {
        return None;
    }
    let host = url::Url::parse(&relay.url).ok()?.host_str()?.to_string();
    match bigbrotr_transport::dns::resolve(&host).await {
        Ok(record) => Some(Nip66Dns { a: record.a, aaaa: record.aaaa, error: None }),
        Err(e) => Some(Nip66Dns { a: vec![], aaaa: vec![], error: Some(e.to_string()) }),
    }
}

/// Resolves the relay host's IP address (§4.7's "NET" check). Separate
/// from `check_dns` since a config may persist one without the other.
async fn check_net(relay: &Relay) -> Nip66Net {
    let Some(host) = url::Url::parse(&relay.url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return Nip66Net { error: Some("cannot derive host from url".into()), ..Default::default() };
    };
    match bigbrotr_transport::dns::resolve(&host).await {
        Ok(record) => Nip66Net { ip: record.a.into_iter().next().or_else(|| record.aaaa.into_iter().next()), error: None },
        Err(e) => Nip66Net { ip: None, error: Some(e.to_string()) },
    }
}

fn check_geo(dns: Option<&Nip66Dns>, reader: Option<&maxminddb::Reader<Vec<u8>>>) -> Option<Nip66Geo> {
    let reader = reader?;
    let dns = dns?;
    let ip_str = dns.a.first().or_else(|| dns.aaaa.first())?;
    let ip: std::net::IpAddr = ip_str.parse().ok()?;
    match reader.lookup::<maxminddb::geoip2::City>(ip) {
        Ok(Some(city)) => Some(Nip66Geo {
            country: city.country.as_ref().and_then(|c| c.iso_code).map(str::to_string),
            city: city.city.as_ref().and_then(|c| c.names.as_ref()).and_then(|names| names.get("en")).map(|s| s.to_string()),
            latitude: city.location.as_ref().and_then(|l| l.latitude),
            longitude: city.location.as_ref().and_then(|l| l.longitude),
            asn: None,
            error: None,
        }),
        Ok(None) => Some(Nip66Geo { error: Some("no geoip entry for address".to_string()), ..Default::default() }),
        Err(e) => Some(Nip66Geo { error: Some(e.to_string()), ..Default::default() }),
    }
}

async fn check_http(client: &reqwest::Client, relay: &Relay, timeout: Duration) -> Nip66Http {
    let Some(url) = to_http_url(&relay.url) else {
        return Nip66Http { error: Some("cannot derive http(s) url".into()), ..Default::default() };
    };
    match client.head(&url).timeout(timeout).send().await {
        Ok(response) => {
            let status = Some(response.status().as_u16());
            let headers = response.headers().iter().map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string())).collect();
            Nip66Http { status, headers, error: None }
        }
        Err(e) => Nip66Http { error: Some(e.to_string()), ..Default::default() },
    }
}

fn build_monitor_event(keypair: &Keypair, kind: u32, relay_url: &str, content: &serde_json::Value, created_at: i64) -> Event {
    let secp = Secp256k1::new();
    let (xonly, _) = keypair.x_only_public_key();
    let tags = vec![vec!["d".to_string(), relay_url.to_string()]];
    let content = content.to_string();

    let preimage = Event::id_preimage(&PubKey(xonly.serialize()), created_at, kind, &tags, &content);
    let preimage_bytes = serde_json::to_vec(&preimage).expect("json serialization of a preimage array never fails");
    let digest = Sha256::digest(&preimage_bytes);
    let message = SchnorrMessage::from_digest(digest.into());
    let sig = secp.sign_schnorr(&message, keypair);

    Event { id: EventId(digest.into()), pubkey: PubKey(xonly.serialize()), created_at, kind, tags, content, sig: Signature(*sig.as_ref()) }
}

async fn publish_event(event: Event, relay_url: &str, network: Network, network_config: &NetworkConfig) {
    let Ok(mut stream) = dial(relay_url, network, network_config).await else { return };
    let msg = bigbrotr_transport::ClientMessage::Event(event);
    let _ = stream.send(Message::Text(msg.to_frame())).await;
    let _ = stream.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_set_subset_detects_violation() {
        let compute = CheckSet { nip11: true, rtt: true, ssl: false, dns: false, geo: false, net: false, http: false };
        let persist_ok = CheckSet { nip11: true, rtt: false, ssl: false, dns: false, geo: false, net: false, http: false };
        let persist_bad = CheckSet { nip11: false, rtt: false, ssl: true, dns: false, geo: false, net: false, http: false };
        assert!(persist_ok.is_subset_of(&compute));
        assert!(!persist_bad.is_subset_of(&compute));
    }

    #[test]
    fn to_http_url_upgrades_scheme() {
        assert_eq!(to_http_url("wss://relay.example.com/").unwrap(), "https://relay.example.com/");
        assert_eq!(to_http_url("ws://relay.example.com/").unwrap(), "http://relay.example.com/");
    }

    #[test]
    fn geo_check_is_none_without_a_reader() {
        let dns = Nip66Dns { a: vec!["1.2.3.4".into()], aaaa: vec![], error: None };
        assert!(check_geo(Some(&dns), None).is_none());
    }

    #[test]
    fn validate_requires_dns_when_geo_is_computed() {
        let mut config = test_monitor_config();
        config.compute.geo = true;
        config.compute.dns = false;
        config.geoip_db_path = Some(PathBuf::from("/tmp/geoip.mmdb"));
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "compute.dns"));
    }

    fn test_monitor_config() -> MonitorConfig {
        MonitorConfig {
            common: CommonConfig {
                interval_seconds: 60,
                jitter: 0.0,
                max_consecutive_failures: 3,
                metrics: Default::default(),
                pool: bigbrotr_core::service::PoolConfig {
                    user: "u".into(),
                    password_env: "PW".into(),
                    host: "localhost".into(),
                    port: 5432,
                    database: "db".into(),
                    min_size: 1,
                    max_size: 2,
                    acquire_timeout_ms: 1000,
                    statement_timeout_ms: 1000,
                    retry: Default::default(),
                },
                shutdown_grace_seconds: 10,
            },
            network: NetworkConfig { tor: None, i2p: None, loki: None, clearnet_timeout_secs: 10, tor_timeout_secs: 45, i2p_timeout_secs: 50, loki_timeout_secs: 35 },
            enabled_networks: default_enabled_networks(),
            compute: CheckSet::all(),
            persist: CheckSet::default(),
            worker_pool_size: 10,
            retention_seconds: default_retention_seconds(),
            gc_batch_size: default_gc_batch_size(),
            geoip_db_path: None,
            publish: None,
        }
    }
}
