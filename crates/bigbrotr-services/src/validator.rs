//! Validator (§4.6): promotes reachable candidates to `relay`, decays the
//! rest.

use crate::decay::{DecayParams, DecayPolicy};
use crate::util::{now_unix, store_err};
use crate::worker_pool::run_bounded;
use async_trait::async_trait;
use bigbrotr_core::service::{CommonConfig, ConfigError, Service, ServiceConfig, ServiceError};
use bigbrotr_models::{CandidatePayload, Network, Relay, ServiceState};
use bigbrotr_store::Store;
use bigbrotr_transport::NetworkConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub network: NetworkConfig,
    #[serde(default = "default_enabled_networks")]
    pub enabled_networks: Vec<Network>,
    #[serde(default = "default_per_cycle_cap")]
    pub per_cycle_cap: usize,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_decay")]
    pub decay: DecayParams,
    #[serde(default)]
    pub read_check: bool,
}

fn default_enabled_networks() -> Vec<Network> {
    vec![Network::Clearnet, Network::Tor, Network::I2p, Network::Loki]
}
fn default_per_cycle_cap() -> usize {
    200
}
fn default_worker_pool_size() -> usize {
    20
}
fn default_max_failed_attempts() -> u32 {
    10
}
fn default_decay() -> DecayParams {
    DecayParams::Exponential(Default::default())
}

impl ServiceConfig for ValidatorConfig {
    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.per_cycle_cap == 0 {
            errors.push(ConfigError { field: "per_cycle_cap".into(), reason: "must be positive".into() });
        }
        if self.worker_pool_size == 0 {
            errors.push(ConfigError { field: "worker_pool_size".into(), reason: "must be positive".into() });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub struct Validator {
    config: ValidatorConfig,
    store: Store,
}

struct Candidate {
    url: String,
    network: Network,
    failed_attempts: u32,
    discovered_at: i64,
}

enum Outcome {
    Promote(Relay),
    Decay { url: String, network: String, failed_attempts: u32, discovered_at: i64 },
    Drop(String),
}

impl Validator {
    pub fn new(config: ValidatorConfig, store: Store) -> Self {
        Validator { config, store }
    }

    /// §4.6 step 2: sample without replacement, weighting by the
    /// candidate's decay-adjusted selection probability.
    fn sample(candidates: Vec<Candidate>, decay: &dyn DecayPolicy, cap: usize) -> Vec<Candidate> {
        let mut rng = rand::thread_rng();
        let mut weighted: Vec<(f64, Candidate)> = candidates.into_iter().map(|c| (decay.probability(c.failed_attempts), c)).collect();
        weighted.retain(|(p, _)| rng.gen_bool(p.clamp(0.0, 1.0)));
        weighted.truncate(cap);
        weighted.into_iter().map(|(_, c)| c).collect()
    }
}

#[async_trait]
impl Service for Validator {
    fn name(&self) -> &'static str {
        "validator"
    }

    fn common_config(&self) -> &CommonConfig {
        &self.config.common
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<(), ServiceError> {
        if token.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let rows = self.store.service_state_get("validator", "candidate", None).await.map_err(|e| store_err(self.name(), e))?;
        let urls: Vec<String> = rows.iter().map(|r| r.state_key.clone()).collect();
        let already_relays = self.store.relay_urls_existing(&urls).await.map_err(|e| store_err(self.name(), e))?;

        let mut stale_candidates = Vec::new();
        let mut candidates = Vec::new();
        for row in rows {
            if already_relays.contains(&row.state_key) {
                // §4.6 "tie-breaks": relay table wins, candidate is stale.
                stale_candidates.push(row.state_key.clone());
                continue;
            }
            let Ok(payload) = serde_json::from_value::<CandidatePayload>(row.payload.clone()) else { continue };
            let Ok(network) = payload.network.parse::<Network>() else { continue };
            if !self.config.enabled_networks.contains(&network) {
                continue;
            }
            candidates.push(Candidate { url: row.state_key, network, failed_attempts: payload.failed_attempts, discovered_at: payload.discovered_at });
        }

        if !stale_candidates.is_empty() {
            let service = vec!["validator".to_string(); stale_candidates.len()];
            let state_type = vec!["candidate".to_string(); stale_candidates.len()];
            self.store.service_state_delete(&service, &state_type, &stale_candidates).await.map_err(|e| store_err(self.name(), e))?;
        }

        let decay = self.config.decay.policy();
        let sample = Self::sample(candidates, decay.as_ref(), self.config.per_cycle_cap);

        let mut by_network: HashMap<Network, Vec<Candidate>> = HashMap::new();
        for c in sample {
            by_network.entry(c.network).or_default().push(c);
        }

        let mut outcomes = Vec::new();
        for (network, group) in by_network {
            let network_config = self.config.network.clone();
            let read_check = self.config.read_check;
            let max_failed = self.config.max_failed_attempts;
            let group_outcomes = run_bounded(group, self.config.worker_pool_size, move |candidate| {
                let network_config = network_config.clone();
                async move { probe_candidate(candidate, network, &network_config, read_check, max_failed).await }
            })
            .await;
            outcomes.extend(group_outcomes);
        }

        let mut promoted_urls = Vec::new();
        let mut promoted_networks = Vec::new();
        let mut promoted_discovered = Vec::new();
        let mut decay_rows = Vec::new();
        let mut drop_keys = Vec::new();

        for outcome in outcomes {
            match outcome {
                Outcome::Promote(relay) => {
                    promoted_urls.push(relay.url.clone());
                    promoted_networks.push(relay.network);
                    promoted_discovered.push(relay.discovered_at);
                    drop_keys.push(relay.url);
                }
                Outcome::Decay { url, network, failed_attempts, discovered_at } => {
                    decay_rows.push(ServiceState {
                        service_name: "validator".to_string(),
                        state_type: "candidate".to_string(),
                        state_key: url,
                        payload: serde_json::json!({ "network": network, "failed_attempts": failed_attempts, "discovered_at": discovered_at }),
                        updated_at: now_unix(),
                    });
                }
                Outcome::Drop(url) => drop_keys.push(url),
            }
        }

        if !promoted_urls.is_empty() {
            self.store.relay_insert(&promoted_urls, &promoted_networks, &promoted_discovered).await.map_err(|e| store_err(self.name(), e))?;
        }
        if !decay_rows.is_empty() {
            self.store.service_state_upsert(&decay_rows).await.map_err(|e| store_err(self.name(), e))?;
        }
        if !drop_keys.is_empty() {
            let service = vec!["validator".to_string(); drop_keys.len()];
            let state_type = vec!["candidate".to_string(); drop_keys.len()];
            self.store.service_state_delete(&service, &state_type, &drop_keys).await.map_err(|e| store_err(self.name(), e))?;
        }

        tracing::info!(promoted = promoted_urls.len(), decayed = decay_rows.len(), dropped = drop_keys.len(), "validator: cycle complete");
        Ok(())
    }
}

async fn probe_candidate(candidate: Candidate, network: Network, network_config: &NetworkConfig, read_check: bool, max_failed_attempts: u32) -> Outcome {
    let dial_result = bigbrotr_transport::probes::dial_ok(&candidate.url, network, network_config).await;
    let succeeded = match dial_result {
        Ok(mut stream) => {
            if read_check {
                let timeout = network_config.timeout_for(network);
                matches!(bigbrotr_transport::probes::read_ok(&mut stream, timeout).await, Ok(true))
            } else {
                true
            }
        }
        Err(_) => false,
    };

    if succeeded {
        Outcome::Promote(Relay { url: candidate.url, network, discovered_at: candidate.discovered_at })
    } else {
        let failed_attempts = candidate.failed_attempts + 1;
        if failed_attempts > max_failed_attempts {
            Outcome::Drop(candidate.url)
        } else {
            Outcome::Decay { url: candidate.url, network: network.as_str().to_string(), failed_attempts, discovered_at: candidate.discovered_at }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decay::ExponentialDecay;

    #[test]
    fn sampling_never_exceeds_the_cap() {
        let candidates: Vec<Candidate> = (0..50).map(|i| Candidate { url: format!("wss://r{i}.example.com"), network: Network::Clearnet, failed_attempts: 0, discovered_at: 0 }).collect();
        let decay = ExponentialDecay { base_p: 1.0, decay: 1.0, p_min: 1.0 };
        let sampled = Validator::sample(candidates, &decay, 10);
        assert!(sampled.len() <= 10);
    }

    #[test]
    fn zero_probability_floor_excludes_everything() {
        let candidates: Vec<Candidate> = (0..20).map(|i| Candidate { url: format!("wss://r{i}.example.com"), network: Network::Clearnet, failed_attempts: 0, discovered_at: 0 }).collect();
        let decay = ExponentialDecay { base_p: 0.0, decay: 1.0, p_min: 0.0 };
        let sampled = Validator::sample(candidates, &decay, 10);
        assert!(sampled.is_empty());
    }
}
