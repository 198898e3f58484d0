//! Seeder (§4.4): one-shot candidate loader from a text file of URLs.

use crate::util::{now_unix, store_err};
use async_trait::async_trait;
use bigbrotr_core::service::{CommonConfig, ConfigError, Service, ServiceConfig, ServiceError};
use bigbrotr_models::{Relay, ServiceState};
use bigbrotr_store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeederConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    /// Path to the newline-delimited URL file. `#`-prefixed lines and
    /// blank lines are skipped.
    pub input_file: PathBuf,
}

impl ServiceConfig for SeederConfig {
    fn common(&self) -> &CommonConfig {
        &self.common
    }

    fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.input_file.as_os_str().is_empty() {
            errors.push(ConfigError { field: "input_file".into(), reason: "must not be empty".into() });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub struct Seeder {
    config: SeederConfig,
    store: Store,
}

impl Seeder {
    pub fn new(config: SeederConfig, store: Store) -> Self {
        Seeder { config, store }
    }

    /// Parses `#`-commented, newline-delimited URLs, normalizing and
    /// de-duplicating each. Malformed URLs are skipped with a warning,
    /// never fail the whole load.
    fn parse_candidates(raw: &str) -> Vec<Relay> {
        let now = now_unix();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for line in raw.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            match Relay::new(line, now) {
                Ok(relay) => {
                    if seen.insert(relay.url.clone()) {
                        out.push(relay);
                    }
                }
                Err(e) => tracing::warn!(line, error = %e, "seeder: skipping invalid url"),
            }
        }
        out
    }
}

#[async_trait]
impl Service for Seeder {
    fn name(&self) -> &'static str {
        "seeder"
    }

    fn common_config(&self) -> &CommonConfig {
        &self.config.common
    }

    fn one_shot(&self) -> bool {
        true
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<(), ServiceError> {
        if token.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let raw = tokio::fs::read_to_string(&self.config.input_file).await.map_err(|e| ServiceError::Failed(format!("reading {:?}: {e}", self.config.input_file)))?;

        let candidates = Self::parse_candidates(&raw);
        let now = now_unix();
        let rows: Vec<ServiceState> = candidates
            .iter()
            .map(|relay| ServiceState {
                service_name: "validator".to_string(),
                state_type: "candidate".to_string(),
                state_key: relay.url.clone(),
                payload: serde_json::json!({
                    "network": relay.network.as_str(),
                    "failed_attempts": 0,
                    "discovered_at": now,
                }),
                updated_at: now,
            })
            .collect();

        let written = self.store.service_state_upsert(&rows).await.map_err(|e| store_err(self.name(), e))?;
        tracing::info!(loaded = candidates.len(), written, "seeder: candidates loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blank_lines_and_dedups() {
        let raw = "wss://a.example.com\n# a comment\n\nwss://a.example.com/\nwss://b.example.com # inline comment\nnot a url\n";
        let candidates = Seeder::parse_candidates(raw);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|r| r.url == "wss://a.example.com/"));
        assert!(candidates.iter().any(|r| r.url == "wss://b.example.com/"));
    }
}
