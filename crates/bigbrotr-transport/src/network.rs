//! Per-network proxy selection and dial timeouts (§4.3 "Proxy selection",
//! "WebSocket dial").

use bigbrotr_models::Network;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A SOCKS5 endpoint (address, optional credentials) for one overlay
/// network. Clearnet has no proxy: direct TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Socks5Config {
    pub address: String,
}

/// Proxy + timeout configuration for every network, validated once at
/// service startup and shared by every dialer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub tor: Option<Socks5Config>,
    pub i2p: Option<Socks5Config>,
    pub loki: Option<Socks5Config>,
    #[serde(default = "default_clearnet_timeout_secs")]
    pub clearnet_timeout_secs: u64,
    #[serde(default = "default_tor_timeout_secs")]
    pub tor_timeout_secs: u64,
    #[serde(default = "default_i2p_timeout_secs")]
    pub i2p_timeout_secs: u64,
    #[serde(default = "default_loki_timeout_secs")]
    pub loki_timeout_secs: u64,
}

fn default_clearnet_timeout_secs() -> u64 {
    10
}
fn default_tor_timeout_secs() -> u64 {
    45
}
fn default_i2p_timeout_secs() -> u64 {
    50
}
fn default_loki_timeout_secs() -> u64 {
    35
}

impl NetworkConfig {
    /// Dial timeout for `network`, per §4.3's typical ranges.
    pub fn timeout_for(&self, network: Network) -> Duration {
        let secs = match network {
            Network::Clearnet => self.clearnet_timeout_secs,
            Network::Tor => self.tor_timeout_secs,
            Network::I2p => self.i2p_timeout_secs,
            Network::Loki => self.loki_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    /// The configured proxy for an overlay network, or `None` for
    /// clearnet (direct TCP).
    pub fn proxy_for(&self, network: Network) -> Option<&Socks5Config> {
        match network {
            Network::Clearnet => None,
            Network::Tor => self.tor.as_ref(),
            Network::I2p => self.i2p.as_ref(),
            Network::Loki => self.loki.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearnet_has_no_proxy() {
        let cfg = NetworkConfig {
            tor: Some(Socks5Config { address: "127.0.0.1:9050".into() }),
            i2p: None,
            loki: None,
            clearnet_timeout_secs: 10,
            tor_timeout_secs: 45,
            i2p_timeout_secs: 50,
            loki_timeout_secs: 35,
        };
        assert!(cfg.proxy_for(Network::Clearnet).is_none());
        assert!(cfg.proxy_for(Network::Tor).is_some());
        assert_eq!(cfg.timeout_for(Network::Tor), Duration::from_secs(45));
    }
}
