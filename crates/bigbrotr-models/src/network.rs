//! Network classification of a relay, derived once from its host suffix.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overlay/clearnet classification of a relay's host.
///
/// Detected once at [`crate::relay::Relay`] construction (§4.3) and cached
/// in the model: never re-derived later, since URL normalization may
/// already have altered the host by the time a relay is promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Clearnet,
    Tor,
    I2p,
    Loki,
}

impl Network {
    /// Case-insensitive suffix match on `host`.
    pub fn from_host(host: &str) -> Network {
        let host = host.to_ascii_lowercase();
        if host.ends_with(".onion") {
            Network::Tor
        } else if host.ends_with(".i2p") {
            Network::I2p
        } else if host.ends_with(".loki") {
            Network::Loki
        } else {
            Network::Clearnet
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Clearnet => "clearnet",
            Network::Tor => "tor",
            Network::I2p => "i2p",
            Network::Loki => "loki",
        }
    }

    pub fn is_overlay(&self) -> bool {
        !matches!(self, Network::Clearnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clearnet" => Ok(Network::Clearnet),
            "tor" => Ok(Network::Tor),
            "i2p" => Ok(Network::I2p),
            "loki" => Ok(Network::Loki),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_overlay_suffixes_case_insensitively() {
        assert_eq!(Network::from_host("FOO.ONION"), Network::Tor);
        assert_eq!(Network::from_host("foo.i2p"), Network::I2p);
        assert_eq!(Network::from_host("foo.loki"), Network::Loki);
        assert_eq!(Network::from_host("relay.example.com"), Network::Clearnet);
    }
}
