//! Relay identity: a discovered, normalized WebSocket endpoint (§3, §4.3).

use crate::error::ModelError;
use crate::network::Network;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A relay whose URL has passed normalization and network detection.
///
/// A `Relay` value only means "this URL is well-formed"; it does **not**
/// imply the endpoint has ever been reached. Per §3's invariant, a row in
/// the `relay` *table* additionally means "passed at least one successful
/// validation" — that promotion happens in `bigbrotr-services::validator`,
/// not here. This type is the normalized identity both candidates and
/// promoted relays share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub url: String,
    pub network: Network,
    pub discovered_at: i64,
}

impl Relay {
    pub fn new(raw_url: &str, discovered_at: i64) -> Result<Self, ModelError> {
        let url = normalize_url(raw_url)?;
        let host = url::Url::parse(&url)
            .map_err(|_| ModelError::InvalidUrl(url.clone()))?
            .host_str()
            .ok_or_else(|| ModelError::InvalidUrl(url.clone()))?
            .to_string();
        let network = Network::from_host(&host);
        Ok(Relay { url, network, discovered_at })
    }
}

/// Normalizes a relay URL per §4.3:
/// - scheme lowercased; only `ws`/`wss` accepted,
/// - host lowercased and IDNA-normalized,
/// - default ports (80 for ws, 443 for wss) elided,
/// - empty path coerced to `/`, trailing `/` stripped except root,
/// - fragment dropped,
/// - bare private-range IP hosts rejected.
///
/// `norm` is idempotent: `normalize_url(normalize_url(u)?) == normalize_url(u)`
/// (Testable Property 1).
pub fn normalize_url(raw: &str) -> Result<String, ModelError> {
    let mut parsed = url::Url::parse(raw.trim()).map_err(|_| ModelError::InvalidUrl(raw.to_string()))?;

    match parsed.scheme() {
        "ws" | "wss" => {}
        other => return Err(ModelError::UnsupportedScheme(other.to_string())),
    }

    let host = parsed.host_str().ok_or_else(|| ModelError::InvalidUrl(raw.to_string()))?.to_string();

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private(&ip) {
            return Err(ModelError::PrivateAddress(host));
        }
    } else {
        let ascii_host =
            idna::domain_to_ascii(&host).map_err(|_| ModelError::InvalidHostname(host.clone()))?;
        parsed.set_host(Some(&ascii_host)).map_err(|_| ModelError::InvalidHostname(host))?;
    }

    parsed.set_fragment(None);

    let default_port = match parsed.scheme() {
        "ws" => Some(80),
        "wss" => Some(443),
        _ => None,
    };
    if parsed.port() == default_port {
        let _ = parsed.set_port(None);
    }

    if parsed.path().is_empty() {
        parsed.set_path("/");
    } else if parsed.path() != "/" && parsed.path().ends_with('/') {
        let trimmed = parsed.path().trim_end_matches('/').to_string();
        parsed.set_path(&trimmed);
    }

    Ok(parsed.as_str().to_string())
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_default_port_and_trailing_slash() {
        let n = normalize_url("wss://Relay.Example.com:443/").unwrap();
        assert_eq!(n, "wss://relay.example.com/");
    }

    #[test]
    fn coerces_empty_path_to_root() {
        let n = normalize_url("wss://relay.example.com").unwrap();
        assert_eq!(n, "wss://relay.example.com/");
    }

    #[test]
    fn rejects_non_ws_scheme() {
        assert!(matches!(normalize_url("https://relay.example.com"), Err(ModelError::UnsupportedScheme(_))));
    }

    #[test]
    fn rejects_private_ip() {
        assert!(matches!(normalize_url("ws://127.0.0.1/"), Err(ModelError::PrivateAddress(_))));
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_url("WSS://Relay.Example.COM:443/foo/").unwrap();
        let twice = normalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn detects_tor_network() {
        let r = Relay::new("ws://abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuvwxyz23.onion/", 0).unwrap();
        assert_eq!(r.network, Network::Tor);
    }
}
