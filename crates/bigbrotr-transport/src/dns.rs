//! DNS resolution for Monitor's NIP-66 DNS check (§4.7 "NET/DNS/GEO/HTTP").
//! Async, Tokio-native, via `hickory-resolver`.

use crate::error::TransportError;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// The A/AAAA records observed for a host, serialized as a Monitor
/// metadata payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsRecord {
    pub host: String,
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
}

/// Resolves `host`'s A and AAAA records with the system resolver config.
/// Overlay-network hosts (`.onion`/`.i2p`/`.loki`) are never passed here:
/// Monitor's DNS check only runs against clearnet relays.
pub async fn resolve(host: &str) -> Result<DnsRecord, TransportError> {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    let response = resolver.lookup_ip(host).await.map_err(|e| TransportError::Dns { host: host.to_string(), reason: e.to_string(), permanent: false })?;

    let mut a = Vec::new();
    let mut aaaa = Vec::new();
    for ip in response.iter() {
        match ip {
            IpAddr::V4(v4) => a.push(v4.to_string()),
            IpAddr::V6(v6) => aaaa.push(v6.to_string()),
        }
    }
    Ok(DnsRecord { host: host.to_string(), a, aaaa })
}
