//! NIP-66 check result shapes (§4.7 Monitor).
//!
//! Each is serialized canonically and content-hashed by the Monitor
//! service before being wrapped in a [`crate::metadata::Metadata`] row; the
//! shapes here exist so Monitor's check implementations and its tests
//! share one typed contract instead of ad hoc `serde_json::json!` calls.

use serde::{Deserialize, Serialize};

/// Round-trip timings in milliseconds; a `None` leg means that probe
/// failed (§4.7 "failed legs are null").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip66Rtt {
    pub rtt_dial: Option<u64>,
    pub rtt_read: Option<u64>,
    pub rtt_write: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip66Ssl {
    pub expires_at: Option<i64>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub sans: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip66Dns {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip66Geo {
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub asn: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip66Http {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip66Net {
    pub ip: Option<String>,
    pub error: Option<String>,
}
