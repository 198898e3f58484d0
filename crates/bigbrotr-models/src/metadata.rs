//! Content-addressed Metadata and the RelayMetadata time-series link (§3).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Discriminator for the kind of document a [`Metadata`] row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataType {
    Nip11Info,
    Nip66Rtt,
    Nip66Ssl,
    Nip66Geo,
    Nip66Net,
    Nip66Dns,
    Nip66Http,
}

impl MetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::Nip11Info => "nip11_info",
            MetadataType::Nip66Rtt => "nip66_rtt",
            MetadataType::Nip66Ssl => "nip66_ssl",
            MetadataType::Nip66Geo => "nip66_geo",
            MetadataType::Nip66Net => "nip66_net",
            MetadataType::Nip66Dns => "nip66_dns",
            MetadataType::Nip66Http => "nip66_http",
        }
    }
}

impl std::str::FromStr for MetadataType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nip11_info" => Ok(MetadataType::Nip11Info),
            "nip66_rtt" => Ok(MetadataType::Nip66Rtt),
            "nip66_ssl" => Ok(MetadataType::Nip66Ssl),
            "nip66_geo" => Ok(MetadataType::Nip66Geo),
            "nip66_net" => Ok(MetadataType::Nip66Net),
            "nip66_dns" => Ok(MetadataType::Nip66Dns),
            "nip66_http" => Ok(MetadataType::Nip66Http),
            other => Err(format!("unknown metadata type: {other}")),
        }
    }
}

/// A content-addressed JSON document. `id` is the SHA-256 of the
/// document's canonical serialization (§4.1 "Content hashing"); the hash
/// is always computed by the caller (writers), never by the storage
/// engine, so the canonicalization used here is the single source of
/// truth for dedup (Testable Property 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: [u8; 32],
    pub metadata_type: MetadataType,
    pub data: Value,
}

impl Metadata {
    /// Canonicalizes `data` (sorted object keys, no insignificant
    /// whitespace) and hashes the bytes with SHA-256 to derive `id`.
    pub fn new(metadata_type: MetadataType, data: Value) -> Self {
        let canonical = to_canonical_json(&data);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let id: [u8; 32] = hasher.finalize().into();
        Metadata { id, metadata_type, data }
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

/// Canonical JSON serialization: object keys sorted, no whitespace.
/// Ported from the teacher's `hashing::canonical_json::to_canonical_json`.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let items: Vec<String> =
                entries.into_iter().map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap(), to_canonical_json(v))).collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// "event/relay-metadata E was observed/generated for relay R at time T"
/// linkage row (§3 RelayMetadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMetadata {
    pub relay_url: String,
    pub generated_at: i64,
    pub metadata_type: MetadataType,
    pub metadata_id: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        assert_eq!(to_canonical_json(&json!({"b": 2, "a": 1})), "{\"a\":1,\"b\":2}");
    }

    #[test]
    fn same_logical_document_hashes_equal_regardless_of_key_order() {
        let a = Metadata::new(MetadataType::Nip11Info, json!({"name": "x", "supported_nips": [1, 11]}));
        let b = Metadata::new(MetadataType::Nip11Info, json!({"supported_nips": [1, 11], "name": "x"}));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn different_types_with_identical_bytes_coexist() {
        let a = Metadata::new(MetadataType::Nip11Info, json!({"x": 1}));
        let b = Metadata::new(MetadataType::Nip66Http, json!({"x": 1}));
        assert_eq!(a.id, b.id);
        assert_ne!(a.metadata_type.as_str(), b.metadata_type.as_str());
    }
}
