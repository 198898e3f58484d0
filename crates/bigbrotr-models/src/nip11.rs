//! NIP-11 relay information document (§4.7 Monitor).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The subset of NIP-11 fields BigBrotr cares about; unrecognized fields
/// are preserved in `extra` so the full document still round-trips into
/// `Metadata.data` untouched (the canonical hash is computed over the
/// *raw* fetched JSON, not over this typed projection).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip11Document {
    pub name: Option<String>,
    pub description: Option<String>,
    pub pubkey: Option<String>,
    pub contact: Option<String>,
    pub supported_nips: Option<Vec<u32>>,
    pub software: Option<String>,
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}
