//! Generic per-service K/V state (§3 ServiceState).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single `(service_name, state_type, state_key) -> payload` row.
///
/// Used for Finder's candidate table (`state_type = "candidate"`),
/// Synchronizer/Finder cursors (`state_type = "cursor"`), and anything
/// else a service needs to survive restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    pub service_name: String,
    pub state_type: String,
    pub state_key: String,
    pub payload: Value,
    pub updated_at: i64,
}

/// Payload shape for `(validator, candidate, <url>)` rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub network: String,
    pub failed_attempts: u32,
    pub discovered_at: i64,
}

/// Payload shape for `(synchronizer, cursor, <url>)` / `(finder, cursor,
/// "events")` rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CursorPayload {
    pub since: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
}
