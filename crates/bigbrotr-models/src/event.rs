//! Event: a fully-validated Nostr event (§3, §4.3).
//!
//! Signature/id verification happens in `bigbrotr-transport` (it needs
//! `secp256k1`); this crate only knows the value shape and the pure,
//! deterministic parts: the canonical id-preimage and `tagvalues`
//! derivation (Testable Properties 3 and 4).

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

macro_rules! fixed_bytes_hex {
    ($name:ident, $len:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn from_hex(s: &str) -> Result<Self, ModelError> {
                let bytes = hex::decode(s).map_err(|e| ModelError::InvalidHex { field: stringify!($name), source: e.to_string() })?;
                if bytes.len() != $len {
                    return Err(ModelError::InvalidLength { field: stringify!($name), expected: $len, actual: bytes.len() });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&bytes);
                Ok($name(arr))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl TryFrom<String> for $name {
            type Error = ModelError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::from_hex(&s)
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.to_hex()
            }
        }
    };
}

fixed_bytes_hex!(EventId, 32);
fixed_bytes_hex!(PubKey, 32);
fixed_bytes_hex!(Signature, 64);

/// NIP-01 event-kind categories (§4.3). A pure classification of `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKindCategory {
    /// Stored forever, never replaced: {1, 2, 4..44, 1000..9999}.
    Regular,
    /// Only latest per (pubkey, kind): {0, 3, 10000..19999}.
    Replaceable,
    /// Not archived by relays, not a Synchronizer target: {20000..29999}.
    Ephemeral,
    /// Latest per (pubkey, kind, d-tag): {30000..39999}.
    Addressable,
}

impl EventKindCategory {
    pub fn of(kind: u32) -> EventKindCategory {
        match kind {
            0 | 3 => EventKindCategory::Replaceable,
            10000..=19999 => EventKindCategory::Replaceable,
            20000..=29999 => EventKindCategory::Ephemeral,
            30000..=39999 => EventKindCategory::Addressable,
            _ => EventKindCategory::Regular,
        }
    }

    pub fn is_ephemeral(kind: u32) -> bool {
        matches!(Self::of(kind), EventKindCategory::Ephemeral)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PubKey,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: Signature,
}

impl Event {
    /// Canonical tuple `[0, pubkey_hex, created_at, kind, tags, content]`
    /// whose SHA-256 is the event id (§4.3 "Event validation").
    pub fn id_preimage(pubkey: &PubKey, created_at: i64, kind: u32, tags: &[Vec<String>], content: &str) -> Value {
        serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content])
    }

    pub fn category(&self) -> EventKindCategory {
        EventKindCategory::of(self.kind)
    }

    /// Derives `tagvalues`: the second element of every inner tag array
    /// whose first element is a single character, in order (Testable
    /// Property 4). Pure function of `tags`.
    pub fn tagvalues(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|t| t.first().map(|k| k.chars().count() == 1).unwrap_or(false))
            .filter_map(|t| t.get(1).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_id() -> EventId {
        EventId([0u8; 32])
    }
    fn zero_pubkey() -> PubKey {
        PubKey([0u8; 32])
    }
    fn zero_sig() -> Signature {
        Signature([0u8; 64])
    }

    #[test]
    fn hex_round_trip() {
        let id = EventId::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(id.to_hex(), "ab".repeat(32));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(EventId::from_hex("abcd"), Err(ModelError::InvalidLength { .. })));
    }

    #[test]
    fn tagvalues_extracts_single_char_keys_in_order() {
        let ev = Event {
            id: zero_id(),
            pubkey: zero_pubkey(),
            created_at: 0,
            kind: 1,
            tags: vec![
                vec!["e".into(), "deadbeef".into()],
                vec!["nonce".into(), "ignored".into()],
                vec!["p".into(), "cafebabe".into()],
            ],
            content: String::new(),
            sig: zero_sig(),
        };
        assert_eq!(ev.tagvalues(), vec!["deadbeef".to_string(), "cafebabe".to_string()]);
    }

    #[test]
    fn kind_categories_match_nip01_ranges() {
        assert_eq!(EventKindCategory::of(1), EventKindCategory::Regular);
        assert_eq!(EventKindCategory::of(0), EventKindCategory::Replaceable);
        assert_eq!(EventKindCategory::of(10002), EventKindCategory::Replaceable);
        assert_eq!(EventKindCategory::of(20001), EventKindCategory::Ephemeral);
        assert_eq!(EventKindCategory::of(30078), EventKindCategory::Addressable);
        assert!(EventKindCategory::is_ephemeral(25000));
    }
}
