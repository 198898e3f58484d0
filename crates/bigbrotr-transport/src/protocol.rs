//! Nostr client/relay message framing (§4.3 "Nostr protocol messages"),
//! generalizing `obiverse-beenode::nostr::client::{RelayMessage,
//! parse_relay_message}`'s four-variant parser to the full client→relay
//! and relay→client vocabularies.

use crate::error::TransportError;
use bigbrotr_models::Event;
use serde_json::Value;

/// Messages a client sends to a relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Event),
    Req { sub_id: String, filters: Vec<Value> },
    Close { sub_id: String },
    Auth(Box<Event>),
    Count { sub_id: String, filter: Value },
}

impl ClientMessage {
    pub fn to_json(&self) -> Value {
        match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req { sub_id, filters } => {
                let mut arr = vec![Value::String("REQ".to_string()), Value::String(sub_id.clone())];
                arr.extend(filters.iter().cloned());
                Value::Array(arr)
            }
            ClientMessage::Close { sub_id } => serde_json::json!(["CLOSE", sub_id]),
            ClientMessage::Auth(event) => serde_json::json!(["AUTH", event]),
            ClientMessage::Count { sub_id, filter } => serde_json::json!(["COUNT", sub_id, filter]),
        }
    }

    pub fn to_frame(&self) -> String {
        self.to_json().to_string()
    }
}

/// Messages a relay sends to a client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event { sub_id: String, event: Event },
    Ok { event_id: String, accepted: bool, message: String },
    Eose { sub_id: String },
    Closed { sub_id: String, message: String },
    Notice { message: String },
    Auth { challenge: String },
}

/// Parses one newline-framed WebSocket text frame into a [`RelayMessage`].
/// Any malformed frame is a [`TransportError::Protocol`], never a panic.
pub fn parse_relay_message(frame: &str) -> Result<RelayMessage, TransportError> {
    let arr: Vec<Value> = serde_json::from_str(frame.trim()).map_err(|e| TransportError::Protocol { reason: e.to_string() })?;
    let cmd = arr.first().and_then(Value::as_str).ok_or_else(|| TransportError::Protocol { reason: "missing message tag".into() })?;

    let get_str = |i: usize| -> Result<String, TransportError> {
        arr.get(i)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Protocol { reason: format!("{cmd}: missing string at index {i}") })
    };

    match cmd {
        "EVENT" => {
            let sub_id = get_str(1)?;
            let event: Event = arr
                .get(2)
                .cloned()
                .ok_or_else(|| TransportError::Protocol { reason: "EVENT: missing payload".into() })
                .and_then(|v| serde_json::from_value(v).map_err(|e| TransportError::Protocol { reason: e.to_string() }))?;
            Ok(RelayMessage::Event { sub_id, event })
        }
        "OK" => {
            let event_id = get_str(1)?;
            let accepted = arr.get(2).and_then(Value::as_bool).ok_or_else(|| TransportError::Protocol { reason: "OK: missing bool".into() })?;
            let message = arr.get(3).and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(RelayMessage::Ok { event_id, accepted, message })
        }
        "EOSE" => Ok(RelayMessage::Eose { sub_id: get_str(1)? }),
        "CLOSED" => {
            let sub_id = get_str(1)?;
            let message = arr.get(2).and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(RelayMessage::Closed { sub_id, message })
        }
        "NOTICE" => Ok(RelayMessage::Notice { message: get_str(1)? }),
        "AUTH" => Ok(RelayMessage::Auth { challenge: get_str(1)? }),
        other => Err(TransportError::Protocol { reason: format!("unknown relay message tag: {other}") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_message() {
        let frame = r#"["OK", "abc", true, ""]"#;
        match parse_relay_message(frame).unwrap() {
            RelayMessage::Ok { event_id, accepted, .. } => {
                assert_eq!(event_id, "abc");
                assert!(accepted);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_eose_message() {
        match parse_relay_message(r#"["EOSE", "sub1"]"#).unwrap() {
            RelayMessage::Eose { sub_id } => assert_eq!(sub_id, "sub1"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(parse_relay_message(r#"["WAT"]"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_relay_message("not json").is_err());
    }

    #[test]
    fn req_serializes_tag_then_sub_id_then_filters() {
        let msg = ClientMessage::Req { sub_id: "sub1".into(), filters: vec![serde_json::json!({"kinds": [1]})] };
        let json = msg.to_json();
        assert_eq!(json[0], "REQ");
        assert_eq!(json[1], "sub1");
        assert_eq!(json[2]["kinds"][0], 1);
    }
}
