//! Liveness probes used by Validator and Monitor (§4.3 "Liveness
//! probes"): `dial_ok`, `read_ok`, `write_ok`.

use crate::dial::{dial, DialedStream};
use crate::error::TransportError;
use crate::network::NetworkConfig;
use crate::protocol::{parse_relay_message, ClientMessage, RelayMessage};
use bigbrotr_models::{Event, EventId, Network, PubKey, Signature};
use futures_util::{SinkExt, StreamExt};
use secp256k1::{Keypair, Message as SchnorrMessage, Secp256k1};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Three independently-observed legs of reachability, each `None` when
/// its leg did not run (e.g. `write_ok` with no configured private key).
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub dial_ok: bool,
    pub read_ok: Option<bool>,
    pub write_ok: Option<bool>,
}

/// Attempts a WebSocket handshake within the network's dial timeout.
/// Returns the open stream on success so callers can chain `read_ok`/
/// `write_ok` over the same connection without re-dialing.
pub async fn dial_ok(relay_url: &str, network: Network, config: &NetworkConfig) -> Result<DialedStream, TransportError> {
    dial(relay_url, network, config).await
}

/// Sends a tiny `REQ` and waits for either an `EVENT` or `EOSE` within
/// `read_timeout`.
pub async fn read_ok(stream: &mut DialedStream, read_timeout: Duration) -> Result<bool, TransportError> {
    let sub_id = "bigbrotr-probe";
    let filter = serde_json::json!({ "limit": 1 });
    let req = ClientMessage::Req { sub_id: sub_id.to_string(), filters: vec![filter] };
    stream.send(Message::Text(req.to_frame())).await.map_err(|e| TransportError::WebSocket { reason: e.to_string() })?;

    let deadline = tokio::time::Instant::now() + read_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        let next = timeout(remaining, stream.next()).await;
        let Ok(Some(frame)) = next else { return Ok(false) };
        let frame = frame.map_err(|e| TransportError::WebSocket { reason: e.to_string() })?;
        let Message::Text(text) = frame else { continue };
        match parse_relay_message(&text) {
            Ok(RelayMessage::Event { sub_id: sid, .. }) if sid == sub_id => return Ok(true),
            Ok(RelayMessage::Eose { sub_id: sid }) if sid == sub_id => return Ok(true),
            _ => continue,
        }
    }
}

/// Publishes a small signed ephemeral event (kind 20000) and waits for
/// `["OK", id, true, _]` within `write_timeout`. Requires a keypair.
pub async fn write_ok(stream: &mut DialedStream, keypair: &Keypair, write_timeout: Duration) -> Result<bool, TransportError> {
    let event = sign_probe_event(keypair);
    let event_id_hex = event.id.to_hex();
    let msg = ClientMessage::Event(event);
    stream.send(Message::Text(msg.to_frame())).await.map_err(|e| TransportError::WebSocket { reason: e.to_string() })?;

    let deadline = tokio::time::Instant::now() + write_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        let next = timeout(remaining, stream.next()).await;
        let Ok(Some(frame)) = next else { return Ok(false) };
        let frame = frame.map_err(|e| TransportError::WebSocket { reason: e.to_string() })?;
        let Message::Text(text) = frame else { continue };
        if let Ok(RelayMessage::Ok { event_id, accepted, .. }) = parse_relay_message(&text) {
            if event_id == event_id_hex {
                return Ok(accepted);
            }
        }
    }
}

fn sign_probe_event(keypair: &Keypair) -> Event {
    let secp = Secp256k1::new();
    let (xonly, _) = keypair.x_only_public_key();
    let created_at = chrono::Utc::now().timestamp();
    let kind = 20000u32;
    let tags: Vec<Vec<String>> = vec![];
    let content = "bigbrotr liveness probe".to_string();

    let preimage = Event::id_preimage(&PubKey(xonly.serialize()), created_at, kind, &tags, &content);
    let preimage_bytes = serde_json::to_vec(&preimage).expect("json serialization of a preimage array never fails");
    let digest = Sha256::digest(&preimage_bytes);
    let message = SchnorrMessage::from_digest(digest.into());
    let sig = secp.sign_schnorr(&message, keypair);

    Event { id: EventId(digest.into()), pubkey: PubKey(xonly.serialize()), created_at, kind, tags, content, sig: Signature(*sig.as_ref()) }
}
