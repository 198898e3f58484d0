//! Event validation at receipt (§4.3 "Event validation"): recompute the
//! id and verify the BIP-340 Schnorr signature. The id preimage itself
//! (`Event::id_preimage`) is a pure function in `bigbrotr-models`; this
//! module owns the parts that need `secp256k1` and `sha2`.

use crate::error::TransportError;
use bigbrotr_models::Event;
use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

/// Recomputes `event.id` from its canonical preimage and verifies the
/// Schnorr signature under `event.pubkey`. Never panics on malformed
/// input; every failure is a [`TransportError::InvalidEvent`].
pub fn validate_event(event: &Event) -> Result<(), TransportError> {
    let preimage = Event::id_preimage(&event.pubkey, event.created_at, event.kind, &event.tags, &event.content);
    let preimage_bytes = serde_json::to_vec(&preimage).map_err(|e| TransportError::InvalidEvent { reason: e.to_string() })?;
    let computed_id = Sha256::digest(&preimage_bytes);

    if computed_id.as_slice() != event.id.0 {
        return Err(TransportError::InvalidEvent { reason: "id does not match canonical preimage hash".into() });
    }

    let secp = Secp256k1::verification_only();
    let pubkey = XOnlyPublicKey::from_slice(&event.pubkey.0).map_err(|e| TransportError::InvalidEvent { reason: format!("bad pubkey: {e}") })?;
    let sig = SchnorrSignature::from_slice(&event.sig.0).map_err(|e| TransportError::InvalidEvent { reason: format!("bad signature: {e}") })?;
    let message = Message::from_digest(computed_id.into());

    secp.verify_schnorr(&sig, &message, &pubkey).map_err(|e| TransportError::InvalidEvent { reason: format!("schnorr verification failed: {e}") })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigbrotr_models::{EventId, PubKey, Signature};
    use secp256k1::rand::rngs::OsRng;
    use secp256k1::{Keypair, Secp256k1};

    fn signed_event(content: &str) -> Event {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut OsRng);
        let (xonly, _parity) = keypair.x_only_public_key();

        let tags: Vec<Vec<String>> = vec![];
        let created_at = 1_700_000_000;
        let kind = 1u32;
        let preimage = Event::id_preimage(&PubKey(xonly.serialize()), created_at, kind, &tags, content);
        let preimage_bytes = serde_json::to_vec(&preimage).unwrap();
        let digest = Sha256::digest(&preimage_bytes);
        let message = Message::from_digest(digest.into());
        let sig = secp.sign_schnorr(&message, &keypair);

        Event {
            id: EventId(digest.into()),
            pubkey: PubKey(xonly.serialize()),
            created_at,
            kind,
            tags,
            content: content.to_string(),
            sig: Signature(*sig.as_ref()),
        }
    }

    #[test]
    fn accepts_a_correctly_signed_event() {
        let event = signed_event("hello nostr");
        assert!(validate_event(&event).is_ok());
    }

    #[test]
    fn rejects_tampered_content() {
        let mut event = signed_event("hello nostr");
        event.content = "tampered".to_string();
        assert!(validate_event(&event).is_err());
    }

    #[test]
    fn rejects_id_mismatch() {
        let mut event = signed_event("hello nostr");
        event.id.0[0] ^= 0xff;
        assert!(validate_event(&event).is_err());
    }
}
