mod test_support;

use bigbrotr_models::{Event, EventId, Metadata, MetadataType, PubKey, Relay, Signature};
use bigbrotr_store::Store;
use serde_json::json;

fn sample_relay(url: &str) -> Relay {
    Relay::new(url, 1_700_000_000).expect("valid relay url")
}

fn sample_event(id_byte: u8) -> Event {
    Event {
        id: EventId([id_byte; 32]),
        pubkey: PubKey([1u8; 32]),
        created_at: 1_700_000_100,
        kind: 1,
        tags: vec![vec!["e".to_string(), "deadbeef".to_string()]],
        content: "hello".to_string(),
        sig: Signature([2u8; 64]),
    }
}

#[tokio::test]
async fn relay_insert_is_idempotent() {
    let Some(pool) = test_support::test_pool().await else { return };
    let store = Store::new(pool);
    let relay = sample_relay("wss://relay.example.com");

    let first = store.relay_insert(&[relay.url.clone()], &[relay.network], &[relay.discovered_at]).await.unwrap();
    let second = store.relay_insert(&[relay.url.clone()], &[relay.network], &[relay.discovered_at]).await.unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);
}

#[tokio::test]
async fn event_relay_insert_cascade_is_atomic_and_idempotent() {
    let Some(pool) = test_support::test_pool().await else { return };
    let store = Store::new(pool);
    let relay = sample_relay("wss://cascade.example.com");
    let event = sample_event(9);

    let first = store.event_relay_insert_cascade(&[event.clone()], &[relay.clone()], &[1_700_000_200]).await.unwrap();
    let second = store.event_relay_insert_cascade(&[event.clone()], &[relay.clone()], &[1_700_000_999]).await.unwrap();

    assert_eq!(first, 1, "first cascade insert creates the junction row");
    assert_eq!(second, 0, "second call is a no-op: seen_at keeps the earliest value");
}

#[tokio::test]
async fn metadata_dedups_across_writers_with_byte_identical_documents() {
    let Some(pool) = test_support::test_pool().await else { return };
    let store = Store::new(pool);
    let relay = sample_relay("wss://dedup.example.com");
    store.relay_insert(&[relay.url.clone()], &[relay.network], &[relay.discovered_at]).await.unwrap();

    let doc = json!({"name": "relay one", "supported_nips": [1, 11]});
    let m1 = Metadata::new(MetadataType::Nip11Info, doc.clone());
    let m2 = Metadata::new(MetadataType::Nip11Info, doc);
    assert_eq!(m1.id, m2.id, "identical canonical documents hash identically");

    store.relay_metadata_insert_cascade(&[relay.clone()], &[m1.clone()], &[1_700_000_300]).await.unwrap();
    store.relay_metadata_insert_cascade(&[relay.clone()], &[m2], &[1_700_000_301]).await.unwrap();

    let rows = store.service_state_get("nonexistent", "candidate", None).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn orphan_metadata_delete_drains_unreferenced_rows() {
    let Some(pool) = test_support::test_pool().await else { return };
    let store = Store::new(pool);
    let relay = sample_relay("wss://orphan.example.com");
    store.relay_insert(&[relay.url.clone()], &[relay.network], &[relay.discovered_at]).await.unwrap();
    let doc = Metadata::new(MetadataType::Nip11Info, json!({"name": "soon orphaned"}));
    store.metadata_insert(&[doc]).await.unwrap();

    let deleted = store.orphan_metadata_delete(100).await.unwrap();
    assert!(deleted >= 1, "the metadata row with no relay_metadata reference is reclaimed");
}
