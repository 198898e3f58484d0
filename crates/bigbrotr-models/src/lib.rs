//! bigbrotr-models: immutable value types shared by every BigBrotr service.
//!
//! Every type here is a pure value type: construction may validate and
//! normalize, but nothing here performs I/O. Persistence (`bigbrotr-store`)
//! and network I/O (`bigbrotr-transport`) depend on this crate, never the
//! other way around.

pub mod error;
pub mod event;
pub mod metadata;
pub mod network;
pub mod nip11;
pub mod nip66;
pub mod relay;
pub mod service_state;

pub use error::ModelError;
pub use event::{Event, EventId, EventKindCategory, PubKey, Signature};
pub use metadata::{Metadata, MetadataType, RelayMetadata};
pub use network::Network;
pub use nip11::Nip11Document;
pub use nip66::{Nip66Dns, Nip66Geo, Nip66Http, Nip66Net, Nip66Rtt, Nip66Ssl};
pub use relay::Relay;
pub use service_state::{CandidatePayload, CursorPayload, ServiceState};
