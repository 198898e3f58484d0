//! bigbrotr-transport: the relay I/O substrate (§4.3) — per-network
//! dialing over clearnet or SOCKS5, the Nostr client/relay message
//! codec, event validation, liveness probes, and the DNS/TLS
//! introspection Monitor's NIP-66 checks need.

pub mod dial;
pub mod dns;
pub mod error;
pub mod network;
pub mod probes;
pub mod protocol;
pub mod tls;
pub mod validate;

pub use dial::{dial, DialedStream};
pub use error::TransportError;
pub use network::{NetworkConfig, Socks5Config};
pub use protocol::{ClientMessage, RelayMessage};
pub use validate::validate_event;
