//! Transport-level error taxonomy (§4.3, §7), generalizing
//! `bigbrotr-core::errors::CoreError` to dial/protocol failures.

use bigbrotr_core::errors::{ErrorKind, TypedError};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("dns resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String, permanent: bool },

    #[error("tls error connecting to {host}: {reason}")]
    Tls { host: String, reason: String },

    #[error("connection to {target} refused or reset: {reason}")]
    ConnectionReset { target: String, reason: String },

    #[error("dial to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("proxy error reaching {target} via {proxy}: {reason}")]
    Proxy { target: String, proxy: String, reason: String },

    #[error("malformed nostr message: {reason}")]
    Protocol { reason: String },

    #[error("event id/signature validation failed: {reason}")]
    InvalidEvent { reason: String },

    #[error("websocket error: {reason}")]
    WebSocket { reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl TypedError for TransportError {
    fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Dns { permanent, .. } => {
                if *permanent {
                    ErrorKind::PermanentNet
                } else {
                    ErrorKind::TransientNet
                }
            }
            TransportError::Tls { .. } => ErrorKind::PermanentNet,
            TransportError::ConnectionReset { .. } => ErrorKind::TransientNet,
            TransportError::Timeout { .. } => ErrorKind::TransientNet,
            TransportError::Proxy { .. } => ErrorKind::TransientNet,
            TransportError::Protocol { .. } => ErrorKind::Protocol,
            TransportError::InvalidEvent { .. } => ErrorKind::Protocol,
            TransportError::WebSocket { .. } => ErrorKind::TransientNet,
            TransportError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
