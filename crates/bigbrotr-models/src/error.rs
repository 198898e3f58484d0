//! Validation errors raised while constructing model value types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("host is a private-range IP address: {0}")]
    PrivateAddress(String),

    #[error("hostname failed IDNA normalization: {0}")]
    InvalidHostname(String),

    #[error("invalid hex encoding for {field}: {source}")]
    InvalidHex { field: &'static str, source: String },

    #[error("invalid length for {field}: expected {expected} bytes, got {actual}")]
    InvalidLength { field: &'static str, expected: usize, actual: usize },

    #[error("invalid event kind: {0}")]
    InvalidKind(u32),
}
