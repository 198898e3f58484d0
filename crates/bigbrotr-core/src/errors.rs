//! Cross-cutting error taxonomy (§7). Every fallible operation in
//! BigBrotr — store calls, relay I/O, protocol parsing — ultimately
//! carries one of these kinds so metrics and cycle-failure logic can
//! reason about it uniformly, the way `chem-persistence::error::
//! PersistenceError` classifies Diesel errors into transient/permanent
//! but generalized to the full cross-cutting set §7 names.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Pool acquire timeout, connection refused. Retry with backoff.
    TransientPool,
    /// Serialization failure, deadlock, statement timeout. Retry in-cycle
    /// up to N, then fail the cycle.
    TransientDb,
    /// Constraint, type, syntax. Fail the cycle; never retry.
    PermanentDb,
    /// TCP reset, DNS timeout, TLS handshake timeout. Counts against the
    /// target relay, not the cycle.
    TransientNet,
    /// Bad URL, unsupported scheme, invalid cert. Deactivate the target
    /// for this cycle.
    PermanentNet,
    /// Malformed Nostr message, bad JSON, invalid signature. Drop the
    /// message, increment a counter, continue.
    Protocol,
    /// Shutdown signal. Never counted; clean exit.
    Cancelled,
}

impl ErrorKind {
    /// Counter name suffix, e.g. `errors_transient_pool` (§4.2).
    pub fn metric_suffix(&self) -> &'static str {
        match self {
            ErrorKind::TransientPool => "transient_pool",
            ErrorKind::TransientDb => "transient_db",
            ErrorKind::PermanentDb => "permanent_db",
            ErrorKind::TransientNet => "transient_net",
            ErrorKind::PermanentNet => "permanent_net",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether this kind is ever worth retrying (either at the pool layer
    /// or within the same cycle).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientPool | ErrorKind::TransientDb | ErrorKind::TransientNet)
    }

    /// Whether this kind should fail the whole cycle (infrastructural)
    /// rather than just the single target it occurred on (§7
    /// "Propagation").
    pub fn fails_cycle(&self) -> bool {
        matches!(self, ErrorKind::TransientPool | ErrorKind::TransientDb | ErrorKind::PermanentDb)
    }
}

/// Trait implemented by every typed error in the workspace so the
/// service loop (§4.2) and metrics layer can extract a [`ErrorKind`]
/// without knowing the concrete error type.
pub trait TypedError: std::error::Error {
    fn kind(&self) -> ErrorKind;
}

/// A generic error carrying its taxonomy kind plus a human-readable
/// message and an optional target identifier (relay URL, service name)
/// for structured logging (§7 "User-visible surface").
#[derive(Debug, Error, Clone)]
#[error("{kind:?}: {message}{}", target.as_deref().map(|t| format!(" (target={t})")).unwrap_or_default())]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub target: Option<String>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CoreError { kind, message: message.into(), target: None }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl TypedError for CoreError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_and_net_transient_kinds_are_retryable() {
        assert!(ErrorKind::TransientPool.is_retryable());
        assert!(ErrorKind::TransientNet.is_retryable());
        assert!(!ErrorKind::Protocol.is_retryable());
    }

    #[test]
    fn only_infrastructural_kinds_fail_the_cycle() {
        assert!(ErrorKind::TransientDb.fails_cycle());
        assert!(!ErrorKind::TransientNet.fails_cycle());
        assert!(!ErrorKind::Protocol.fails_cycle());
        assert!(!ErrorKind::Cancelled.fails_cycle());
    }
}
