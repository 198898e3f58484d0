//! Small helpers shared by every service.

use bigbrotr_core::service::{record_error_kind, ServiceError};
use bigbrotr_core::TypedError;
use bigbrotr_store::StorageError;

/// Current unix time in seconds. The one place every service reads the
/// clock, so tests can see what "now" means at a glance.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Converts a store failure into the [`ServiceError`] a cycle returns,
/// recording it against `service`'s per-kind error counter on the way
/// (§7 "Prometheus counters partitioned by kind").
pub fn store_err(service: &'static str, e: StorageError) -> ServiceError {
    record_error_kind(service, e.kind());
    ServiceError::Failed(e.to_string())
}
