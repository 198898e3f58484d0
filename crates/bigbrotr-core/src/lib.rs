//! bigbrotr-core: the error taxonomy and the run-forever service
//! framework every BigBrotr service is built on (§4.2, §7).

pub mod errors;
pub mod service;

pub use errors::{ErrorKind, TypedError};
pub use service::{
    CommonConfig, CycleMetrics, CycleOutcome, MetricsConfig, PoolConfig, RetryConfig, Service,
    ServiceConfig, ServiceError, ShutdownToken, install_signal_handlers, record_error_kind, run_forever,
};
