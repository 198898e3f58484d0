//! The run-forever service framework (§4.2).
//!
//! Every BigBrotr service is a uniform run-forever loop with bounded
//! backoff, cancellation, persistent state, cycle metrics, and config
//! validation. The teacher repo has no equivalent (chemflow's
//! `WorkflowManager` executes one step and returns); this is built fresh,
//! grounded on `obiverse-beenode::runtime::Shutdown`'s broadcast-based
//! cancellation, generalized here onto `tokio_util::sync::CancellationToken`
//! (the standard Tokio-ecosystem cancellation primitive) and on
//! `chem-persistence`'s typed-error-plus-retry idiom for the failure
//! accounting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared config every service config embeds via `#[serde(flatten)]`
/// (§4.2 "Config contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonConfig {
    /// Base delay between cycles, in seconds. Must be >= the service's
    /// floor (validated by each service's `ServiceConfig::validate`).
    pub interval_seconds: u64,
    /// Multiplier on `interval_seconds` for randomized start, in [0, 1].
    #[serde(default)]
    pub jitter: f64,
    /// Cycles halt (not restart) after this many consecutive failures.
    pub max_consecutive_failures: u32,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub pool: PoolConfig,
    /// Grace window for in-flight work to finish after a shutdown signal
    /// (§5 "Cancellation"), default 10s.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

fn default_shutdown_grace() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_port() -> u16 {
    9000
}
fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig { enabled: false, port: default_metrics_port(), host: default_metrics_host(), path: default_metrics_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub user: String,
    /// Name of the environment variable holding the password (§6
    /// "Environment"), never the password itself.
    pub password_env: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(default = "default_pool_min")]
    pub min_size: u32,
    #[serde(default = "default_pool_max")]
    pub max_size: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Capped exponential backoff applied around pool acquisition on a
    /// transient error (§4.1).
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_pool_min() -> u32 {
    1
}
fn default_pool_max() -> u32 {
    10
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}
fn default_statement_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_base_ms() -> u64 {
    100
}
fn default_retry_cap_ms() -> u64 {
    5_000
}
fn default_retry_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig { base_ms: default_retry_base_ms(), cap_ms: default_retry_cap_ms(), max_attempts: default_retry_max_attempts() }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt` (0-indexed), doubling from `base_ms`
    /// and clamped to `cap_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_ms.saturating_mul(1u64 << attempt.min(32));
        Duration::from_millis(scaled.min(self.cap_ms))
    }
}

/// A config validation failure. Each unknown or invalid field is reported
/// individually, not just the first (§2.1 "Config validation errors are
/// structured").
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

/// Implemented by every per-service config struct. `validate` enforces
/// cross-field invariants `serde`'s `deny_unknown_fields` cannot (e.g.
/// Monitor's "store ⊆ compute", §9).
pub trait ServiceConfig: Sized {
    fn common(&self) -> &CommonConfig;
    fn validate(&self) -> Result<(), Vec<ConfigError>>;

    fn interval_floor_seconds() -> u64 {
        1
    }
}

/// Result of one `run_once` call, reported back to the loop so it can
/// update metrics and the consecutive-failure counter without the
/// service author touching counters directly.
pub enum CycleOutcome {
    Success,
    Failed(String),
}

/// The minimal capability set every service variant exposes (§4.2:
/// `run_once`, `config`, `state_handle`, `metrics_handle`). `state_handle`
/// and `metrics_handle` are left to each service's own fields (Store
/// handle, metrics registry) since their shapes differ per service; the
/// framework only needs `run_once` and `name`/`common_config`.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;
    fn common_config(&self) -> &CommonConfig;

    /// Runs one cycle. May perform arbitrary bounded-parallel I/O.
    /// Implementations must treat `token.is_cancelled()` as a signal to
    /// wind down, not as a failure.
    async fn run_once(&self, token: &CancellationToken) -> Result<(), ServiceError>;

    /// `true` for one-shot services (Seeder): `run_forever` calls
    /// `run_once` exactly once and returns instead of looping.
    fn one_shot(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Cooperative cancellation handle, thin wrapper over
/// `tokio_util::sync::CancellationToken` so service code depends on one
/// stable name from this crate rather than reaching into `tokio_util`
/// directly.
pub type ShutdownToken = CancellationToken;

/// Installs SIGTERM/SIGINT (Unix) or Ctrl-C handlers and returns a token
/// that is cancelled when one fires. Ported from
/// `obiverse-beenode::runtime::install_signal_handlers`, adapted from a
/// `broadcast::Sender` to a `CancellationToken`.
pub fn install_signal_handlers() -> ShutdownToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received Ctrl-C");
        }
        child.cancel();
    });
    token
}

/// Per-service cycle metrics (§4.2's exact counter/gauge/histogram list),
/// registered once and updated by [`run_forever`].
pub struct CycleMetrics {
    service: &'static str,
}

impl CycleMetrics {
    pub fn new(service: &'static str) -> Self {
        CycleMetrics { service }
    }

    fn record_success(&self, duration: Duration) {
        metrics::counter!("cycles_success", "service" => self.service).increment(1);
        metrics::gauge!("consecutive_failures", "service" => self.service).set(0.0);
        metrics::histogram!("cycle_duration_seconds", "service" => self.service).record(duration.as_secs_f64());
    }

    fn record_failure(&self, duration: Duration, consecutive: u32) {
        metrics::counter!("cycles_failed", "service" => self.service).increment(1);
        metrics::gauge!("consecutive_failures", "service" => self.service).set(consecutive as f64);
        metrics::histogram!("cycle_duration_seconds", "service" => self.service).record(duration.as_secs_f64());
    }

    fn record_cycle_started(&self) {
        metrics::counter!("cycles_started", "service" => self.service).increment(1);
    }

    fn record_last_cycle_timestamp(&self, ts: i64) {
        metrics::gauge!("last_cycle_timestamp", "service" => self.service).set(ts as f64);
    }

    pub fn record_error_kind(&self, kind: crate::errors::ErrorKind) {
        record_error_kind(self.service, kind);
    }
}

/// Increments the per-kind error counter (§7 "Prometheus counters
/// partitioned by kind") for `service`. Free function rather than a
/// `CycleMetrics` method so individual services can report from inside
/// their own `run_once` without threading a `CycleMetrics` handle down
/// into per-item error sites.
pub fn record_error_kind(service: &'static str, kind: crate::errors::ErrorKind) {
    metrics::counter!("errors", "service" => service, "kind" => kind.metric_suffix()).increment(1);
}

/// The run-forever loop (§4.2 steps 1-7). Drives `service.run_once()` to
/// completion, applying jittered-interval suspension, the
/// `max_consecutive_failures` circuit breaker, and cooperative
/// cancellation at the suspension point between cycles.
///
/// Returns `Ok(())` on a clean shutdown, `Err(())` if the circuit breaker
/// tripped (caller should exit nonzero per §6).
pub async fn run_forever(service: &dyn Service, token: ShutdownToken) -> Result<(), ()> {
    let metrics = CycleMetrics::new(service.name());
    let mut consecutive_failures: u32 = 0;
    let common = service.common_config();

    loop {
        metrics.record_cycle_started();
        let started = tokio::time::Instant::now();

        let result = service.run_once(&token).await;
        let duration = started.elapsed();

        match result {
            Ok(()) => {
                consecutive_failures = 0;
                metrics.record_success(duration);
                tracing::info!(service = service.name(), duration_ms = duration.as_millis() as u64, "cycle succeeded");
            }
            Err(ServiceError::Cancelled) => {
                tracing::info!(service = service.name(), "cycle cancelled, exiting cleanly");
                return Ok(());
            }
            Err(ServiceError::Failed(message)) => {
                consecutive_failures += 1;
                metrics.record_failure(duration, consecutive_failures);
                tracing::error!(service = service.name(), error = %message, consecutive_failures, "cycle failed");
                if consecutive_failures >= common.max_consecutive_failures {
                    tracing::error!(
                        service = service.name(),
                        consecutive_failures,
                        "max_consecutive_failures reached, terminating"
                    );
                    return Err(());
                }
            }
        }

        metrics.record_last_cycle_timestamp(chrono::Utc::now().timestamp());

        if service.one_shot() {
            return Ok(());
        }

        if token.is_cancelled() {
            return Ok(());
        }

        let jittered = jittered_interval(common.interval_seconds, common.jitter);
        tokio::select! {
            _ = tokio::time::sleep(jittered) => {}
            _ = token.cancelled() => {
                tracing::info!(service = service.name(), "shutdown signal during suspension, exiting cleanly");
                return Ok(());
            }
        }
    }
}

fn jittered_interval(interval_seconds: u64, jitter: f64) -> Duration {
    use rand::Rng;
    let jitter = jitter.clamp(0.0, 1.0);
    if jitter == 0.0 {
        return Duration::from_secs(interval_seconds);
    }
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.0..=jitter);
    let extra = (interval_seconds as f64) * factor;
    Duration::from_secs_f64(interval_seconds as f64 + extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyService {
        common: CommonConfig,
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl Service for FlakyService {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn common_config(&self) -> &CommonConfig {
            &self.common
        }
        async fn run_once(&self, _token: &CancellationToken) -> Result<(), ServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(ServiceError::Failed("boom".into()))
            } else {
                Ok(())
            }
        }
        fn one_shot(&self) -> bool {
            true
        }
    }

    fn test_common() -> CommonConfig {
        CommonConfig {
            interval_seconds: 0,
            jitter: 0.0,
            max_consecutive_failures: 3,
            metrics: MetricsConfig::default(),
            pool: PoolConfig {
                user: "u".into(),
                password_env: "PW".into(),
                host: "localhost".into(),
                port: 5432,
                database: "db".into(),
                min_size: 1,
                max_size: 2,
                acquire_timeout_ms: 1000,
                statement_timeout_ms: 1000,
                retry: RetryConfig::default(),
            },
            shutdown_grace_seconds: 10,
        }
    }

    #[tokio::test]
    async fn one_shot_service_runs_once_and_returns_ok_on_success() {
        let svc = FlakyService { common: test_common(), calls: Arc::new(AtomicU32::new(0)), fail_first_n: 0 };
        let token = CancellationToken::new();
        let result = run_forever(&svc, token).await;
        assert!(result.is_ok());
        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_max_consecutive_failures() {
        let mut common = test_common();
        common.max_consecutive_failures = 2;
        struct AlwaysFail(CommonConfig, Arc<AtomicU32>);
        #[async_trait]
        impl Service for AlwaysFail {
            fn name(&self) -> &'static str {
                "always-fail"
            }
            fn common_config(&self) -> &CommonConfig {
                &self.0
            }
            async fn run_once(&self, _token: &CancellationToken) -> Result<(), ServiceError> {
                self.1.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Failed("nope".into()))
            }
        }
        let calls = Arc::new(AtomicU32::new(0));
        let svc = AlwaysFail(common, calls.clone());
        let token = CancellationToken::new();
        let result = run_forever(&svc, token).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_delay_doubles_until_the_cap() {
        let retry = RetryConfig { base_ms: 100, cap_ms: 1_000, max_attempts: 10 };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for(10), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn cancellation_during_cycle_exits_cleanly_without_counting_as_failure() {
        struct CancelAware(CommonConfig);
        #[async_trait]
        impl Service for CancelAware {
            fn name(&self) -> &'static str {
                "cancel-aware"
            }
            fn common_config(&self) -> &CommonConfig {
                &self.0
            }
            async fn run_once(&self, token: &CancellationToken) -> Result<(), ServiceError> {
                if token.is_cancelled() {
                    return Err(ServiceError::Cancelled);
                }
                Ok(())
            }
        }
        let svc = CancelAware(test_common());
        let token = CancellationToken::new();
        token.cancel();
        let result = run_forever(&svc, token).await;
        assert!(result.is_ok());
    }
}
