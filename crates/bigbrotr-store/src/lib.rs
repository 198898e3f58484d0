//! bigbrotr-store: the typed interface over the shared relational content
//! store (§4.1) — bulk/cascade insert procedures, content-addressed
//! metadata, per-service K/V state, and orphan/retention GC.

pub mod error;
pub mod migrate;
mod ops;
pub mod pool;
mod store;

pub use error::StorageError;
pub use migrate::run_migrations;
pub use pool::{build_pool, PgPool};
pub use store::Store;
