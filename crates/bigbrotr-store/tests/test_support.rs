use bigbrotr_store::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::path::Path;

/// Connects to `DATABASE_URL` and applies migrations, or returns `None` so
/// callers can skip gracefully when no database is configured — the same
/// guard shape as `chem-persistence`'s `tests/test_support.rs`.
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.ok()?;
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    bigbrotr_store::run_migrations(&pool, &migrations_dir).await.ok()?;
    Some(pool)
}
