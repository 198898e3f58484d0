//! Flat-SQL-file migration runner.
//!
//! Ported from the root `src/migrations/mod.rs::run_migrations`: every
//! `*.sql` file in a directory is one migration, applied at most once and
//! tracked in a `schema_migrations` table, applied in filename order inside
//! a transaction.

use crate::error::StorageError;
use crate::pool::PgPool;
use chrono::Utc;
use sqlx::Executor;
use std::path::{Path, PathBuf};

/// Runs every pending `*.sql` file under `migrations_dir`, in filename
/// order, each inside its own transaction. Already-applied files (tracked
/// by filename in `schema_migrations`) are skipped.
pub async fn run_migrations(pool: &PgPool, migrations_dir: &Path) -> Result<usize, StorageError> {
    if !migrations_dir.exists() {
        tracing::warn!(dir = %migrations_dir.display(), "migrations directory not found, skipping");
        return Ok(0);
    }

    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL)",
    )
    .await
    .map_err(StorageError::from)?;

    let mut files: Vec<PathBuf> = std::fs::read_dir(migrations_dir)
        .map_err(|e| StorageError::Permanent(format!("reading migrations dir: {e}")))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().map(|ext| ext == "sql").unwrap_or(false))
        .collect();
    files.sort();

    let mut applied = 0usize;
    for file in files {
        let version = file.file_name().expect("file path has a name").to_string_lossy().to_string();

        let already: Option<(String,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = $1").bind(&version).fetch_optional(pool).await.map_err(StorageError::from)?;
        if already.is_some() {
            continue;
        }

        let sql = std::fs::read_to_string(&file).map_err(|e| StorageError::Permanent(format!("reading {version}: {e}")))?;
        if sql.trim().is_empty() {
            continue;
        }

        tracing::info!(version = %version, "applying migration");
        let mut tx = pool.begin().await.map_err(StorageError::from)?;
        for statement in split_statements(&sql) {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            tx.execute(sqlx::query(statement)).await.map_err(StorageError::from)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES ($1, $2)")
            .bind(&version)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        tx.commit().await.map_err(StorageError::from)?;
        applied += 1;
    }

    if applied == 0 {
        tracing::debug!("no pending migrations");
    }
    Ok(applied)
}

/// Splits a migration file into individual statements on top-level `;`,
/// treating anything between a pair of matching `$tag$` dollar-quote
/// delimiters (including the plain `$$` form) as opaque so a function
/// body's own `;`s never split it in two.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut tag: Option<String> = None;
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(open) = dollar_tag_at(sql, i) {
            current.push_str(&open);
            match &tag {
                Some(active) if *active == open => tag = None,
                Some(_) => {}
                None => tag = Some(open.clone()),
            }
            i += open.len();
            continue;
        }

        let c = bytes[i] as char;
        if c == ';' && tag.is_none() {
            statements.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        i += 1;
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

/// If `sql[at..]` starts with a dollar-quote delimiter (`$$` or
/// `$tag$`, tag being letters/digits/underscore), returns it.
fn dollar_tag_at(sql: &str, at: usize) -> Option<String> {
    let rest = &sql[at..];
    if !rest.starts_with('$') {
        return None;
    }
    let mut end = 1;
    for c in rest[1..].chars() {
        if c == '$' {
            return Some(rest[..=end].to_string());
        }
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        end += c.len_utf8();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_statements_on_semicolon() {
        let sql = "CREATE TABLE a (x INT); CREATE TABLE b (y INT);";
        let statements: Vec<&str> = split_statements(sql).iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        assert_eq!(statements, vec!["CREATE TABLE a (x INT)", "CREATE TABLE b (y INT)"]);
    }

    #[test]
    fn does_not_split_inside_a_dollar_quoted_function_body() {
        let sql = "CREATE FUNCTION f() RETURNS INT AS $$ SELECT 1; SELECT 2; $$ LANGUAGE sql; CREATE TABLE t (x INT);";
        let statements: Vec<&str> = split_statements(sql).iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("SELECT 1; SELECT 2;"));
        assert!(statements[1].starts_with("CREATE TABLE t"));
    }

    #[test]
    fn handles_tagged_dollar_quotes() {
        let sql = "CREATE FUNCTION f() RETURNS INT AS $body$ SELECT ';'; $body$ LANGUAGE sql;";
        let statements: Vec<&str> = split_statements(sql).iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        assert_eq!(statements.len(), 1);
    }
}
