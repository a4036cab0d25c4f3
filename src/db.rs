//! SQLite storage for the append-only ticket log.
//!
//! The log maps each created ticket number to the recipient email so failure
//! alerts that lack a recipient can be attributed later.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {normalized}"))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{expanded_path}?{query}")
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketLogEntry {
    pub ticket_number: String,
    pub email: String,
    pub profile_name: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of which recipient each ticket was created for.
#[async_trait]
pub trait TicketLog: Send + Sync {
    async fn record(&self, ticket_number: &str, email: &str, profile_name: &str) -> Result<()>;

    /// Most recent email recorded for `ticket_number` under `profile_name`.
    /// Ticket numbers are only unique within one organization.
    async fn email_for(&self, profile_name: &str, ticket_number: &str) -> Result<Option<String>>;

    /// Every ticket created through `profile_name`, oldest first.
    async fn entries_for_profile(&self, profile_name: &str) -> Result<Vec<TicketLogEntry>>;
}

#[derive(Debug, Clone)]
pub struct SqliteTicketLog {
    pool: Pool,
}

impl SqliteTicketLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketLog for SqliteTicketLog {
    #[instrument(skip_all)]
    async fn record(&self, ticket_number: &str, email: &str, profile_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO ticket_log (ticket_number, email, profile_name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(ticket_number)
        .bind(email)
        .bind(profile_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to append ticket log entry")?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn email_for(&self, profile_name: &str, ticket_number: &str) -> Result<Option<String>> {
        let email = sqlx::query_scalar::<_, String>(
            "SELECT email FROM ticket_log WHERE profile_name = ? AND ticket_number = ? \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(profile_name)
        .bind(ticket_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(email)
    }

    #[instrument(skip_all)]
    async fn entries_for_profile(&self, profile_name: &str) -> Result<Vec<TicketLogEntry>> {
        let rows = sqlx::query(
            "SELECT ticket_number, email, profile_name, created_at FROM ticket_log \
             WHERE profile_name = ? ORDER BY id",
        )
        .bind(profile_name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| -> Result<TicketLogEntry> {
                Ok(TicketLogEntry {
                    ticket_number: row.try_get("ticket_number")?,
                    email: row.try_get("email")?,
                    profile_name: row.try_get("profile_name")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_untouched() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn file_urls_get_create_mode() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("relay.db");
        let url = format!("sqlite://{}", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(td.path().join("nested").exists());

        let prepared = prepare_sqlite_url(&format!("{url}?mode=ro"));
        assert!(prepared.ends_with("?mode=ro"));
    }
}
