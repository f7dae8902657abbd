//! Repository records and settings.
//!
//! All per-run operations are keyed by the stable repository id, never by
//! URL, so renamed or reused URLs cannot make a run touch the wrong rows.

use anyhow::{bail, Context, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{RepoStatus, Repository, StoreSettings};

/// Create a repository record in the `NOT_STARTED` state.
///
/// The display name is the last two path segments of the URL with any
/// `.git` suffix trimmed, e.g. `https://github.com/acme/widgets` →
/// `acme/widgets`. Fails if the URL is already registered.
pub async fn create_repository(pool: &SqlitePool, url: &str) -> Result<Repository> {
    let url = url.trim();
    if url.is_empty() {
        bail!("URL is required");
    }

    let name = derive_name(url);
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO repositories (id, name, url, status, error, created_at, updated_at)
        VALUES (?, ?, ?, ?, NULL, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&name)
    .bind(url)
    .bind(RepoStatus::NotStarted.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to create repository for {}", url))?;

    Ok(Repository {
        id,
        name,
        url: url.to_string(),
        status: RepoStatus::NotStarted,
        error: None,
        created_at: now,
        updated_at: now,
    })
}

/// Last two path segments of the URL, `.git` trimmed.
fn derive_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 2 {
        segments[segments.len() - 2..].join("/")
    } else {
        trimmed.to_string()
    }
}

pub async fn get_repository(pool: &SqlitePool, id: &str) -> Result<Option<Repository>> {
    let row = sqlx::query(
        "SELECT id, name, url, status, error, created_at, updated_at FROM repositories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_repository).transpose()
}

pub async fn list_repositories(pool: &SqlitePool) -> Result<Vec<Repository>> {
    let rows = sqlx::query(
        "SELECT id, name, url, status, error, created_at, updated_at FROM repositories ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_repository).collect()
}

/// Delete a repository and, via the FK cascade, every document it owns.
pub async fn delete_repository(pool: &SqlitePool, id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        bail!("Repository {} not found", id);
    }
    Ok(())
}

/// Atomic check-and-set to `LOADING`.
///
/// Returns `false` if the repository is already `LOADING`, which means
/// another indexing run is active and the new one must be skipped. This is
/// the at-most-one-run-per-repository guard.
pub async fn try_begin_indexing(pool: &SqlitePool, id: &str) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "UPDATE repositories SET status = ?, updated_at = ? WHERE id = ? AND status <> ?",
    )
    .bind(RepoStatus::Loading.as_str())
    .bind(now)
    .bind(id)
    .bind(RepoStatus::Loading.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Set the status and error message for a repository, keyed by id.
pub async fn update_status(
    pool: &SqlitePool,
    id: &str,
    status: RepoStatus,
    error: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE repositories SET status = ?, error = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

fn row_to_repository(row: sqlx::sqlite::SqliteRow) -> Result<Repository> {
    let status_str: String = row.get("status");
    Ok(Repository {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        status: RepoStatus::parse(&status_str)?,
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============ Settings ============

/// Read the most recently created settings row, if any.
pub async fn latest_settings(pool: &SqlitePool) -> Result<Option<StoreSettings>> {
    let row = sqlx::query(
        "SELECT id, api_key, access_token, created_at FROM store_settings ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| StoreSettings {
        id: r.get("id"),
        api_key: r.get("api_key"),
        access_token: r.get("access_token"),
        created_at: r.get("created_at"),
    }))
}

/// Insert a new settings row. Reads always take the newest row, so this is
/// an append, not an update.
pub async fn save_settings(pool: &SqlitePool, api_key: &str, access_token: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO store_settings (id, api_key, access_token, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(api_key)
    .bind(access_token)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
