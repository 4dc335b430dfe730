//! Persistent store adapter backed by SQLite.
//!
//! Three collections: `memory` (notes and reflections), `usage_summaries`
//! (one row per cycle), and `iteration_log` (one row per cycle holding the
//! drained cycle log). Each operation is an independent write; no
//! cross-collection transactions are needed because a cycle never issues
//! concurrent writes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::logging::CycleLogEntry;
use crate::usage::UsageSummary;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Kind of memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    /// A user-dismissible note-to-self.
    Note,
    /// An immutable post-cycle reflection.
    Reflection,
}

impl MemoryCategory {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Reflection => "reflection",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised category.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "note" => Ok(Self::Note),
            "reflection" => Ok(Self::Reflection),
            other => Err(StoreError::InvalidEnum {
                field: "category",
                value: other.to_owned(),
            }),
        }
    }
}

/// A persisted memory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Row id.
    pub id: i64,
    /// Full text content.
    pub content: String,
    /// Short summary (at most 25 words).
    pub summary: String,
    /// Record category.
    pub category: MemoryCategory,
    /// Whether a note is still shown (reflections are always inactive-proof).
    pub active: bool,
    /// ISO-8601 creation timestamp set by SQLite.
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from persistent store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization of a persisted JSON column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the persistent store.
///
/// Reads and writes go through a shared connection pool; [`Store::disconnect`]
/// must run on every process exit path.
#[derive(Debug, Clone)]
pub struct Store {
    db: SqlitePool,
}

impl Store {
    /// Wrap an existing pool and apply the schema bootstrap.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub async fn new(db: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(include_str!("../../migrations/001_schema.sql"))
            .execute(&db)
            .await?;
        Ok(Self { db })
    }

    /// Open (or create) the store at the given file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;
        info!(path = %path.display(), "persistent store connected");
        Self::new(pool).await
    }

    /// Close the connection pool, flushing outstanding writes.
    pub async fn disconnect(&self) {
        self.db.close().await;
        info!("persistent store disconnected");
    }

    // -- memory -------------------------------------------------------------

    /// Insert a memory record and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_memory(
        &self,
        content: &str,
        summary: &str,
        category: MemoryCategory,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO memory (content, summary, category, active) VALUES (?1, ?2, ?3, 1)",
        )
        .bind(content)
        .bind(summary)
        .bind(category.as_str())
        .execute(&self.db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Clear the active flag on a note. Returns false when no note row with
    /// that id exists (reflections are not eligible).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn deactivate_note(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE memory SET active = 0 WHERE id = ?1 AND category = 'note'")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is malformed.
    pub async fn fetch_memory(&self, id: i64) -> Result<Option<MemoryRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, content, summary, category, active, created_at FROM memory WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// All records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn all_memories(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, content, summary, category, active, created_at \
             FROM memory ORDER BY id DESC",
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// All active notes, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn active_notes(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, content, summary, category, active, created_at \
             FROM memory WHERE category = 'note' AND active = 1 ORDER BY id DESC",
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// The newest `limit` reflections.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn recent_reflections(&self, limit: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, content, summary, category, active, created_at \
             FROM memory WHERE category = 'reflection' ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    // -- usage --------------------------------------------------------------

    /// Persist one cycle's usage summary.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails.
    pub async fn insert_usage_summary(
        &self,
        plan_title: &str,
        summary: &UsageSummary,
    ) -> Result<(), StoreError> {
        let breakdown = serde_json::to_string(&summary.breakdown)?;
        sqlx::query(
            "INSERT INTO usage_summaries \
             (plan_title, total_calls, total_input_tokens, total_output_tokens, \
              total_cache_write_5m_tokens, total_cache_write_1h_tokens, \
              total_cache_read_tokens, total_cost, breakdown) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(plan_title)
        .bind(clamp_i64(summary.total_calls))
        .bind(clamp_i64(summary.total_input_tokens))
        .bind(clamp_i64(summary.total_output_tokens))
        .bind(clamp_i64(summary.total_cache_write_5m_tokens))
        .bind(clamp_i64(summary.total_cache_write_1h_tokens))
        .bind(clamp_i64(summary.total_cache_read_tokens))
        .bind(summary.total_cost)
        .bind(breakdown)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    // -- iteration log ------------------------------------------------------

    /// Persist one cycle's drained log entries as a single record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails.
    pub async fn append_iteration_log(
        &self,
        entries: &[CycleLogEntry],
    ) -> Result<(), StoreError> {
        let entries = serde_json::to_string(entries)?;
        sqlx::query("INSERT INTO iteration_log (entries) VALUES (?1)")
            .bind(entries)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryRecord, StoreError> {
    let category: String = row.try_get("category")?;
    let active: i64 = row.try_get("active")?;
    Ok(MemoryRecord {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        category: MemoryCategory::parse(&category)?,
        active: active != 0,
        created_at: row.try_get("created_at")?,
    })
}
