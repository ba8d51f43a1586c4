//! Storage module for persisting harvested entities
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Idempotent batch upserts keyed by `(owner, name)`
//! - Run tracking and checkpoints for resumption
//! - Statistics queries and full-table reads for export

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use chrono::{DateTime, Utc};

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> crate::Result<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents a stored entity row
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub stars: u64,
    pub crawled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row counts produced by one batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Keys that had no row before the batch
    pub inserted: u64,

    /// Existing keys whose star count differs from the stored value
    pub updated: u64,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    /// Cursor after the last flushed batch
    pub cursor: Option<String>,
    /// Entities fetched up to the last flushed batch
    pub entities_fetched: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a run in this state can be continued from its checkpoint
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

/// Aggregate star figures across all stored entities
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarSummary {
    pub total: u64,
    pub min_stars: u64,
    pub max_stars: u64,
    pub avg_stars: f64,
    pub median_stars: u64,
    pub first_crawl: Option<String>,
    pub last_crawl: Option<String>,
}

/// Entity count and star total for one owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSummary {
    pub owner: String,
    pub repositories: u64,
    pub total_stars: u64,
}
