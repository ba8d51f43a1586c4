//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::model::Entity;
use crate::storage::{BatchOutcome, EntityRecord, OwnerSummary, RunRecord, RunStatus, StarSummary};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the crawler.
/// A failed `save_batch` must leave no part of the batch visible.
pub trait Storage {
    // ===== Entities =====

    /// Upserts a batch of entities as one atomic unit
    ///
    /// Entities are applied in order, so a key repeated within the batch
    /// ends with its last value. Each distinct key counts once: as
    /// `inserted` if it had no row before the batch, or as `updated` if its
    /// final star count differs from the previously stored one. `crawled_at`
    /// and `updated_at` are refreshed for every row touched; `created_at`
    /// is only written on insert.
    fn save_batch(&mut self, entities: &[Entity]) -> StorageResult<BatchOutcome>;

    /// Counts stored entities
    fn count(&self) -> StorageResult<u64>;

    /// Gets one stored entity by natural key
    fn get_entity(&self, owner: &str, name: &str) -> StorageResult<Option<EntityRecord>>;

    /// Gets every stored entity, most stars first
    fn all_entities(&self) -> StorageResult<Vec<EntityRecord>>;

    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Records the position reached after a flushed batch
    fn save_checkpoint(
        &mut self,
        run_id: i64,
        cursor: Option<&str>,
        entities_fetched: u64,
    ) -> StorageResult<()>;

    /// Marks a run as finished with the given status and a finish timestamp
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Statistics =====

    /// Gets aggregate star figures
    fn star_summary(&self) -> StorageResult<StarSummary>;

    /// Gets the most-starred entities
    fn top_by_stars(&self, limit: usize) -> StorageResult<Vec<EntityRecord>>;

    /// Gets the most recently crawled entities
    fn recently_crawled(&self, limit: usize) -> StorageResult<Vec<EntityRecord>>;

    /// Gets entity counts per star-count bucket, smallest bucket first
    fn star_distribution(&self) -> StorageResult<Vec<(String, u64)>>;

    /// Gets the owners with the most stored entities
    fn top_owners(&self, limit: usize) -> StorageResult<Vec<OwnerSummary>>;
}
