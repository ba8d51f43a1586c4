//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::model::Entity;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{BatchOutcome, EntityRecord, OwnerSummary, RunRecord, RunStatus, StarSummary};
use crate::HarvestError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const ENTITY_COLUMNS: &str = "owner, name, full_name, stars, crawled_at, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, started_at, finished_at, config_hash, status, cursor, entities_fetched";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        // Initialize schema
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_entities(&self, sql: &str, limit: Option<usize>) -> StorageResult<Vec<EntityRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match limit {
            Some(limit) => stmt
                .query_map(params![limit as i64], entity_from_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], entity_from_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

/// Formats a timestamp so that text ordering matches time ordering
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<EntityRecord> {
    Ok(EntityRecord {
        owner: row.get(0)?,
        name: row.get(1)?,
        full_name: row.get(2)?,
        stars: row.get::<_, i64>(3)?.max(0) as u64,
        crawled_at: parse_timestamp(row, 4)?,
        created_at: parse_timestamp(row, 5)?,
        updated_at: parse_timestamp(row, 6)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Running),
        cursor: row.get(5)?,
        entities_fetched: row.get::<_, i64>(6)?.max(0) as u64,
    })
}

fn stars_to_sql(entity: &Entity) -> StorageResult<i64> {
    i64::try_from(entity.stars()).map_err(|_| {
        StorageError::ConstraintViolation(format!(
            "Star count {} for {} does not fit in a database integer",
            entity.stars(),
            entity.full_name()
        ))
    })
}

impl Storage for SqliteStorage {
    // ===== Entities =====

    fn save_batch(&mut self, entities: &[Entity]) -> StorageResult<BatchOutcome> {
        if entities.is_empty() {
            return Ok(BatchOutcome::default());
        }

        // Dropping the transaction without commit rolls the whole batch back
        let tx = self.conn.transaction()?;
        let now = format_timestamp(Utc::now());

        let mut prior: HashMap<(&str, &str), Option<u64>> = HashMap::new();
        let mut latest: HashMap<(&str, &str), u64> = HashMap::new();
        {
            let mut lookup =
                tx.prepare_cached("SELECT stars FROM repositories WHERE owner = ?1 AND name = ?2")?;
            for entity in entities {
                let key = entity.key();
                if prior.contains_key(&key) {
                    continue;
                }
                let stars: Option<i64> = lookup
                    .query_row(params![entity.owner(), entity.name()], |row| row.get(0))
                    .optional()?;
                prior.insert(key, stars.map(|s| s.max(0) as u64));
            }

            let mut upsert = tx.prepare_cached(
                "INSERT INTO repositories
                 (owner, name, full_name, stars, crawled_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(owner, name) DO UPDATE SET
                    full_name = excluded.full_name,
                    stars = excluded.stars,
                    crawled_at = excluded.crawled_at,
                    updated_at = excluded.updated_at",
            )?;
            for entity in entities {
                upsert.execute(params![
                    entity.owner(),
                    entity.name(),
                    entity.full_name(),
                    stars_to_sql(entity)?,
                    format_timestamp(entity.crawled_at()),
                    now,
                ])?;
                latest.insert(entity.key(), entity.stars());
            }
        }

        tx.commit()?;

        let mut outcome = BatchOutcome::default();
        for (key, stars) in &latest {
            match prior.get(key).copied().flatten() {
                None => outcome.inserted += 1,
                Some(previous) if previous != *stars => outcome.updated += 1,
                Some(_) => {}
            }
        }
        Ok(outcome)
    }

    fn count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_entity(&self, owner: &str, name: &str) -> StorageResult<Option<EntityRecord>> {
        let sql = format!(
            "SELECT {} FROM repositories WHERE owner = ?1 AND name = ?2",
            ENTITY_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, params![owner, name], entity_from_row)
            .optional()?;
        Ok(record)
    }

    fn all_entities(&self) -> StorageResult<Vec<EntityRecord>> {
        let sql = format!(
            "SELECT {} FROM repositories ORDER BY stars DESC, owner, name",
            ENTITY_COLUMNS
        );
        self.query_entities(&sql, None)
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = format_timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        let run = self.conn.query_row(&sql, [], run_from_row).optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn save_checkpoint(
        &mut self,
        run_id: i64,
        cursor: Option<&str>,
        entities_fetched: u64,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET cursor = ?1, entities_fetched = ?2 WHERE id = ?3",
            params![cursor, entities_fetched as i64, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = format_timestamp(Utc::now());
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Statistics =====

    fn star_summary(&self) -> StorageResult<StarSummary> {
        let (total, min_stars, max_stars, avg_stars, first_crawl, last_crawl) =
            self.conn.query_row(
                "SELECT COUNT(*), MIN(stars), MAX(stars), AVG(stars), MIN(crawled_at), MAX(crawled_at)
                 FROM repositories",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )?;

        if total == 0 {
            return Ok(StarSummary::default());
        }

        // Middle one or two values; their mean is the median
        let mut stmt = self
            .conn
            .prepare("SELECT stars FROM repositories ORDER BY stars LIMIT ?1 OFFSET ?2")?;
        let (take, skip) = if total % 2 == 0 {
            (2, total / 2 - 1)
        } else {
            (1, total / 2)
        };
        let middle = stmt
            .query_map(params![take, skip], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let median = if middle.is_empty() {
            0.0
        } else {
            middle.iter().sum::<i64>() as f64 / middle.len() as f64
        };

        Ok(StarSummary {
            total: total as u64,
            min_stars: min_stars.unwrap_or(0).max(0) as u64,
            max_stars: max_stars.unwrap_or(0).max(0) as u64,
            avg_stars: avg_stars.unwrap_or(0.0),
            median_stars: median.round() as u64,
            first_crawl,
            last_crawl,
        })
    }

    fn top_by_stars(&self, limit: usize) -> StorageResult<Vec<EntityRecord>> {
        let sql = format!(
            "SELECT {} FROM repositories ORDER BY stars DESC, owner, name LIMIT ?1",
            ENTITY_COLUMNS
        );
        self.query_entities(&sql, Some(limit))
    }

    fn recently_crawled(&self, limit: usize) -> StorageResult<Vec<EntityRecord>> {
        let sql = format!(
            "SELECT {} FROM repositories ORDER BY crawled_at DESC, owner, name LIMIT ?1",
            ENTITY_COLUMNS
        );
        self.query_entities(&sql, Some(limit))
    }

    fn star_distribution(&self) -> StorageResult<Vec<(String, u64)>> {
        let query = "
            SELECT
                CASE
                    WHEN stars < 10 THEN '0-9'
                    WHEN stars < 100 THEN '10-99'
                    WHEN stars < 1000 THEN '100-999'
                    WHEN stars < 10000 THEN '1K-9.9K'
                    WHEN stars < 100000 THEN '10K-99.9K'
                    ELSE '100K+'
                END AS star_range,
                COUNT(*) AS count
            FROM repositories
            GROUP BY star_range
            ORDER BY MIN(stars)
        ";

        let mut stmt = self.conn.prepare(query)?;
        let buckets = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(buckets)
    }

    fn top_owners(&self, limit: usize) -> StorageResult<Vec<OwnerSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT owner, COUNT(*) AS repo_count, SUM(stars) AS total_stars
             FROM repositories
             GROUP BY owner
             ORDER BY repo_count DESC, total_stars DESC, owner
             LIMIT ?1",
        )?;

        let owners = stmt
            .query_map(params![limit as i64], |row| {
                Ok(OwnerSummary {
                    owner: row.get(0)?,
                    repositories: row.get::<_, i64>(1)? as u64,
                    total_stars: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(owners)
    }
}
