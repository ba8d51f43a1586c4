//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the main crawl loop, including:
//! - Creating or resuming a run from its last checkpoint
//! - Paging through the query client under the retry policy
//! - Buffering entities and flushing them to storage in batches
//! - Stopping on target, end of stream, cancellation, or deadline
//! - Recording metrics and the final run status

use crate::client::{GitHubClient, Page, QueryClient};
use crate::config::Config;
use crate::crawler::retry::{sleep_or_cancel, RetryPolicy};
use crate::model::{CrawlMetrics, Cursor, Entity, RateLimitState, StopReason};
use crate::storage::{RunStatus, SqliteStorage, Storage};
use crate::{CrawlAborted, HarvestError};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Log progress every this many pages
const PROGRESS_INTERVAL: u64 = 10;

/// Main crawler coordinator structure
pub struct Coordinator<C, S> {
    client: C,
    storage: S,
    policy: RetryPolicy,
    page_size: u32,
    empty_page_retries: u32,
    max_duration: Option<Duration>,
    run_id: i64,
    cursor: Option<Cursor>,
    resumed_count: u64,
}

impl<C: QueryClient, S: Storage> Coordinator<C, S> {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `client` - Source of entity pages
    /// * `storage` - Destination for flushed batches and run checkpoints
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash of the configuration file
    /// * `fresh` - Whether to ignore the checkpoint of an unfinished run
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(HarvestError)` - Failed to read or create the run record
    pub fn new(
        client: C,
        mut storage: S,
        config: &Config,
        config_hash: &str,
        fresh: bool,
    ) -> Result<Self, HarvestError> {
        let resumable = if fresh {
            None
        } else {
            match storage.get_latest_run()? {
                Some(run) if run.status.is_resumable() && run.config_hash == config_hash => {
                    Some(run)
                }
                Some(run) if run.status.is_resumable() => {
                    tracing::info!(
                        "Run {} was left unfinished with a different configuration, starting new run",
                        run.id
                    );
                    None
                }
                _ => None,
            }
        };

        let (run_id, cursor, resumed_count) = match resumable {
            Some(run) => {
                tracing::info!(
                    "Resuming {} run {} after {} entities",
                    run.status.to_db_string(),
                    run.id,
                    run.entities_fetched
                );
                storage.update_run_status(run.id, RunStatus::Running)?;
                (run.id, run.cursor.map(Cursor::from), run.entities_fetched)
            }
            None => {
                let run_id = storage.create_run(config_hash)?;
                tracing::info!("Starting new run {}", run_id);
                (run_id, None, 0)
            }
        };

        Ok(Self {
            client,
            storage,
            policy: RetryPolicy::from_config(&config.crawler),
            page_size: config.github.page_size,
            empty_page_retries: config.crawler.empty_page_retries,
            max_duration: config.crawler.max_duration(),
            run_id,
            cursor,
            resumed_count,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs the main crawl loop
    ///
    /// Fetches pages until `target_count` entities have been seen across this
    /// run (including any resumed progress), the stream ends, or `cancel`
    /// fires. Buffered entities are flushed before returning in every case
    /// except a storage failure.
    pub async fn run(
        &mut self,
        target_count: i64,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<CrawlMetrics, CrawlAborted> {
        let mut metrics = CrawlMetrics::start();
        let mut buffer: Vec<Entity> = Vec::new();

        if target_count <= 0 {
            tracing::info!("Target count is {}, nothing to fetch", target_count);
            if let Err(e) = self.storage.finish_run(self.run_id, RunStatus::Completed) {
                return Err(self.abort(e.into(), &mut buffer, metrics));
            }
            metrics.finish(StopReason::NotStarted);
            return Ok(metrics);
        }

        let batch_size = batch_size.max(1);
        tracing::info!(
            "Starting crawl run {}: target {} entities, batches of {}",
            self.run_id,
            target_count,
            batch_size
        );

        // The deadline cancels a child token so that it also cuts sleeps short
        let crawl_cancel = cancel.child_token();
        let deadline = self.max_duration.map(|limit| {
            let token = crawl_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!("Crawl deadline of {:?} reached", limit);
                token.cancel();
            })
        });

        let outcome = self
            .crawl_loop(
                target_count as u64,
                batch_size,
                &mut buffer,
                &mut metrics,
                &crawl_cancel,
            )
            .await;

        let deadline_fired = crawl_cancel.is_cancelled() && !cancel.is_cancelled();
        if let Some(timer) = deadline {
            timer.abort();
        }

        let reason = match outcome {
            Ok(reason) => reason,
            Err(HarvestError::Interrupted) if deadline_fired => StopReason::DeadlineExceeded,
            Err(HarvestError::Interrupted) => StopReason::Cancelled,
            Err(error) => return Err(self.abort(error, &mut buffer, metrics)),
        };

        if let Err(error) = self.flush(&mut buffer, &mut metrics) {
            return Err(self.abort(error, &mut buffer, metrics));
        }

        let status = match reason {
            StopReason::Cancelled | StopReason::DeadlineExceeded => RunStatus::Interrupted,
            _ => RunStatus::Completed,
        };
        if let Err(e) = self.storage.finish_run(self.run_id, status) {
            return Err(self.abort(e.into(), &mut buffer, metrics));
        }

        metrics.finish(reason);
        tracing::info!(
            "Crawl finished ({}): {} entities in {:.1}s, {} batches, {} inserted, {} updated, {} retries",
            reason,
            metrics.entities_fetched,
            metrics.duration().as_secs_f64(),
            metrics.batches_flushed,
            metrics.rows_inserted,
            metrics.rows_updated,
            metrics.errors_retried
        );

        Ok(metrics)
    }

    async fn crawl_loop(
        &mut self,
        target: u64,
        batch_size: usize,
        buffer: &mut Vec<Entity>,
        metrics: &mut CrawlMetrics,
        cancel: &CancellationToken,
    ) -> Result<StopReason, HarvestError> {
        let mut rate_limit: Option<RateLimitState> = None;
        let mut pages: u64 = 0;

        loop {
            let fetched = self.resumed_count + metrics.entities_fetched;
            if fetched >= target {
                return Ok(StopReason::TargetReached);
            }
            if cancel.is_cancelled() {
                return Err(HarvestError::Interrupted);
            }

            self.policy
                .respect_quota(rate_limit.as_ref(), metrics, cancel)
                .await?;

            let page_size = u64::from(self.page_size).min(target - fetched) as u32;
            let page = self.fetch_page(page_size, metrics, cancel).await?;
            pages += 1;
            rate_limit = Some(page.rate_limit);

            let mut entities = page.entities;
            entities.truncate(page_size as usize);
            metrics.entities_fetched += entities.len() as u64;
            tracing::debug!(
                "Page {}: {} entities, has_more={}, quota remaining {}",
                pages,
                entities.len(),
                page.has_more,
                page.rate_limit.remaining
            );
            buffer.extend(entities);
            if page.next_cursor.is_some() {
                self.cursor = page.next_cursor;
            }

            if buffer.len() >= batch_size {
                self.flush(buffer, metrics)?;
            }

            if !page.has_more {
                tracing::info!("Search results exhausted");
                return Ok(StopReason::StreamExhausted);
            }

            if pages % PROGRESS_INTERVAL == 0 {
                tracing::info!(
                    "Progress: {}/{} entities, {} batches flushed, {:.1} entities/sec",
                    self.resumed_count + metrics.entities_fetched,
                    target,
                    metrics.batches_flushed,
                    metrics.rate()
                );
            }
        }
    }

    /// Fetches the next page, retrying pages that come back empty mid-stream
    async fn fetch_page(
        &self,
        page_size: u32,
        metrics: &mut CrawlMetrics,
        cancel: &CancellationToken,
    ) -> Result<Page, HarvestError> {
        let client = &self.client;
        let cursor = self.cursor.as_ref();
        let mut empty_pages: u32 = 0;

        loop {
            let page = self
                .policy
                .execute(metrics, cancel, || client.fetch_page(cursor, page_size))
                .await?;

            if !page.entities.is_empty() || !page.has_more {
                return Ok(page);
            }

            empty_pages += 1;
            if empty_pages > self.empty_page_retries {
                return Err(HarvestError::EmptyPageLoop {
                    attempts: empty_pages,
                });
            }

            let delay = self.policy.backoff_delay(empty_pages - 1);
            tracing::warn!(
                "Empty page with more results reported, retrying same cursor in {:.1}s ({}/{})",
                delay.as_secs_f64(),
                empty_pages,
                self.empty_page_retries
            );
            metrics.errors_retried += 1;
            sleep_or_cancel(delay, cancel).await?;
            self.policy
                .respect_quota(Some(&page.rate_limit), metrics, cancel)
                .await?;
        }
    }

    /// Saves the buffer as one batch and checkpoints the run
    fn flush(
        &mut self,
        buffer: &mut Vec<Entity>,
        metrics: &mut CrawlMetrics,
    ) -> Result<(), HarvestError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let outcome = self.storage.save_batch(buffer)?;
        metrics.batches_flushed += 1;
        metrics.rows_inserted += outcome.inserted;
        metrics.rows_updated += outcome.updated;

        let fetched = self.resumed_count + metrics.entities_fetched;
        self.storage.save_checkpoint(
            self.run_id,
            self.cursor.as_ref().map(Cursor::as_str),
            fetched,
        )?;

        tracing::info!(
            "Saved batch {} ({} entities: {} inserted, {} updated)",
            metrics.batches_flushed,
            buffer.len(),
            outcome.inserted,
            outcome.updated
        );
        buffer.clear();
        Ok(())
    }

    /// Saves what can be saved, marks the run failed, and packages the error
    fn abort(
        &mut self,
        error: HarvestError,
        buffer: &mut Vec<Entity>,
        mut metrics: CrawlMetrics,
    ) -> CrawlAborted {
        tracing::error!("Crawl run {} failed: {}", self.run_id, error);

        if !matches!(error, HarvestError::Storage(_) | HarvestError::Database(_)) {
            if let Err(e) = self.flush(buffer, &mut metrics) {
                tracing::warn!("Could not save {} buffered entities: {}", buffer.len(), e);
            }
        }
        if let Err(e) = self.storage.finish_run(self.run_id, RunStatus::Failed) {
            tracing::warn!("Could not mark run {} as failed: {}", self.run_id, e);
        }

        metrics.finish(StopReason::Aborted);
        CrawlAborted { metrics, error }
    }
}

/// Runs a complete crawl against GitHub with SQLite storage
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file, used to decide resumability
/// * `fresh` - Start a new run even if the last one is unfinished
/// * `cancel` - Stops the crawl cleanly when cancelled
///
/// # Returns
///
/// * `Ok(CrawlMetrics)` - Crawl stopped normally
/// * `Err(CrawlAborted)` - Crawl failed, with the metrics gathered so far
pub async fn run_crawl(
    config: &Config,
    config_hash: &str,
    fresh: bool,
    cancel: &CancellationToken,
) -> Result<CrawlMetrics, CrawlAborted> {
    let token = config
        .github
        .resolve_token()
        .map_err(|e| CrawlAborted::before_start(e.into()))?;
    let client = GitHubClient::new(&config.github, &token).map_err(CrawlAborted::before_start)?;
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))
        .map_err(CrawlAborted::before_start)?;

    let mut coordinator = Coordinator::new(client, storage, config, config_hash, fresh)
        .map_err(CrawlAborted::before_start)?;

    coordinator
        .run(
            config.crawler.target_count,
            config.crawler.batch_size,
            cancel,
        )
        .await
}
