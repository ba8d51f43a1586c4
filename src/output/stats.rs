//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! statistics about harvested repositories from the storage layer.

use crate::storage::{EntityRecord, OwnerSummary, RunRecord, StarSummary, Storage};
use crate::HarvestError;
use std::fmt;

/// Rows shown in each ranked section
pub const DEFAULT_LIMIT: usize = 10;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Totals, star range, and crawl window
    pub summary: StarSummary,

    /// Most-starred repositories
    pub top_repositories: Vec<EntityRecord>,

    /// Repository counts per star bucket, smallest bucket first
    pub distribution: Vec<(String, u64)>,

    /// Owners with the most repositories
    pub top_owners: Vec<OwnerSummary>,

    /// Most recently crawled repositories
    pub recently_crawled: Vec<EntityRecord>,

    /// The most recent crawl run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `limit` - Rows to load for each ranked section
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    limit: usize,
) -> Result<HarvestStatistics, HarvestError> {
    Ok(HarvestStatistics {
        summary: storage.star_summary()?,
        top_repositories: storage.top_by_stars(limit)?,
        distribution: storage.star_distribution()?,
        top_owners: storage.top_owners(limit)?,
        recently_crawled: storage.recently_crawled(limit)?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    print!("{}", stats);
}

impl fmt::Display for HarvestStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = &self.summary;

        writeln!(f, "=== Harvest Statistics ===\n")?;
        writeln!(f, "Overview:")?;
        writeln!(
            f,
            "  Total repositories: {}",
            with_separators(summary.total)
        )?;
        if summary.total == 0 {
            writeln!(f, "\nNo repositories stored yet.")?;
            return write_latest_run(f, self.latest_run.as_ref());
        }
        writeln!(
            f,
            "  Star range: {} - {}",
            with_separators(summary.min_stars),
            with_separators(summary.max_stars)
        )?;
        writeln!(f, "  Average stars: {:.1}", summary.avg_stars)?;
        writeln!(
            f,
            "  Median stars: {}",
            with_separators(summary.median_stars)
        )?;
        writeln!(f)?;

        writeln!(
            f,
            "Top {} Repositories by Stars:",
            self.top_repositories.len()
        )?;
        writeln!(f, "  {:<50} {:>12}", "Repository", "Stars")?;
        for record in &self.top_repositories {
            writeln!(
                f,
                "  {:<50} {:>12}",
                record.full_name,
                with_separators(record.stars)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Distribution by Star Count:")?;
        for (bucket, count) in &self.distribution {
            let percentage = *count as f64 / summary.total as f64 * 100.0;
            writeln!(
                f,
                "  {:<12} {:>12} ({:.1}%)",
                bucket,
                with_separators(*count),
                percentage
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Most Prolific Owners:")?;
        writeln!(f, "  {:<30} {:>8} {:>14}", "Owner", "Repos", "Total Stars")?;
        for owner in &self.top_owners {
            writeln!(
                f,
                "  {:<30} {:>8} {:>14}",
                owner.owner,
                with_separators(owner.repositories),
                with_separators(owner.total_stars)
            )?;
        }
        writeln!(f)?;

        if let (Some(first), Some(last)) = (&summary.first_crawl, &summary.last_crawl) {
            writeln!(f, "Crawl Window:")?;
            writeln!(f, "  First crawl: {}", first)?;
            writeln!(f, "  Last crawl: {}", last)?;
            writeln!(f)?;
        }

        writeln!(f, "Recently Crawled:")?;
        for record in &self.recently_crawled {
            writeln!(
                f,
                "  {:<50} {:>12}  {}",
                record.full_name,
                with_separators(record.stars),
                record.crawled_at.format("%Y-%m-%d %H:%M:%S")
            )?;
        }

        write_latest_run(f, self.latest_run.as_ref())
    }
}

fn write_latest_run(f: &mut fmt::Formatter<'_>, run: Option<&RunRecord>) -> fmt::Result {
    let Some(run) = run else {
        return Ok(());
    };
    writeln!(f, "\nLatest Run:")?;
    writeln!(f, "  Run ID: {}", run.id)?;
    writeln!(f, "  Status: {}", run.status.to_db_string())?;
    writeln!(f, "  Started: {}", run.started_at)?;
    if let Some(finished) = &run.finished_at {
        writeln!(f, "  Finished: {}", finished)?;
    }
    writeln!(
        f,
        "  Entities fetched: {}",
        with_separators(run.entities_fetched)
    )
}

/// Formats a count with thousands separators
fn with_separators(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
