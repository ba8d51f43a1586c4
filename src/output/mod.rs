//! Output module for reporting on harvested data
//!
//! This module handles:
//! - Printing statistics about stored repositories and runs
//! - Exporting stored repositories as CSV
//! - Printing the metrics of a finished crawl

mod csv_export;
pub mod stats;

pub use csv_export::{export_csv, write_csv};
pub use stats::{load_statistics, print_statistics, HarvestStatistics};

use crate::model::CrawlMetrics;

/// Prints the metrics of a finished crawl to stdout
pub fn print_metrics(metrics: &CrawlMetrics) {
    println!("=== Crawl Summary ===\n");
    if let Some(reason) = metrics.stop_reason {
        println!("  Stop reason: {}", reason);
    }
    println!("  Entities fetched: {}", metrics.entities_fetched);
    println!("  Batches flushed: {}", metrics.batches_flushed);
    println!("  Rows inserted: {}", metrics.rows_inserted);
    println!("  Rows updated: {}", metrics.rows_updated);
    println!("  Retries: {}", metrics.errors_retried);
    println!("  Rate limit waits: {}", metrics.rate_limit_waits);
    println!(
        "  Duration: {:.1}s ({:.1} entities/sec)",
        metrics.duration().as_secs_f64(),
        metrics.rate()
    );
}
