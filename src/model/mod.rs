//! Domain model for harvested data
//!
//! # Components
//!
//! - `Entity`: one harvested repository snapshot (natural key + star count)
//! - `Cursor`: opaque pagination position handed back by the server
//! - `RateLimitState`: the server's quota report attached to every page
//! - `CrawlMetrics`: per-run counters owned by the coordinator

mod entity;
mod metrics;

pub use entity::{Cursor, Entity, EntityError, RateLimitState};
pub use metrics::{CrawlMetrics, StopReason};
