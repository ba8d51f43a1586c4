//! Rate-limited query client
//!
//! This module is the only place that knows the remote wire format. It:
//! - Builds the authenticated HTTP client
//! - Issues one search page request at a time
//! - Decodes results into `Entity` values
//! - Reports the server's rate-limit state with every page
//! - Classifies every failure as transient, rate limited, or fatal

mod github;

pub use github::{build_http_client, GitHubClient};

use crate::model::{Cursor, Entity, RateLimitState};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Largest page the search protocol accepts
pub const MAX_PAGE_SIZE: u32 = 100;

/// One page of search results
#[derive(Debug, Clone)]
pub struct Page {
    /// Entities decoded from the page, in server order
    pub entities: Vec<Entity>,

    /// Token for the following page
    pub next_cursor: Option<Cursor>,

    /// Whether the server has more results after this page
    pub has_more: bool,

    /// Quota reported alongside this page
    pub rate_limit: RateLimitState,
}

/// Classified failure of a single page request
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network trouble, 5xx, or a secondary rate limit; worth retrying
    #[error("{message}")]
    Transient {
        message: String,
        /// Minimum wait requested by the server, if any
        retry_after: Option<Duration>,
    },

    /// The primary quota is spent until `reset_at`
    #[error("Rate limit exhausted until {}", .0.reset_at)]
    RateLimited(RateLimitState),

    /// Authentication, authorization, or a malformed request; never retried
    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

/// A source of paginated entities
///
/// Implementations must be stateless between calls apart from their
/// credentials; all position state travels in the cursor.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Fetches the page following `cursor` (or the first page when `None`)
    async fn fetch_page(&self, cursor: Option<&Cursor>, page_size: u32) -> Result<Page, FetchError>;
}

/// Rejects page sizes the protocol would refuse
pub fn check_page_size(page_size: u32) -> Result<(), FetchError> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(FetchError::fatal(format!(
            "Page size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, page_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_page_size() {
        assert!(check_page_size(1).is_ok());
        assert!(check_page_size(MAX_PAGE_SIZE).is_ok());
        assert!(matches!(check_page_size(0), Err(FetchError::Fatal(_))));
        assert!(matches!(
            check_page_size(MAX_PAGE_SIZE + 1),
            Err(FetchError::Fatal(_))
        ));
    }
}
