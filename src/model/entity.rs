use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Reasons an entity cannot be constructed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("Entity owner cannot be empty")]
    EmptyOwner,

    #[error("Entity name cannot be empty")]
    EmptyName,
}

/// A harvested repository snapshot
///
/// Identity is the case-sensitive `(owner, name)` pair. Values are immutable
/// once built; a later crawl produces a new snapshot rather than mutating
/// this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    owner: String,
    name: String,
    stars: u64,
    crawled_at: DateTime<Utc>,
}

impl Entity {
    /// Creates a new entity, rejecting an empty owner or name
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        stars: u64,
        crawled_at: DateTime<Utc>,
    ) -> Result<Self, EntityError> {
        let owner = owner.into();
        let name = name.into();

        if owner.is_empty() {
            return Err(EntityError::EmptyOwner);
        }
        if name.is_empty() {
            return Err(EntityError::EmptyName);
        }

        Ok(Self {
            owner,
            name,
            stars,
            crawled_at,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn stars(&self) -> u64 {
        self.stars
    }

    pub fn crawled_at(&self) -> DateTime<Utc> {
        self.crawled_at
    }

    /// Returns the natural key
    pub fn key(&self) -> (&str, &str) {
        (&self.owner, &self.name)
    }
}

/// Opaque pagination token supplied by the server
///
/// The crawler never inspects the contents; it only hands the token from
/// one response to the next request and persists it in checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-reported request quota for the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Requests left before the window resets
    pub remaining: u32,

    /// When the window resets
    pub reset_at: DateTime<Utc>,
}

impl RateLimitState {
    pub fn new(remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            remaining,
            reset_at,
        }
    }

    /// Time left until the window resets, zero if it already has
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn crawl_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_entity_creation() {
        let entity = Entity::new("facebook", "react", 200_000, crawl_time()).unwrap();

        assert_eq!(entity.owner(), "facebook");
        assert_eq!(entity.name(), "react");
        assert_eq!(entity.full_name(), "facebook/react");
        assert_eq!(entity.stars(), 200_000);
        assert_eq!(entity.crawled_at(), crawl_time());
        assert_eq!(entity.key(), ("facebook", "react"));
    }

    #[test]
    fn test_entity_rejects_empty_key_parts() {
        assert_eq!(
            Entity::new("", "react", 1, crawl_time()),
            Err(EntityError::EmptyOwner)
        );
        assert_eq!(
            Entity::new("facebook", "", 1, crawl_time()),
            Err(EntityError::EmptyName)
        );
    }

    #[test]
    fn test_entity_key_is_case_sensitive() {
        let lower = Entity::new("acme", "widget", 1, crawl_time()).unwrap();
        let upper = Entity::new("Acme", "widget", 1, crawl_time()).unwrap();
        assert_ne!(lower.key(), upper.key());
    }

    #[test]
    fn test_time_until_reset() {
        let now = crawl_time();
        let state = RateLimitState::new(0, now + chrono::Duration::seconds(90));
        assert_eq!(state.time_until_reset(now), Duration::from_secs(90));

        let past = RateLimitState::new(0, now - chrono::Duration::seconds(5));
        assert_eq!(past.time_until_reset(now), Duration::ZERO);
    }
}
