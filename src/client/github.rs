//! GitHub GraphQL search client
//!
//! Request flow for one page:
//!
//! 1. Reject page sizes outside the protocol limit locally
//! 2. POST the search query with the cursor and page size as variables
//! 3. Classify the HTTP status (see table below)
//! 4. Decode the body, map repository nodes to entities, and read the
//!    `rateLimit` block (falling back to the `x-ratelimit-*` headers)
//!
//! # Failure classification
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Timeout / connection error | Transient |
//! | HTTP 5xx | Transient |
//! | HTTP 429, or 403 with `Retry-After` | Transient (secondary limit) |
//! | HTTP 403 body naming a secondary or abuse limit | Transient (configured wait) |
//! | HTTP 403/429 with `x-ratelimit-remaining: 0` | RateLimited |
//! | GraphQL error of type `RATE_LIMITED` | RateLimited |
//! | HTTP 401, other 403, other 4xx | Fatal |
//! | GraphQL errors without data | Fatal |
//! | Undecodable 200 body | Transient |

use crate::client::{check_page_size, FetchError, Page, QueryClient};
use crate::config::GithubConfig;
use crate::model::{Cursor, Entity, RateLimitState};
use crate::{ConfigError, HarvestError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SEARCH_QUERY: &str = r#"
query SearchRepositories($query: String!, $first: Int!, $cursor: String) {
  search(query: $query, type: REPOSITORY, first: $first, after: $cursor) {
    pageInfo {
      hasNextPage
      endCursor
    }
    nodes {
      ... on Repository {
        owner {
          login
        }
        name
        stargazerCount
      }
    }
  }
  rateLimit {
    remaining
    resetAt
  }
}
"#;

/// Seconds until reset assumed when a rate-limit error carries no reset time
const FALLBACK_RESET_SECS: i64 = 60;

/// Builds an authenticated HTTP client for the GraphQL endpoint
///
/// # Arguments
///
/// * `config` - The remote protocol configuration
/// * `token` - The bearer token
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(HarvestError)` - The token is not a valid header value or the
///   client could not be built
pub fn build_http_client(config: &GithubConfig, token: &str) -> Result<Client, HarvestError> {
    let mut auth = HeaderValue::from_str(&format!("bearer {}", token)).map_err(|_| {
        ConfigError::Validation("API token contains invalid header characters".to_string())
    })?;
    auth.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);

    let client = Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

/// GitHub GraphQL implementation of [`QueryClient`]
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    endpoint: String,
    search_query: String,
    secondary_limit_wait: Duration,
}

impl GitHubClient {
    /// Creates a client for the configured endpoint and search expression
    pub fn new(config: &GithubConfig, token: &str) -> Result<Self, HarvestError> {
        Ok(Self {
            client: build_http_client(config, token)?,
            endpoint: config.endpoint.clone(),
            search_query: config.search_query.clone(),
            secondary_limit_wait: config.secondary_limit_wait(),
        })
    }
}

#[async_trait]
impl QueryClient for GitHubClient {
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        check_page_size(page_size)?;

        let request = GraphQlRequest {
            query: SEARCH_QUERY,
            variables: SearchVariables {
                query: &self.search_query,
                first: page_size,
                cursor: cursor.map(Cursor::as_str),
            },
        };

        tracing::trace!(
            "Requesting {} entities after cursor {:?}",
            page_size,
            request.variables.cursor
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        let header_limit = rate_limit_from_headers(response.headers());

        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                &headers,
                header_limit,
                &body,
                self.secondary_limit_wait,
            ));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| FetchError::transient(format!("Undecodable response body: {}", e)))?;

        decode_page(body, header_limit, Utc::now())
    }
}

// ===== Wire format =====

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'static str,
    variables: SearchVariables<'a>,
}

#[derive(Debug, Serialize)]
struct SearchVariables<'a> {
    query: &'a str,
    first: u32,
    cursor: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    search: Option<SearchConnection>,
    rate_limit: Option<RateLimitNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepositoryNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// Non-repository search hits decode with every field absent
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    owner: Option<OwnerNode>,
    name: Option<String>,
    stargazer_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OwnerNode {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitNode {
    remaining: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

impl RepositoryNode {
    fn into_entity(self, crawled_at: DateTime<Utc>) -> Option<Entity> {
        let owner = self.owner.and_then(|o| o.login)?;
        let name = self.name?;
        Entity::new(owner, name, self.stargazer_count.unwrap_or(0), crawled_at).ok()
    }
}

impl From<RateLimitNode> for RateLimitState {
    fn from(node: RateLimitNode) -> Self {
        RateLimitState::new(node.remaining, node.reset_at)
    }
}

// ===== Classification =====

fn classify_transport_error(error: &reqwest::Error) -> FetchError {
    if error.is_builder() {
        FetchError::fatal(format!("Invalid request: {}", error))
    } else if error.is_timeout() {
        FetchError::transient("Request timeout")
    } else if error.is_connect() {
        FetchError::transient(format!("Connection failed: {}", error))
    } else {
        FetchError::transient(error.to_string())
    }
}

fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    header_limit: Option<RateLimitState>,
    body: &str,
    secondary_limit_wait: Duration,
) -> FetchError {
    let code = status.as_u16();

    if status == StatusCode::UNAUTHORIZED {
        return FetchError::fatal("Authentication failed (HTTP 401): check the API token");
    }

    if matches!(code, 403 | 429) {
        if let Some(limit) = header_limit.filter(|l| l.remaining == 0) {
            return FetchError::RateLimited(limit);
        }
        if let Some(retry_after) = retry_after(headers) {
            return FetchError::Transient {
                message: format!("Secondary rate limit (HTTP {})", code),
                retry_after: Some(retry_after),
            };
        }
        if is_secondary_rate_limit(body) {
            return FetchError::Transient {
                message: format!("Secondary rate limit (HTTP {})", code),
                retry_after: Some(secondary_limit_wait),
            };
        }
        if code == 429 {
            return FetchError::transient("Too many requests (HTTP 429)");
        }
        return FetchError::fatal("Access forbidden (HTTP 403)");
    }

    if status.is_server_error() {
        return FetchError::transient(format!("Server error (HTTP {})", code));
    }

    FetchError::fatal(format!("Request rejected (HTTP {})", code))
}

/// GitHub reports secondary limits on a 403 with a message like
/// "You have exceeded a secondary rate limit" (formerly "abuse detection")
fn is_secondary_rate_limit(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("secondary rate limit") || body.contains("abuse")
}

fn decode_page(
    body: GraphQlResponse,
    header_limit: Option<RateLimitState>,
    crawled_at: DateTime<Utc>,
) -> Result<Page, FetchError> {
    let body_limit = body
        .data
        .as_ref()
        .and_then(|d| d.rate_limit.as_ref())
        .map(|node| RateLimitState::new(node.remaining, node.reset_at));

    if body
        .errors
        .iter()
        .any(|e| e.kind.as_deref() == Some("RATE_LIMITED"))
    {
        let limit = body_limit
            .or(header_limit)
            .map(|l| RateLimitState::new(0, l.reset_at))
            .unwrap_or_else(|| {
                let reset_at = crawled_at + chrono::Duration::seconds(FALLBACK_RESET_SECS);
                RateLimitState::new(0, reset_at)
            });
        return Err(FetchError::RateLimited(limit));
    }

    let messages = body
        .errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    let Some(data) = body.data else {
        return Err(FetchError::fatal(format!("Query failed: {}", messages)));
    };

    let Some(search) = data.search else {
        if messages.is_empty() {
            return Err(FetchError::fatal("Response carried no search results"));
        }
        return Err(FetchError::fatal(format!("Query failed: {}", messages)));
    };

    if !messages.is_empty() {
        tracing::warn!("Server reported partial errors: {}", messages);
    }

    let rate_limit = data
        .rate_limit
        .map(RateLimitState::from)
        .or(header_limit)
        .ok_or_else(|| FetchError::fatal("Response carried no rate-limit metadata"))?;

    let has_more = search.page_info.has_next_page;
    let next_cursor = search.page_info.end_cursor.map(Cursor::from);
    if has_more && next_cursor.is_none() {
        return Err(FetchError::fatal(
            "Server reported more results without a cursor",
        ));
    }

    let node_count = search.nodes.len();
    let entities: Vec<Entity> = search
        .nodes
        .into_iter()
        .flatten()
        .filter_map(|node| node.into_entity(crawled_at))
        .collect();

    if entities.len() < node_count {
        tracing::debug!(
            "Skipped {} search hits without owner or name",
            node_count - entities.len()
        );
    }

    Ok(Page {
        entities,
        next_cursor,
        has_more,
        rate_limit,
    })
}

fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitState> {
    let remaining = headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .parse::<u32>()
        .ok()?;
    let reset = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()?;
    let reset_at = DateTime::from_timestamp(reset, 0)?;

    Some(RateLimitState::new(remaining, reset_at))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
