//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the GraphQL endpoint and run
//! the full crawl cycle end-to-end against a temporary SQLite database.

use chrono::Utc;
use serde_json::{json, Value};
use star_harvest::client::GitHubClient;
use star_harvest::config::{
    load_config_with_hash, Config, CrawlerConfig, GithubConfig, OutputConfig,
};
use star_harvest::crawler::{crawl, Coordinator};
use star_harvest::storage::{RunStatus, SqliteStorage, Storage};
use star_harvest::{HarvestError, StopReason};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-token";

/// Creates a test configuration pointed at the mock server
fn create_test_config(server: &MockServer, db_path: &Path, page_size: u32) -> Config {
    Config {
        github: GithubConfig {
            endpoint: format!("{}/graphql", server.uri()),
            token: Some(TOKEN.to_string()),
            page_size,
            request_timeout_secs: 5,
            secondary_limit_wait_secs: 0,
            ..GithubConfig::default()
        },
        crawler: CrawlerConfig {
            target_count: 100,
            batch_size: 2,
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_pct: 0,
            rate_limit_margin_ms: 0,
            ..CrawlerConfig::default()
        },
        output: OutputConfig {
            database_path: db_path.display().to_string(),
        },
    }
}

/// Builds a search response with repositories `start..start + count`
fn search_page(start: usize, count: usize, end_cursor: Option<&str>) -> Value {
    let nodes: Vec<Value> = (start..start + count)
        .map(|i| {
            json!({
                "owner": { "login": "acme" },
                "name": format!("repo-{}", i),
                "stargazerCount": 1000 - i
            })
        })
        .collect();

    json!({
        "data": {
            "search": {
                "pageInfo": {
                    "hasNextPage": end_cursor.is_some(),
                    "endCursor": end_cursor
                },
                "nodes": nodes
            },
            "rateLimit": {
                "remaining": 4990,
                "resetAt": "2030-01-01T00:00:00Z"
            }
        }
    })
}

/// Mounts a two-page stream: 3 repositories, then 2 more
async fn mount_two_pages(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "bearer test-token"))
        .and(body_partial_json(json!({ "variables": { "cursor": null } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page(0, 3, Some("page-2"))))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": { "cursor": "page-2" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page(3, 2, None)))
        .mount(server)
        .await;
}

fn open_coordinator(
    config: &Config,
    db_path: &Path,
    fresh: bool,
) -> Coordinator<GitHubClient, SqliteStorage> {
    let client = GitHubClient::new(&config.github, TOKEN).expect("Failed to build client");
    let storage = SqliteStorage::new(db_path).expect("Failed to open database");
    Coordinator::new(client, storage, config, "test-hash", fresh)
        .expect("Failed to create coordinator")
}

#[tokio::test]
async fn test_full_crawl_until_stream_ends() {
    let mock_server = MockServer::start().await;
    mount_two_pages(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let mut coordinator = open_coordinator(&config, &db_path, true);
    let metrics = coordinator
        .run(100, 2, &CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(metrics.stop_reason, Some(StopReason::StreamExhausted));
    assert_eq!(metrics.entities_fetched, 5);
    assert_eq!(metrics.rows_inserted, 5);
    assert_eq!(metrics.batches_flushed, 2);

    let storage = coordinator.storage();
    assert_eq!(storage.count().unwrap(), 5);
    let top = storage.get_entity("acme", "repo-0").unwrap().unwrap();
    assert_eq!(top.stars, 1000);
    assert_eq!(top.full_name, "acme/repo-0");

    let run = storage.get_run(coordinator.run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.entities_fetched, 5);
}

#[tokio::test]
async fn test_second_crawl_changes_nothing() {
    let mock_server = MockServer::start().await;
    mount_two_pages(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let first = open_coordinator(&config, &db_path, true)
        .run(100, 10, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.rows_inserted, 5);

    let mut coordinator = open_coordinator(&config, &db_path, true);
    let second = coordinator
        .run(100, 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.entities_fetched, 5);
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.rows_updated, 0);
    assert_eq!(coordinator.storage().count().unwrap(), 5);
}

#[tokio::test]
async fn test_target_limits_page_size() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": { "first": 2, "query": "stars:>1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page(0, 2, Some("more"))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let metrics = open_coordinator(&config, &db_path, true)
        .run(2, 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(metrics.stop_reason, Some(StopReason::TargetReached));
    assert_eq!(metrics.entities_fetched, 2);
}

#[tokio::test]
async fn test_unauthorized_aborts_crawl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Bad credentials"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let mut coordinator = open_coordinator(&config, &db_path, true);
    let aborted = coordinator
        .run(100, 10, &CancellationToken::new())
        .await
        .expect_err("Crawl should abort");

    assert!(matches!(aborted.error, HarvestError::Fetch(_)));
    assert_eq!(aborted.metrics.entities_fetched, 0);
    assert_eq!(aborted.metrics.batches_flushed, 0);
    assert_eq!(coordinator.storage().count().unwrap(), 0);

    let run = coordinator.storage().get_run(coordinator.run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_two_pages(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let metrics = open_coordinator(&config, &db_path, true)
        .run(100, 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(metrics.errors_retried, 1);
    assert_eq!(metrics.entities_fetched, 5);
}

#[tokio::test]
async fn test_persistent_server_errors_exhaust_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let aborted = open_coordinator(&config, &db_path, true)
        .run(100, 10, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        aborted.error,
        HarvestError::RetriesExhausted { attempts: 3, .. }
    ));
}

#[tokio::test]
async fn test_rate_limit_headers_trigger_wait() {
    let mock_server = MockServer::start().await;
    let reset = (Utc::now().timestamp() - 1).to_string();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.as_str())
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_two_pages(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let metrics = open_coordinator(&config, &db_path, true)
        .run(100, 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(metrics.rate_limit_waits, 1);
    assert_eq!(metrics.errors_retried, 1);
    assert_eq!(metrics.entities_fetched, 5);
}

#[tokio::test]
async fn test_secondary_rate_limit_without_retry_after_is_retried() {
    let mock_server = MockServer::start().await;
    let reset = (Utc::now().timestamp() + 3600).to_string();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "4000")
                .insert_header("x-ratelimit-reset", reset.as_str())
                .set_body_json(json!({
                    "message": "You have exceeded a secondary rate limit."
                })),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_two_pages(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let mut coordinator = open_coordinator(&config, &db_path, true);
    let metrics = coordinator
        .run(10, 10, &CancellationToken::new())
        .await
        .expect("Secondary rate limit should not abort the crawl");

    assert_eq!(metrics.errors_retried, 1);
    assert_eq!(metrics.rate_limit_waits, 0);
    assert_eq!(metrics.entities_fetched, 5);
    assert_eq!(coordinator.storage().count().unwrap(), 5);
}

#[tokio::test]
async fn test_graphql_rate_limit_error_triggers_wait() {
    let mock_server = MockServer::start().await;
    let reset = (Utc::now().timestamp() - 1).to_string();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.as_str())
                .set_body_json(json!({
                    "errors": [{
                        "type": "RATE_LIMITED",
                        "message": "API rate limit exceeded for user"
                    }]
                })),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_two_pages(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(&mock_server, &db_path, 3);

    let metrics = open_coordinator(&config, &db_path, true)
        .run(100, 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(metrics.rate_limit_waits, 1);
    assert_eq!(metrics.entities_fetched, 5);
}

#[tokio::test]
async fn test_crawl_from_config_file() {
    let mock_server = MockServer::start().await;
    mount_two_pages(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stars.db");
    let config_path = dir.path().join("harvest.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[github]
endpoint = "{}/graphql"
token = "{}"
page-size = 3

[crawler]
target-count = 100
batch-size = 10
base-delay-ms = 1
max-delay-ms = 10
rate-limit-margin-ms = 0

[output]
database-path = "{}"
"#,
            mock_server.uri(),
            TOKEN,
            db_path.display()
        ),
    )
    .unwrap();

    let (config, hash) = load_config_with_hash(&config_path).expect("Config should load");
    let metrics = crawl(&config, &hash, false, &CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(metrics.entities_fetched, 5);
    assert_eq!(metrics.stop_reason, Some(StopReason::StreamExhausted));

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count().unwrap(), 5);
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.config_hash, hash);
    assert_eq!(run.status, RunStatus::Completed);
}
