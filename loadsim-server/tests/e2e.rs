//! Blackbox tests of the HTTP API and the queue-to-sink pipeline.

use anyhow::Result;
use loadsim_server::config::Config;
use loadsim_server::endpoints::RunResponse;
use loadsim_server::worker;
use loadsim_test::server::TestServer;
use serde_json::json;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_health_and_ready() -> Result<()> {
    loadsim_test::tracing::init();
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/health")).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let server_header = response.headers()[reqwest::header::SERVER].to_str()?;
    assert!(server_header.starts_with("loadsim/"));

    let response = client.get(server.url("/ready")).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_start_run() -> Result<()> {
    loadsim_test::tracing::init();
    let server = TestServer::new().await;

    let response = reqwest::Client::new()
        .post(server.url("/v1/runs"))
        .json(&json!({"requestCount": 8, "userCount": 100}))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let run: RunResponse = response.json().await?;
    assert_eq!(run.planned_requests, 8);
    assert_eq!(run.batches, 1);
    assert_eq!(run.failed_batches, 0);
    assert_eq!(server.queue().ready_len(), 8);

    Ok(())
}

#[tokio::test]
async fn test_invalid_runs() -> Result<()> {
    loadsim_test::tracing::init();
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/v1/runs"))
        .json(&json!({"requestCount": 8, "userCount": 0}))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await?;
    assert!(body["error"].as_str().unwrap().contains("user count"));

    let response = client
        .post(server.url("/v1/runs"))
        .header("content-type", "application/json")
        .body("{\"requestCount\": \"many\"}")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .post(server.url("/v1/runs"))
        .json(&json!({"requestCount": 40_000_000_000_000_000u64, "userCount": 10}))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await?;
    assert!(body["error"].as_str().unwrap().contains("exceeds the limit"));
    assert!(server.queue().is_empty());

    let mut config = Config::default();
    config.endpoints.clear();
    let server = TestServer::with_config(config).await;
    let response = client
        .post(server.url("/v1/runs"))
        .json(&json!({"requestCount": 8, "userCount": 10}))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    assert!(server.queue().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_run_end_to_end() -> Result<()> {
    loadsim_test::tracing::init();

    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/cached-users/[0-9]+$"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&target)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/users/[0-9]+"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&target)
        .await;

    let server = TestServer::with_config(Config {
        base_url: target.uri(),
        ..Default::default()
    })
    .await;

    let response = reqwest::Client::new()
        .post(server.url("/v1/runs"))
        .json(&json!({"requestCount": 42, "userCount": 3}))
        .send()
        .await?;
    let run: RunResponse = response.json().await?;
    assert_eq!(run.planned_requests, 40);
    assert_eq!(run.batches, 4);

    let reports = worker::drain(server.state()).await?;
    assert_eq!(reports.len(), 4);
    assert!(server.queue().is_empty());

    let sink = server.sink();
    assert_eq!(sink.flushes(), 4);
    for name in ["followers", "cached-followers", "user", "cached-user"] {
        assert_eq!(sink.total(&format!("{name}-total-calls")), 10.0, "{name}");
        assert_eq!(sink.values(&format!("{name}-network-latency")).len(), 10, "{name}");
    }
    assert_eq!(sink.total("user-successes"), 10.0);
    assert_eq!(sink.total("followers-successes"), 10.0);
    assert_eq!(sink.total("cached-user-failures"), 10.0);
    assert!(sink.values("cached-user-successes").is_empty());

    let received = target.received_requests().await.unwrap();
    assert_eq!(received.len(), 40);

    Ok(())
}
