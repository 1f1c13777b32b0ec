//! End-to-end tests over a real listener: routing, auth gates, admin CRUD,
//! and both function reply shapes. Children are stand-in shell runners that
//! speak the adapter protocol, so no JS engine is required.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use nanoedge_server::AppState;
use nanoedge_server::bootstrap;
use nanoedge_server::router;
use nanoedge_state::Store;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

struct TestApp {
    base: String,
    store: Store,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn admin_token(&self) -> String {
        let response = self
            .client
            .post(self.url("/jwt/create"))
            .json(&json!({"sub": "tests"}))
            .send()
            .await
            .expect("mint request");
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.expect("mint body");
        body["token"].as_str().expect("token").to_string()
    }
}

/// Boot the full router on an ephemeral port with a stub sandbox runner.
async fn spawn_app(runner_script: &str) -> anyhow::Result<TestApp> {
    let dir = tempfile::tempdir()?;
    let runner = dir.path().join("runner.sh");
    tokio::fs::write(&runner, format!("#!/bin/sh\n{runner_script}\n")).await?;
    let mut permissions = std::fs::metadata(&runner)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&runner, permissions)?;

    let store = Store::open_in_memory().await?;
    bootstrap(&store).await?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let executor =
        nanoedge_executor::ScriptExecutor::with_runner(runner, dir.path().join("static"));
    let state = AppState::new(
        store.clone(),
        executor,
        dir.path().join("static"),
        port,
    );
    tokio::spawn(async move {
        axum::serve(
            listener,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server task");
    });

    Ok(TestApp {
        base: format!("http://127.0.0.1:{port}"),
        store,
        client: reqwest::Client::new(),
        _dir: dir,
    })
}

const ECHO_FIXED: &str = r#"read line
echo '{"contentType":"application/json"}'
echo '{"type":"result","value":{"a":1}}'"#;

#[tokio::test]
async fn health_reports_ok_with_a_seeded_port_table() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;
    let body: Value = app
        .client
        .get(app.url("/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["services"], json!([]));
    assert_eq!(app.store.count_ports().await?, 999);
    Ok(())
}

#[tokio::test]
async fn admin_surface_is_gated_by_minted_tokens() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;

    let anonymous = app
        .client
        .get(app.url("/admin-api/v2/services"))
        .send()
        .await?;
    assert_eq!(anonymous.status().as_u16(), 401);

    let token = app.admin_token().await;
    let listed = app
        .client
        .get(app.url("/admin-api/v2/services"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(listed.status().as_u16(), 200);
    let body: Value = listed.json().await?;
    let names: Vec<&str> = body
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert!(names.contains(&"hello"), "seeded service missing: {names:?}");
    Ok(())
}

#[tokio::test]
async fn function_round_trip_returns_json() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;
    let token = app.admin_token().await;

    let created = app
        .client
        .post(app.url("/admin-api/v2/functions"))
        .bearer_auth(&token)
        .json(&json!({"name": "echo", "code": "export default (x) => x;"}))
        .send()
        .await?;
    assert_eq!(created.status().as_u16(), 201);

    let response = app
        .client
        .post(app.url("/functions/v2/echo"))
        .json(&json!({"a": 1}))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    let body: Value = response.json().await?;
    assert_eq!(body, json!({"a": 1}));
    Ok(())
}

#[tokio::test]
async fn streaming_function_emits_sse_frames_in_order() -> anyhow::Result<()> {
    let app = spawn_app(
        r#"read line
echo '{"contentType":"text/event-stream"}'
echo '{"type":"progress","value":1}'
echo '{"type":"progress","value":2}'
echo '{"type":"stream-result","value":{}}'"#,
    )
    .await?;
    let token = app.admin_token().await;
    app.client
        .post(app.url("/admin-api/v2/functions"))
        .bearer_auth(&token)
        .json(&json!({"name": "s", "code": "export default async function* (c) { yield 1; yield 2; return c; }"}))
        .send()
        .await?;

    let response = app
        .client
        .post(app.url("/functions/v2/s"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let mut events = response.bytes_stream().eventsource();
    let mut frames = Vec::new();
    while let Some(event) = events.next().await {
        frames.push(event?.data);
    }
    assert_eq!(frames, vec!["1", "2", "[DONE]{}"]);
    Ok(())
}

#[tokio::test]
async fn function_errors_map_to_the_documented_statuses() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;

    // Unknown function.
    let missing = app
        .client
        .post(app.url("/functions/v2/ghost"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(missing.status().as_u16(), 404);

    // Malformed params.
    let token = app.admin_token().await;
    app.client
        .post(app.url("/admin-api/v2/functions"))
        .bearer_auth(&token)
        .json(&json!({"name": "echo", "code": "export default (x) => x;"}))
        .send()
        .await?;
    let invalid = app
        .client
        .post(app.url("/functions/v2/echo"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(invalid.status().as_u16(), 400);

    // Disabled function.
    app.client
        .put(app.url("/admin-api/v2/functions/echo"))
        .bearer_auth(&token)
        .json(&json!({"enabled": false}))
        .send()
        .await?;
    let disabled = app
        .client
        .post(app.url("/functions/v2/echo"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(disabled.status().as_u16(), 403);
    Ok(())
}

#[tokio::test]
async fn duplicate_service_names_conflict() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;
    let token = app.admin_token().await;
    let duplicate = app
        .client
        .post(app.url("/admin-api/v2/services"))
        .bearer_auth(&token)
        .json(&json!({"name": "hello", "code": "Deno.serve(() => new Response());"}))
        .send()
        .await?;
    assert_eq!(duplicate.status().as_u16(), 409);
    Ok(())
}

#[tokio::test]
async fn jwt_checked_service_rejects_anonymous_requests() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;
    let token = app.admin_token().await;
    app.client
        .put(app.url("/admin-api/v2/services/hello"))
        .bearer_auth(&token)
        .json(&json!({"jwt_check": true}))
        .send()
        .await?;

    let response = app.client.get(app.url("/api/v2/hello/")).send().await?;
    assert_eq!(response.status().as_u16(), 401);
    Ok(())
}

#[tokio::test]
async fn tasks_create_atomically_and_enqueue() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;
    let token = app.admin_token().await;

    let created = app
        .client
        .post(app.url("/admin-api/v2/tasks"))
        .bearer_auth(&token)
        .json(&json!({
            "name": "nightly",
            "code": "export default () => \"done\";",
            "retry_count": 1,
            "retry_delay": 50,
        }))
        .send()
        .await?;
    assert_eq!(created.status().as_u16(), 201);
    let task: Value = created.json().await?;
    let task_id = task["id"].as_str().expect("task id");
    assert_eq!(task["bound_function_name"], json!("nightly"));

    let queued = app
        .client
        .post(app.url(&format!("/admin-api/v2/tasks/{task_id}/queue")))
        .bearer_auth(&token)
        .json(&json!({"when": "now"}))
        .send()
        .await?;
    assert_eq!(queued.status().as_u16(), 201);
    let entry: Value = queued.json().await?;
    assert_eq!(entry["status"], json!("queued"));
    assert_eq!(entry["remaining_retries"], json!(1));

    let listed: Value = app
        .client
        .get(app.url(&format!("/admin-api/v2/tasks/{task_id}/queue")))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn config_round_trips_through_the_admin_surface() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;
    let token = app.admin_token().await;

    let set = app
        .client
        .put(app.url("/admin-api/v2/config/function_execution_timeout_ms"))
        .bearer_auth(&token)
        .json(&json!({"value": "5000"}))
        .send()
        .await?;
    assert_eq!(set.status().as_u16(), 200);

    let got: Value = app
        .client
        .get(app.url("/admin-api/v2/config/function_execution_timeout_ms"))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(got["value"], json!("5000"));
    assert_eq!(app.store.function_timeout_ms().await?, 5000);
    Ok(())
}

#[tokio::test]
async fn service_schema_docs_are_augmented_with_servers() -> anyhow::Result<()> {
    let app = spawn_app(ECHO_FIXED).await?;
    let token = app.admin_token().await;
    app.client
        .put(app.url("/admin-api/v2/services/hello"))
        .bearer_auth(&token)
        .json(&json!({"schema": {"openapi": "3.0.3", "paths": {}}}))
        .send()
        .await?;

    let schema: Value = app
        .client
        .get(app.url("/api/docs/openapi/hello"))
        .send()
        .await?
        .json()
        .await?;
    let server_url = schema["servers"][0]["url"].as_str().expect("servers url");
    assert!(server_url.ends_with("/api/v2/hello"), "got {server_url}");
    Ok(())
}
