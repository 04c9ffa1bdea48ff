//! HTTP-level tests for the GitHub client and the sync pipeline on top of it.

use hubsync_server::config::{GitHubConfig, SyncConfig};
use hubsync_server::executor::{BatchExecutor, BatchStatus, OperationStatus, OperationTracker};
use hubsync_server::github::{ApiBody, AuthKind, AuthManager, GitHubClient, UpstreamApi};
use hubsync_server::SyncError;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_with_token(server: &MockServer) -> GitHubClient {
    let auth = AuthManager::new();
    auth.add("pat_0", AuthKind::Pat, "secret-token", Value::Null)
        .await
        .unwrap();
    let config = GitHubConfig {
        api_base: server.uri(),
        ..GitHubConfig::default()
    };
    GitHubClient::new(&config, auth).unwrap()
}

#[tokio::test]
async fn sends_token_and_accept_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "token secret-token"))
        .and(header("accept", "application/vnd.github.v3+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "login": "octo" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with_token(&server).await;
    let user = client.get_json("user", &[]).await.unwrap();
    assert_eq!(user["login"], "octo");
}

#[tokio::test]
async fn records_rate_limit_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .insert_header("x-ratelimit-remaining", "4321")
                .insert_header("x-ratelimit-reset", "1700000000"),
        )
        .mount(&server)
        .await;

    let client = client_with_token(&server).await;
    client.get_json("rate_limit", &[]).await.unwrap();

    let identity = client.auth().active().await.unwrap();
    assert_eq!(identity.rate_limit_remaining(), Some(4321));
    assert_eq!(identity.rate_limit_reset(), Some(1_700_000_000));
}

#[tokio::test]
async fn text_bodies_are_not_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/zen"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Keep it logically awesome."))
        .mount(&server)
        .await;

    let client = client_with_token(&server).await;
    let response = client.invoke(Method::GET, "zen", &[], None).await.unwrap();
    assert_eq!(
        response.body,
        ApiBody::Text("Keep it logically awesome.".to_string())
    );
}

#[tokio::test]
async fn error_status_carries_github_message() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/repos/octo/site/git/refs/heads/main"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Update is not a fast forward" })),
        )
        .mount(&server)
        .await;

    let client = client_with_token(&server).await;
    let err = client
        .send_json(
            Method::PATCH,
            "repos/octo/site/git/refs/heads/main",
            json!({ "sha": "abc", "force": false }),
        )
        .await
        .unwrap_err();

    match err {
        SyncError::Upstream { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "Update is not a fast forward");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unparsable_error_body_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/site"))
        .respond_with(
            ResponseTemplate::new(502).set_body_raw("<html>Bad Gateway</html>", "application/json"),
        )
        .mount(&server)
        .await;

    let client = client_with_token(&server).await;
    let err = client.get_json("repos/octo/site", &[]).await.unwrap_err();

    match err {
        SyncError::Upstream { status, message } => {
            assert_eq!(status, 502);
            assert_eq!(message, "GitHub API 502");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = GitHubConfig {
        api_base: server.uri(),
        timeout_secs: 1,
        ..GitHubConfig::default()
    };
    let client = GitHubClient::new(&config, AuthManager::new()).unwrap();
    let err = client.get_json("slow", &[]).await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout(_)), "got {err:?}");
}

/// Mount the read side of a branch whose tree holds only `README.md`.
async fn mount_branch(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/octo/site/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ref": "refs/heads/main",
            "object": { "sha": "commit1", "type": "commit" }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/site/git/commits/commit1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "commit1",
            "tree": { "sha": "tree1" }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/site/git/trees/tree1"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "tree1",
            "truncated": false,
            "tree": [
                { "path": "README.md", "mode": "100644", "type": "blob", "sha": "readme1", "size": 7 }
            ]
        })))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, verb: &str, route: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == verb && r.url.path() == route)
        .map(|r| r.body_json::<Value>().unwrap_or(Value::Null))
        .collect()
}

fn local_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
    dir
}

#[tokio::test]
async fn sync_directory_over_http_creates_one_commit() {
    let server = MockServer::start().await;
    mount_branch(&server).await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/site/git/blobs"))
        .and(body_partial_json(json!({ "encoding": "base64" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "blob1" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/site/git/trees"))
        .and(body_partial_json(json!({ "base_tree": "tree1" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "tree2" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/site/git/commits"))
        .and(body_partial_json(json!({ "tree": "tree2", "parents": ["commit1"] })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "commit2" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/octo/site/git/refs/heads/main"))
        .and(body_partial_json(json!({ "sha": "commit2", "force": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ref": "refs/heads/main",
            "object": { "sha": "commit2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with_token(&server).await;
    let tracker = OperationTracker::new(Duration::from_secs(7200), 50);
    let executor = BatchExecutor::new(Arc::new(client), tracker.clone(), SyncConfig::default());

    let dir = local_dir();
    let request = serde_json::from_value(json!({
        "local_path": dir.path(),
        "owner": "octo",
        "repo": "site",
        "repo_path": "docs",
    }))
    .unwrap();
    let outcome = executor.sync_directory(request).await.unwrap();

    assert_eq!(outcome.status, BatchStatus::Completed);
    assert_eq!(outcome.commit_sha.as_deref(), Some("commit2"));
    assert_eq!(outcome.files_added, 2);
    assert_eq!(outcome.files_deleted, 0);

    let trees = requests_to(&server, "POST", "/repos/octo/site/git/trees").await;
    let mut paths: Vec<_> = trees[0]["tree"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap().to_string())
        .collect();
    paths.sort();
    assert!(paths.contains(&"docs/a.txt".to_string()));
    assert!(paths.contains(&"docs/b.txt".to_string()));

    let op = tracker
        .get(outcome.operation_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(op.status, OperationStatus::Completed);
}

#[tokio::test]
async fn rejected_ref_update_fails_the_operation() {
    let server = MockServer::start().await;
    mount_branch(&server).await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/site/git/blobs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "blob1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/site/git/trees"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "tree2" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/site/git/commits"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "commit2" })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/octo/site/git/refs/heads/main"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Update is not a fast forward" })),
        )
        .mount(&server)
        .await;

    let client = client_with_token(&server).await;
    let tracker = OperationTracker::new(Duration::from_secs(7200), 50);
    let executor = BatchExecutor::new(Arc::new(client), tracker.clone(), SyncConfig::default());

    let dir = local_dir();
    let request = serde_json::from_value(json!({
        "local_path": dir.path(),
        "owner": "octo",
        "repo": "site",
    }))
    .unwrap();
    let err = executor.upload_directory(request).await.unwrap_err();

    assert_eq!(err.error.status(), Some(422));
    let op = tracker
        .get(err.operation_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.failed_count, 1);
}
