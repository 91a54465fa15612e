// Executor retry/classification tests using wiremock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hearthbind_api::{
    CallExecutor, Credentials, Error, RetryPolicy, SessionHandle, TransportConfig, VendorRequest,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_attempts: 3,
    }
}

async fn executor(server: &MockServer) -> CallExecutor {
    let base: url::Url = format!("{}/", server.uri()).parse().expect("base url");
    let transport = TransportConfig::default();
    let session = Arc::new(
        SessionHandle::new(
            base.clone(),
            Credentials {
                username: "homeowner@example.com".into(),
                password: SecretString::from("hunter2".to_owned()),
            },
            &transport,
        )
        .expect("session handle"),
    );
    CallExecutor::new(base, session, &transport)
        .expect("executor")
        .with_policy(fast_policy())
}

/// Mount a token endpoint that always succeeds with the given token.
async fn mount_token(server: &MockServer, access: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "refresh_token": format!("refresh-{access}"),
            "expires_in": 3600,
            "user_id": "owner-1",
        })))
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_call_parses_json() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "power": "on" })))
        .expect(1)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let resp = exec
        .call(&VendorRequest::get("devices/42/state"))
        .await
        .expect("call");

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["power"], "on");
}

#[tokio::test]
async fn server_error_is_retried_until_success() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "power": "off" })))
        .expect(1)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let resp = exec
        .call(&VendorRequest::get("devices/42/state"))
        .await
        .expect("third attempt succeeds");

    assert_eq!(resp.body["power"], "off");
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let err = exec
        .call(&VendorRequest::get("devices/42/state"))
        .await
        .expect_err("budget exhausted");

    assert!(matches!(err, Error::ServerError { status: 502 }));
}

#[tokio::test]
async fn auth_rejection_refreshes_and_retries_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(json!({ "grant_type": "password" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t-old",
            "refresh_token": "r-old",
            "expires_in": 3600,
            "user_id": "owner-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(json!({ "grant_type": "refresh_token", "refresh_token": "r-old" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t-new",
            "refresh_token": "r-new",
            "expires_in": 3600,
            "user_id": "owner-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    // The server honors only the refreshed token.
    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .and(header("authorization", "Bearer t-old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .and(header("authorization", "Bearer t-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "power": "on" })))
        .expect(1)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let resp = exec
        .call(&VendorRequest::get("devices/42/state"))
        .await
        .expect("refreshed call");

    assert_eq!(resp.body["power"], "on");
}

#[tokio::test]
async fn persistent_auth_rejection_surfaces_after_one_retry() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    // 401 regardless of token: the single refresh-and-retry must not loop.
    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let err = exec
        .call(&VendorRequest::get("devices/42/state"))
        .await
        .expect_err("still rejected");

    assert!(matches!(err, Error::AuthRejected { status: 401 }));
}

#[tokio::test]
async fn rate_limit_honors_retry_after_hint() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    Mock::given(method("GET"))
        .and(path("/devices/42/usage"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/devices/42/usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "gallons": 12.5 })))
        .expect(1)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let started = Instant::now();
    let resp = exec
        .call(&VendorRequest::get("devices/42/usage"))
        .await
        .expect("after backoff");

    // The second attempt must not fire before the server's hint elapses.
    assert!(
        started.elapsed() >= Duration::from_secs(1),
        "retried after only {:?}",
        started.elapsed()
    );
    assert_eq!(resp.body["gallons"], 12.5);
}

#[tokio::test]
async fn malformed_body_is_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    Mock::given(method("GET"))
        .and(path("/devices/42/state"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let err = exec
        .call(&VendorRequest::get("devices/42/state"))
        .await
        .expect_err("contract bug");

    assert!(matches!(err, Error::MalformedResponse { .. }));
}

#[tokio::test]
async fn vendor_rejection_is_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    Mock::given(method("POST"))
        .and(path("/devices/42/command"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such device"))
        .expect(1)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let err = exec
        .call(&VendorRequest::post("devices/42/command", json!({ "power": "on" })))
        .await
        .expect_err("rejected");

    match err {
        Error::Rejected { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("no such device"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_body_maps_to_null() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;

    Mock::given(method("POST"))
        .and(path("/devices/42/command"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let exec = executor(&server).await;
    let resp = exec
        .call(&VendorRequest::post("devices/42/command", json!({ "power": "off" })))
        .await
        .expect("command accepted");

    assert_eq!(resp.status, 204);
    assert!(resp.body.is_null());
}
