mod common;

use axum::http::HeaderMap;
use blog_cms::{AppConfig, rate_limit::client_key};
use common::{TestApp, from_peer, get, json_request};
use serde_json::json;
use std::net::SocketAddr;

fn limits(auth: u32, api: u32) -> AppConfig {
    AppConfig {
        auth_rate_limit_max: auth,
        api_rate_limit_max: api,
        ..AppConfig::default()
    }
}

fn login_attempt() -> axum::http::Request<axum::body::Body> {
    json_request(
        "POST",
        "/api/auth/login",
        None,
        json!({ "email": "ada@example.com", "password": "wrong-password" }),
    )
}

fn header<'a>(response: &'a axum::http::Response<axum::body::Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// --- CREDENTIAL LIMITER ---

#[tokio::test]
async fn test_sixth_login_attempt_is_rejected() {
    let app = TestApp::with_config(limits(5, 1_000));

    for attempt in 1..=5 {
        let (status, _) = app.call(login_attempt()).await;
        assert_eq!(status, 401, "attempt {} should reach the handler", attempt);
    }

    let response = app.send(login_attempt()).await;
    assert_eq!(response.status(), 429);

    let retry_after: u64 = header(&response, "retry-after").unwrap().parse().unwrap();
    assert!(retry_after >= 1 && retry_after <= 900);

    // The rejection reports the credential quota, not the outer API one.
    assert_eq!(header(&response, "ratelimit-limit"), Some("5"));
    assert_eq!(header(&response, "ratelimit-remaining"), Some("0"));
    assert_eq!(
        header(&response, "ratelimit-reset"),
        header(&response, "retry-after")
    );

    let body = common::body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "Too many login attempts from this IP. Please try again after 15 minutes."
    );
    assert_eq!(body["retryAfter"], "15 minutes");
}

#[tokio::test]
async fn test_register_and_login_share_one_quota() {
    let app = TestApp::with_config(limits(2, 1_000));

    let (status, _) = app
        .call(json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({ "name": "Ada", "email": "ada@example.com", "password": "secret123" }),
        ))
        .await;
    assert_eq!(status, 201);

    let (status, _) = app.call(login_attempt()).await;
    assert_eq!(status, 401);

    let (status, _) = app.call(login_attempt()).await;
    assert_eq!(status, 429);

    // Other API routes keep working.
    let (status, _) = app.call(get("/api/posts")).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_credential_routes_report_their_own_quota() {
    let app = TestApp::with_config(limits(5, 100));
    let response = app.send(login_attempt()).await;

    assert_eq!(header(&response, "ratelimit-limit"), Some("5"));
    assert_eq!(header(&response, "ratelimit-remaining"), Some("4"));
}

// --- API LIMITER ---

#[tokio::test]
async fn test_allowed_requests_carry_ratelimit_headers() {
    let app = TestApp::with_config(limits(5, 100));

    let response = app.send(get("/api/posts")).await;
    assert_eq!(response.status(), 200);
    assert_eq!(header(&response, "ratelimit-limit"), Some("100"));
    assert_eq!(header(&response, "ratelimit-remaining"), Some("99"));

    let reset: u64 = header(&response, "ratelimit-reset").unwrap().parse().unwrap();
    assert!(reset >= 1 && reset <= 900);

    let response = app.send(get("/api/posts")).await;
    assert_eq!(header(&response, "ratelimit-remaining"), Some("98"));
}

#[tokio::test]
async fn test_api_quota_exhaustion() {
    let app = TestApp::with_config(limits(5, 2));

    assert_eq!(app.call(get("/api/posts")).await.0, 200);
    assert_eq!(app.call(get("/api/posts/latest")).await.0, 200);

    let (status, body) = app.call(get("/api/posts")).await;
    assert_eq!(status, 429);
    assert_eq!(body["message"], "Too many requests from this IP. Please try again later.");
}

#[tokio::test]
async fn test_service_routes_are_not_limited() {
    let app = TestApp::with_config(limits(1, 1));

    for _ in 0..5 {
        let response = app.send(get("/health")).await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("ratelimit-limit").is_none());
    }
    assert_eq!(app.call(get("/")).await.0, 200);
}

// --- CLIENT IDENTIFICATION ---

#[tokio::test]
async fn test_peers_are_counted_separately() {
    let app = TestApp::with_config(limits(5, 1));

    let (status, _) = app.call(from_peer(get("/api/posts"), "10.0.0.1:4000")).await;
    assert_eq!(status, 200);
    let (status, _) = app.call(from_peer(get("/api/posts"), "10.0.0.1:4001")).await;
    assert_eq!(status, 429);

    let (status, _) = app.call(from_peer(get("/api/posts"), "10.0.0.2:4000")).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_forwarded_clients_behind_one_trusted_proxy() {
    let app = TestApp::with_config(limits(5, 1));

    let behind_proxy = |client: &str| {
        let mut request = from_peer(get("/api/posts"), "172.16.0.1:443");
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        request
    };

    assert_eq!(app.call(behind_proxy("203.0.113.7")).await.0, 200);
    assert_eq!(app.call(behind_proxy("198.51.100.9")).await.0, 200);
    assert_eq!(app.call(behind_proxy("203.0.113.7")).await.0, 429);
}

#[tokio::test]
async fn test_without_trusted_hops_every_forwarded_client_shares_the_proxy_quota() {
    let app = TestApp::with_config(AppConfig {
        trust_proxy_hops: 0,
        ..limits(5, 1)
    });

    let behind_proxy = |client: &str| {
        let mut request = from_peer(get("/api/posts"), "172.16.0.1:443");
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        request
    };

    assert_eq!(app.call(behind_proxy("203.0.113.7")).await.0, 200);
    assert_eq!(app.call(behind_proxy("198.51.100.9")).await.0, 429);
}

#[test]
fn test_client_key_resolution() {
    let peer: SocketAddr = "172.16.0.1:443".parse().unwrap();
    let mut headers = HeaderMap::new();

    assert_eq!(client_key(&headers, Some(peer), 0), "172.16.0.1");
    assert_eq!(client_key(&headers, Some(peer), 1), "172.16.0.1");
    assert_eq!(client_key(&headers, None, 1), "unknown");

    headers.insert("x-forwarded-for", "1.1.1.1, 2.2.2.2, 3.3.3.3".parse().unwrap());
    assert_eq!(client_key(&headers, Some(peer), 0), "172.16.0.1");
    assert_eq!(client_key(&headers, Some(peer), 1), "3.3.3.3");
    assert_eq!(client_key(&headers, Some(peer), 2), "2.2.2.2");
    // More trusted hops than addresses: the left-most entry is used.
    assert_eq!(client_key(&headers, Some(peer), 10), "1.1.1.1");
}

#[test]
fn test_client_key_reads_repeated_forwarded_headers_in_order() {
    let peer: SocketAddr = "172.16.0.1:443".parse().unwrap();
    let mut headers = HeaderMap::new();
    headers.append("x-forwarded-for", "1.1.1.1".parse().unwrap());
    headers.append("x-forwarded-for", "2.2.2.2".parse().unwrap());

    assert_eq!(client_key(&headers, Some(peer), 1), "2.2.2.2");
    assert_eq!(client_key(&headers, Some(peer), 2), "1.1.1.1");
}
