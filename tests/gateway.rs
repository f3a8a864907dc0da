//! End-to-end tests for the prefix reverse proxy.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use common::*;
use serde_json::Value;
use switchyard::config::TimeoutConfig;
use switchyard::security::{
    rate_limit, request_filter, IpRateLimiter, RateLimitSettings, RequestFilter,
};
use switchyard::{Gateway, GatewayError, ProxyRegistry};

fn registry(rules: &[(&str, String)]) -> ProxyRegistry {
    ProxyRegistry::from_rules(rules.iter().map(|(p, t)| (*p, t.as_str()))).unwrap()
}

#[tokio::test]
async fn test_prefix_is_stripped_and_query_preserved() {
    let backend = start_echo_backend().await;
    let gateway = Gateway::new(registry(&[("/s1", format!("http://{backend}"))]));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let body: Value = client()
        .get(format!("http://{addr}/s1/api/v1/status?verbose=1&x=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/api/v1/status");
    assert_eq!(body["query"], "verbose=1&x=2");
    assert_eq!(body["host"], backend.to_string());
}

#[tokio::test]
async fn test_target_base_path_is_joined() {
    let backend = start_echo_backend().await;
    let gateway = Gateway::new(registry(&[("/api/", format!("http://{backend}/v2/"))]));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let body: Value = client()
        .get(format!("http://{addr}/api/users/7"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["path"], "/v2/users/7");
}

#[tokio::test]
async fn test_forwarding_headers_are_set() {
    let backend = start_echo_backend().await;
    let gateway = Gateway::new(registry(&[("/s1/", format!("http://{backend}"))]));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let body: Value = client()
        .get(format!("http://{addr}/s1/whoami"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["x_forwarded_host"], addr.to_string());
    assert_eq!(body["x_real_ip"], "127.0.0.1");
    assert_eq!(body["x_forwarded_for"], "127.0.0.1");

    let body: Value = client()
        .get(format!("http://{addr}/s1/whoami"))
        .header("x-forwarded-for", "198.51.100.4")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["x_forwarded_for"], "198.51.100.4, 127.0.0.1");
}

#[tokio::test]
async fn test_longest_prefix_wins() {
    let short = start_mock_backend("", "short").await;
    let long = start_mock_backend("", "long").await;
    let gateway = Gateway::new(registry(&[
        ("/a/", format!("http://{short}")),
        ("/a/b/", format!("http://{long}")),
    ]));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;
    let client = client();

    let body = client
        .get(format!("http://{addr}/a/b/c"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "long");

    let body = client
        .get(format!("http://{addr}/a/x"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "short");
}

#[tokio::test]
async fn test_unmatched_path_is_not_found() {
    let backend = start_mock_backend("", "unused").await;
    let gateway = Gateway::new(registry(&[("/s1/", format!("http://{backend}"))]));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let response = client()
        .get(format!("http://{addr}/other/path"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "404 page not found");
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let gateway = Gateway::new(registry(&[("/down/", "http://127.0.0.1:1".to_string())]));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let response = client()
        .get(format!("http://{addr}/down/x"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_custom_error_handler_renders_failure() {
    let gateway = Gateway::new(registry(&[("/down/", "http://127.0.0.1:1".to_string())]))
        .with_error_handler(|err: &GatewayError| {
            (StatusCode::SERVICE_UNAVAILABLE, format!("backend down: {}", err.kind())).into_response()
        });
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let response = client()
        .get(format!("http://{addr}/down/x"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().await.unwrap(), "backend down: upstream");
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let backend = start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        ("", "late")
    })
    .await;
    let timeouts = TimeoutConfig {
        upstream_secs: 1,
        ..TimeoutConfig::default()
    };
    let gateway =
        Gateway::new(registry(&[("/slow/", format!("http://{backend}"))])).with_timeouts(&timeouts);
    let (addr, _shutdown) = start_gateway_with(gateway.into_handler(), &timeouts).await;

    let response = client()
        .get(format!("http://{addr}/slow/x"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_modifiers_see_request_and_response() {
    let backend = start_echo_backend().await;
    let gateway = Gateway::new(registry(&[("/s1/", format!("http://{backend}"))]))
        .with_request_modifier(|parts| {
            parts
                .headers
                .insert("x-gateway", HeaderValue::from_static("switchyard"));
        })
        .with_response_modifier(|parts| {
            parts
                .headers
                .insert("x-served-by", HeaderValue::from_static("switchyard"));
        });
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let response = client()
        .get(format!("http://{addr}/s1/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()["x-served-by"], "switchyard");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["x_gateway"], "switchyard");
}

#[tokio::test]
async fn test_hop_by_hop_response_headers_are_dropped() {
    let backend = start_mock_backend("Keep-Alive: timeout=5\r\nX-Backend: raw\r\n", "ok").await;
    let gateway = Gateway::new(registry(&[("/raw/", format!("http://{backend}"))]));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let response = client()
        .get(format!("http://{addr}/raw/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-backend"], "raw");
    assert!(response.headers().get("keep-alive").is_none());
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_rate_limit_rejects_after_burst() {
    let backend = start_mock_backend("", "ok").await;
    let limiter = Arc::new(IpRateLimiter::new(RateLimitSettings::new(
        1.0,
        2,
        Duration::from_secs(60),
    )));
    let gateway = Gateway::new(registry(&[("/s1/", format!("http://{backend}"))]))
        .with_middleware(rate_limit(limiter.clone()));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;
    let client = client();

    for _ in 0..2 {
        let response = client
            .get(format!("http://{addr}/s1/"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = client
        .get(format!("http://{addr}/s1/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(limiter.tracked_clients(), 1);
}

#[tokio::test]
async fn test_filter_rejects_suspicious_query() {
    let backend = start_mock_backend("", "ok").await;
    let gateway = Gateway::new(registry(&[("/s1/", format!("http://{backend}"))]))
        .with_middleware(request_filter(Arc::new(RequestFilter::default())));
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;
    let client = client();

    let response = client
        .get(format!("http://{addr}/s1/search?q=javascript:alert(1)"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(format!("http://{addr}/s1/search?q=shoes"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
