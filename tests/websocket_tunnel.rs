//! Websocket tunneling through the prefix proxy.

mod common;

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use common::*;
use futures_util::{SinkExt, StreamExt};
use switchyard::{Gateway, ProxyRegistry};
use tokio_tungstenite::{connect_async, tungstenite::Error as WsError, tungstenite::Message};

async fn next_data(
    ws: &mut (impl StreamExt<Item = Result<Message, WsError>> + Unpin),
) -> Message {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("tunnel stalled")
            .expect("stream ended")
            .expect("read failed");
        if message.is_text() || message.is_binary() || message.is_close() {
            return message;
        }
    }
}

#[tokio::test]
async fn test_messages_are_relayed_both_ways() {
    let backend = start_ws_echo_backend().await;
    let registry = ProxyRegistry::from_rules([("/ws/", format!("http://{backend}"))]).unwrap();
    let (addr, _shutdown) = start_gateway(Gateway::new(registry).into_handler()).await;

    let (mut ws, response) = connect_async(format!("ws://{addr}/ws/chat?room=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

    // The backend announces the URI it was dialed with.
    assert_eq!(next_data(&mut ws).await, Message::Text("/chat?room=1".into()));

    ws.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next_data(&mut ws).await, Message::Text("hello".into()));

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    assert_eq!(next_data(&mut ws).await, Message::Binary(vec![1u8, 2, 3].into()));

    ws.close(None).await.unwrap();
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    assert!(drained.is_ok(), "tunnel did not close");
}

#[tokio::test]
async fn test_request_modifier_applies_to_dial() {
    let backend = start_ws_header_backend("x-gateway").await;
    let registry = ProxyRegistry::from_rules([("/ws/", format!("http://{backend}"))]).unwrap();
    let gateway = Gateway::new(registry).with_request_modifier(|parts| {
        parts
            .headers
            .insert("x-gateway", HeaderValue::from_static("switchyard"));
    });
    let (addr, _shutdown) = start_gateway(gateway.into_handler()).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/")).await.unwrap();
    assert_eq!(next_data(&mut ws).await, Message::Text("switchyard".into()));
}

#[tokio::test]
async fn test_unreachable_backend_fails_handshake() {
    let registry = ProxyRegistry::from_rules([("/ws/", "http://127.0.0.1:1")]).unwrap();
    let (addr, _shutdown) = start_gateway(Gateway::new(registry).into_handler()).await;

    match connect_async(format!("ws://{addr}/ws/chat")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::BAD_GATEWAY),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should fail"),
    }
}

#[tokio::test]
async fn test_plain_requests_share_the_rule() {
    let backend = start_echo_backend().await;
    let registry = ProxyRegistry::from_rules([("/ws/", format!("http://{backend}"))]).unwrap();
    let (addr, _shutdown) = start_gateway(Gateway::new(registry).into_handler()).await;

    let response = client()
        .get(format!("http://{addr}/ws/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
