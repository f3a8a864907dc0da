//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, Json};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use switchyard::config::TimeoutConfig;
use switchyard::{Handler, HttpServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse},
    Message,
};

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Backend answering every request with a JSON description of it.
pub async fn start_echo_backend() -> SocketAddr {
    async fn echo(request: Request<Body>) -> Json<Value> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "method": request.method().as_str(),
            "path": request.uri().path(),
            "query": request.uri().query(),
            "host": header("host"),
            "x_forwarded_host": header("x-forwarded-host"),
            "x_forwarded_for": header("x-forwarded-for"),
            "x_real_ip": header("x-real-ip"),
            "x_gateway": header("x-gateway"),
            "connection": header("connection"),
        }))
    }

    let (listener, addr) = bind().await;
    let app = axum::Router::new().fallback(echo);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Backend writing a fixed raw HTTP/1.1 response, extra headers included.
pub async fn start_mock_backend(extra_headers: &'static str, body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (extra_headers, body) }).await
}

/// Consume a request head so closing the socket does not reset the peer.
async fn read_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

/// Raw backend whose response is computed per connection.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (&'static str, &'static str)> + Send + 'static,
{
    let (listener, addr) = bind().await;
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let (extra_headers, body) = f().await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                    body.len(),
                    extra_headers,
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });
    addr
}

/// Websocket backend: sends the request URI first, then echoes text and
/// binary messages until the peer closes.
pub async fn start_ws_echo_backend() -> SocketAddr {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut uri = String::new();
                let callback = |request: &HandshakeRequest, response: HandshakeResponse| {
                    uri = request.uri().to_string();
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };

                if ws.send(Message::Text(uri.into())).await.is_err() {
                    return;
                }
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        break;
                    }
                    if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Websocket backend that sends the value of handshake header `name`
/// (or `-`) and closes.
pub async fn start_ws_header_backend(name: &'static str) -> SocketAddr {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut value = String::from("-");
                let callback = |request: &HandshakeRequest, response: HandshakeResponse| {
                    if let Some(v) = request.headers().get(name).and_then(|v| v.to_str().ok()) {
                        value = v.to_string();
                    }
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };
                let _ = ws.send(Message::Text(value.into())).await;
                let _ = ws.close(None).await;
            });
        }
    });
    addr
}

/// Serve `handler` on an ephemeral port.
pub async fn start_gateway(handler: Handler) -> (SocketAddr, Shutdown) {
    start_gateway_with(handler, &TimeoutConfig::default()).await
}

pub async fn start_gateway_with(handler: Handler, timeouts: &TimeoutConfig) -> (SocketAddr, Shutdown) {
    let (listener, addr) = bind().await;
    let shutdown = Shutdown::new();
    let server = HttpServer::new(handler, timeouts);
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });
    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
