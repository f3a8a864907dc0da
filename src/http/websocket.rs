//! WebSocket tunneling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Dial the backend (http→ws, https→wss) before answering the client
//! - Complete the client handshake, echoing the backend's subprotocol
//! - Relay messages both ways until either side stops
//!
//! # Data Flow
//! ```text
//! Client ──▶ relay (client→backend) ──▶ Backend
//! Client ◀── relay (backend→client) ◀── Backend
//!              └──── shared CancellationToken ────┘
//! ```
//!
//! # Design Decisions
//! - A dial failure becomes a 502 while the client is still speaking HTTP
//! - The first end of stream, error or close frame on either side cancels
//!   both relays; each relay closes the sink it owns
//! - The tunnel task returns only after both relays have finished

use std::fmt::Display;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{header, request, HeaderMap},
    response::{IntoResponse, Response},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{
    tungstenite::{
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame as BackendCloseFrame},
        Message as BackendMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::GatewayError;
use crate::observability::metrics;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on closing a sink once its relay has stopped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handshake headers generated per connection, never copied to the backend.
const HANDSHAKE_HEADERS: [header::HeaderName; 3] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// `Connection` contains `upgrade` and `Upgrade` is `websocket`.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}

/// Translate an HTTP target into the matching websocket scheme.
pub fn websocket_url(mut url: Url) -> Result<Url, GatewayError> {
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => {
            return Err(GatewayError::InvalidTarget {
                target: url.to_string(),
                reason: format!("scheme '{other}' cannot carry websockets"),
            })
        }
    };

    url.set_scheme(scheme).map_err(|()| GatewayError::InvalidTarget {
        target: url.to_string(),
        reason: format!("cannot switch scheme to {scheme}"),
    })?;
    Ok(url)
}

/// Dial `url`, then accept the client upgrade and start relaying.
///
/// `forwarded` holds the client headers already rewritten for the backend.
pub(crate) async fn open_tunnel(
    parts: &mut request::Parts,
    url: &Url,
    forwarded: HeaderMap,
    dial_timeout: Option<Duration>,
) -> Result<Response, GatewayError> {
    let upgrade = match WebSocketUpgrade::from_request_parts(parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Invalid websocket upgrade");
            return Ok(rejection.into_response());
        }
    };

    let dial_error = |reason: String| GatewayError::Dial {
        target: url.to_string(),
        reason,
    };

    let mut dial_request = url
        .as_str()
        .into_client_request()
        .map_err(|e| dial_error(e.to_string()))?;
    let outbound = dial_request.headers_mut();
    for name in forwarded.keys() {
        if outbound.contains_key(name) || HANDSHAKE_HEADERS.contains(name) {
            continue;
        }
        for value in forwarded.get_all(name) {
            outbound.append(name.clone(), value.clone());
        }
    }

    let dial = tokio_tungstenite::connect_async(dial_request);
    let dialed = match dial_timeout {
        Some(limit) => time::timeout(limit, dial)
            .await
            .map_err(|_| GatewayError::Timeout(limit))?,
        None => dial.await,
    };
    let (backend, handshake) = dialed.map_err(|e| dial_error(e.to_string()))?;

    let protocol = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let target = url.to_string();
    Ok(upgrade
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "Client websocket upgrade failed"))
        .on_upgrade(move |client| run_tunnel(client, backend, target)))
}

async fn run_tunnel(client: WebSocket, backend: BackendSocket, target: String) {
    metrics::tunnel_opened();
    tracing::info!(upstream = %target, "Websocket tunnel open");

    let (client_sink, client_stream) = client.split();
    let (backend_sink, backend_stream) = backend.split();
    let cancel = CancellationToken::new();

    let upstream = tokio::spawn(relay(client_stream, backend_sink, to_backend, cancel.clone()));
    let downstream = tokio::spawn(relay(backend_stream, client_sink, to_client, cancel.clone()));
    let (upstream, downstream) = tokio::join!(upstream, downstream);

    tracing::info!(
        upstream = %target,
        client_to_backend = ?upstream,
        backend_to_client = ?downstream,
        "Websocket tunnel closed"
    );
    metrics::tunnel_closed();
}

/// What to do with one message read from a source.
#[derive(Debug, PartialEq)]
pub enum Relayed<T> {
    Data(T),
    /// Forward, then stop.
    Close(T),
    Skip,
}

/// Why a relay loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The source ended or a close frame was forwarded.
    Closed,
    /// The other relay stopped first.
    Cancelled,
    ReadError(String),
    WriteError(String),
}

/// Copy messages from `source` to `sink` until either fails, the source
/// ends, or `cancel` fires. Always cancels `cancel` and closes `sink` on
/// the way out.
pub async fn relay<A, B, E, S, K>(
    mut source: S,
    mut sink: K,
    convert: fn(A) -> Relayed<B>,
    cancel: CancellationToken,
) -> RelayOutcome
where
    S: Stream<Item = Result<A, E>> + Unpin,
    E: Display,
    K: Sink<B> + Unpin,
    K::Error: Display,
{
    let outcome = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            next = source.next() => next,
        };
        let message = match next {
            None => break RelayOutcome::Closed,
            Some(Err(e)) => break RelayOutcome::ReadError(e.to_string()),
            Some(Ok(message)) => message,
        };

        let (message, closing) = match convert(message) {
            Relayed::Skip => continue,
            Relayed::Data(message) => (message, false),
            Relayed::Close(message) => (message, true),
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            sent = sink.send(message) => sent,
        };
        if let Err(e) = sent {
            break RelayOutcome::WriteError(e.to_string());
        }
        if closing {
            break RelayOutcome::Closed;
        }
    };

    cancel.cancel();
    let _ = time::timeout(CLOSE_TIMEOUT, sink.close()).await;
    outcome
}

/// Client message as sent to the backend.
pub fn to_backend(message: Message) -> Relayed<BackendMessage> {
    match message {
        Message::Text(text) => Relayed::Data(BackendMessage::Text(text.as_str().into())),
        Message::Binary(data) => Relayed::Data(BackendMessage::Binary(data)),
        Message::Ping(data) => Relayed::Data(BackendMessage::Ping(data)),
        Message::Pong(data) => Relayed::Data(BackendMessage::Pong(data)),
        Message::Close(frame) => Relayed::Close(BackendMessage::Close(frame.map(|f| {
            BackendCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().into(),
            }
        }))),
    }
}

/// Backend message as sent to the client.
pub fn to_client(message: BackendMessage) -> Relayed<Message> {
    match message {
        BackendMessage::Text(text) => Relayed::Data(Message::Text(text.as_str().into())),
        BackendMessage::Binary(data) => Relayed::Data(Message::Binary(data)),
        BackendMessage::Ping(data) => Relayed::Data(Message::Ping(data)),
        BackendMessage::Pong(data) => Relayed::Data(Message::Pong(data)),
        BackendMessage::Close(frame) => Relayed::Close(Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().into(),
        }))),
        // raw frames only appear when writing, never from a read
        BackendMessage::Frame(_) => Relayed::Skip,
    }
}
