//! Reverse-proxy forwarding engine.
//!
//! # Data Flow
//! ```text
//! request /s1/api/v1/status?x=1
//!     → ProxyRegistry::lookup (longest prefix: /s1/ → http://backend:9000)
//!     → upgrade?  yes → websocket.rs tunnel
//!                 no  → rewrite URI, Host, X-Forwarded-*; drop hop-by-hop
//!     → request modifier
//!     → hyper client (streams body both ways)
//!     → response modifier
//!     → client
//! failures → error handler (default 502, 504 on timeout)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, request, response, HeaderMap, HeaderValue, Request, Uri, Version},
    response::Response,
};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::{Position, Url};

use crate::config::TimeoutConfig;
use crate::error::GatewayError;
use crate::http::middleware::{handler_fn, Chain, Handler, Middleware};
use crate::http::request::{client_ip, peer_addr, X_FORWARDED_FOR, X_FORWARDED_HOST, X_REAL_IP};
use crate::http::response::{gateway_error, not_found};
use crate::http::websocket;
use crate::observability::metrics;
use crate::routing::{PrefixRule, ProxyRegistry};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Hook run on the outbound request head before it is sent.
pub type RequestModifier = Arc<dyn Fn(&mut request::Parts) + Send + Sync>;

/// Hook run on the backend response head before it is returned.
pub type ResponseModifier = Arc<dyn Fn(&mut response::Parts) + Send + Sync>;

/// Renders a gateway failure for the client.
pub type ErrorHandler = Arc<dyn Fn(&GatewayError) -> Response + Send + Sync>;

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Path-prefix reverse proxy.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ProxyRegistry>,
    client: HttpClient,
    connect_timeout: Option<Duration>,
    upstream_timeout: Option<Duration>,
    request_modifier: Option<RequestModifier>,
    response_modifier: Option<ResponseModifier>,
    error_handler: ErrorHandler,
    middlewares: Chain,
}

impl Gateway {
    pub fn new(registry: ProxyRegistry) -> Self {
        let timeouts = TimeoutConfig::default();
        let connect_timeout = secs(timeouts.connect_secs);

        Self {
            registry: Arc::new(registry),
            client: build_client(connect_timeout),
            connect_timeout,
            upstream_timeout: secs(timeouts.upstream_secs),
            request_modifier: None,
            response_modifier: None,
            error_handler: Arc::new(gateway_error),
            middlewares: Chain::new(),
        }
    }

    /// Apply connect and upstream timeouts; 0 disables either.
    pub fn with_timeouts(mut self, timeouts: &TimeoutConfig) -> Self {
        self.connect_timeout = secs(timeouts.connect_secs);
        self.upstream_timeout = secs(timeouts.upstream_secs);
        self.client = build_client(self.connect_timeout);
        self
    }

    pub fn with_request_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(&mut request::Parts) + Send + Sync + 'static,
    {
        self.request_modifier = Some(Arc::new(modifier));
        self
    }

    pub fn with_response_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(&mut response::Parts) + Send + Sync + 'static,
    {
        self.response_modifier = Some(Arc::new(modifier));
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&GatewayError) -> Response + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Register a middleware around every proxied request.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    /// The gateway as a handler, wrapped in its middlewares.
    pub fn into_handler(self) -> Handler {
        let middlewares = self.middlewares.clone();
        let gateway = self;
        let base = handler_fn(move |request| {
            let gateway = gateway.clone();
            async move { gateway.handle(request).await }
        });
        middlewares.wrap(base)
    }

    /// Proxy one request, or 404 when no rule matches.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let Some(rule) = self.registry.lookup(request.uri().path()) else {
            tracing::debug!(path = %request.uri().path(), "No proxy rule matched");
            return not_found();
        };

        let result = if websocket::is_websocket_upgrade(request.headers()) {
            self.tunnel(rule, request).await
        } else {
            self.forward(rule, request).await
        };

        result.unwrap_or_else(|err| self.fail(&err))
    }

    /// Forward a plain HTTP request to the rule's backend.
    pub async fn forward(
        &self,
        rule: &PrefixRule,
        request: Request<Body>,
    ) -> Result<Response, GatewayError> {
        let (mut parts, body) = request.into_parts();
        let url = target_url(rule.target(), &rule.strip(parts.uri.path()), parts.uri.query())?;

        rewrite_head(&mut parts, &url)?;
        if let Some(modify) = &self.request_modifier {
            modify(&mut parts);
        }

        tracing::debug!(
            method = %parts.method,
            prefix = %rule.prefix(),
            upstream = %parts.uri,
            "Forwarding request"
        );

        let call = self.client.request(Request::from_parts(parts, body));
        let result = match self.upstream_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| GatewayError::Timeout(limit))?,
            None => call.await,
        };
        let response = result.map_err(|e| GatewayError::Upstream(error_chain(&e)))?;
        Ok(self.relay_response(response))
    }

    /// Stream a backend response back without its hop-by-hop headers.
    fn relay_response(&self, response: hyper::Response<Incoming>) -> Response {
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        if let Some(modify) = &self.response_modifier {
            modify(&mut parts);
        }

        Response::from_parts(parts, Body::new(body))
    }

    async fn tunnel(
        &self,
        rule: &PrefixRule,
        request: Request<Body>,
    ) -> Result<Response, GatewayError> {
        let (mut parts, _body) = request.into_parts();
        let url = target_url(rule.target(), &rule.strip(parts.uri.path()), parts.uri.query())?;
        let url = websocket::websocket_url(url)?;

        let mut forwarded = parts.headers.clone();
        let peer = peer_addr(&parts.extensions);
        set_forwarding_headers(&mut forwarded, &url, original_host(&parts), peer);
        if let Some(modify) = &self.request_modifier {
            forwarded = modify_dial_headers(modify, &parts, &url, forwarded);
        }

        tracing::debug!(prefix = %rule.prefix(), upstream = %url, "Opening websocket tunnel");
        websocket::open_tunnel(&mut parts, &url, forwarded, self.connect_timeout).await
    }

    /// Report a gateway failure through the error handler.
    pub fn fail(&self, err: &GatewayError) -> Response {
        match err {
            GatewayError::InvalidTarget { .. } => tracing::error!(error = %err, "Proxy rule is unusable"),
            _ => tracing::warn!(error = %err, "Upstream failure"),
        }
        metrics::record_upstream_error(err.kind());
        (self.error_handler)(err)
    }
}

/// Run the request modifier over the websocket dial head. Only header
/// changes reach the backend; the dial URL is fixed by the rule.
fn modify_dial_headers(
    modify: &RequestModifier,
    parts: &request::Parts,
    url: &Url,
    headers: HeaderMap,
) -> HeaderMap {
    let mut dial = Request::new(());
    *dial.method_mut() = parts.method.clone();
    *dial.version_mut() = Version::HTTP_11;
    *dial.headers_mut() = headers;
    if let Ok(uri) = url.as_str().parse::<Uri>() {
        *dial.uri_mut() = uri;
    }

    let (mut dial, ()) = dial.into_parts();
    modify(&mut dial);
    dial.headers
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

fn build_client(connect_timeout: Option<Duration>) -> HttpClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(connect_timeout);

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new()).build(https)
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Join `path` onto the target's base path and attach `query`.
pub fn target_url(target: &str, path: &str, query: Option<&str>) -> Result<Url, GatewayError> {
    let invalid = |reason: String| GatewayError::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    let mut url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;
    if !url.has_host() {
        return Err(invalid("missing host".to_string()));
    }

    let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query);
    Ok(url)
}

/// `host[:port]` of a target, as sent in `Host`.
pub fn authority(url: &Url) -> &str {
    &url[Position::BeforeHost..Position::AfterPort]
}

/// Point the request head at `url` and set the forwarding headers.
fn rewrite_head(parts: &mut request::Parts, url: &Url) -> Result<(), GatewayError> {
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    };
    let uri = Uri::builder()
        .scheme(scheme)
        .authority(authority(url))
        .path_and_query(&url[Position::BeforePath..Position::AfterQuery])
        .build()
        .map_err(|e| GatewayError::InvalidTarget {
            target: url.to_string(),
            reason: e.to_string(),
        })?;

    let peer = peer_addr(&parts.extensions);
    let original_host = original_host(parts);
    set_forwarding_headers(&mut parts.headers, url, original_host, peer);

    parts.uri = uri;
    parts.version = Version::HTTP_11;
    Ok(())
}

fn original_host(parts: &request::Parts) -> Option<HeaderValue> {
    parts.headers.get(header::HOST).cloned().or_else(|| {
        parts
            .uri
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
    })
}

/// Replace `Host` with the target authority and record the client in
/// `X-Forwarded-Host`, `X-Real-IP` and `X-Forwarded-For`.
fn set_forwarding_headers(
    headers: &mut HeaderMap,
    url: &Url,
    original_host: Option<HeaderValue>,
    peer: Option<SocketAddr>,
) {
    let client = client_ip(headers, peer);
    let chain = match (headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()), peer) {
        (Some(existing), Some(peer)) => Some(format!("{existing}, {}", peer.ip())),
        (Some(existing), None) => Some(existing.to_string()),
        (None, _) => client.clone(),
    };

    strip_hop_by_hop(headers);

    if let Ok(host) = HeaderValue::from_str(authority(url)) {
        headers.insert(header::HOST, host);
    }
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }
    if let Some(ip) = client.and_then(|ip| HeaderValue::from_str(&ip).ok()) {
        headers.insert(X_REAL_IP, ip);
    }
    if let Some(chain) = chain.and_then(|c| HeaderValue::from_str(&c).ok()) {
        headers.insert(X_FORWARDED_FOR, chain);
    }
}

/// Remove hop-by-hop headers and any header listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in &listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
