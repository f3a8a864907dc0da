//! Per-request context.
//!
//! # Responsibilities
//! - Expose path captures by position and by name (`PathParams`)
//! - Extract the client address (forwarding headers, then socket peer)
//! - Extract Basic credentials and Bearer tokens from `Authorization`
//!
//! # Trust
//! `X-Forwarded-For` and `X-Real-IP` are set by whoever sent the request.
//! They identify the client only when a trusted proxy in front of this one
//! overwrites them. Otherwise a client can pick its own address, so the
//! value is a deployment decision and not a security boundary.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::AuthError;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_REQUEST_ID: &str = "x-request-id";

/// Path captures attached by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    values: Vec<String>,
    names: Arc<HashMap<String, usize>>,
}

impl PathParams {
    pub(crate) fn new(values: Vec<String>, names: Arc<HashMap<String, usize>>) -> Self {
        Self { values, names }
    }

    /// Capture at `index`, in pattern order.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// Capture for the placeholder called `name`.
    pub fn named(&self, name: &str) -> Option<&str> {
        self.names.get(name).and_then(|&index| self.get(index))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rejection when a handler asks for `PathParams` outside the dispatcher.
#[derive(Debug)]
pub struct MissingPathParams;

impl IntoResponse for MissingPathParams {
    fn into_response(self) -> Response {
        tracing::error!("PathParams requested by a handler that was not dispatched by a Router");
        (StatusCode::INTERNAL_SERVER_ERROR, "Missing path parameters").into_response()
    }
}

impl<S> FromRequestParts<S> for PathParams
where
    S: Send + Sync,
{
    type Rejection = MissingPathParams;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<PathParams>()
            .cloned()
            .ok_or(MissingPathParams)
    }
}

/// Socket address of the peer, when the server recorded one.
pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Client address: first `X-Forwarded-For` entry, else `X-Real-IP`, else the
/// host part of the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real {
        return Some(ip.to_string());
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Username and password from a `Basic` authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Token from a `Bearer` authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

/// Return the credentials of `Authorization: <scheme> <credentials>`.
fn scheme_credentials<'a>(headers: &'a HeaderMap, scheme: &'static str) -> Result<&'a str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Missing(scheme))?
        .to_str()
        .map_err(|_| AuthError::Malformed(scheme))?;

    let (given, credentials) = value.split_once(' ').ok_or(AuthError::Missing(scheme))?;
    if !given.eq_ignore_ascii_case(scheme) {
        return Err(AuthError::Missing(scheme));
    }
    if credentials.is_empty() || credentials.contains(' ') {
        return Err(AuthError::Malformed(scheme));
    }
    Ok(credentials)
}

/// Decode `Authorization: Basic <base64(user:pass)>`.
pub fn basic_credentials(headers: &HeaderMap) -> Result<BasicCredentials, AuthError> {
    const SCHEME: &str = "Basic";
    let encoded = scheme_credentials(headers, SCHEME)?;
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| AuthError::InvalidEncoding(SCHEME))?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidEncoding(SCHEME))?;
    let (username, password) = decoded.split_once(':').ok_or(AuthError::Malformed(SCHEME))?;

    Ok(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Read `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<BearerToken, AuthError> {
    scheme_credentials(headers, "Bearer").map(|token| BearerToken(token.to_string()))
}

impl<S> FromRequestParts<S> for BasicCredentials
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        basic_credentials(&parts.headers)
    }
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(&parts.headers)
    }
}
