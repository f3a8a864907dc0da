//! Route registration and dispatch.
//!
//! # Responsibilities
//! - Register (method, pattern, handler) routes in order
//! - Dispatch each request to the first route matching path and method
//! - Answer 405 with `Allow` when only the path matched, 404 otherwise
//!
//! # Design Decisions
//! - Registration happens before serving; the table is then frozen into an
//!   `Arc<[Route]>` and read without locks
//! - Scanning continues past a path match with the wrong method, because
//!   several methods may share a pattern
//! - POST, PUT, PATCH and DELETE also register OPTIONS for their pattern
//! - Patterns match the percent-decoded path, so captures are decoded too

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
};
use percent_encoding::percent_decode_str;
use tower::ServiceExt;

use crate::http::middleware::{handler_fn, Chain, Handler, Middleware};
use crate::http::request::PathParams;
use crate::http::response::{method_not_allowed, not_found};
use crate::routing::matcher::{PathPattern, PatternError};

/// A registered route. Immutable once created.
#[derive(Clone)]
pub struct Route {
    method: Method,
    pattern: PathPattern,
    handler: Handler,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// Builder for a pattern-based dispatcher.
///
/// ```ignore
/// let handler = Router::new()
///     .get("/users/{id}", show_user)?
///     .post("/users", create_user)?
///     .with_middleware(request_logger(recorder))
///     .into_handler();
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    middlewares: Chain,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an axum handler for a method and pattern.
    pub fn route<H, T>(self, method: Method, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route_service(method, pattern, into_handler(handler))
    }

    /// Register an already boxed handler for a method and pattern.
    pub fn route_service(
        mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
    ) -> Result<Self, PatternError> {
        let pattern = PathPattern::compile(pattern)?;
        tracing::debug!(method = %method, pattern = %pattern.as_str(), "Route registered");
        self.routes.push(Route {
            method,
            pattern,
            handler,
        });
        Ok(self)
    }

    /// Register the handler for `method` plus an OPTIONS route on the same pattern.
    fn route_with_options<H, T>(
        self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        let handler = into_handler(handler);
        self.route_service(Method::OPTIONS, pattern, handler.clone())?
            .route_service(method, pattern, handler)
    }

    pub fn get<H, T>(self, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post<H, T>(self, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route_with_options(Method::POST, pattern, handler)
    }

    pub fn put<H, T>(self, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route_with_options(Method::PUT, pattern, handler)
    }

    pub fn patch<H, T>(self, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route_with_options(Method::PATCH, pattern, handler)
    }

    pub fn delete<H, T>(self, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route_with_options(Method::DELETE, pattern, handler)
    }

    pub fn head<H, T>(self, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route(Method::HEAD, pattern, handler)
    }

    pub fn options<H, T>(self, pattern: &str, handler: H) -> Result<Self, PatternError>
    where
        H: axum::handler::Handler<T, ()> + Sync,
        T: 'static,
    {
        self.route(Method::OPTIONS, pattern, handler)
    }

    /// Add a middleware. The last one added becomes the outermost layer.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Registered routes, in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Freeze the routes into a dispatcher.
    pub fn into_dispatcher(self) -> Dispatcher {
        Dispatcher {
            routes: self.routes.into(),
        }
    }

    /// Freeze the routes and wrap the dispatcher in the middleware chain.
    pub fn into_handler(mut self) -> Handler {
        let middlewares = std::mem::take(&mut self.middlewares);
        middlewares.wrap(self.into_dispatcher().into_handler())
    }
}

fn into_handler<H, T>(handler: H) -> Handler
where
    H: axum::handler::Handler<T, ()> + Sync,
    T: 'static,
{
    Handler::new(handler.with_state(()))
}

/// Immutable route table shared by all request tasks.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    routes: Arc<[Route]>,
}

impl Dispatcher {
    /// Dispatch a request to the first route matching its path and method.
    pub async fn dispatch(&self, mut request: Request<Body>) -> Response {
        let path = percent_decode_str(request.uri().path())
            .decode_utf8_lossy()
            .into_owned();
        let mut allowed: Vec<Method> = Vec::new();

        for route in self.routes.iter() {
            let Some(values) = route.pattern.captures(&path) else {
                continue;
            };

            if route.method != *request.method() {
                if !allowed.contains(&route.method) {
                    allowed.push(route.method.clone());
                }
                continue;
            }

            request
                .extensions_mut()
                .insert(PathParams::new(values, Arc::clone(route.pattern.names())));

            return route
                .handler
                .clone()
                .oneshot(request)
                .await
                .unwrap_or_else(|never: Infallible| match never {});
        }

        if !allowed.is_empty() {
            tracing::debug!(path = %path, allow = ?allowed, "Method not allowed");
            return method_not_allowed(&allowed);
        }

        tracing::debug!(path = %path, "No route matched");
        not_found()
    }

    /// Box the dispatcher as a handler.
    pub fn into_handler(self) -> Handler {
        handler_fn(move |request| {
            let dispatcher = self.clone();
            async move { dispatcher.dispatch(request).await }
        })
    }
}
