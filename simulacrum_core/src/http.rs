//! Declarative HTTP apps for simulated services.
//!
//! An [`HttpApp`] is an immutable, ordered list of middleware plus an
//! ordered list of routes. Every builder call returns a new app, so a base
//! app can be shared and extended freely:
//!
//! ```ignore
//! let app = HttpApp::new()
//!     .middleware(require_json)
//!     .get("/heartbeat", |_req| async { Ok(Response::text("ok")) })
//!     .post("/", |req| async move { Ok(Response::ok().with_body(req.body)) });
//! ```
//!
//! Dispatch runs middleware in declaration order, then the first route whose
//! method and path match. Route paths may contain `:name` segments, which are
//! captured into [`Request::params`].

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::HandlerError;

/// Body of the generic server error response.
pub const SERVER_ERROR_BODY: &str = "server error";

/// An inbound request with its body fully read.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,

    /// Request path without query string
    pub path: String,

    /// Raw query string, if any
    pub query: Option<String>,

    /// Request headers
    pub headers: HeaderMap,

    /// Captured `:name` path segments
    pub params: HashMap<String, String>,

    /// Request body
    pub body: Bytes,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            params: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns a captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns a header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a query parameter (first occurrence, no percent-decoding).
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    /// Returns the body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// A response produced by a handler or middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status code
    pub status: StatusCode,

    /// Response headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,
}

impl Response {
    /// Creates an empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Creates an empty `200 OK` response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Creates a `200 OK` plain-text response.
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok()
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
            .with_body(body.into())
    }

    /// Creates a `200 OK` JSON response.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::ok()
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    /// Creates the generic `500` response used for handler faults.
    pub fn server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_body(SERVER_ERROR_BODY)
    }

    /// Creates a `404` response for unmatched requests.
    pub fn not_found(method: &Method, path: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND).with_body(format!("Cannot {} {}", method, path))
    }

    /// Sets the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets a header, replacing any previous value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Outcome of a middleware step.
#[derive(Debug)]
pub enum Next {
    /// Continue with the (possibly modified) request
    Continue(Request),

    /// Stop here and send this response
    Respond(Response),
}

/// Boxed route handler.
pub type Handler =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response, HandlerError>> + Send + Sync>;

/// Boxed middleware function.
pub type Middleware =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Next, HandlerError>> + Send + Sync>;

/// A method + path pattern bound to a handler.
#[derive(Clone)]
pub struct Route {
    /// HTTP method
    pub method: Method,

    /// Path pattern, e.g. `/api/v2/users/:id`
    pub path: String,

    /// Request handler
    pub handler: Handler,
}

impl Route {
    /// Matches a request, returning captured params on success.
    pub fn matches(&self, method: &Method, path: &str) -> Option<HashMap<String, String>> {
        if self.method != *method {
            return None;
        }
        match_path(&self.path, path)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Immutable middleware + routes description of an HTTP service.
#[derive(Clone)]
pub struct HttpApp {
    handlers: Arc<[Route]>,
    middleware: Arc<[Middleware]>,
}

impl HttpApp {
    /// Creates an app with no routes and no middleware.
    pub fn new() -> Self {
        Self {
            handlers: Arc::from(Vec::new()),
            middleware: Arc::from(Vec::new()),
        }
    }

    /// Returns the routes in declaration order.
    pub fn handlers(&self) -> &[Route] {
        &self.handlers
    }

    /// Returns the middleware in declaration order.
    pub fn middleware_chain(&self) -> &[Middleware] {
        &self.middleware
    }

    /// Returns a new app with `route` appended.
    pub fn route<F, Fut>(&self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        let route = Route {
            method,
            path: path.to_string(),
            handler: Arc::new(move |req| handler(req).boxed()),
        };
        Self {
            handlers: self.handlers.iter().cloned().chain([route]).collect(),
            middleware: Arc::clone(&self.middleware),
        }
    }

    /// Returns a new app with a `GET` route appended.
    pub fn get<F, Fut>(&self, path: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    /// Returns a new app with a `POST` route appended.
    pub fn post<F, Fut>(&self, path: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    /// Returns a new app with a `PUT` route appended.
    pub fn put<F, Fut>(&self, path: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        self.route(Method::PUT, path, handler)
    }

    /// Returns a new app with a `DELETE` route appended.
    pub fn delete<F, Fut>(&self, path: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        self.route(Method::DELETE, path, handler)
    }

    /// Returns a new app with `middleware` appended to the chain.
    pub fn middleware<F, Fut>(&self, middleware: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Next, HandlerError>> + Send + 'static,
    {
        let middleware: Middleware = Arc::new(move |req| middleware(req).boxed());
        Self {
            handlers: Arc::clone(&self.handlers),
            middleware: self.middleware.iter().cloned().chain([middleware]).collect(),
        }
    }

    /// Runs the middleware chain and the first matching route.
    ///
    /// Unmatched requests get a `404`. Errors are returned to the caller,
    /// which turns them into a server error response.
    pub async fn handle(&self, mut request: Request) -> Result<Response, HandlerError> {
        for middleware in self.middleware.iter() {
            match middleware(request).await? {
                Next::Continue(next) => request = next,
                Next::Respond(response) => return Ok(response),
            }
        }

        for route in self.handlers.iter() {
            if let Some(params) = route.matches(&request.method, &request.path) {
                request.params = params;
                return (route.handler)(request).await;
            }
        }

        Ok(Response::not_found(&request.method, &request.path))
    }
}

impl Default for HttpApp {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApp")
            .field("handlers", &self.handlers)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Matches `path` against `pattern`, capturing `:name` segments.
///
/// Trailing slashes are ignored on both sides.
fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let mut pattern_segments = pattern.split('/').filter(|s| !s.is_empty());
    let mut path_segments = path.split('/').filter(|s| !s.is_empty());
    let mut params = HashMap::new();

    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return Some(params),
            (Some(expected), Some(actual)) => {
                if let Some(name) = expected.strip_prefix(':') {
                    params.insert(name.to_string(), actual.to_string());
                } else if expected != actual {
                    return None;
                }
            }
            _ => return None,
        }
    }
}
