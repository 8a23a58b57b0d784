//! Service normalizer - turns service descriptors into running listeners.
//!
//! Both kinds of [`ServiceDescriptor`] normalize to the same contract, a
//! [`ResourceFn`]: given a [`ServiceContext`] it acquires a listener inside
//! `ctx.scope` and resolves to the bound [`ServiceAddress`]. Releasing the
//! resource means halting that scope, which closes the socket and drops
//! every open connection.
//!
//! Per-request flow for app services:
//!
//! ```text
//! accept ──► scope running? ──no──► drop connection
//!               │yes
//!               ▼
//!        task "connection" (TLS handshake, HTTP/1.1)
//!               │ per request
//!               ▼
//!        scope running? ──no──► close without response
//!               │yes
//!               ▼
//!        task "request": middleware ─► first matching route
//!               │
//!               ├─ Ok(response)       ─► response
//!               └─ Err / panic        ─► 500 "server error"
//! ```

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming as Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use simulacrum_env::{
    is_transient, EnvError, Incoming, Listener, Protocol, ServiceAddress, TaskScope, TlsConfig,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::http::{HttpApp, Request, Response};
use crate::state::ServiceOptions;
use crate::store::Slice;

/// Everything a resource function gets to start one service.
#[derive(Clone)]
pub struct ServiceContext {
    /// Scope owning the service; halting it releases the service
    pub scope: Arc<TaskScope>,

    /// Slice of the owning simulation
    pub slice: Slice,

    /// Per-service options from the simulation's configuration
    pub options: ServiceOptions,

    /// TLS configuration for `https` services, if available
    pub tls: Option<TlsConfig>,
}

/// Normalized service contract: acquire inside `ctx.scope`, return the address.
pub type ResourceFn =
    Arc<dyn Fn(ServiceContext) -> BoxFuture<'static, Result<ServiceAddress, ServiceError>> + Send + Sync>;

/// Declarative description of one service.
#[derive(Clone)]
pub enum ServiceDescriptor {
    /// An HTTP app served over `protocol`
    App {
        /// `http` or `https`
        protocol: Protocol,

        /// Middleware and routes
        app: HttpApp,

        /// Default port, overridden by per-service options
        port: Option<u16>,
    },

    /// An opaque resource function
    Resource(ResourceFn),
}

impl ServiceDescriptor {
    /// Serves `app` over plain HTTP.
    pub fn http(app: HttpApp) -> Self {
        Self::App {
            protocol: Protocol::Http,
            app,
            port: None,
        }
    }

    /// Serves `app` over HTTPS.
    pub fn https(app: HttpApp) -> Self {
        Self::App {
            protocol: Protocol::Https,
            app,
            port: None,
        }
    }

    /// Sets the default port of an app service. No effect on resources.
    pub fn with_port(self, port: u16) -> Self {
        match self {
            Self::App { protocol, app, .. } => Self::App {
                protocol,
                app,
                port: Some(port),
            },
            resource => resource,
        }
    }

    /// Wraps a resource function.
    pub fn resource<F, Fut>(create: F) -> Self
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceAddress, ServiceError>> + Send + 'static,
    {
        Self::Resource(Arc::new(move |ctx| create(ctx).boxed()))
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::App {
                protocol,
                app,
                port,
            } => f
                .debug_struct("App")
                .field("protocol", protocol)
                .field("app", app)
                .field("port", port)
                .finish(),
            Self::Resource(_) => f.write_str("Resource(..)"),
        }
    }
}

/// Converts a descriptor into its resource function.
pub fn normalize(descriptor: ServiceDescriptor) -> ResourceFn {
    match descriptor {
        ServiceDescriptor::Resource(create) => create,
        ServiceDescriptor::App {
            protocol,
            app,
            port,
        } => Arc::new(move |ctx| serve_app(app.clone(), protocol, port, ctx).boxed()),
    }
}

async fn serve_app(
    app: HttpApp,
    protocol: Protocol,
    default_port: Option<u16>,
    ctx: ServiceContext,
) -> Result<ServiceAddress, ServiceError> {
    let port = ctx.options.port.or(default_port);
    let listener = Listener::bind(protocol, port, ctx.tls.as_ref()).await?;
    let address = listener.address();

    // Tasks of a scope only hold weak references to it.
    let scope = Arc::downgrade(&ctx.scope);
    ctx.scope
        .spawn_linked("listener", accept_loop(listener, app, scope))?;

    info!(scope = ctx.scope.name(), url = %address.url(), "service listening");
    Ok(address)
}

async fn accept_loop(
    listener: Listener,
    app: HttpApp,
    scope: Weak<TaskScope>,
) -> Result<(), EnvError> {
    loop {
        let incoming = match listener.accept().await {
            Ok(incoming) => incoming,
            Err(err) if is_transient(&err) => {
                debug!(%err, "client dropped during accept");
                continue;
            }
            Err(err) => return Err(err),
        };

        let Some(owner) = scope.upgrade() else {
            return Ok(());
        };
        // Accepted but never dispatched once teardown has begun.
        if !owner.is_running() {
            continue;
        }

        let task = serve_connection(incoming, app.clone(), Weak::clone(&scope));
        if owner.spawn("connection", task).is_err() {
            debug!("scope halting, connection dropped");
        }
    }
}

async fn serve_connection(incoming: Incoming, app: HttpApp, scope: Weak<TaskScope>) {
    let peer = incoming.peer();
    let connection = match incoming.establish().await {
        Ok(connection) => connection,
        Err(err) => {
            debug!(%peer, %err, "handshake failed");
            return;
        }
    };

    let service = service_fn(move |req| dispatch(req, app.clone(), Weak::clone(&scope)));
    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(connection), service)
        .await
    {
        debug!(%peer, %err, "connection ended with error");
    }
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error("service is shutting down")]
    ShuttingDown,

    #[error("failed to read request body: {0}")]
    Body(#[from] hyper::Error),
}

async fn dispatch(
    req: hyper::Request<Body>,
    app: HttpApp,
    scope: Weak<TaskScope>,
) -> Result<hyper::Response<Full<Bytes>>, DispatchError> {
    // An error here makes hyper close the connection without a response.
    let scope = match scope.upgrade() {
        Some(scope) if scope.is_running() => scope,
        _ => return Err(DispatchError::ShuttingDown),
    };

    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let request = Request {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        params: HashMap::new(),
        body,
    };

    let method = request.method.clone();
    let path = request.path.clone();
    let outcome = scope
        .run("request", async move { app.handle(request).await })
        .await;

    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            warn!(%method, %path, %err, "handler fault");
            Response::server_error()
        }
        Err(EnvError::ScopeHalted(_)) => return Err(DispatchError::ShuttingDown),
        Err(err) => {
            warn!(%method, %path, %err, "handler fault");
            Response::server_error()
        }
    };

    Ok(into_hyper(response))
}

fn into_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
    let mut out = hyper::Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
