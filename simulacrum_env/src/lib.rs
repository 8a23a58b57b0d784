//! Simulacrum Environment Layer
//!
//! The runtime pieces a simulation needs from its host, kept apart from any
//! simulation logic:
//!
//! - **Task scopes**: a tree of tokio tasks with reverse-order halting and
//!   fault reporting ([`TaskScope`])
//! - **Listeners**: loopback `http`/`https` sockets with a resolved
//!   [`ServiceAddress`] ([`Listener`])
//!
//! # Example
//!
//! ```ignore
//! use simulacrum_env::{Listener, Protocol, TaskScope};
//!
//! let scope = TaskScope::new("simulation");
//! let service = scope.child("service:echo");
//! let listener = Listener::bind(Protocol::Http, None, None).await?;
//! let address = listener.address();
//! service.spawn_linked("listener", accept_loop(listener))?;
//!
//! // Releases the listener, then everything else.
//! scope.halt().await;
//! ```

mod error;
mod listener;
mod scope;
mod types;

pub use error::EnvError;
pub use listener::{is_transient, BoxedConnection, Connection, Incoming, Listener, TlsConfig};
pub use scope::{Fault, FaultReceiver, ScopeState, TaskScope};
pub use types::{Protocol, ServiceAddress};

/// TLS types used by [`TlsConfig`].
pub use tokio_rustls::rustls;
