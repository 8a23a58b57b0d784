//! Network listeners backing simulated services.
//!
//! A [`Listener`] is bound on the loopback interface, either on a requested
//! port or on an ephemeral one. Dropping it closes the socket, so a port is
//! unreachable as soon as the task owning the listener is released.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::error::EnvError;
use crate::types::{Protocol, ServiceAddress};

/// Preconfigured certificate/key pair used by `https` listeners.
pub type TlsConfig = Arc<ServerConfig>;

/// A bidirectional byte stream to a client, plain or encrypted.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Boxed client connection.
pub type BoxedConnection = Box<dyn Connection>;

/// A bound, accepting network listener.
pub struct Listener {
    /// Underlying TCP socket
    tcp: TcpListener,

    /// TLS acceptor for `https` listeners
    acceptor: Option<TlsAcceptor>,

    /// Resolved address
    address: ServiceAddress,
}

impl Listener {
    /// Binds a listener for the given protocol.
    ///
    /// # Arguments
    /// * `protocol` - `http` or `https`
    /// * `port` - Requested port, `None` for an ephemeral one
    /// * `tls` - Server config, required for `https`
    pub async fn bind(
        protocol: Protocol,
        port: Option<u16>,
        tls: Option<&TlsConfig>,
    ) -> Result<Self, EnvError> {
        let acceptor = match protocol {
            Protocol::Http => None,
            Protocol::Https => {
                let config = tls.ok_or(EnvError::TlsUnavailable)?;
                Some(TlsAcceptor::from(Arc::clone(config)))
            }
        };

        let requested = port.unwrap_or(0);
        let tcp = TcpListener::bind((Ipv4Addr::LOCALHOST, requested))
            .await
            .map_err(|e| EnvError::bind(requested, e))?;
        let bound = tcp
            .local_addr()
            .map_err(|e| EnvError::bind(requested, e))?
            .port();

        debug!(%protocol, port = bound, "listener bound");

        Ok(Self {
            tcp,
            acceptor,
            address: ServiceAddress::new(bound, protocol),
        })
    }

    /// Returns the resolved address.
    pub fn address(&self) -> ServiceAddress {
        self.address
    }

    /// Waits for the next client.
    ///
    /// The TLS handshake is deferred to [`Incoming::establish`] so a slow
    /// client cannot stall the accept loop.
    pub async fn accept(&self) -> Result<Incoming, EnvError> {
        let (stream, peer) = self.tcp.accept().await.map_err(EnvError::Accept)?;
        Ok(Incoming {
            stream,
            peer,
            acceptor: self.acceptor.clone(),
        })
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("address", &self.address)
            .finish()
    }
}

/// A freshly accepted client that has not completed its handshake yet.
pub struct Incoming {
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
}

impl Incoming {
    /// Returns the client address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Completes the TLS handshake if needed and returns the connection.
    pub async fn establish(self) -> Result<BoxedConnection, EnvError> {
        match self.acceptor {
            None => Ok(Box::new(self.stream)),
            Some(acceptor) => {
                let stream = acceptor
                    .accept(self.stream)
                    .await
                    .map_err(EnvError::Handshake)?;
                Ok(Box::new(stream))
            }
        }
    }
}

/// Returns true when an accept error only concerns the one client and
/// the listener itself is still healthy.
pub fn is_transient(err: &EnvError) -> bool {
    use std::io::ErrorKind;

    match err {
        EnvError::Accept(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
        ),
        _ => false,
    }
}
