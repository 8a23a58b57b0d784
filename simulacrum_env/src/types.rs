//! Common types for the Simulacrum environment layer.

use serde::{Deserialize, Serialize};

/// Transport protocol of a network service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP
    Http,

    /// HTTP over TLS
    Https,
}

impl Protocol {
    /// Returns the URL scheme for this protocol.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// Where a started service can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddress {
    /// Bound port (resolved when an ephemeral port was requested)
    pub port: u16,

    /// Transport protocol
    pub protocol: Protocol,
}

impl ServiceAddress {
    /// Creates a new service address.
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }

    /// Returns `<protocol>://localhost:<port>`.
    pub fn url(&self) -> String {
        format!("{}://localhost:{}", self.protocol, self.port)
    }
}
