//! # strata-net
//!
//! Layer-composition framework for the Strata anonymity transport.
//!
//! Every transport stage (plain TCP, TLS, SOCKS, onion circuits, and the test
//! and diagnostic layers in [`layers`]) implements one contract,
//! [`NetLayer`](layer::NetLayer), so stacks can be assembled in any order and
//! upper protocols never see which transport they run on.
//!
//! - [`address`] - typed endpoints used by every layer
//! - [`properties`] - per-call configuration map with namespace stripping
//! - [`status`] - monotonic readiness tracking
//! - [`socket`] - socket traits and the reconnectable wrapper
//! - [`layer`] - the layer contract and layer identifiers
//! - [`layers`] - TCP/IP, mock, echo, logging, modification, buffering,
//!   forwarding and no-op layers
//! - [`resolve`] - name resolution chain
//! - [`registry`] - lazily constructed named layers
//!
//! ## Architecture
//!
//! ```text
//! Application
//!     |
//!     v
//! SOCKS client layer     -- strips socks.*, negotiates destination
//!     |
//!     v
//! TLS layer              -- strips tls.*, handshakes over lower socket
//!     |
//!     v
//! TCP/IP layer           -- consumes tcpip.*, opens the OS socket
//! ```

pub mod address;
pub mod layer;
pub mod layers;
pub mod properties;
pub mod registry;
pub mod resolve;
pub mod socket;
pub mod status;

pub use address::{NetAddress, TcpipAddress};
pub use layer::{NetLayer, NetLayerId};
pub use properties::LayerProperties;
pub use resolve::NameResolver;
pub use socket::{
    HandshakingServerSocket, NetServerSocket, NetSocket, Reconnectable, ReusableSocket,
};
pub use status::{LayerStatus, ReadinessTracker};

/// Error types for layer, socket and resolution operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Missing or malformed input (absent address, wrong address variant).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection establishment exceeded its time bound.
    #[error("connect timed out to {target}")]
    ConnectTimeout { target: String },

    /// The layer cannot perform the requested role.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Name or address resolution produced nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resolution was requested from inside the circuit layer itself.
    #[error("resolution loop prevented: {0}")]
    ResolutionLoop(String),

    /// The peer violated the SOCKS or TLS exchange.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer answered a request with a non-success reply code.
    #[error("request rejected with code {code}: {reason}")]
    Rejected { code: u8, reason: String },

    /// Connection refused, reset, or configured badly.
    #[error("connection error: {0}")]
    Connection(String),

    /// The socket was closed while an operation was in progress.
    #[error("connection closed: {0}")]
    Closed(String),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Raw I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Whether this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        match self {
            NetError::ConnectTimeout { .. } => true,
            NetError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Restate a timeout in terms of the address this layer was asked for.
    ///
    /// Non-timeout errors pass through unchanged.
    pub fn retarget_timeout(self, target: &NetAddress) -> Self {
        if self.is_timeout() {
            NetError::ConnectTimeout {
                target: target.to_string(),
            }
        } else {
            self
        }
    }

    /// Map an I/O error raised mid-exchange, keeping closed and timeout kinds
    /// distinguishable.
    pub fn from_io(context: &str, e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe => NetError::Closed(format!("{context}: {e}")),
            ErrorKind::TimedOut => NetError::ConnectTimeout {
                target: context.to_string(),
            },
            _ => NetError::Io(e),
        }
    }
}

/// Convenience result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
