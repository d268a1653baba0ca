//! The layer contract.
//!
//! A higher layer owns exactly one lower layer. On [`NetLayer::create_socket`]
//! it:
//!
//! 1. copies the property map (the caller's map is never mutated),
//! 2. extracts and removes its own namespace,
//! 3. delegates to the lower layer with the remaining keys and the same (or a
//!    substituted) address pair,
//! 4. wraps the returned socket with its own protocol.
//!
//! A timeout from below is restated as this layer's own
//! [`NetError::ConnectTimeout`] for the address it was asked to reach.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::resolve::NameResolver;
use crate::socket::{NetServerSocket, NetSocket};
use crate::status::LayerStatus;
use crate::{LayerProperties, NetAddress, NetError, Result};

/// A composable transport stage.
#[async_trait]
pub trait NetLayer: Send + Sync {
    /// Open a client connection to `remote`.
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidArgument`] if `remote` is absent or a variant this
    ///   layer cannot handle.
    /// - [`NetError::ConnectTimeout`] if establishment exceeded its bound.
    /// - [`NetError::Connection`] on refusal or malformed configuration.
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>>;

    /// Open a listening socket.
    ///
    /// Client-only layers keep this default, which returns
    /// [`NetError::Unsupported`].
    async fn create_server_socket(
        &self,
        _props: &LayerProperties,
        _local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        Err(NetError::Unsupported(
            "this layer cannot create server sockets".into(),
        ))
    }

    /// Connect and install the new connection into `socket`.
    ///
    /// If `socket` is [`Reconnectable`](crate::Reconnectable) its inner
    /// connection is replaced in place; otherwise the box is overwritten.
    async fn connect_into(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
        socket: &mut Box<dyn NetSocket>,
    ) -> Result<()> {
        let fresh = self.create_socket(props, local, remote).await?;
        match socket.as_reconnectable() {
            Some(reconnectable) => drop(reconnectable.replace_inner(fresh)),
            None => *socket = fresh,
        }
        Ok(())
    }

    /// Current readiness.
    fn status(&self) -> LayerStatus;

    /// Park until the layer is ready.
    async fn wait_until_ready(&self);

    /// Drop cached state (circuits, pooled connections). Calling it again
    /// right away is a no-op.
    fn clear(&self) -> Result<()>;

    /// The resolver associated with this layer.
    fn name_service(&self) -> Arc<dyn NameResolver>;
}

/// Require a remote address.
pub fn require_remote<'a>(remote: Option<&'a NetAddress>, layer: &str) -> Result<&'a NetAddress> {
    remote.ok_or_else(|| NetError::InvalidArgument(format!("{layer}: remote address is required")))
}

/// Symbolic identifiers for registered layers.
///
/// The named variants are the stacks a standard context registers.
/// Applications register stacks of their own under [`NetLayerId::Custom`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetLayerId {
    /// Plain TCP.
    Tcpip,
    /// TLS over TCP.
    TlsOverTcpip,
    /// SOCKS client over TCP.
    SocksOverTcpip,
    /// Onion circuits.
    Onion,
    /// Refuses every connection.
    Nop,
    /// An application-assembled stack.
    #[serde(skip_deserializing)]
    Custom(&'static str),
}

impl NetLayerId {
    /// Every named identifier.
    pub const ALL: [NetLayerId; 5] = [
        NetLayerId::Tcpip,
        NetLayerId::TlsOverTcpip,
        NetLayerId::SocksOverTcpip,
        NetLayerId::Onion,
        NetLayerId::Nop,
    ];

    /// The identifier's canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetLayerId::Tcpip => "tcpip",
            NetLayerId::TlsOverTcpip => "tls_over_tcpip",
            NetLayerId::SocksOverTcpip => "socks_over_tcpip",
            NetLayerId::Onion => "onion",
            NetLayerId::Nop => "nop",
            NetLayerId::Custom(name) => name,
        }
    }
}

impl fmt::Display for NetLayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetLayerId {
    type Err = NetError;

    /// Parses the named identifiers only.
    fn from_str(s: &str) -> Result<Self> {
        NetLayerId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| NetError::InvalidArgument(format!("unknown layer id {s:?}")))
    }
}
