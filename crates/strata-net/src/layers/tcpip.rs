//! Plain TCP/IP over the operating system's sockets.
//!
//! The bottom of every non-onion stack. Remote addresses must be
//! [`NetAddress::Tcpip`]; an unresolved hostname is looked up with the
//! layer's resolver and each answer is tried in order under one overall
//! deadline taken from `tcpip.timeout_ms`.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

use crate::layer::require_remote;
use crate::resolve::{NameResolver, SystemResolver};
use crate::socket::{NetServerSocket, NetSocket};
use crate::{
    LayerProperties, LayerStatus, NetAddress, NetError, NetLayer, ReadinessTracker, Result,
    TcpipAddress,
};

/// Property key: connect deadline in milliseconds.
pub const TIMEOUT_KEY: &str = "tcpip.timeout_ms";

/// Connect deadline used when the key is absent.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

const LAYER: &str = "tcpip";

/// Layer creating OS TCP sockets.
pub struct TcpipLayer {
    resolver: Arc<dyn NameResolver>,
    default_timeout: Duration,
    status: ReadinessTracker,
}

impl TcpipLayer {
    /// A layer using the system resolver.
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(SystemResolver::new()))
    }

    /// A layer resolving hostnames through `resolver`.
    pub fn with_resolver(resolver: Arc<dyn NameResolver>) -> Self {
        Self {
            resolver,
            default_timeout: DEFAULT_CONNECT_TIMEOUT,
            status: ReadinessTracker::ready(),
        }
    }

    /// Override the deadline used when `tcpip.timeout_ms` is absent.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    async fn candidates(&self, remote: &TcpipAddress) -> Result<Vec<SocketAddr>> {
        if let Some(addr) = remote.socket_addr() {
            return Ok(vec![addr]);
        }
        let host = remote.host_or_ip();
        let answers = self.resolver.resolve_addresses(&host).await?;
        let ips: Vec<SocketAddr> = answers
            .iter()
            .filter_map(NetAddress::ip)
            .map(|ip| SocketAddr::new(ip, remote.port()))
            .collect();
        if ips.is_empty() {
            return Err(NetError::NotFound(format!("{host} resolved to no IP")));
        }
        Ok(ips)
    }

    async fn connect_any(
        &self,
        candidates: &[SocketAddr],
        local: Option<SocketAddr>,
    ) -> Result<TcpStream> {
        let mut last_error = None;
        for candidate in candidates {
            match connect_one(*candidate, local).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%candidate, error = %e, "tcp connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                NetError::Connection(format!("connection refused: {e}"))
            }
            Some(e) => NetError::Io(e),
            None => NetError::NotFound("no candidate addresses".into()),
        })
    }
}

impl Default for TcpipLayer {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect_one(target: SocketAddr, local: Option<SocketAddr>) -> io::Result<TcpStream> {
    let Some(local) = local else {
        return TcpStream::connect(target).await;
    };
    let socket = match target.ip() {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(local)?;
    socket.connect(target).await
}

fn local_socket_addr(local: Option<&NetAddress>) -> Result<Option<SocketAddr>> {
    let Some(local) = local else {
        return Ok(None);
    };
    let addr = local.require_tcpip(LAYER)?;
    addr.socket_addr().map(Some).ok_or_else(|| {
        NetError::InvalidArgument(format!("{LAYER}: local address {local} has no IP"))
    })
}

#[async_trait]
impl NetLayer for TcpipLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let remote = require_remote(remote, LAYER)?;
        let target = remote.require_tcpip(LAYER)?;
        let (own, _) = props.split_namespace(LAYER);
        let timeout = own.get_millis(TIMEOUT_KEY)?.unwrap_or(self.default_timeout);
        let local = local_socket_addr(local)?;

        let connect = async {
            let candidates = self.candidates(target).await?;
            self.connect_any(&candidates, local).await
        };
        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| NetError::ConnectTimeout {
                target: remote.to_string(),
            })?
            .map_err(|e| e.retarget_timeout(remote))?;

        stream.set_nodelay(true)?;
        debug!(%remote, peer = ?stream.peer_addr().ok(), "tcp connection established");
        Ok(Box::new(stream))
    }

    async fn create_server_socket(
        &self,
        _props: &LayerProperties,
        local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        let listen = match local_listen {
            Some(addr) => local_socket_addr(Some(addr))?.ok_or_else(|| {
                NetError::InvalidArgument(format!("{LAYER}: listen address has no IP"))
            })?,
            None => SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "tcp listener bound");
        Ok(Box::new(TcpServerSocket {
            listener,
            local_addr,
        }))
    }

    fn status(&self) -> LayerStatus {
        self.status.status()
    }

    async fn wait_until_ready(&self) {
        self.status.wait_until_ready().await;
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        Arc::clone(&self.resolver)
    }
}

/// Listening TCP socket.
pub struct TcpServerSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

#[async_trait]
impl NetServerSocket for TcpServerSocket {
    async fn accept(&mut self) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(%peer, "tcp connection accepted");
        Ok((Box::new(stream), Some(peer.into())))
    }

    fn local_address(&self) -> Option<NetAddress> {
        Some(self.local_addr.into())
    }
}
