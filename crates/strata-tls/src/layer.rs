//! The TLS layer.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use rustls::{ProtocolVersion, ServerConfig, SupportedCipherSuite};
use strata_net::layer::require_remote;
use strata_net::{
    HandshakingServerSocket, LayerProperties, LayerStatus, NameResolver, NetAddress, NetError,
    NetLayer, NetServerSocket, NetSocket, Result,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::debug;

use crate::config::{client_config, handshake_timeout, server_name, DEFAULT_HANDSHAKE_TIMEOUT};

const NAMESPACE: &str = "tls";

/// Runs a TLS handshake over sockets from the lower layer.
pub struct TlsLayer {
    lower: Arc<dyn NetLayer>,
    acceptor: Option<TlsAcceptor>,
    handshake_timeout: Duration,
}

impl TlsLayer {
    /// Client-side TLS over `lower`.
    pub fn new(lower: Arc<dyn NetLayer>) -> Self {
        Self {
            lower,
            acceptor: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Handshake bound when `tls.handshake_timeout_ms` is absent. Server
    /// sockets always use this one.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Also accept TLS connections presenting `config`.
    pub fn with_server_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.acceptor = Some(TlsAcceptor::from(config));
        self
    }

    /// Connect and handshake, keeping the concrete socket type.
    pub async fn connect(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<TlsSocket> {
        let remote_addr = require_remote(remote, "tls")?;
        let target = remote_addr.require_tcpip("tls")?;
        let (own, forwarded) = props.split_namespace(NAMESPACE);

        // Configuration errors surface before any lower connection exists.
        let config = client_config(&own)?;
        let name = server_name(&own, target)?;
        let timeout = handshake_timeout(&own, self.handshake_timeout)?;

        let inner = self
            .lower
            .create_socket(&forwarded, local, remote)
            .await
            .map_err(|e| e.retarget_timeout(remote_addr))?;

        let handshake = TlsConnector::from(Arc::new(config)).connect(name, inner);
        let stream = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| {
                debug!(remote = %remote_addr, ?timeout, "TLS handshake timed out");
                NetError::ConnectTimeout {
                    target: remote_addr.to_string(),
                }
            })?
            .map_err(|e| handshake_error(e, remote_addr))?;
        let socket = TlsSocket::new(TlsStream::from(stream));
        debug!(
            remote = %remote_addr,
            version = ?socket.protocol_version(),
            suite = ?socket.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS session established"
        );
        Ok(socket)
    }
}

fn handshake_error(e: io::Error, remote: &NetAddress) -> NetError {
    if e.kind() == io::ErrorKind::TimedOut {
        NetError::ConnectTimeout {
            target: remote.to_string(),
        }
    } else {
        NetError::Tls(format!("handshake with {remote} failed: {e}"))
    }
}

#[async_trait]
impl NetLayer for TlsLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let socket = self.connect(props, local, remote).await?;
        Ok(Box::new(socket))
    }

    async fn create_server_socket(
        &self,
        props: &LayerProperties,
        local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        let acceptor = self.acceptor.clone().ok_or_else(|| {
            NetError::Unsupported("tls: no server configuration installed".into())
        })?;
        let (_own, forwarded) = props.split_namespace(NAMESPACE);
        let inner = self
            .lower
            .create_server_socket(&forwarded, local_listen)
            .await?;
        Ok(Box::new(HandshakingServerSocket::spawn(
            inner,
            self.handshake_timeout,
            move |socket, peer| accept_tls(acceptor.clone(), socket, peer),
        )))
    }

    fn status(&self) -> LayerStatus {
        self.lower.status()
    }

    async fn wait_until_ready(&self) {
        self.lower.wait_until_ready().await;
    }

    fn clear(&self) -> Result<()> {
        self.lower.clear()
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        self.lower.name_service()
    }
}

/// Server handshake for one lower connection.
async fn accept_tls(
    acceptor: TlsAcceptor,
    socket: Box<dyn NetSocket>,
    peer: Option<NetAddress>,
) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
    let stream = acceptor
        .accept(socket)
        .await
        .map_err(|e| NetError::Tls(format!("server handshake failed: {e}")))?;
    let socket: Box<dyn NetSocket> = Box::new(TlsSocket::new(TlsStream::from(stream)));
    Ok((socket, peer))
}

/// An established TLS session over a lower-layer socket.
///
/// Shutting it down sends `close_notify` and then shuts the lower socket.
pub struct TlsSocket {
    inner: TlsStream<Box<dyn NetSocket>>,
}

impl TlsSocket {
    fn new(inner: TlsStream<Box<dyn NetSocket>>) -> Self {
        Self { inner }
    }

    /// Negotiated protocol version.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.inner.get_ref().1.protocol_version()
    }

    /// Negotiated cipher suite.
    pub fn negotiated_cipher_suite(&self) -> Option<SupportedCipherSuite> {
        self.inner.get_ref().1.negotiated_cipher_suite()
    }
}

impl NetSocket for TlsSocket {}

impl AsyncRead for TlsSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
