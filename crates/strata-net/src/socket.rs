//! Socket traits.
//!
//! A [`NetSocket`] is any readable, writable, closeable byte stream. Shutting
//! it down (or dropping it) releases the lower-layer socket it wraps, all the
//! way down the stack.
//!
//! [`Reconnectable`] is an optional capability: connection-pooling adapters
//! keep one long-lived [`ReusableSocket`] and have layers swap a fresh
//! connection into it instead of handing out a new wrapper.
//!
//! [`HandshakingServerSocket`] is the accept side of protocol layers: it
//! negotiates every incoming connection in its own task, so one silent
//! client never holds up the ones behind it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{NetAddress, NetError, Result};

/// A connected byte stream.
pub trait NetSocket: AsyncRead + AsyncWrite + Send + Unpin {
    /// The reconnectable capability, if this socket has it.
    fn as_reconnectable(&mut self) -> Option<&mut dyn Reconnectable> {
        None
    }
}

impl NetSocket for tokio::net::TcpStream {}

impl NetSocket for tokio::io::DuplexStream {}

impl<S: NetSocket + ?Sized> NetSocket for Box<S> {
    fn as_reconnectable(&mut self) -> Option<&mut dyn Reconnectable> {
        (**self).as_reconnectable()
    }
}

/// A listening socket.
#[async_trait]
pub trait NetServerSocket: Send {
    /// Wait for the next connection. Returns the socket and, if known, the
    /// peer's address.
    async fn accept(&mut self) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)>;

    /// The address this socket listens on, if it has one.
    fn local_address(&self) -> Option<NetAddress>;
}

/// Negotiated connections waiting for `accept`.
const ACCEPT_BACKLOG: usize = 64;

type Accepted = (Box<dyn NetSocket>, Option<NetAddress>);

/// Server socket that runs a handshake on every connection of an inner
/// server socket and yields the ones that complete it.
///
/// Handshakes run concurrently, each bounded by the handshake timeout.
/// Connections that fail or time out are dropped. Dropping this socket stops
/// accepting on the inner one.
pub struct HandshakingServerSocket {
    ready: mpsc::Receiver<Result<Accepted>>,
    local: Option<NetAddress>,
    acceptor: JoinHandle<()>,
}

impl HandshakingServerSocket {
    /// Start accepting on `inner`. `handshake` receives each raw connection
    /// and its peer address and returns the negotiated socket together with
    /// the address to report from `accept`.
    pub fn spawn<F, Fut>(
        mut inner: Box<dyn NetServerSocket>,
        timeout: Duration,
        handshake: F,
    ) -> Self
    where
        F: Fn(Box<dyn NetSocket>, Option<NetAddress>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Accepted>> + Send + 'static,
    {
        let local = inner.local_address();
        let (tx, ready) = mpsc::channel(ACCEPT_BACKLOG);
        let acceptor = tokio::spawn(async move {
            loop {
                let (socket, peer) = match inner.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                let negotiation = handshake(socket, peer.clone());
                let tx = tx.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, negotiation).await {
                        Ok(Ok(accepted)) => {
                            let _ = tx.send(Ok(accepted)).await;
                        }
                        Ok(Err(e)) => debug!(?peer, error = %e, "dropping client after failed handshake"),
                        Err(_) => debug!(?peer, ?timeout, "dropping client after handshake timeout"),
                    }
                });
            }
        });
        Self {
            ready,
            local,
            acceptor,
        }
    }
}

impl Drop for HandshakingServerSocket {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

#[async_trait]
impl NetServerSocket for HandshakingServerSocket {
    async fn accept(&mut self) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
        match self.ready.recv().await {
            Some(accepted) => accepted,
            None => Err(NetError::Closed("server socket stopped accepting".into())),
        }
    }

    fn local_address(&self) -> Option<NetAddress> {
        self.local.clone()
    }
}

/// Sockets whose underlying connection can be swapped in place.
pub trait Reconnectable {
    /// Install `inner` as the live connection, returning the previous one.
    fn replace_inner(&mut self, inner: Box<dyn NetSocket>) -> Option<Box<dyn NetSocket>>;
}

/// Long-lived socket handle whose connection can be replaced.
///
/// Reads and writes before the first connection fail with
/// [`io::ErrorKind::NotConnected`].
#[derive(Default)]
pub struct ReusableSocket {
    inner: Option<Box<dyn NetSocket>>,
    connections: u32,
}

impl ReusableSocket {
    /// An unconnected handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle around an existing connection.
    pub fn with_inner(inner: Box<dyn NetSocket>) -> Self {
        Self {
            inner: Some(inner),
            connections: 1,
        }
    }

    /// Whether a connection is installed.
    pub fn is_connected(&self) -> bool {
        self.inner.is_some()
    }

    /// How many connections have been installed over this handle's life.
    pub fn connections(&self) -> u32 {
        self.connections
    }

    /// Remove the live connection.
    pub fn take_inner(&mut self) -> Option<Box<dyn NetSocket>> {
        self.inner.take()
    }

    fn inner_mut(&mut self) -> io::Result<Pin<&mut (dyn NetSocket + 'static)>> {
        match self.inner.as_mut() {
            Some(inner) => Ok(Pin::new(inner.as_mut())),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "reusable socket has no connection",
            )),
        }
    }
}

impl Reconnectable for ReusableSocket {
    fn replace_inner(&mut self, inner: Box<dyn NetSocket>) -> Option<Box<dyn NetSocket>> {
        self.connections = self.connections.saturating_add(1);
        self.inner.replace(inner)
    }
}

impl AsyncRead for ReusableSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(inner) => inner.poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for ReusableSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().inner_mut() {
            Ok(inner) => inner.poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(inner) => inner.poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(inner) => Pin::new(inner.as_mut()).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl NetSocket for ReusableSocket {
    fn as_reconnectable(&mut self) -> Option<&mut dyn Reconnectable> {
        Some(self)
    }
}
