//! Transparent tracing layer.
//!
//! Logs every connect attempt and, per socket, the byte counts in each
//! direction when the socket is shut down or dropped. With a dump limit set,
//! the first bytes of each read and write are hex-dumped at `trace` level.
//!
//! `logging.label` overrides the label attached to events for one call.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, trace, warn};

use crate::resolve::NameResolver;
use crate::socket::{NetServerSocket, NetSocket};
use crate::{LayerProperties, LayerStatus, NetAddress, NetLayer, Result};

/// Property key: label for this call's events.
pub const LABEL_KEY: &str = "logging.label";

const NAMESPACE: &str = "logging";

/// Tracing decorator around another layer.
pub struct LoggingLayer {
    lower: Arc<dyn NetLayer>,
    label: String,
    dump_limit: usize,
}

impl LoggingLayer {
    /// Wrap `lower`, tagging events with `label`.
    pub fn new(lower: Arc<dyn NetLayer>, label: impl Into<String>) -> Self {
        Self {
            lower,
            label: label.into(),
            dump_limit: 0,
        }
    }

    /// Hex-dump up to `limit` bytes of each read and write.
    pub fn with_dump_limit(mut self, limit: usize) -> Self {
        self.dump_limit = limit;
        self
    }

    fn call_label(&self, own: &LayerProperties) -> String {
        own.get_str(LABEL_KEY)
            .map(str::to_string)
            .unwrap_or_else(|| self.label.clone())
    }
}

#[async_trait]
impl NetLayer for LoggingLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let (own, forwarded) = props.split_namespace(NAMESPACE);
        let label = self.call_label(&own);
        debug!(%label, ?remote, ?local, "creating socket");

        match self.lower.create_socket(&forwarded, local, remote).await {
            Ok(inner) => {
                debug!(%label, ?remote, "socket created");
                Ok(Box::new(LoggingSocket::new(inner, label, self.dump_limit)))
            }
            Err(e) => {
                warn!(%label, ?remote, error = %e, "socket creation failed");
                Err(e)
            }
        }
    }

    async fn create_server_socket(
        &self,
        props: &LayerProperties,
        local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        let (own, forwarded) = props.split_namespace(NAMESPACE);
        let label = self.call_label(&own);
        let inner = self
            .lower
            .create_server_socket(&forwarded, local_listen)
            .await?;
        debug!(%label, local = ?inner.local_address(), "server socket created");
        Ok(Box::new(LoggingServerSocket {
            inner,
            label,
            dump_limit: self.dump_limit,
        }))
    }

    fn status(&self) -> LayerStatus {
        self.lower.status()
    }

    async fn wait_until_ready(&self) {
        self.lower.wait_until_ready().await;
    }

    fn clear(&self) -> Result<()> {
        debug!(label = %self.label, "clearing");
        self.lower.clear()
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        self.lower.name_service()
    }
}

struct LoggingServerSocket {
    inner: Box<dyn NetServerSocket>,
    label: String,
    dump_limit: usize,
}

#[async_trait]
impl NetServerSocket for LoggingServerSocket {
    async fn accept(&mut self) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
        let (socket, peer) = self.inner.accept().await?;
        debug!(label = %self.label, ?peer, "connection accepted");
        let socket: Box<dyn NetSocket> =
            Box::new(LoggingSocket::new(socket, self.label.clone(), self.dump_limit));
        Ok((socket, peer))
    }

    fn local_address(&self) -> Option<NetAddress> {
        self.inner.local_address()
    }
}

struct LoggingSocket {
    inner: Box<dyn NetSocket>,
    label: String,
    dump_limit: usize,
    bytes_read: u64,
    bytes_written: u64,
    reported: bool,
}

impl LoggingSocket {
    fn new(inner: Box<dyn NetSocket>, label: String, dump_limit: usize) -> Self {
        Self {
            inner,
            label,
            dump_limit,
            bytes_read: 0,
            bytes_written: 0,
            reported: false,
        }
    }

    fn dump(&self, direction: &str, data: &[u8]) {
        if self.dump_limit == 0 || data.is_empty() {
            return;
        }
        let shown = &data[..data.len().min(self.dump_limit)];
        trace!(
            label = %self.label,
            direction,
            len = data.len(),
            hex = %hex::encode(shown),
            "socket data"
        );
    }

    fn report(&mut self) {
        if !self.reported {
            self.reported = true;
            debug!(
                label = %self.label,
                bytes_read = self.bytes_read,
                bytes_written = self.bytes_written,
                "socket closed"
            );
        }
    }
}

impl AsyncRead for LoggingSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            this.bytes_read += fresh.len() as u64;
            this.dump("read", fresh);
        }
        poll
    }
}

impl AsyncWrite for LoggingSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.bytes_written += *n as u64;
            this.dump("write", &buf[..*n]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        if poll.is_ready() {
            this.report();
        }
        poll
    }
}

impl NetSocket for LoggingSocket {
    fn as_reconnectable(&mut self) -> Option<&mut dyn crate::Reconnectable> {
        self.inner.as_reconnectable()
    }
}

impl Drop for LoggingSocket {
    fn drop(&mut self) {
        self.report();
    }
}
