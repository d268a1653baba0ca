//! Byte rewriting in both directions.
//!
//! Modifiers are length-preserving and see every byte exactly once, in
//! stream order, so stateful ones such as keystreams are safe. Where chunk
//! boundaries fall is arbitrary. Outbound bytes are modified when the caller
//! writes them and staged until the lower socket takes them; flushing drains
//! the stage.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::resolve::NameResolver;
use crate::socket::{NetServerSocket, NetSocket};
use crate::{LayerProperties, LayerStatus, NetAddress, NetLayer, Result};

/// In-place byte transformation.
pub trait ByteModifier: Send + Sync {
    /// Rewrite `data` in place.
    fn modify(&self, data: &mut [u8]);
}

impl<F> ByteModifier for F
where
    F: Fn(&mut [u8]) + Send + Sync,
{
    fn modify(&self, data: &mut [u8]) {
        self(data)
    }
}

/// Layer applying one modifier to outbound bytes and another to inbound.
pub struct ModificationLayer {
    lower: Arc<dyn NetLayer>,
    outbound: Option<Arc<dyn ByteModifier>>,
    inbound: Option<Arc<dyn ByteModifier>>,
}

impl ModificationLayer {
    /// A pass-through layer until modifiers are added.
    pub fn new(lower: Arc<dyn NetLayer>) -> Self {
        Self {
            lower,
            outbound: None,
            inbound: None,
        }
    }

    /// Rewrite bytes written by the caller before they reach the lower socket.
    pub fn with_outbound(mut self, modifier: Arc<dyn ByteModifier>) -> Self {
        self.outbound = Some(modifier);
        self
    }

    /// Rewrite bytes read from the lower socket before the caller sees them.
    pub fn with_inbound(mut self, modifier: Arc<dyn ByteModifier>) -> Self {
        self.inbound = Some(modifier);
        self
    }

    fn wrap(&self, inner: Box<dyn NetSocket>) -> Box<dyn NetSocket> {
        Box::new(ModifyingSocket::new(
            inner,
            self.outbound.clone(),
            self.inbound.clone(),
        ))
    }
}

#[async_trait]
impl NetLayer for ModificationLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let inner = self.lower.create_socket(props, local, remote).await?;
        Ok(self.wrap(inner))
    }

    async fn create_server_socket(
        &self,
        props: &LayerProperties,
        local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        let inner = self.lower.create_server_socket(props, local_listen).await?;
        Ok(Box::new(ModifyingServerSocket {
            inner,
            outbound: self.outbound.clone(),
            inbound: self.inbound.clone(),
        }))
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

struct ModifyingServerSocket {
    inner: Box<dyn NetServerSocket>,
    outbound: Option<Arc<dyn ByteModifier>>,
    inbound: Option<Arc<dyn ByteModifier>>,
}

#[async_trait]
impl NetServerSocket for ModifyingServerSocket {
    async fn accept(&mut self) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
        let (inner, peer) = self.inner.accept().await?;
        let socket: Box<dyn NetSocket> = Box::new(ModifyingSocket::new(
            inner,
            self.outbound.clone(),
            self.inbound.clone(),
        ));
        Ok((socket, peer))
    }

    fn local_address(&self) -> Option<NetAddress> {
        self.inner.local_address()
    }
}

struct ModifyingSocket {
    inner: Box<dyn NetSocket>,
    outbound: Option<Arc<dyn ByteModifier>>,
    inbound: Option<Arc<dyn ByteModifier>>,
    /// Modified bytes accepted from the caller but not yet written below.
    staged: Vec<u8>,
    staged_pos: usize,
}

impl ModifyingSocket {
    fn new(
        inner: Box<dyn NetSocket>,
        outbound: Option<Arc<dyn ByteModifier>>,
        inbound: Option<Arc<dyn ByteModifier>>,
    ) -> Self {
        Self {
            inner,
            outbound,
            inbound,
            staged: Vec::new(),
            staged_pos: 0,
        }
    }

    fn settle_stage(&mut self) {
        if self.staged_pos == self.staged.len() {
            self.staged.clear();
            self.staged_pos = 0;
        }
    }

    /// Write staged bytes to the lower socket until none are left.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.staged_pos < self.staged.len() {
            let pending = &self.staged[self.staged_pos..];
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.staged_pos += n;
        }
        self.settle_stage();
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for ModifyingSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let (Poll::Ready(Ok(())), Some(modifier)) = (&poll, &this.inbound) {
            modifier.modify(&mut buf.filled_mut()[before..]);
        }
        poll
    }
}

impl AsyncWrite for ModifyingSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(modifier) = this.outbound.clone() else {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        };
        // Earlier bytes go first; they were modified when accepted.
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.staged.extend_from_slice(buf);
        modifier.modify(&mut this.staged);
        match Pin::new(&mut this.inner).poll_write(cx, &this.staged) {
            Poll::Ready(Ok(n)) => this.staged_pos = n,
            Poll::Ready(Err(e)) => {
                // Nothing was taken, so the caller still owns these bytes.
                this.staged.clear();
                return Poll::Ready(Err(e));
            }
            Poll::Pending => {}
        }
        this.settle_stage();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl NetSocket for ModifyingSocket {}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::layers::MockLayer;

    fn upper(data: &mut [u8]) {
        data.make_ascii_uppercase();
    }

    fn xor(data: &mut [u8]) {
        for b in data.iter_mut() {
            *b ^= 0x20;
        }
    }

    #[tokio::test]
    async fn test_modifies_both_directions() {
        let mock = Arc::new(MockLayer::new().with_response(b"RESPONSE".to_vec()));
        let layer = ModificationLayer::new(mock.clone())
            .with_outbound(Arc::new(upper))
            .with_inbound(Arc::new(xor));

        let mut socket = layer
            .create_socket(&LayerProperties::new(), None, None)
            .await
            .expect("socket");
        socket.write_all(b"request").await.expect("write");
        let mut got = Vec::new();
        socket.read_to_end(&mut got).await.expect("read");

        assert_eq!(got, b"response");
        assert_eq!(mock.last_session().expect("session").written(), b"REQUEST");
    }

    #[tokio::test]
    async fn test_without_modifiers_is_transparent() {
        let mock = Arc::new(MockLayer::new().with_response(b"as is".to_vec()));
        let layer = ModificationLayer::new(mock.clone());
        let mut socket = layer
            .create_socket(&LayerProperties::new(), None, None)
            .await
            .expect("socket");
        socket.write_all(b"same").await.expect("write");
        let mut got = Vec::new();
        socket.read_to_end(&mut got).await.expect("read");
        assert_eq!(got, b"as is");
        assert_eq!(mock.last_session().expect("session").written(), b"same");
    }

    /// XOR with a running counter, so every byte must be modified once.
    struct Keystream(AtomicU8);

    impl ByteModifier for Keystream {
        fn modify(&self, data: &mut [u8]) {
            for b in data.iter_mut() {
                *b ^= self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_stateful_modifier_survives_partial_writes() {
        // A tiny pipe forces partial writes and pending polls.
        let (near, mut far) = tokio::io::duplex(7);
        let mut socket =
            ModifyingSocket::new(Box::new(near), Some(Arc::new(Keystream(AtomicU8::new(0)))), None);
        let payload: Vec<u8> = (0..600u32).map(|i| (i % 97) as u8).collect();

        let writer = async {
            socket.write_all(&payload).await.expect("write");
            socket.flush().await.expect("flush");
        };
        let mut got = vec![0u8; payload.len()];
        let reader = far.read_exact(&mut got);
        let ((), read) = tokio::join!(writer, reader);
        read.expect("read");

        let expected: Vec<u8> = payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ (i as u8))
            .collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_staged_bytes_drained_on_shutdown() {
        let (near, mut far) = tokio::io::duplex(4);
        let mut socket = ModifyingSocket::new(Box::new(near), Some(Arc::new(upper)), None);

        let writer = async {
            // Accepted in one call even though the pipe takes four bytes.
            let n = socket.write(b"abcdefgh").await.expect("write");
            assert_eq!(n, 8);
            socket.shutdown().await.expect("shutdown drains");
        };
        let mut got = Vec::new();
        let reader = far.read_to_end(&mut got);
        let ((), read) = tokio::join!(writer, reader);
        read.expect("read");
        assert_eq!(got, b"ABCDEFGH");
    }
}
