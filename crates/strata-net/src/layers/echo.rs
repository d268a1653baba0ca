//! Loopback layer whose sockets echo every written byte.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::resolve::{NameResolver, NopResolver};
use crate::socket::NetSocket;
use crate::{LayerProperties, LayerStatus, NetAddress, NetLayer, Result};

/// Echo buffer bound; writes stall until the reader drains below it.
const ECHO_BUFFER_LIMIT: usize = 64 * 1024;

/// Layer producing echo sockets. Any remote is accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoLayer;

impl EchoLayer {
    /// An echo layer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetLayer for EchoLayer {
    async fn create_socket(
        &self,
        _props: &LayerProperties,
        _local: Option<&NetAddress>,
        _remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        Ok(Box::new(EchoSocket::default()))
    }

    fn status(&self) -> LayerStatus {
        LayerStatus::Ready
    }

    async fn wait_until_ready(&self) {}

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        Arc::new(NopResolver)
    }
}

#[derive(Default)]
struct EchoSocket {
    pending: VecDeque<u8>,
    closed: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl AsyncRead for EchoSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pending.is_empty() {
            if this.closed {
                return Poll::Ready(Ok(()));
            }
            this.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = buf.remaining().min(this.pending.len());
        let chunk: Vec<u8> = this.pending.drain(..n).collect();
        buf.put_slice(&chunk);
        if let Some(waker) = this.write_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for EchoSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "echo socket closed",
            )));
        }
        let room = ECHO_BUFFER_LIMIT.saturating_sub(this.pending.len());
        if room == 0 {
            this.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = room.min(buf.len());
        this.pending.extend(&buf[..n]);
        if let Some(waker) = this.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.closed = true;
        if let Some(waker) = this.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl NetSocket for EchoSocket {}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_echoes_until_shutdown() {
        let layer = EchoLayer::new();
        let remote = NetAddress::tcpip("anything", 7);
        let socket = layer
            .create_socket(&LayerProperties::new(), None, Some(&remote))
            .await
            .expect("socket");
        let (mut reader, mut writer) = tokio::io::split(socket);

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let write = tokio::spawn(async move {
            writer.write_all(&payload).await.expect("write");
            writer.shutdown().await.expect("shutdown");
        });

        let mut echoed = Vec::new();
        reader.read_to_end(&mut echoed).await.expect("read");
        write.await.expect("writer task");
        assert_eq!(echoed, expected);
    }
}
