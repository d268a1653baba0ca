//! Scripted transport for tests.
//!
//! Each `create_socket` pops the next scripted response and returns a socket
//! that reads those bytes and records everything written to it. The session
//! (remote, local, property keys seen, bytes written) is kept for assertions.
//!
//! With `hold_open`, a socket whose response is exhausted keeps its read side
//! pending until the caller shuts the write side down, like a server that
//! answers and then waits for the client to hang up.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::trace;

use crate::resolve::{NameResolver, StaticResolver};
use crate::socket::{NetServerSocket, NetSocket};
use crate::{LayerProperties, LayerStatus, NetAddress, NetError, NetLayer, Result};

/// One recorded `create_socket` call.
#[derive(Clone, Debug)]
pub struct MockSession {
    /// Remote address requested.
    pub remote: Option<NetAddress>,
    /// Local address requested.
    pub local: Option<NetAddress>,
    /// Property keys that reached this layer, sorted.
    pub property_keys: Vec<String>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MockSession {
    /// Bytes written to the socket so far.
    pub fn written(&self) -> Vec<u8> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Layer handing out scripted sockets.
pub struct MockLayer {
    responses: Mutex<VecDeque<Vec<u8>>>,
    sessions: Mutex<Vec<MockSession>>,
    hold_open: bool,
    timing_out: bool,
    resolver: Arc<dyn NameResolver>,
    incoming_tx: mpsc::UnboundedSender<Box<dyn NetSocket>>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<Box<dyn NetSocket>>>>,
}

impl MockLayer {
    /// A layer with no scripted responses; sockets read EOF immediately.
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            responses: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(Vec::new()),
            hold_open: false,
            timing_out: false,
            resolver: Arc::new(StaticResolver::new()),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    /// Queue a response for the next socket.
    pub fn with_response(self, response: impl Into<Vec<u8>>) -> Self {
        self.push_response(response);
        self
    }

    /// Keep reads pending after the response until the write side shuts down.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Fail every `create_socket` with a timeout, after recording it.
    pub fn timing_out(mut self) -> Self {
        self.timing_out = true;
        self
    }

    /// Answer name lookups from `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Queue a response for a later socket.
    pub fn push_response(&self, response: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response.into());
    }

    /// Every session so far, oldest first.
    pub fn sessions(&self) -> Vec<MockSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent session.
    pub fn last_session(&self) -> Option<MockSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Deliver `socket` to the server socket's next `accept`.
    pub fn inject_connection(&self, socket: Box<dyn NetSocket>) -> Result<()> {
        self.incoming_tx
            .send(socket)
            .map_err(|_| NetError::Closed("mock server socket dropped".into()))
    }

    fn record(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Arc<Mutex<Vec<u8>>> {
        let mut property_keys: Vec<String> = props.keys().map(str::to_string).collect();
        property_keys.sort();
        let written = Arc::new(Mutex::new(Vec::new()));
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockSession {
                remote: remote.cloned(),
                local: local.cloned(),
                property_keys,
                written: Arc::clone(&written),
            });
        written
    }
}

impl Default for MockLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetLayer for MockLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let written = self.record(props, local, remote);
        if self.timing_out {
            return Err(NetError::ConnectTimeout {
                target: remote.map(ToString::to_string).unwrap_or_default(),
            });
        }
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        trace!(?remote, response_len = response.len(), "mock socket created");
        Ok(Box::new(MockSocket {
            response: response.into(),
            written,
            hold_open: self.hold_open,
            write_closed: false,
            read_waker: None,
        }))
    }

    async fn create_server_socket(
        &self,
        _props: &LayerProperties,
        _local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        let rx = self
            .incoming_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                NetError::InvalidArgument("mock server socket already created".into())
            })?;
        Ok(Box::new(MockServerSocket { rx }))
    }

    fn status(&self) -> LayerStatus {
        LayerStatus::Ready
    }

    async fn wait_until_ready(&self) {}

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        Arc::clone(&self.resolver)
    }
}

struct MockSocket {
    response: VecDeque<u8>,
    written: Arc<Mutex<Vec<u8>>>,
    hold_open: bool,
    write_closed: bool,
    read_waker: Option<Waker>,
}

impl AsyncRead for MockSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.response.is_empty() {
            if this.hold_open && !this.write_closed {
                this.read_waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
            return Poll::Ready(Ok(()));
        }
        let n = buf.remaining().min(this.response.len());
        let chunk: Vec<u8> = this.response.drain(..n).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock socket write side closed",
            )));
        }
        this.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.write_closed = true;
        if let Some(waker) = this.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl NetSocket for MockSocket {}

struct MockServerSocket {
    rx: mpsc::UnboundedReceiver<Box<dyn NetSocket>>,
}

#[async_trait]
impl NetServerSocket for MockServerSocket {
    async fn accept(&mut self) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
        match self.rx.recv().await {
            Some(socket) => Ok((socket, None)),
            None => Err(NetError::Closed("mock layer dropped".into())),
        }
    }

    fn local_address(&self) -> Option<NetAddress> {
        None
    }
}
