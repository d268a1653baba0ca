//! Buffered sockets.
//!
//! Writes collect in a buffer until it fills or the caller flushes; reads
//! are served from a read-ahead buffer. `buffered.capacity` sets the size of
//! each buffer for one call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::BufStream;

use crate::resolve::NameResolver;
use crate::socket::{NetServerSocket, NetSocket};
use crate::{LayerProperties, LayerStatus, NetAddress, NetError, NetLayer, Result};

/// Property key: buffer capacity in bytes (`usize`).
pub const CAPACITY_KEY: &str = "buffered.capacity";

/// Capacity used when the key is absent.
pub const DEFAULT_CAPACITY: usize = 8 * 1024;

const NAMESPACE: &str = "buffered";

impl<S: NetSocket> NetSocket for BufStream<S> {}

/// Wraps lower sockets in [`BufStream`].
pub struct BufferedLayer {
    lower: Arc<dyn NetLayer>,
}

impl BufferedLayer {
    /// Buffer sockets from `lower`.
    pub fn new(lower: Arc<dyn NetLayer>) -> Self {
        Self { lower }
    }
}

fn capacity(own: &LayerProperties) -> Result<usize> {
    let Some(value) = own.get_value(CAPACITY_KEY) else {
        return Ok(DEFAULT_CAPACITY);
    };
    let capacity = value
        .downcast_ref::<usize>()
        .copied()
        .or_else(|| value.downcast_ref::<u32>().map(|c| *c as usize))
        .ok_or_else(|| NetError::Connection(format!("{CAPACITY_KEY} must be a usize")))?;
    if capacity == 0 {
        return Err(NetError::Connection(format!("{CAPACITY_KEY} must be non-zero")));
    }
    Ok(capacity)
}

#[async_trait]
impl NetLayer for BufferedLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let (own, forwarded) = props.split_namespace(NAMESPACE);
        let capacity = capacity(&own)?;
        let inner = self.lower.create_socket(&forwarded, local, remote).await?;
        Ok(Box::new(BufStream::with_capacity(capacity, capacity, inner)))
    }

    async fn create_server_socket(
        &self,
        props: &LayerProperties,
        local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        let (own, forwarded) = props.split_namespace(NAMESPACE);
        let capacity = capacity(&own)?;
        let inner = self
            .lower
            .create_server_socket(&forwarded, local_listen)
            .await?;
        Ok(Box::new(BufferedServerSocket { inner, capacity }))
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

struct BufferedServerSocket {
    inner: Box<dyn NetServerSocket>,
    capacity: usize,
}

#[async_trait]
impl NetServerSocket for BufferedServerSocket {
    async fn accept(&mut self) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
        let (inner, peer) = self.inner.accept().await?;
        let socket: Box<dyn NetSocket> =
            Box::new(BufStream::with_capacity(self.capacity, self.capacity, inner));
        Ok((socket, peer))
    }

    fn local_address(&self) -> Option<NetAddress> {
        self.inner.local_address()
    }
}
