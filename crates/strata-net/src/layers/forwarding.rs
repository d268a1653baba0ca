//! Fixed-destination layer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::resolve::NameResolver;
use crate::socket::NetSocket;
use crate::{LayerProperties, LayerStatus, NetAddress, NetLayer, Result};

/// Sends every connection to one destination, whatever the caller asked for.
///
/// Client-only: server sockets are [`Unsupported`](crate::NetError::Unsupported).
pub struct ForwardingLayer {
    lower: Arc<dyn NetLayer>,
    destination: NetAddress,
}

impl ForwardingLayer {
    /// Forward to `destination` through `lower`.
    pub fn new(lower: Arc<dyn NetLayer>, destination: NetAddress) -> Self {
        Self { lower, destination }
    }

    /// The fixed destination.
    pub fn destination(&self) -> &NetAddress {
        &self.destination
    }
}

#[async_trait]
impl NetLayer for ForwardingLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        debug!(requested = ?remote, destination = %self.destination, "forwarding connection");
        let asked_for = remote.unwrap_or(&self.destination);
        self.lower
            .create_socket(props, local, Some(&self.destination))
            .await
            .map_err(|e| e.retarget_timeout(asked_for))
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
