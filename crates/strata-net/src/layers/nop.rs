//! Layer that refuses every connection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::resolve::{NameResolver, NopResolver};
use crate::socket::NetSocket;
use crate::{LayerProperties, LayerStatus, NetAddress, NetError, NetLayer, Result};

/// Always ready; every socket request fails with [`NetError::Unsupported`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NopLayer;

impl NopLayer {
    /// A no-op layer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetLayer for NopLayer {
    async fn create_socket(
        &self,
        _props: &LayerProperties,
        _local: Option<&NetAddress>,
        _remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        Err(NetError::Unsupported("nop layer refuses all connections".into()))
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
