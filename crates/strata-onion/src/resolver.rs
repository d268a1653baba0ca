//! Name resolution over circuits.

use std::sync::Arc;

use async_trait::async_trait;
use strata_net::address::ONION_SUFFIX;
use strata_net::{NameResolver, NetAddress, NetError, Result};
use tracing::debug;

use crate::layer::CircuitCore;
use crate::provider::CircuitProvider;
use crate::scope::{in_circuit_scope, inside_circuit_scope};
use crate::OnionAddress;

/// Resolves through the circuit provider.
///
/// Onion names resolve to themselves; they only mean something to the
/// circuit layer. Calls made from inside the circuit scope fail with
/// [`NetError::ResolutionLoop`] instead of waiting on circuits that are
/// still being built.
pub struct OnionResolver<P> {
    core: Arc<CircuitCore<P>>,
}

impl<P: CircuitProvider> OnionResolver<P> {
    pub(crate) fn new(core: Arc<CircuitCore<P>>) -> Self {
        Self { core }
    }

    fn guard(what: &str) -> Result<()> {
        if inside_circuit_scope() {
            return Err(NetError::ResolutionLoop(format!(
                "{what} requested from inside the circuit layer"
            )));
        }
        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        tokio::time::timeout(self.core.timeout, self.core.ready())
            .await
            .map_err(|_| NetError::ConnectTimeout {
                target: "onion circuits".into(),
            })
    }
}

#[async_trait]
impl<P: CircuitProvider> NameResolver for OnionResolver<P> {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        Self::guard(name)?;
        if name.to_ascii_lowercase().ends_with(ONION_SUFFIX) {
            let onion = OnionAddress::parse(name)?;
            return Ok(vec![NetAddress::hostname(onion.hostname())?]);
        }

        self.ready().await?;
        let ips = in_circuit_scope(self.core.provider.resolve(name)).await?;
        debug!(%name, count = ips.len(), "resolved over circuit");
        if ips.is_empty() {
            return Err(NetError::NotFound(format!("no addresses for {name}")));
        }
        Ok(ips.into_iter().map(NetAddress::Ip).collect())
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        Self::guard(&address.to_string())?;
        if let Some(host) = address.host() {
            return Ok(vec![host.to_string()]);
        }
        let ip = address
            .ip()
            .ok_or_else(|| NetError::NotFound(format!("no names for {address}")))?;

        self.ready().await?;
        let names = in_circuit_scope(self.core.provider.resolve_reverse(ip)).await?;
        if names.is_empty() {
            return Err(NetError::NotFound(format!("no names for {ip}")));
        }
        Ok(names)
    }
}
