//! Resolver whose lower resolver can be swapped at run time.
//!
//! The lower reference is read once at the start of each call, so a call in
//! flight finishes against the resolver it started with.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::info;

use super::NameResolver;
use crate::{NetAddress, Result};

/// Delegates to a replaceable resolver.
pub struct SwitchingResolver {
    lower: RwLock<Arc<dyn NameResolver>>,
}

impl SwitchingResolver {
    /// Start with `lower`.
    pub fn new(lower: Arc<dyn NameResolver>) -> Self {
        Self {
            lower: RwLock::new(lower),
        }
    }

    /// The resolver new calls will use.
    pub fn current(&self) -> Arc<dyn NameResolver> {
        let lower = self.lower.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&lower)
    }

    /// Route subsequent calls to `lower`. Returns the previous resolver.
    pub fn switch_to(&self, lower: Arc<dyn NameResolver>) -> Arc<dyn NameResolver> {
        let mut slot = self.lower.write().unwrap_or_else(PoisonError::into_inner);
        info!("switching lower name resolver");
        std::mem::replace(&mut *slot, lower)
    }
}

#[async_trait]
impl NameResolver for SwitchingResolver {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        let lower = self.current();
        lower.resolve_addresses(name).await
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        let lower = self.current();
        lower.resolve_names(address).await
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use tokio::sync::Notify;

    use super::*;
    use crate::resolve::StaticResolver;

    /// Resolver that announces each call, parks until released, then
    /// answers from its table.
    struct GatedResolver {
        entered: Arc<Notify>,
        gate: Arc<Notify>,
        inner: StaticResolver,
    }

    #[async_trait]
    impl NameResolver for GatedResolver {
        async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.resolve_addresses(name).await
        }

        async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
            self.inner.resolve_names(address).await
        }
    }

    fn ip(last: u8) -> NetAddress {
        NetAddress::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[tokio::test]
    async fn test_in_flight_call_completes_on_old_resolver() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let a = Arc::new(GatedResolver {
            entered: Arc::clone(&entered),
            gate: Arc::clone(&gate),
            inner: StaticResolver::new().with_address("host.example", ip(1)),
        });
        let b = Arc::new(StaticResolver::new().with_address("host.example", ip(2)));

        let switching = Arc::new(SwitchingResolver::new(a));
        let in_flight = {
            let switching = Arc::clone(&switching);
            tokio::spawn(async move { switching.resolve_addresses("host.example").await })
        };

        // The spawned call has captured resolver A and parks on the gate.
        entered.notified().await;
        switching.switch_to(b);
        gate.notify_one();

        let first = in_flight.await.expect("task").expect("resolved");
        assert_eq!(first, vec![ip(1)]);

        let second = switching
            .resolve_addresses("host.example")
            .await
            .expect("resolved");
        assert_eq!(second, vec![ip(2)]);
    }
}
