//! Daemon-wide network context.
//!
//! One [`NetContext`] owns the layer registry and the hidden-service
//! descriptor cache; the standard stacks share one resolver chain. It is built once at startup and passed
//! to whatever needs a layer.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use strata_cache::DescriptorCache;
use strata_net::layers::{NopLayer, TcpipLayer};
use strata_net::registry::NetRegistry;
use strata_net::resolve::{
    CachingResolver, ConditionalResolver, LoggingResolver, NopResolver, SwitchingResolver,
    SystemResolver,
};
use strata_net::{NameResolver, NetAddress, NetError, NetLayer, NetLayerId};
use strata_onion::HiddenServiceDescriptor;
use strata_socks::{SocksClientLayer, SocksVersion};
use strata_tls::TlsLayer;
use tracing::info;

use crate::config::DaemonConfig;

/// Registry and descriptor cache.
pub struct NetContext {
    registry: NetRegistry,
    descriptors: Arc<DescriptorCache<HiddenServiceDescriptor>>,
}

impl NetContext {
    /// Build the context and register the standard stacks. Nothing is
    /// connected until a layer is first requested.
    pub fn new(config: &DaemonConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let descriptors = Arc::new(DescriptorCache::with_persistence(
            config.cache.descriptor_entries,
            Duration::from_secs(config.cache.descriptor_ttl_secs),
            data_dir,
        ));

        let context = Self {
            registry: NetRegistry::new(),
            descriptors,
        };
        let resolver: Arc<dyn NameResolver> =
            Arc::new(SwitchingResolver::new(system_chain(config)));
        context.register_standard_stacks(config, resolver)?;
        Ok(context)
    }

    fn register_standard_stacks(
        &self,
        config: &DaemonConfig,
        resolver: Arc<dyn NameResolver>,
    ) -> anyhow::Result<()> {
        let connect_timeout = config.network.connect_timeout();
        self.registry.register(NetLayerId::Tcpip, &[], move |_| {
            let layer = TcpipLayer::with_resolver(Arc::clone(&resolver))
                .with_default_timeout(connect_timeout);
            Ok(Arc::new(layer) as Arc<dyn NetLayer>)
        });

        self.registry
            .register(NetLayerId::TlsOverTcpip, &[NetLayerId::Tcpip], |deps| {
                Ok(Arc::new(TlsLayer::new(lower(deps)?)) as Arc<dyn NetLayer>)
            });

        let proxy: NetAddress = config.upstream.proxy.parse()?;
        let version = SocksVersion::from_number(u64::from(config.upstream.version))?;
        self.registry
            .register(NetLayerId::SocksOverTcpip, &[NetLayerId::Tcpip], move |deps| {
                let layer = SocksClientLayer::new(lower(deps)?, proxy.clone()).with_version(version);
                Ok(Arc::new(layer) as Arc<dyn NetLayer>)
            });

        self.registry.register(NetLayerId::Nop, &[], |_| {
            Ok(Arc::new(NopLayer::new()) as Arc<dyn NetLayer>)
        });

        info!(layers = ?self.registry.registered_ids(), "registered standard stacks");
        Ok(())
    }

    /// The layer registered as `id`, building it on first use.
    pub fn layer(&self, id: NetLayerId) -> anyhow::Result<Arc<dyn NetLayer>> {
        Ok(self.registry.get(id)?)
    }

    pub fn registry(&self) -> &NetRegistry {
        &self.registry
    }

    pub fn descriptors(&self) -> &Arc<DescriptorCache<HiddenServiceDescriptor>> {
        &self.descriptors
    }

    /// Clear every built layer.
    pub fn clear_all(&self) {
        self.registry.clear_all();
    }
}

fn lower(deps: &[Arc<dyn NetLayer>]) -> strata_net::Result<Arc<dyn NetLayer>> {
    deps.first()
        .cloned()
        .ok_or_else(|| NetError::InvalidArgument("missing lower layer".into()))
}

/// System DNS with caching and tracing; onion names never leave the host.
fn system_chain(config: &DaemonConfig) -> Arc<dyn NameResolver> {
    let routed = ConditionalResolver::new(Arc::new(SystemResolver::new()))
        .with_rule("*.onion", Arc::new(NopResolver));
    let cached = CachingResolver::with_ttls(
        Arc::new(routed),
        config.cache.resolver_entries,
        Duration::from_secs(config.cache.positive_ttl_secs),
        Duration::from_secs(config.cache.negative_ttl_secs),
    );
    Arc::new(LoggingResolver::new("system", Arc::new(cached)))
}
