//! The onion layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use strata_cache::DescriptorCache;
use strata_net::address::ONION_SUFFIX;
use strata_net::layer::require_remote;
use strata_net::{
    LayerProperties, LayerStatus, NameResolver, NetAddress, NetError, NetLayer, NetSocket,
    ReadinessTracker, Result, TcpipAddress,
};
use tracing::{debug, info, warn};

use crate::provider::{BootstrapReporter, CircuitProvider, IsolationToken};
use crate::resolver::OnionResolver;
use crate::scope::{in_circuit_scope, in_circuit_scope_sync};
use crate::{HiddenServiceDescriptor, OnionAddress};

/// Property key: bound on readiness wait plus stream setup (`u64` ms).
pub const TIMEOUT_KEY: &str = "onion.timeout_ms";
/// Property key: port for `Hostname` and `Ip` remotes (`u16`).
pub const PORT_KEY: &str = "onion.port";
/// Property key: isolation token override (`u64`).
pub const ISOLATION_KEY: &str = "onion.isolation";

/// Default bound for one `create_socket` call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Delay before the first bootstrap retry; doubles after each failure.
pub const BOOTSTRAP_RETRY_INITIAL: Duration = Duration::from_secs(1);
/// Longest delay between bootstrap retries.
pub const BOOTSTRAP_RETRY_MAX: Duration = Duration::from_secs(60);

const NAMESPACE: &str = "onion";

/// Bootstrap bookkeeping for the current readiness cycle.
struct Cycle {
    started: bool,
    isolation: IsolationToken,
}

/// State shared by the layer and its resolver.
pub(crate) struct CircuitCore<P> {
    pub(crate) provider: Arc<P>,
    status: Arc<ReadinessTracker>,
    /// Bumped by every reset; stale bootstrap tasks compare against it.
    generation: Arc<AtomicU64>,
    cycle: Mutex<Cycle>,
    pub(crate) timeout: Duration,
}

impl<P: CircuitProvider> CircuitCore<P> {
    fn new(provider: Arc<P>, timeout: Duration) -> Self {
        Self {
            provider,
            status: Arc::new(ReadinessTracker::new()),
            generation: Arc::new(AtomicU64::new(0)),
            cycle: Mutex::new(Cycle {
                started: false,
                isolation: IsolationToken::random(),
            }),
            timeout,
        }
    }

    fn lock_cycle(&self) -> MutexGuard<'_, Cycle> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn isolation(&self) -> IsolationToken {
        self.lock_cycle().isolation
    }

    /// Start bootstrap unless this cycle already started it.
    fn ensure_bootstrap(self: &Arc<Self>) {
        let mut cycle = self.lock_cycle();
        if cycle.started {
            return;
        }
        cycle.started = true;
        let generation = self.generation.load(Ordering::SeqCst);
        drop(cycle);

        tokio::spawn(run_bootstrap(Arc::downgrade(self), generation));
    }

    pub(crate) async fn ready(self: &Arc<Self>) {
        self.ensure_bootstrap();
        self.status.wait_until_ready().await;
    }

    /// Close circuits and start a new readiness cycle.
    fn reset(&self) -> Result<()> {
        let mut cycle = self.lock_cycle();
        if !cycle.started && self.status.status() == LayerStatus::NotReady {
            return Ok(());
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        cycle.started = false;
        cycle.isolation = IsolationToken::random();
        self.status.reset();
        drop(cycle);

        info!("closing onion circuits");
        in_circuit_scope_sync(|| self.provider.close_circuits())
    }
}

/// Bootstrap `generation` until it succeeds, the cycle is cleared, or the
/// layer is dropped. Failures are retried with exponential backoff, so
/// waiters parked on readiness are released once the provider recovers.
async fn run_bootstrap<P: CircuitProvider>(core: Weak<CircuitCore<P>>, generation: u64) {
    let mut backoff = BOOTSTRAP_RETRY_INITIAL;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let Some(live) = core.upgrade() else {
            return;
        };
        if live.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "bootstrap cycle cleared before attempt");
            return;
        }
        info!(generation, attempt, "bootstrapping onion circuits");
        let reporter = BootstrapReporter::for_cycle(
            Arc::clone(&live.status),
            Arc::clone(&live.generation),
            generation,
        );
        let result = in_circuit_scope(live.provider.bootstrap(reporter)).await;

        {
            // Held so a concurrent reset cannot slip between check and mark.
            let _cycle = live.lock_cycle();
            if live.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "discarding bootstrap of a cleared cycle");
                return;
            }
            match result {
                Ok(()) => {
                    live.status.mark_ready();
                    info!(generation, attempt, "onion circuits ready");
                    return;
                }
                Err(e) => {
                    warn!(generation, attempt, error = %e, retry_in = ?backoff, "onion bootstrap failed");
                }
            }
        }
        drop(live);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BOOTSTRAP_RETRY_MAX);
    }
}

/// [`NetLayer`] over a [`CircuitProvider`].
pub struct OnionLayer<P> {
    core: Arc<CircuitCore<P>>,
    descriptors: Arc<DescriptorCache<HiddenServiceDescriptor>>,
    resolver: Arc<OnionResolver<P>>,
}

impl<P: CircuitProvider> OnionLayer<P> {
    /// A layer over `provider`, caching descriptors in `descriptors`.
    pub fn new(
        provider: Arc<P>,
        descriptors: Arc<DescriptorCache<HiddenServiceDescriptor>>,
    ) -> Self {
        Self::with_timeout(provider, descriptors, DEFAULT_TIMEOUT)
    }

    /// As [`OnionLayer::new`] with a different default call bound.
    pub fn with_timeout(
        provider: Arc<P>,
        descriptors: Arc<DescriptorCache<HiddenServiceDescriptor>>,
        timeout: Duration,
    ) -> Self {
        let core = Arc::new(CircuitCore::new(provider, timeout));
        let resolver = Arc::new(OnionResolver::new(Arc::clone(&core)));
        Self {
            core,
            descriptors,
            resolver,
        }
    }

    /// The descriptor cache in use.
    pub fn descriptors(&self) -> &Arc<DescriptorCache<HiddenServiceDescriptor>> {
        &self.descriptors
    }

    /// Token applied to streams that do not override it.
    pub fn isolation(&self) -> IsolationToken {
        self.core.isolation()
    }

    async fn descriptor(&self, onion: &OnionAddress) -> Result<HiddenServiceDescriptor> {
        if let Some(descriptor) = self.descriptors.get(onion.core()) {
            debug!(%onion, "descriptor cache hit");
            return Ok(descriptor);
        }
        debug!(%onion, "fetching hidden-service descriptor");
        let descriptor = self.core.provider.fetch_descriptor(onion).await?;
        self.descriptors.put(onion.core(), descriptor.clone());
        Ok(descriptor)
    }

    async fn open(
        &self,
        target: &TcpipAddress,
        isolation: IsolationToken,
        props: &LayerProperties,
    ) -> Result<Box<dyn NetSocket>> {
        match target.host() {
            Some(host) if host.to_ascii_lowercase().ends_with(ONION_SUFFIX) => {
                let onion = OnionAddress::parse(host)?;
                let descriptor = self.descriptor(&onion).await?;
                self.core
                    .provider
                    .connect_hidden_service(&descriptor, target.port(), isolation, props)
                    .await
            }
            _ => {
                self.core
                    .provider
                    .open_stream(target, isolation, props)
                    .await
            }
        }
    }
}

/// The endpoint to reach: `Tcpip` remotes as given, others with `onion.port`.
fn stream_target(remote: &NetAddress, own: &LayerProperties) -> Result<TcpipAddress> {
    let port = || {
        own.get::<u16>(PORT_KEY).copied().ok_or_else(|| {
            NetError::InvalidArgument(format!(
                "onion: {remote} has no port and {PORT_KEY} is unset"
            ))
        })
    };
    match remote {
        NetAddress::Tcpip(addr) => Ok(addr.clone()),
        NetAddress::Hostname(name) => TcpipAddress::from_host(name.clone(), port()?),
        NetAddress::Ip(ip) => Ok(TcpipAddress::from_ip(*ip, port()?)),
    }
}

#[async_trait]
impl<P: CircuitProvider> NetLayer for OnionLayer<P> {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        _local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let remote_addr = require_remote(remote, "onion")?;
        let (own, forwarded) = props.split_namespace(NAMESPACE);
        let timeout = own.get_millis(TIMEOUT_KEY)?.unwrap_or(self.core.timeout);
        let target = stream_target(remote_addr, &own)?;
        let isolation = own
            .get::<u64>(ISOLATION_KEY)
            .map(|token| IsolationToken(*token))
            .unwrap_or_else(|| self.core.isolation());

        let attempt = async {
            self.core.ready().await;
            in_circuit_scope(self.open(&target, isolation, &forwarded)).await
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(socket)) => {
                debug!(remote = %remote_addr, %isolation, "onion stream open");
                Ok(socket)
            }
            Ok(Err(e)) => Err(e.retarget_timeout(remote_addr)),
            Err(_) => Err(NetError::ConnectTimeout {
                target: remote_addr.to_string(),
            }),
        }
    }

    fn status(&self) -> LayerStatus {
        self.core.status.status()
    }

    /// Parks for at most the layer's default call bound.
    async fn wait_until_ready(&self) {
        if tokio::time::timeout(self.core.timeout, self.core.ready())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.core.timeout,
                status = ?self.core.status.status(),
                "onion layer not ready in time"
            );
        }
    }

    fn clear(&self) -> Result<()> {
        self.core.reset()
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        Arc::clone(&self.resolver) as Arc<dyn NameResolver>
    }
}
