//! The onion-core boundary.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use strata_net::{LayerProperties, LayerStatus, NetSocket, ReadinessTracker, Result, TcpipAddress};

use crate::{HiddenServiceDescriptor, OnionAddress};

/// Circuit-building backend.
///
/// Implementations own circuits, directory data and cell crypto. Every call
/// is made from inside the circuit scope (see [`crate::scope`]). The scope
/// does not carry into tasks an implementation spawns itself; those must be
/// started with [`spawn_in_circuit_scope`](crate::scope::spawn_in_circuit_scope)
/// so name lookups made there still fail with `ResolutionLoop`.
#[async_trait]
pub trait CircuitProvider: Send + Sync + 'static {
    /// Build initial state (consensus, guards, first circuits), reporting
    /// progress through `reporter`. Called once per readiness cycle, and
    /// again after each failure.
    async fn bootstrap(&self, reporter: BootstrapReporter) -> Result<()>;

    /// Open a stream to a clearnet endpoint through an exit.
    async fn open_stream(
        &self,
        target: &TcpipAddress,
        isolation: IsolationToken,
        props: &LayerProperties,
    ) -> Result<Box<dyn NetSocket>>;

    /// Resolve a hostname at an exit.
    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>>;

    /// Reverse-resolve an address at an exit.
    async fn resolve_reverse(&self, ip: IpAddr) -> Result<Vec<String>>;

    /// Fetch the current descriptor for an onion service.
    async fn fetch_descriptor(&self, onion: &OnionAddress) -> Result<HiddenServiceDescriptor>;

    /// Rendezvous with the service described by `descriptor`.
    async fn connect_hidden_service(
        &self,
        descriptor: &HiddenServiceDescriptor,
        port: u16,
        isolation: IsolationToken,
        props: &LayerProperties,
    ) -> Result<Box<dyn NetSocket>>;

    /// Tear down every circuit.
    fn close_circuits(&self) -> Result<()>;
}

/// Streams with different tokens never share a circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IsolationToken(pub u64);

impl IsolationToken {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for IsolationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Forwards bootstrap progress to the layer status.
///
/// Reports from a cycle that has since been cleared are dropped.
#[derive(Clone)]
pub struct BootstrapReporter {
    status: Arc<ReadinessTracker>,
    current_cycle: Arc<AtomicU64>,
    cycle: u64,
}

impl BootstrapReporter {
    /// A reporter bound to `cycle`, which may already be stale.
    pub(crate) fn for_cycle(
        status: Arc<ReadinessTracker>,
        current_cycle: Arc<AtomicU64>,
        cycle: u64,
    ) -> Self {
        Self {
            status,
            current_cycle,
            cycle,
        }
    }

    /// Report progress as a fraction in `[0, 1)`. Returns whether the
    /// status moved.
    pub fn report(&self, fraction: f64) -> bool {
        if self.current_cycle.load(Ordering::SeqCst) != self.cycle {
            return false;
        }
        self.status.advance(LayerStatus::readying(fraction.min(0.99)))
    }

    /// Whether this reporter's cycle is still the live one.
    pub fn is_current(&self) -> bool {
        self.current_cycle.load(Ordering::SeqCst) == self.cycle
    }
}
