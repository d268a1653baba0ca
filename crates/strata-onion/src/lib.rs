//! # strata-onion
//!
//! The boundary between the layer stack and an onion-routing core.
//!
//! Circuit construction, cell crypto and directory handling live behind the
//! [`CircuitProvider`] trait. This crate adapts a provider to the
//! [`NetLayer`](strata_net::NetLayer) contract:
//!
//! - [`OnionLayer`] bootstraps the provider once per readiness cycle,
//!   retrying failures with backoff, and forwards its progress to the layer
//!   status.
//! - Hostnames ending in `.onion` are served from the hidden-service
//!   descriptor cache, fetching through the provider on a miss.
//! - [`OnionResolver`] resolves names over circuits and refuses to run when
//!   called from inside a provider call (see [`scope`]).
//!
//! ## Key Parameters
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `onion.timeout_ms` | `u64` | 120 000 |
//! | `onion.port` | `u16` | required for `Hostname`/`Ip` remotes |
//! | `onion.isolation` | `u64` | per-cycle random token |
//!
//! Failed bootstraps are retried after 1 s, doubling up to 60 s, until the
//! cycle succeeds or is cleared.

pub mod address;
pub mod descriptor;
pub mod layer;
pub mod provider;
pub mod resolver;
pub mod scope;

pub use address::OnionAddress;
pub use descriptor::HiddenServiceDescriptor;
pub use layer::{OnionLayer, ISOLATION_KEY, PORT_KEY, TIMEOUT_KEY};
pub use provider::{BootstrapReporter, CircuitProvider, IsolationToken};
pub use resolver::OnionResolver;
