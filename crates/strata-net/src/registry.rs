//! Named, lazily constructed layers.
//!
//! The registry belongs to the application's context object; there is no
//! process-global instance. A layer is built the first time it is looked up,
//! after the layers it depends on, under a single write lock. Lookups of
//! already-built layers only take the read lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::{NetError, NetLayer, NetLayerId, Result};

/// Builds a layer from its already-built dependencies, in declaration order.
pub type LayerBuilder =
    Box<dyn Fn(&[Arc<dyn NetLayer>]) -> Result<Arc<dyn NetLayer>> + Send + Sync>;

struct Registration {
    dependencies: Vec<NetLayerId>,
    builder: LayerBuilder,
}

#[derive(Default)]
struct RegistryState {
    registrations: HashMap<NetLayerId, Arc<Registration>>,
    built: HashMap<NetLayerId, Arc<dyn NetLayer>>,
}

/// Lookup of layers by [`NetLayerId`].
#[derive(Default)]
pub struct NetRegistry {
    state: RwLock<RegistryState>,
}

impl NetRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how to build `id`. Replaces any earlier registration but does
    /// not discard an already-built instance.
    pub fn register<F>(&self, id: NetLayerId, dependencies: &[NetLayerId], builder: F)
    where
        F: Fn(&[Arc<dyn NetLayer>]) -> Result<Arc<dyn NetLayer>> + Send + Sync + 'static,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.registrations.insert(
            id,
            Arc::new(Registration {
                dependencies: dependencies.to_vec(),
                builder: Box::new(builder),
            }),
        );
        debug!(%id, ?dependencies, "registered layer");
    }

    /// Install `layer` as the instance for `id`, replacing any built one.
    pub fn replace(&self, id: NetLayerId, layer: Arc<dyn NetLayer>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.built.insert(id, layer);
        info!(%id, "layer instance replaced");
    }

    /// The layer for `id`, building it (and its dependencies) on first use.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidArgument`] if `id` (or a dependency) is not
    /// registered or the dependencies form a cycle; any error returned by a
    /// builder.
    pub fn get(&self, id: NetLayerId) -> Result<Arc<dyn NetLayer>> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(layer) = state.built.get(&id) {
                return Ok(Arc::clone(layer));
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut visiting = HashSet::new();
        build_locked(&mut state, id, &mut visiting)
    }

    /// Whether `id` has been built.
    pub fn is_built(&self, id: NetLayerId) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.built.contains_key(&id)
    }

    /// Registered identifiers, sorted.
    pub fn registered_ids(&self) -> Vec<NetLayerId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<NetLayerId> = state.registrations.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Call `clear()` on every built layer. Failures are logged and the rest
    /// are still cleared.
    pub fn clear_all(&self) {
        let built: Vec<(NetLayerId, Arc<dyn NetLayer>)> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .built
                .iter()
                .map(|(id, layer)| (*id, Arc::clone(layer)))
                .collect()
        };
        for (id, layer) in built {
            if let Err(e) = layer.clear() {
                warn!(%id, error = %e, "failed to clear layer");
            }
        }
    }
}

fn build_locked(
    state: &mut RegistryState,
    id: NetLayerId,
    visiting: &mut HashSet<NetLayerId>,
) -> Result<Arc<dyn NetLayer>> {
    if let Some(layer) = state.built.get(&id) {
        return Ok(Arc::clone(layer));
    }

    let registration = state
        .registrations
        .get(&id)
        .cloned()
        .ok_or_else(|| NetError::InvalidArgument(format!("no layer registered for {id}")))?;

    if !visiting.insert(id) {
        return Err(NetError::InvalidArgument(format!(
            "layer dependency cycle through {id}"
        )));
    }

    let mut lower = Vec::with_capacity(registration.dependencies.len());
    for dependency in &registration.dependencies {
        lower.push(build_locked(state, *dependency, visiting)?);
    }

    let layer = (registration.builder)(&lower)?;
    visiting.remove(&id);
    state.built.insert(id, Arc::clone(&layer));
    info!(%id, "layer constructed");
    Ok(layer)
}
