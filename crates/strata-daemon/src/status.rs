//! Status snapshots, emitted as JSON.

use serde::{Deserialize, Serialize};
use strata_net::NetLayerId;

use crate::context::NetContext;

/// One registered layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "'de: 'static"))]
pub struct LayerReport {
    pub id: NetLayerId,
    pub built: bool,
    /// Human-readable status; "not built" for layers never requested.
    pub status: String,
    pub readiness: f64,
}

/// Daemon-wide snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "'de: 'static"))]
pub struct StatusReport {
    pub version: String,
    pub layers: Vec<LayerReport>,
    pub cached_descriptors: usize,
}

impl StatusReport {
    /// Snapshot `context` without building any layer.
    pub fn collect(context: &NetContext) -> Self {
        let registry = context.registry();
        let layers = registry
            .registered_ids()
            .into_iter()
            .map(|id| {
                let built = registry.is_built(id).then(|| registry.get(id).ok()).flatten();
                match built {
                    Some(layer) => {
                        let status = layer.status();
                        LayerReport {
                            id,
                            built: true,
                            status: status.to_string(),
                            readiness: status.readiness(),
                        }
                    }
                    None => LayerReport {
                        id,
                        built: false,
                        status: "not built".to_string(),
                        readiness: 0.0,
                    },
                }
            })
            .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            layers,
            cached_descriptors: context.descriptors().size(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
