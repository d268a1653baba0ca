//! Pattern-routed resolution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::{NamePattern, NameResolver};
use crate::{NetAddress, Result};

/// Routes each query to the first rule whose pattern matches, or to the
/// default resolver. Reverse queries route on the address's hostname, which
/// IP-only addresses lack, so those always go to the default.
pub struct ConditionalResolver {
    rules: Vec<(NamePattern, Arc<dyn NameResolver>)>,
    default: Arc<dyn NameResolver>,
}

impl ConditionalResolver {
    /// A resolver with no rules yet.
    pub fn new(default: Arc<dyn NameResolver>) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// Append a rule. Earlier rules win.
    pub fn with_rule(mut self, pattern: &str, resolver: Arc<dyn NameResolver>) -> Self {
        self.rules.push((NamePattern::new(pattern), resolver));
        self
    }

    fn route(&self, name: &str) -> &Arc<dyn NameResolver> {
        for (pattern, resolver) in &self.rules {
            if pattern.matches(name) {
                trace!(%name, %pattern, "conditional resolver rule matched");
                return resolver;
            }
        }
        &self.default
    }
}

#[async_trait]
impl NameResolver for ConditionalResolver {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        self.route(name).resolve_addresses(name).await
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        let resolver = match address.host() {
            Some(host) => self.route(host),
            None => &self.default,
        };
        resolver.resolve_names(address).await
    }
}
