//! Fixed-table resolver for tests and pinned hosts.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{non_empty, NameResolver};
use crate::{NetAddress, Result};

/// Answers from in-memory forward and reverse tables.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    addresses: HashMap<String, Vec<NetAddress>>,
    names: HashMap<NetAddress, Vec<String>>,
}

impl StaticResolver {
    /// Empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `address` to the answers for `name` (case-insensitive).
    pub fn with_address(mut self, name: &str, address: NetAddress) -> Self {
        self.addresses
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(address);
        self
    }

    /// Add `name` to the reverse answers for `address`.
    pub fn with_name(mut self, address: NetAddress, name: impl Into<String>) -> Self {
        self.names.entry(address).or_default().push(name.into());
        self
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        let found = self
            .addresses
            .get(&name.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default();
        non_empty(found, || format!("{name} is not in the static table"))
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        let found = self.names.get(address).cloned().unwrap_or_default();
        non_empty(found, || format!("{address} is not in the static table"))
    }
}
