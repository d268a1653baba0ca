//! Name resolution chain.
//!
//! Resolvers compose the same way layers do: decorators wrap a lower
//! resolver and either route ([`ConditionalResolver`]), swap
//! ([`SwitchingResolver`]), observe ([`LoggingResolver`]) or memoise
//! ([`CachingResolver`]) the call. Leaf resolvers answer from the system
//! ([`SystemResolver`]), a fixed table ([`StaticResolver`]) or never
//! ([`NopResolver`]).
//!
//! Both directions fail with [`NetError::NotFound`] rather than returning an
//! empty list.

pub mod caching;
pub mod conditional;
pub mod logging;
pub mod static_table;
pub mod switching;
pub mod system;

use std::fmt;

use async_trait::async_trait;

use crate::{NetAddress, NetError, Result};

pub use caching::CachingResolver;
pub use conditional::ConditionalResolver;
pub use logging::LoggingResolver;
pub use static_table::StaticResolver;
pub use switching::SwitchingResolver;
pub use system::SystemResolver;

/// Forward and reverse name lookup.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Addresses for `name`. Never returns an empty list.
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>>;

    /// Names for `address`. Never returns an empty list.
    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>>;
}

/// Hostname matcher used by routing resolvers.
///
/// `*.example` matches every name ending in `.example` (but not `example`
/// itself); anything else must match exactly. Matching ignores ASCII case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamePattern {
    /// Exact name.
    Exact(String),
    /// Any name with this suffix, stored with its leading dot.
    Suffix(String),
}

impl NamePattern {
    /// Parse `*.suffix` or an exact name.
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_prefix('*') {
            Some(suffix) if suffix.starts_with('.') => NamePattern::Suffix(suffix.to_string()),
            _ => NamePattern::Exact(pattern),
        }
    }

    /// Whether `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        match self {
            NamePattern::Exact(exact) => name == *exact,
            NamePattern::Suffix(suffix) => name.len() > suffix.len() && name.ends_with(suffix),
        }
    }

    /// Whether the host part of `address` matches. IP-only addresses never
    /// match.
    pub fn matches_address(&self, address: &NetAddress) -> bool {
        address.host().is_some_and(|host| self.matches(host))
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Exact(name) => f.write_str(name),
            NamePattern::Suffix(suffix) => write!(f, "*{suffix}"),
        }
    }
}

/// Resolver that never finds anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopResolver;

#[async_trait]
impl NameResolver for NopResolver {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        Err(NetError::NotFound(format!("no resolver for {name}")))
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        Err(NetError::NotFound(format!("no resolver for {address}")))
    }
}

pub(crate) fn non_empty<T>(items: Vec<T>, what: impl FnOnce() -> String) -> Result<Vec<T>> {
    if items.is_empty() {
        Err(NetError::NotFound(what()))
    } else {
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pattern_suffix() {
        let onion = NamePattern::new("*.onion");
        assert_eq!(onion, NamePattern::Suffix(".onion".into()));
        assert!(onion.matches("abcdefghijklmnop.onion"));
        assert!(onion.matches("ABCDEFGHIJKLMNOP.ONION"));
        assert!(onion.matches("sub.abcdefghijklmnop.onion."));
        assert!(!onion.matches("onion"));
        assert!(!onion.matches(".onion"));
        assert!(!onion.matches("example.com"));
        assert_eq!(onion.to_string(), "*.onion");
    }

    #[test]
    fn test_name_pattern_exact() {
        let exact = NamePattern::new("Localhost");
        assert!(exact.matches("localhost"));
        assert!(!exact.matches("sub.localhost"));
        assert!(exact.matches_address(&NetAddress::tcpip("localhost", 80)));
        assert!(!exact.matches_address(&"127.0.0.1".parse().expect("ip")));
    }

    #[tokio::test]
    async fn test_nop_resolver_never_finds() {
        let resolver = NopResolver;
        assert!(matches!(
            resolver.resolve_addresses("example.com").await,
            Err(NetError::NotFound(_))
        ));
        let addr: NetAddress = "10.0.0.1".parse().expect("ip");
        assert!(matches!(
            resolver.resolve_names(&addr).await,
            Err(NetError::NotFound(_))
        ));
    }
}
