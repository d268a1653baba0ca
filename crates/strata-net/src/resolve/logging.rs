//! Tracing decorator for resolvers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::NameResolver;
use crate::{NetAddress, Result};

/// Traces every request and its outcome; results pass through unchanged.
pub struct LoggingResolver {
    label: String,
    lower: Arc<dyn NameResolver>,
}

impl LoggingResolver {
    /// Wrap `lower`, tagging events with `label`.
    pub fn new(label: impl Into<String>, lower: Arc<dyn NameResolver>) -> Self {
        Self {
            label: label.into(),
            lower,
        }
    }
}

#[async_trait]
impl NameResolver for LoggingResolver {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        debug!(resolver = %self.label, %name, "resolving name");
        let result = self.lower.resolve_addresses(name).await;
        match &result {
            Ok(addresses) => debug!(
                resolver = %self.label,
                %name,
                count = addresses.len(),
                first = ?addresses.first(),
                "name resolved"
            ),
            Err(e) => warn!(resolver = %self.label, %name, error = %e, "name resolution failed"),
        }
        result
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        debug!(resolver = %self.label, %address, "reverse resolving");
        let result = self.lower.resolve_names(address).await;
        match &result {
            Ok(names) => debug!(
                resolver = %self.label,
                %address,
                names = ?names,
                "address reverse resolved"
            ),
            Err(e) => warn!(
                resolver = %self.label,
                %address,
                error = %e,
                "reverse resolution failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::resolve::{NopResolver, StaticResolver};

    #[tokio::test]
    async fn test_results_pass_through() {
        let ip = NetAddress::Ip(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
        let lower = Arc::new(
            StaticResolver::new()
                .with_address("svc.example", ip.clone())
                .with_name(ip.clone(), "svc.example"),
        );
        let resolver = LoggingResolver::new("test", lower);
        assert_eq!(
            resolver.resolve_addresses("svc.example").await.expect("fwd"),
            vec![ip.clone()]
        );
        assert_eq!(
            resolver.resolve_names(&ip).await.expect("rev"),
            vec!["svc.example".to_string()]
        );

        let failing = LoggingResolver::new("nop", Arc::new(NopResolver));
        assert!(failing.resolve_addresses("svc.example").await.is_err());
    }
}
