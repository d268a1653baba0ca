//! Operating-system resolver.
//!
//! Forward lookups go through [`tokio::net::lookup_host`]. The OS offers no
//! portable reverse lookup, so reverse queries only answer for loopback.

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use super::{non_empty, NameResolver};
use crate::{NetAddress, NetError, Result};

/// Resolver backed by the host's resolver configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl SystemResolver {
    /// A system resolver.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        if let Ok(ip) = name.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            return Ok(vec![NetAddress::Ip(ip)]);
        }

        let resolved = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|e| NetError::NotFound(format!("{name}: {e}")))?;

        let mut addresses: Vec<NetAddress> = Vec::new();
        for socket_addr in resolved {
            let address = NetAddress::Ip(socket_addr.ip());
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        debug!(%name, count = addresses.len(), "system resolver answered");
        non_empty(addresses, || format!("{name} has no addresses"))
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        match address.ip() {
            Some(ip) if ip.is_loopback() => Ok(vec!["localhost".to_string()]),
            _ => Err(NetError::NotFound(format!(
                "no reverse entry for {address}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[tokio::test]
    async fn test_ip_literals_resolve_to_themselves() {
        let resolver = SystemResolver::new();
        let answer = resolver.resolve_addresses("192.0.2.5").await.expect("literal");
        assert_eq!(
            answer,
            vec![NetAddress::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 5)))]
        );
        let v6 = resolver.resolve_addresses("[::1]").await.expect("v6 literal");
        assert_eq!(v6.len(), 1);
    }

    #[tokio::test]
    async fn test_reverse_answers_only_for_loopback() {
        let resolver = SystemResolver::new();
        let loopback = NetAddress::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(
            resolver.resolve_names(&loopback).await.expect("loopback"),
            vec!["localhost".to_string()]
        );
        let public = NetAddress::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(resolver.resolve_names(&public).await.is_err());
    }
}
