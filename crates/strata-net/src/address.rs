//! Typed network endpoints.
//!
//! Three variants cover every layer's needs:
//!
//! - [`NetAddress::Tcpip`] - host and/or IP plus a port, for stream layers
//! - [`NetAddress::Hostname`] - a name only, never carrying a resolved IP
//! - [`NetAddress::Ip`] - an IP only, never carrying a name
//!
//! Equality and ordering compare the raw representation, so
//! `Tcpip(host=a, port=1)` and `Tcpip(ip=1.2.3.4, port=1)` differ even if `a`
//! resolves to `1.2.3.4`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{NetError, Result};

/// Longest hostname accepted (matches the SOCKS5 one-byte length field).
pub const MAX_HOSTNAME_LEN: usize = 255;

/// Suffix identifying onion-service hostnames.
pub const ONION_SUFFIX: &str = ".onion";

/// Host and/or IP plus a port.
///
/// At least one of `host` and `ip` is always present; the constructors enforce
/// this.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TcpipAddress {
    host: Option<String>,
    ip: Option<IpAddr>,
    port: u16,
}

impl TcpipAddress {
    /// An unresolved hostname endpoint.
    pub fn from_host(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = validate_hostname(host.into())?;
        Ok(Self {
            host: Some(host),
            ip: None,
            port,
        })
    }

    /// An IP endpoint.
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self {
            host: None,
            ip: Some(ip),
            port,
        }
    }

    /// An endpoint carrying both the name and the IP it resolved to.
    pub fn resolved(host: impl Into<String>, ip: IpAddr, port: u16) -> Result<Self> {
        let host = validate_hostname(host.into())?;
        Ok(Self {
            host: Some(host),
            ip: Some(ip),
            port,
        })
    }

    /// Hostname, if known.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// IP, if known.
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The hostname if present, otherwise the IP rendered as text.
    pub fn host_or_ip(&self) -> String {
        match (&self.host, self.ip) {
            (Some(host), _) => host.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => String::new(),
        }
    }

    /// The socket address, if the IP is known.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for TcpipAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip(), addr.port())
    }
}

impl fmt::Display for TcpipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.ip) {
            (Some(host), _) => write!(f, "{host}:{}", self.port),
            (None, Some(IpAddr::V6(ip))) => write!(f, "[{ip}]:{}", self.port),
            (None, Some(ip)) => write!(f, "{ip}:{}", self.port),
            (None, None) => write!(f, ":{}", self.port),
        }
    }
}

/// A network endpoint understood by every layer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NetAddress {
    /// Host and/or IP with a port.
    Tcpip(TcpipAddress),
    /// Hostname only.
    Hostname(String),
    /// IP only.
    Ip(IpAddr),
}

impl NetAddress {
    /// Shorthand for an unresolved `host:port` endpoint.
    ///
    /// Hosts that parse as IP literals produce an IP endpoint instead.
    /// Invalid hostnames are kept verbatim; use [`NetAddress::from_str`] for
    /// validated parsing.
    pub fn tcpip(host: &str, port: u16) -> Self {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return NetAddress::Tcpip(TcpipAddress::from_ip(ip, port));
        }
        NetAddress::Tcpip(TcpipAddress {
            host: Some(host.to_string()),
            ip: None,
            port,
        })
    }

    /// A hostname-only address.
    pub fn hostname(name: impl Into<String>) -> Result<Self> {
        Ok(NetAddress::Hostname(validate_hostname(name.into())?))
    }

    /// Port, for the [`NetAddress::Tcpip`] variant.
    pub fn port(&self) -> Option<u16> {
        match self {
            NetAddress::Tcpip(addr) => Some(addr.port()),
            _ => None,
        }
    }

    /// Hostname carried by this address, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            NetAddress::Tcpip(addr) => addr.host(),
            NetAddress::Hostname(name) => Some(name),
            NetAddress::Ip(_) => None,
        }
    }

    /// IP carried by this address, if any.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            NetAddress::Tcpip(addr) => addr.ip(),
            NetAddress::Hostname(_) => None,
            NetAddress::Ip(ip) => Some(*ip),
        }
    }

    /// Whether the hostname is an onion-service name.
    pub fn is_onion(&self) -> bool {
        self.host()
            .map(|h| h.to_ascii_lowercase().ends_with(ONION_SUFFIX))
            .unwrap_or(false)
    }

    /// The [`TcpipAddress`] inside, or an argument error naming the layer that
    /// required it.
    pub fn require_tcpip(&self, layer: &str) -> Result<&TcpipAddress> {
        match self {
            NetAddress::Tcpip(addr) => Ok(addr),
            other => Err(NetError::InvalidArgument(format!(
                "{layer} requires a host:port address, got {other}"
            ))),
        }
    }
}

impl From<SocketAddr> for NetAddress {
    fn from(addr: SocketAddr) -> Self {
        NetAddress::Tcpip(addr.into())
    }
}

impl From<IpAddr> for NetAddress {
    fn from(ip: IpAddr) -> Self {
        NetAddress::Ip(ip)
    }
}

impl From<TcpipAddress> for NetAddress {
    fn from(addr: TcpipAddress) -> Self {
        NetAddress::Tcpip(addr)
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddress::Tcpip(addr) => addr.fmt(f),
            NetAddress::Hostname(name) => f.write_str(name),
            NetAddress::Ip(ip) => ip.fmt(f),
        }
    }
}

impl FromStr for NetAddress {
    type Err = NetError;

    /// Parse `host:port`, `a.b.c.d:port`, `[v6]:port`, a bare IP or a bare
    /// hostname.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(NetError::InvalidArgument("empty address".into()));
        }

        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }
        if let Ok(ip) = s.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            return Ok(NetAddress::Ip(ip));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| NetError::InvalidArgument(format!("invalid port in {s:?}")))?;
                Ok(NetAddress::Tcpip(TcpipAddress::from_host(host, port)?))
            }
            None => NetAddress::hostname(s),
        }
    }
}

fn validate_hostname(host: String) -> Result<String> {
    if host.is_empty() {
        return Err(NetError::InvalidArgument("empty hostname".into()));
    }
    if host.len() > MAX_HOSTNAME_LEN {
        return Err(NetError::InvalidArgument(format!(
            "hostname longer than {MAX_HOSTNAME_LEN} bytes"
        )));
    }
    if host.chars().any(|c| c.is_whitespace() || c == ':' || c == '/') {
        return Err(NetError::InvalidArgument(format!("invalid hostname {host:?}")));
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr: NetAddress = "do.meins:80".parse().expect("parse");
        assert_eq!(addr, NetAddress::tcpip("do.meins", 80));
        assert_eq!(addr.host(), Some("do.meins"));
        assert_eq!(addr.ip(), None);
        assert_eq!(addr.port(), Some(80));
        assert_eq!(addr.to_string(), "do.meins:80");
    }

    #[test]
    fn test_parse_ip_forms() {
        let v4: NetAddress = "10.0.0.1:9050".parse().expect("v4");
        assert_eq!(v4.ip(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));

        let v6: NetAddress = "[::1]:443".parse().expect("v6");
        assert_eq!(v6.ip(), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(v6.to_string(), "[::1]:443");

        let bare: NetAddress = "192.168.1.1".parse().expect("bare ip");
        assert!(matches!(bare, NetAddress::Ip(_)));
    }

    #[test]
    fn test_parse_bare_hostname() {
        let name: NetAddress = "example.onion".parse().expect("hostname");
        assert!(matches!(name, NetAddress::Hostname(_)));
        assert!(name.is_onion());
        assert_eq!(name.ip(), None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<NetAddress>().is_err());
        assert!("host:notaport".parse::<NetAddress>().is_err());
        assert!("host:70000".parse::<NetAddress>().is_err());
        assert!(NetAddress::hostname("a".repeat(256)).is_err());
    }

    #[test]
    fn test_resolved_carries_both() {
        let ip = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        let addr = TcpipAddress::resolved("host.example", ip, 8080).expect("resolved");
        assert_eq!(addr.host(), Some("host.example"));
        assert_eq!(addr.ip(), Some(ip));
        assert_eq!(addr.socket_addr(), Some(SocketAddr::new(ip, 8080)));
    }

    #[test]
    fn test_equality_is_representational() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let by_name = NetAddress::tcpip("localhost", 80);
        let by_ip = NetAddress::Tcpip(TcpipAddress::from_ip(ip, 80));
        assert_ne!(by_name, by_ip);

        let mut sorted = vec![
            NetAddress::Ip(ip),
            NetAddress::Hostname("a".into()),
            by_name.clone(),
        ];
        sorted.sort();
        assert_eq!(sorted[0], by_name);
        assert!(matches!(sorted[2], NetAddress::Ip(_)));
    }

    #[test]
    fn test_require_tcpip() {
        let name = NetAddress::Hostname("example.com".into());
        assert!(name.require_tcpip("tcpip").is_err());
        let tcp = NetAddress::tcpip("example.com", 1);
        assert_eq!(tcp.require_tcpip("tcpip").expect("tcpip").port(), 1);
    }
}
