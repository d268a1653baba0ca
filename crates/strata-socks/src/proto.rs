//! SOCKS wire format.
//!
//! SOCKS5 request:
//!
//! ```text
//! +----+-----+-------+------+----------+----------+
//! |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//! +----+-----+-------+------+----------+----------+
//! | 1  |  1  | X'00' |  1   | Variable |    2     |
//! +----+-----+-------+------+----------+----------+
//! ```
//!
//! SOCKS4a request: `VN=4 CD=1 DSTPORT(2) DSTIP(4) USERID 0x00 [HOST 0x00]`,
//! where a `DSTIP` of `0.0.0.x` (x != 0) means a hostname follows.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use strata_net::address::MAX_HOSTNAME_LEN;
use strata_net::{NetAddress, NetError, Result, TcpipAddress};
use tokio::io::{AsyncRead, AsyncReadExt};

/// SOCKS5 version byte.
pub const SOCKS5_VERSION: u8 = 0x05;
/// SOCKS4 version byte.
pub const SOCKS4_VERSION: u8 = 0x04;
/// Version byte of a SOCKS4 reply.
pub const SOCKS4_REPLY_VERSION: u8 = 0x00;
/// "No authentication required" method.
pub const METHOD_NO_AUTH: u8 = 0x00;
/// "No acceptable methods" answer.
pub const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
/// CONNECT command.
pub const CMD_CONNECT: u8 = 0x01;
/// IPv4 address type.
pub const ATYP_IPV4: u8 = 0x01;
/// Domain name address type.
pub const ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address type.
pub const ATYP_IPV6: u8 = 0x04;
/// SOCKS4 "request granted".
pub const SOCKS4_GRANTED: u8 = 0x5A;
/// SOCKS4 "request rejected or failed".
pub const SOCKS4_REJECTED: u8 = 0x5B;

/// Protocol version spoken on a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocksVersion {
    /// SOCKS4 with the 4a hostname extension.
    V4,
    /// SOCKS5.
    V5,
}

impl SocksVersion {
    /// Map a configured version number. `4` means SOCKS4a.
    pub fn from_number(version: u64) -> Result<Self> {
        match version {
            4 => Ok(SocksVersion::V4),
            5 => Ok(SocksVersion::V5),
            other => Err(NetError::Connection(format!(
                "unsupported SOCKS version {other}"
            ))),
        }
    }
}

impl fmt::Display for SocksVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksVersion::V4 => f.write_str("SOCKS4a"),
            SocksVersion::V5 => f.write_str("SOCKS5"),
        }
    }
}

/// SOCKS5 reply codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    /// Numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Reply for a numeric code; unknown codes read as general failure.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Reply::Succeeded,
            0x02 => Reply::NotAllowed,
            0x03 => Reply::NetworkUnreachable,
            0x04 => Reply::HostUnreachable,
            0x05 => Reply::ConnectionRefused,
            0x06 => Reply::TtlExpired,
            0x07 => Reply::CommandNotSupported,
            0x08 => Reply::AddressTypeNotSupported,
            _ => Reply::GeneralFailure,
        }
    }

    /// RFC 1928 wording.
    pub fn description(self) -> &'static str {
        match self {
            Reply::Succeeded => "succeeded",
            Reply::GeneralFailure => "general SOCKS server failure",
            Reply::NotAllowed => "connection not allowed by ruleset",
            Reply::NetworkUnreachable => "network unreachable",
            Reply::HostUnreachable => "host unreachable",
            Reply::ConnectionRefused => "connection refused",
            Reply::TtlExpired => "TTL expired",
            Reply::CommandNotSupported => "command not supported",
            Reply::AddressTypeNotSupported => "address type not supported",
        }
    }

    /// The reply a server sends when opening the destination failed with
    /// `error`.
    pub fn for_error(error: &NetError) -> Self {
        if error.is_timeout() {
            return Reply::TtlExpired;
        }
        match error {
            NetError::Rejected { code, .. } => Reply::from_code(*code),
            NetError::NotFound(_) | NetError::ResolutionLoop(_) => Reply::HostUnreachable,
            NetError::Connection(_) => Reply::ConnectionRefused,
            NetError::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
                std::io::ErrorKind::AddrNotAvailable => Reply::HostUnreachable,
                _ => Reply::GeneralFailure,
            },
            _ => Reply::GeneralFailure,
        }
    }

    /// The error a client reports for this reply.
    pub fn into_error(self) -> NetError {
        NetError::Rejected {
            code: self.code(),
            reason: self.description().to_string(),
        }
    }
}

/// A parsed CONNECT-style request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksRequest {
    /// Version the client spoke.
    pub version: SocksVersion,
    /// Command byte.
    pub command: u8,
    /// Requested destination.
    pub destination: NetAddress,
}

fn read_err(context: &'static str) -> impl Fn(std::io::Error) -> NetError {
    move |e| NetError::from_io(context, e)
}

/// Encode the SOCKS5 greeting offering only "no authentication".
pub fn encode_greeting_v5() -> [u8; 3] {
    [SOCKS5_VERSION, 1, METHOD_NO_AUTH]
}

/// Encode a SOCKS5 CONNECT. Hostnames are sent as-is so the proxy resolves
/// them.
pub fn encode_connect_v5(destination: &TcpipAddress) -> Result<Vec<u8>> {
    let mut out = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    match (destination.host(), destination.ip()) {
        (Some(host), _) => {
            let len = u8::try_from(host.len())
                .ok()
                .filter(|_| host.len() <= MAX_HOSTNAME_LEN)
                .ok_or_else(|| NetError::InvalidArgument(format!("hostname too long: {host}")))?;
            out.push(ATYP_DOMAIN);
            out.push(len);
            out.extend_from_slice(host.as_bytes());
        }
        (None, Some(IpAddr::V4(ip))) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&ip.octets());
        }
        (None, Some(IpAddr::V6(ip))) => {
            out.push(ATYP_IPV6);
            out.extend_from_slice(&ip.octets());
        }
        (None, None) => {
            return Err(NetError::InvalidArgument(
                "destination has neither host nor IP".into(),
            ))
        }
    }
    out.extend_from_slice(&destination.port().to_be_bytes());
    Ok(out)
}

/// Encode a SOCKS5 reply carrying `bound` (or `0.0.0.0:0`).
pub fn encode_reply_v5(reply: Reply, bound: Option<SocketAddr>) -> Vec<u8> {
    let bound = bound.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    let mut out = vec![SOCKS5_VERSION, reply.code(), 0x00];
    match bound.ip() {
        IpAddr::V4(ip) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            out.push(ATYP_IPV6);
            out.extend_from_slice(&ip.octets());
        }
    }
    out.extend_from_slice(&bound.port().to_be_bytes());
    out
}

/// Read the server's method selection. Returns the chosen method.
pub async fn read_method_selection<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    let mut answer = [0u8; 2];
    reader
        .read_exact(&mut answer)
        .await
        .map_err(read_err("method selection"))?;
    if answer[0] != SOCKS5_VERSION {
        return Err(NetError::Protocol(format!(
            "unexpected version {:#04x} in method selection",
            answer[0]
        )));
    }
    Ok(answer[1])
}

/// Read the methods offered in a SOCKS5 greeting, after its version byte.
pub async fn read_methods<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let count = reader.read_u8().await.map_err(read_err("greeting"))?;
    let mut methods = vec![0u8; usize::from(count)];
    reader
        .read_exact(&mut methods)
        .await
        .map_err(read_err("greeting methods"))?;
    Ok(methods)
}

async fn read_address<R: AsyncRead + Unpin>(reader: &mut R, atyp: u8) -> Result<AddressBody> {
    match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            reader
                .read_exact(&mut octets)
                .await
                .map_err(read_err("IPv4 address"))?;
            Ok(AddressBody::Ip(IpAddr::V4(Ipv4Addr::from(octets))))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            reader
                .read_exact(&mut octets)
                .await
                .map_err(read_err("IPv6 address"))?;
            Ok(AddressBody::Ip(IpAddr::V6(Ipv6Addr::from(octets))))
        }
        ATYP_DOMAIN => {
            let len = reader.read_u8().await.map_err(read_err("domain length"))?;
            let mut name = vec![0u8; usize::from(len)];
            reader
                .read_exact(&mut name)
                .await
                .map_err(read_err("domain"))?;
            let name = String::from_utf8(name)
                .map_err(|_| NetError::Protocol("domain name is not UTF-8".into()))?;
            Ok(AddressBody::Host(name))
        }
        other => Err(NetError::Rejected {
            code: Reply::AddressTypeNotSupported.code(),
            reason: format!("address type {other:#04x}"),
        }),
    }
}

enum AddressBody {
    Ip(IpAddr),
    Host(String),
}

fn destination(body: AddressBody, port: u16) -> Result<NetAddress> {
    match body {
        AddressBody::Ip(ip) => Ok(NetAddress::Tcpip(TcpipAddress::from_ip(ip, port))),
        AddressBody::Host(host) => Ok(NetAddress::Tcpip(
            TcpipAddress::from_host(host, port)
                .map_err(|e| NetError::Protocol(format!("bad destination host: {e}")))?,
        )),
    }
}

/// Read a SOCKS5 request, starting at its version byte.
///
/// An unknown address type fails with [`NetError::Rejected`] carrying
/// [`Reply::AddressTypeNotSupported`].
pub async fn read_request_v5<R: AsyncRead + Unpin>(reader: &mut R) -> Result<SocksRequest> {
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .map_err(read_err("request"))?;
    if header[0] != SOCKS5_VERSION {
        return Err(NetError::Protocol(format!(
            "unexpected version {:#04x} in request",
            header[0]
        )));
    }
    let body = read_address(reader, header[3]).await?;
    let port = reader.read_u16().await.map_err(read_err("port"))?;
    Ok(SocksRequest {
        version: SocksVersion::V5,
        command: header[1],
        destination: destination(body, port)?,
    })
}

/// Read a SOCKS5 reply. Succeeds only on [`Reply::Succeeded`]; other codes
/// fail with [`NetError::Rejected`]. Returns the bound address if it was an
/// IP.
pub async fn read_reply_v5<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<SocketAddr>> {
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .map_err(read_err("reply"))?;
    if header[0] != SOCKS5_VERSION {
        return Err(NetError::Protocol(format!(
            "unexpected version {:#04x} in reply",
            header[0]
        )));
    }
    let reply = Reply::from_code(header[1]);
    if reply != Reply::Succeeded {
        return Err(NetError::Rejected {
            code: header[1],
            reason: reply.description().to_string(),
        });
    }
    let body = read_address(reader, header[3])
        .await
        .map_err(|e| match e {
            NetError::Rejected { reason, .. } => {
                NetError::Protocol(format!("reply with unknown {reason}"))
            }
            other => other,
        })?;
    let port = reader.read_u16().await.map_err(read_err("bound port"))?;
    Ok(match body {
        AddressBody::Ip(ip) => Some(SocketAddr::new(ip, port)),
        AddressBody::Host(_) => None,
    })
}

/// Encode a SOCKS4a CONNECT with an empty user id.
pub fn encode_connect_v4a(destination: &TcpipAddress) -> Result<Vec<u8>> {
    let mut out = vec![SOCKS4_VERSION, CMD_CONNECT];
    out.extend_from_slice(&destination.port().to_be_bytes());
    match (destination.ip(), destination.host()) {
        (Some(IpAddr::V4(ip)), _) => {
            out.extend_from_slice(&ip.octets());
            out.push(0x00);
        }
        (_, Some(host)) => {
            if host.as_bytes().contains(&0) {
                return Err(NetError::InvalidArgument("hostname contains NUL".into()));
            }
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.push(0x00);
            out.extend_from_slice(host.as_bytes());
            out.push(0x00);
        }
        (Some(IpAddr::V6(_)), None) => {
            return Err(NetError::InvalidArgument(
                "SOCKS4a cannot carry IPv6 destinations".into(),
            ))
        }
        (None, None) => {
            return Err(NetError::InvalidArgument(
                "destination has neither host nor IP".into(),
            ))
        }
    }
    Ok(out)
}

async fn read_nul_terminated<R: AsyncRead + Unpin>(
    reader: &mut R,
    context: &'static str,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let byte = reader.read_u8().await.map_err(read_err(context))?;
        if byte == 0 {
            return Ok(out);
        }
        if out.len() >= MAX_HOSTNAME_LEN {
            return Err(NetError::Protocol(format!("{context} too long")));
        }
        out.push(byte);
    }
}

/// Read a SOCKS4/4a request, after its version byte.
pub async fn read_request_v4<R: AsyncRead + Unpin>(reader: &mut R) -> Result<SocksRequest> {
    let command = reader.read_u8().await.map_err(read_err("request"))?;
    let port = reader.read_u16().await.map_err(read_err("port"))?;
    let mut octets = [0u8; 4];
    reader
        .read_exact(&mut octets)
        .await
        .map_err(read_err("IPv4 address"))?;
    read_nul_terminated(reader, "user id").await?;

    let body = if octets[..3] == [0, 0, 0] && octets[3] != 0 {
        let host = read_nul_terminated(reader, "hostname").await?;
        let host = String::from_utf8(host)
            .map_err(|_| NetError::Protocol("hostname is not UTF-8".into()))?;
        AddressBody::Host(host)
    } else {
        AddressBody::Ip(IpAddr::V4(Ipv4Addr::from(octets)))
    };
    Ok(SocksRequest {
        version: SocksVersion::V4,
        command,
        destination: destination(body, port)?,
    })
}

/// Encode a SOCKS4 reply.
pub fn encode_reply_v4(granted: bool) -> [u8; 8] {
    let code = if granted {
        SOCKS4_GRANTED
    } else {
        SOCKS4_REJECTED
    };
    [SOCKS4_REPLY_VERSION, code, 0, 0, 0, 0, 0, 0]
}

/// Read a SOCKS4 reply. Anything but "granted" fails with
/// [`NetError::Rejected`] carrying the SOCKS4 code.
pub async fn read_reply_v4<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut reply = [0u8; 8];
    reader
        .read_exact(&mut reply)
        .await
        .map_err(read_err("reply"))?;
    if reply[0] != SOCKS4_REPLY_VERSION {
        return Err(NetError::Protocol(format!(
            "unexpected version {:#04x} in SOCKS4 reply",
            reply[0]
        )));
    }
    match reply[1] {
        SOCKS4_GRANTED => Ok(()),
        code => Err(NetError::Rejected {
            code,
            reason: "request rejected or failed".into(),
        }),
    }
}
