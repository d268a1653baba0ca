//! SOCKS client layer.
//!
//! Connects to the proxy through the lower layer, then negotiates the
//! caller's destination:
//!
//! ```text
//! Init -> GreetingSent -> MethodSelected -> ConnectSent -> Established
//!   \__________\________________\_______________\________> Failed
//! ```
//!
//! SOCKS4a skips the method exchange (`Init -> ConnectSent`).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_net::layer::require_remote;
use strata_net::{
    LayerProperties, LayerStatus, NameResolver, NetAddress, NetError, NetLayer, NetSocket,
    Result, TcpipAddress,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::proto::{self, SocksVersion, METHOD_NO_AUTH};

/// Property key: protocol version, `4` (SOCKS4a) or `5`.
pub const VERSION_KEY: &str = "socks.version";
/// Property key: proxy address override (`NetAddress` or `String`).
pub const PROXY_KEY: &str = "socks.proxy";
/// Property key: bound on the negotiation with the proxy, in milliseconds.
pub const TIMEOUT_KEY: &str = "socks.timeout_ms";

/// Negotiation bound when `socks.timeout_ms` is absent.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(60);

const NAMESPACE: &str = "socks";

/// Client negotiation progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Nothing sent.
    Init,
    /// Method offer sent.
    GreetingSent,
    /// Proxy accepted "no authentication".
    MethodSelected,
    /// CONNECT sent.
    ConnectSent,
    /// Proxy granted the connection; the socket is a byte pipe.
    Established,
    /// Negotiation failed; the socket is unusable.
    Failed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Init => "init",
            ClientState::GreetingSent => "greeting-sent",
            ClientState::MethodSelected => "method-selected",
            ClientState::ConnectSent => "connect-sent",
            ClientState::Established => "established",
            ClientState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One client-side negotiation.
pub struct ClientHandshake {
    version: SocksVersion,
    state: ClientState,
}

impl ClientHandshake {
    /// A fresh negotiation.
    pub fn new(version: SocksVersion) -> Self {
        Self {
            version,
            state: ClientState::Init,
        }
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    fn enter(&mut self, next: ClientState) {
        trace!(version = %self.version, from = %self.state, to = %next, "socks client state");
        self.state = next;
    }

    /// Drive the negotiation to [`ClientState::Established`] over `stream`.
    ///
    /// On error the state is [`ClientState::Failed`].
    pub async fn run<S>(&mut self, stream: &mut S, destination: &TcpipAddress) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = match self.version {
            SocksVersion::V5 => self.run_v5(stream, destination).await,
            SocksVersion::V4 => self.run_v4a(stream, destination).await,
        };
        match result {
            Ok(()) => self.enter(ClientState::Established),
            Err(_) => self.enter(ClientState::Failed),
        }
        result
    }

    async fn run_v5<S>(&mut self, stream: &mut S, destination: &TcpipAddress) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let connect = proto::encode_connect_v5(destination)?;

        send(stream, &proto::encode_greeting_v5(), "greeting").await?;
        self.enter(ClientState::GreetingSent);

        let method = proto::read_method_selection(stream).await?;
        if method != METHOD_NO_AUTH {
            return Err(NetError::Protocol(format!(
                "proxy selected unsupported method {method:#04x}"
            )));
        }
        self.enter(ClientState::MethodSelected);

        send(stream, &connect, "connect request").await?;
        self.enter(ClientState::ConnectSent);

        proto::read_reply_v5(stream).await?;
        Ok(())
    }

    async fn run_v4a<S>(&mut self, stream: &mut S, destination: &TcpipAddress) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let connect = proto::encode_connect_v4a(destination)?;
        send(stream, &connect, "connect request").await?;
        self.enter(ClientState::ConnectSent);
        proto::read_reply_v4(stream).await
    }
}

/// Write `bytes` and push them through any buffering below.
async fn send<S>(stream: &mut S, bytes: &[u8], what: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(bytes)
        .await
        .map_err(|e| NetError::from_io(what, e))?;
    stream.flush().await.map_err(|e| NetError::from_io(what, e))
}

/// Layer reaching destinations through a SOCKS proxy.
pub struct SocksClientLayer {
    lower: Arc<dyn NetLayer>,
    proxy: NetAddress,
    version: SocksVersion,
    negotiation_timeout: Duration,
}

impl SocksClientLayer {
    /// SOCKS5 through `proxy`, reached over `lower`.
    pub fn new(lower: Arc<dyn NetLayer>, proxy: NetAddress) -> Self {
        Self {
            lower,
            proxy,
            version: SocksVersion::V5,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }

    /// Default negotiation bound when `socks.timeout_ms` is absent.
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Default protocol version when `socks.version` is absent.
    pub fn with_version(mut self, version: SocksVersion) -> Self {
        self.version = version;
        self
    }

    /// The configured proxy.
    pub fn proxy(&self) -> &NetAddress {
        &self.proxy
    }
}

fn configured_version(own: &LayerProperties, default: SocksVersion) -> Result<SocksVersion> {
    let Some(value) = own.get_value(VERSION_KEY) else {
        return Ok(default);
    };
    if let Some(version) = value.downcast_ref::<SocksVersion>() {
        return Ok(*version);
    }
    let number = value
        .downcast_ref::<u8>()
        .map(|v| u64::from(*v))
        .or_else(|| value.downcast_ref::<u32>().map(|v| u64::from(*v)))
        .or_else(|| value.downcast_ref::<u64>().copied())
        .or_else(|| value.downcast_ref::<i32>().and_then(|v| u64::try_from(*v).ok()))
        .ok_or_else(|| NetError::Connection(format!("{VERSION_KEY} must be 4 or 5")))?;
    SocksVersion::from_number(number)
}

fn configured_proxy(own: &LayerProperties, default: &NetAddress) -> Result<NetAddress> {
    if let Some(addr) = own.get::<NetAddress>(PROXY_KEY) {
        return Ok(addr.clone());
    }
    match own.get_str(PROXY_KEY) {
        Some(text) => text
            .parse()
            .map_err(|e| NetError::Connection(format!("{PROXY_KEY}: {e}"))),
        None => Ok(default.clone()),
    }
}

#[async_trait]
impl NetLayer for SocksClientLayer {
    async fn create_socket(
        &self,
        props: &LayerProperties,
        local: Option<&NetAddress>,
        remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        let remote = require_remote(remote, "socks")?;
        let destination = remote.require_tcpip("socks")?;
        let (own, forwarded) = props.split_namespace(NAMESPACE);
        let version = configured_version(&own, self.version)?;
        let proxy = configured_proxy(&own, &self.proxy)?;
        let negotiation_timeout = own
            .get_millis(TIMEOUT_KEY)?
            .unwrap_or(self.negotiation_timeout);

        let mut socket = self
            .lower
            .create_socket(&forwarded, local, Some(&proxy))
            .await
            .map_err(|e| e.retarget_timeout(remote))?;

        let mut handshake = ClientHandshake::new(version);
        tokio::time::timeout(negotiation_timeout, handshake.run(&mut socket, destination))
            .await
            .map_err(|_| {
                debug!(%proxy, %remote, ?negotiation_timeout, "socks negotiation timed out");
                NetError::ConnectTimeout {
                    target: remote.to_string(),
                }
            })?
            .map_err(|e| e.retarget_timeout(remote))?;
        debug!(%proxy, %remote, %version, "socks session established");
        Ok(socket)
    }

    fn status(&self) -> LayerStatus {
        self.lower.status()
    }

    async fn wait_until_ready(&self) {
        self.lower.wait_until_ready().await;
    }

    fn clear(&self) -> Result<()> {
        self.lower.clear()
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        self.lower.name_service()
    }
}
