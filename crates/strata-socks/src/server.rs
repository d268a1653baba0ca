//! SOCKS server engine.
//!
//! ```text
//! Listen -> GreetingReceived -> MethodReplied -> RequestReceived -> Relaying
//!    \___________\_________________\_________________\____________> Failed
//! ```
//!
//! SOCKS4/4a clients send their request with the greeting, so those sessions
//! go `Listen -> RequestReceived` directly.
//!
//! [`SocksServer`] opens each requested destination through its outbound
//! layer and relays both directions until either side finishes.
//! [`SocksServerLayer`] stops after the request: its server sockets hand the
//! negotiated stream to the application together with the destination the
//! client asked for.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_net::{
    HandshakingServerSocket, LayerProperties, LayerStatus, NameResolver, NetAddress, NetError,
    NetLayer, NetServerSocket, NetSocket, Result,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use crate::proto::{
    self, Reply, SocksRequest, SocksVersion, CMD_CONNECT, METHOD_NONE_ACCEPTABLE, METHOD_NO_AUTH,
    SOCKS4_VERSION, SOCKS5_VERSION,
};

/// Bound on opening a destination when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on a client's greeting and request when none is configured.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Server negotiation progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the first byte.
    Listen,
    /// SOCKS5 method offer read.
    GreetingReceived,
    /// "No authentication" selected.
    MethodReplied,
    /// Destination request read.
    RequestReceived,
    /// Success reply sent; bytes are relayed.
    Relaying,
    /// Session aborted.
    Failed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Listen => "listen",
            ServerState::GreetingReceived => "greeting-received",
            ServerState::MethodReplied => "method-replied",
            ServerState::RequestReceived => "request-received",
            ServerState::Relaying => "relaying",
            ServerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Server side of one session.
pub struct ServerHandshake {
    state: ServerState,
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandshake {
    /// A session waiting for its greeting.
    pub fn new() -> Self {
        Self {
            state: ServerState::Listen,
        }
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    fn enter(&mut self, next: ServerState) {
        trace!(from = %self.state, to = %next, "socks server state");
        self.state = next;
    }

    /// Read the greeting and request. Unsupported commands and address types
    /// are answered with the matching reply before failing.
    pub async fn read_request<S>(&mut self, stream: &mut S) -> Result<SocksRequest>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.negotiate(stream).await;
        if result.is_err() {
            self.enter(ServerState::Failed);
        }
        result
    }

    async fn negotiate<S>(&mut self, stream: &mut S) -> Result<SocksRequest>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let version = stream
            .read_u8()
            .await
            .map_err(|e| NetError::from_io("greeting", e))?;

        let request = match version {
            SOCKS5_VERSION => {
                let methods = proto::read_methods(stream).await?;
                self.enter(ServerState::GreetingReceived);
                if !methods.contains(&METHOD_NO_AUTH) {
                    deliver(stream, &[SOCKS5_VERSION, METHOD_NONE_ACCEPTABLE]).await;
                    return Err(NetError::Protocol(
                        "client offered no acceptable method".into(),
                    ));
                }
                stream
                    .write_all(&[SOCKS5_VERSION, METHOD_NO_AUTH])
                    .await
                    .map_err(|e| NetError::from_io("method reply", e))?;
                stream
                    .flush()
                    .await
                    .map_err(|e| NetError::from_io("method reply", e))?;
                self.enter(ServerState::MethodReplied);

                match proto::read_request_v5(stream).await {
                    Ok(request) => request,
                    Err(e) => {
                        let reply = Reply::for_error(&e);
                        deliver(stream, &proto::encode_reply_v5(reply, None)).await;
                        return Err(e);
                    }
                }
            }
            SOCKS4_VERSION => proto::read_request_v4(stream).await?,
            other => {
                return Err(NetError::Protocol(format!(
                    "unsupported SOCKS version {other:#04x}"
                )))
            }
        };
        self.enter(ServerState::RequestReceived);

        if request.command != CMD_CONNECT {
            if let Err(e) = send_reply(stream, request.version, Reply::CommandNotSupported).await {
                debug!(error = %e, "could not deliver socks failure reply");
            }
            return Err(Reply::CommandNotSupported.into_error());
        }
        Ok(request)
    }

    /// Send the success reply and enter [`ServerState::Relaying`].
    pub async fn grant<S>(&mut self, stream: &mut S, version: SocksVersion) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if let Err(e) = send_reply(stream, version, Reply::Succeeded).await {
            self.enter(ServerState::Failed);
            return Err(e);
        }
        self.enter(ServerState::Relaying);
        Ok(())
    }

    /// Send the failure reply for `error` and enter [`ServerState::Failed`].
    pub async fn refuse<S>(&mut self, stream: &mut S, version: SocksVersion, error: &NetError)
    where
        S: AsyncWrite + Unpin,
    {
        let reply = Reply::for_error(error);
        if let Err(e) = send_reply(stream, version, reply).await {
            debug!(error = %e, "could not deliver socks failure reply");
        }
        self.enter(ServerState::Failed);
    }
}

/// Write and flush a failure answer; the session is failing either way.
async fn deliver<S>(stream: &mut S, bytes: &[u8])
where
    S: AsyncWrite + Unpin,
{
    let sent = match stream.write_all(bytes).await {
        Ok(()) => stream.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        debug!(error = %e, "could not deliver socks failure reply");
    }
}

async fn send_reply<S>(stream: &mut S, version: SocksVersion, reply: Reply) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bytes = match version {
        SocksVersion::V5 => proto::encode_reply_v5(reply, None),
        SocksVersion::V4 => proto::encode_reply_v4(reply == Reply::Succeeded).to_vec(),
    };
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| NetError::from_io("reply", e))?;
    stream
        .flush()
        .await
        .map_err(|e| NetError::from_io("reply", e))
}

/// Byte counts of a finished relay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the SOCKS client to the destination.
    pub client_to_target: u64,
    /// Bytes copied from the destination to the SOCKS client.
    pub target_to_client: u64,
}

/// Copy both directions until either side finishes, then shut down and drop
/// both sockets together.
pub async fn relay(
    client: Box<dyn NetSocket>,
    target: Box<dyn NetSocket>,
) -> Result<RelayStats> {
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);

    let mut stats = RelayStats::default();
    let outcome = {
        let up = copy_counted(&mut client_read, &mut target_write, &mut stats.client_to_target);
        let down = copy_counted(&mut target_read, &mut client_write, &mut stats.target_to_client);
        tokio::select! {
            r = up => r,
            r = down => r,
        }
    };

    if let Err(e) = target_write.shutdown().await {
        trace!(error = %e, "relay target shutdown");
    }
    if let Err(e) = client_write.shutdown().await {
        trace!(error = %e, "relay client shutdown");
    }
    drop((client_read, client_write, target_read, target_write));

    match outcome {
        Ok(()) => Ok(stats),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ) =>
        {
            Ok(stats)
        }
        Err(e) => Err(NetError::from_io("relay", e)),
    }
}

/// `tokio::io::copy` that keeps its count visible when cancelled.
async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, count: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return writer.flush().await;
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *count += n as u64;
    }
}

/// SOCKS server relaying to destinations opened on an outbound layer.
pub struct SocksServer {
    outbound: Arc<dyn NetLayer>,
    outbound_props: LayerProperties,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl SocksServer {
    /// Open destinations through `outbound`.
    pub fn new(outbound: Arc<dyn NetLayer>) -> Self {
        Self {
            outbound,
            outbound_props: LayerProperties::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Properties passed with every outbound `create_socket`.
    pub fn with_outbound_props(mut self, props: LayerProperties) -> Self {
        self.outbound_props = props;
        self
    }

    /// Bound on opening a destination.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on reading a client's greeting and request.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    async fn open(&self, destination: &NetAddress) -> Result<Box<dyn NetSocket>> {
        let connect = self
            .outbound
            .create_socket(&self.outbound_props, None, Some(destination));
        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| NetError::ConnectTimeout {
                target: destination.to_string(),
            })?
    }

    /// Run one session on `client`: negotiate, open the destination, relay.
    ///
    /// Returns once the relay has closed both sides.
    pub async fn serve_connection(&self, mut client: Box<dyn NetSocket>) -> Result<RelayStats> {
        let mut handshake = ServerHandshake::new();
        let request = tokio::time::timeout(
            self.handshake_timeout,
            handshake.read_request(&mut client),
        )
        .await
        .map_err(|_| handshake_expired(self.handshake_timeout))??;
        debug!(
            version = %request.version,
            destination = %request.destination,
            "socks request received"
        );

        let target = match self.open(&request.destination).await {
            Ok(target) => target,
            Err(e) => {
                warn!(destination = %request.destination, error = %e, "socks destination failed");
                handshake.refuse(&mut client, request.version, &e).await;
                return Err(e);
            }
        };
        handshake.grant(&mut client, request.version).await?;

        let stats = relay(client, target).await?;
        debug!(
            destination = %request.destination,
            up = stats.client_to_target,
            down = stats.target_to_client,
            "socks relay finished"
        );
        Ok(stats)
    }

    /// Accept connections from `listener` forever, one task per session.
    ///
    /// Returns only if accepting fails.
    pub async fn serve(self: Arc<Self>, mut listener: Box<dyn NetServerSocket>) -> Result<()> {
        info!(local = ?listener.local_address(), "socks server accepting");
        loop {
            let (client, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(client).await {
                    debug!(?peer, error = %e, "socks session ended with error");
                }
            });
        }
    }
}

fn handshake_expired(timeout: Duration) -> NetError {
    NetError::Protocol(format!("socks client did not finish negotiating within {timeout:?}"))
}

/// Layer whose server sockets terminate SOCKS and yield the negotiated
/// streams. Client sockets are not supported.
pub struct SocksServerLayer {
    listen: Arc<dyn NetLayer>,
    handshake_timeout: Duration,
}

impl SocksServerLayer {
    /// Accept SOCKS clients on server sockets of `listen`.
    pub fn new(listen: Arc<dyn NetLayer>) -> Self {
        Self {
            listen,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Bound on each client's negotiation.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl NetLayer for SocksServerLayer {
    async fn create_socket(
        &self,
        _props: &LayerProperties,
        _local: Option<&NetAddress>,
        _remote: Option<&NetAddress>,
    ) -> Result<Box<dyn NetSocket>> {
        Err(NetError::Unsupported(
            "socks server layer only creates server sockets".into(),
        ))
    }

    async fn create_server_socket(
        &self,
        props: &LayerProperties,
        local_listen: Option<&NetAddress>,
    ) -> Result<Box<dyn NetServerSocket>> {
        let (_, forwarded) = props.split_namespace("socks");
        let inner = self.listen.create_server_socket(&forwarded, local_listen).await?;
        Ok(Box::new(HandshakingServerSocket::spawn(
            inner,
            self.handshake_timeout,
            negotiate_destination,
        )))
    }

    fn status(&self) -> LayerStatus {
        self.listen.status()
    }

    async fn wait_until_ready(&self) {
        self.listen.wait_until_ready().await;
    }

    fn clear(&self) -> Result<()> {
        self.listen.clear()
    }

    fn name_service(&self) -> Arc<dyn NameResolver> {
        self.listen.name_service()
    }
}

/// Server side of [`SocksServerLayer`]: grant every CONNECT and report the
/// destination the client asked for.
async fn negotiate_destination(
    mut client: Box<dyn NetSocket>,
    peer: Option<NetAddress>,
) -> Result<(Box<dyn NetSocket>, Option<NetAddress>)> {
    let mut handshake = ServerHandshake::new();
    let request = handshake.read_request(&mut client).await?;
    handshake.grant(&mut client, request.version).await?;
    debug!(?peer, destination = %request.destination, "socks client granted");
    Ok((client, Some(request.destination)))
}

#[cfg(test)]
mod tests {
    use strata_net::layers::{EchoLayer, MockLayer};
    use strata_net::ReadinessTracker;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::client::{SocksClientLayer, VERSION_KEY};

    /// Lower layer that connects each client socket to a fresh in-process
    /// session of `server`.
    struct InProcessProxy {
        server: Arc<SocksServer>,
        status: ReadinessTracker,
    }

    impl InProcessProxy {
        fn new(server: SocksServer) -> Arc<Self> {
            Arc::new(Self {
                server: Arc::new(server),
                status: ReadinessTracker::ready(),
            })
        }
    }

    #[async_trait]
    impl NetLayer for InProcessProxy {
        async fn create_socket(
            &self,
            _props: &LayerProperties,
            _local: Option<&NetAddress>,
            _remote: Option<&NetAddress>,
        ) -> Result<Box<dyn NetSocket>> {
            let (near, far) = tokio::io::duplex(64 * 1024);
            let server = Arc::clone(&self.server);
            tokio::spawn(async move {
                let _ = server.serve_connection(Box::new(far)).await;
            });
            Ok(Box::new(near))
        }

        fn status(&self) -> LayerStatus {
            self.status.status()
        }

        async fn wait_until_ready(&self) {}

        fn clear(&self) -> Result<()> {
            Ok(())
        }

        fn name_service(&self) -> Arc<dyn NameResolver> {
            Arc::new(strata_net::resolve::NopResolver)
        }
    }

    async fn round_trip(version: u8) {
        let response: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        let outbound = Arc::new(MockLayer::new().with_response(response.clone()).hold_open());
        let proxy = InProcessProxy::new(SocksServer::new(outbound.clone()));
        let client = SocksClientLayer::new(proxy, NetAddress::tcpip("127.0.0.1", 1080));

        let props = LayerProperties::new().with(VERSION_KEY, version);
        let remote = NetAddress::tcpip("do.meins", 80);
        let mut socket = client
            .create_socket(&props, None, Some(&remote))
            .await
            .expect("established");

        let request: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
        socket.write_all(&request).await.expect("write");
        socket.shutdown().await.expect("shutdown");
        let mut got = Vec::new();
        socket.read_to_end(&mut got).await.expect("read");
        assert_eq!(got, response);

        let session = outbound.last_session().expect("outbound session");
        assert_eq!(session.remote, Some(remote));
        assert_eq!(session.written(), request);
    }

    #[tokio::test]
    async fn test_socks5_round_trip() {
        round_trip(5).await;
    }

    #[tokio::test]
    async fn test_socks4a_round_trip() {
        round_trip(4).await;
    }

    #[tokio::test]
    async fn test_destination_failure_replies_with_code() {
        let outbound = Arc::new(MockLayer::new().timing_out());
        let proxy = InProcessProxy::new(SocksServer::new(outbound));
        let client = SocksClientLayer::new(proxy, NetAddress::tcpip("127.0.0.1", 1080));
        let remote = NetAddress::tcpip("do.meins", 80);
        let err = client
            .create_socket(&LayerProperties::new(), None, Some(&remote))
            .await
            .err()
            .expect("failure reply");
        assert!(matches!(err, NetError::Rejected { code: 6, .. }));
    }

    #[tokio::test]
    async fn test_unsupported_command_is_answered() {
        let server = SocksServer::new(Arc::new(EchoLayer::new()));
        let (mut client, far) = tokio::io::duplex(1024);
        let session = tokio::spawn(async move { server.serve_connection(Box::new(far)).await });

        client.write_all(&[5, 1, 0]).await.expect("greeting");
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.expect("method");
        assert_eq!(method, [5, 0]);

        // BIND to 1.2.3.4:80
        client
            .write_all(&[5, 2, 0, 1, 1, 2, 3, 4, 0, 80])
            .await
            .expect("request");
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.expect("reply");
        assert_eq!(reply[1], Reply::CommandNotSupported.code());

        let result = session.await.expect("session task");
        assert!(matches!(result, Err(NetError::Rejected { code: 7, .. })));
    }

    #[tokio::test]
    async fn test_handshake_states() {
        let (mut client, mut far) = tokio::io::duplex(1024);
        let mut handshake = ServerHandshake::new();
        assert_eq!(handshake.state(), ServerState::Listen);

        client.write_all(&[5, 1, 0]).await.expect("greeting");
        client
            .write_all(&[5, 1, 0, 1, 10, 0, 0, 1, 0x1F, 0x90])
            .await
            .expect("request");
        let request = handshake.read_request(&mut far).await.expect("request");
        assert_eq!(handshake.state(), ServerState::RequestReceived);
        assert_eq!(request.destination, NetAddress::tcpip("10.0.0.1", 8080));

        handshake
            .grant(&mut far, request.version)
            .await
            .expect("grant");
        assert_eq!(handshake.state(), ServerState::Relaying);
    }

    #[tokio::test]
    async fn test_server_layer_yields_destination() {
        let listen = Arc::new(MockLayer::new());
        let layer = SocksServerLayer::new(listen.clone());
        let mut server = layer
            .create_server_socket(&LayerProperties::new(), None)
            .await
            .expect("server socket");

        // A client that connects and never speaks comes first.
        let (silent, _silent_peer) = tokio::io::duplex(1024);
        listen.inject_connection(Box::new(silent)).expect("inject silent");
        let (near, far) = tokio::io::duplex(1024);
        listen.inject_connection(Box::new(far)).expect("inject");
        let client = SocksClientLayer::new(
            Arc::new(SingleSocketLayer::new(Box::new(near))),
            NetAddress::tcpip("127.0.0.1", 1080),
        );
        let remote = NetAddress::tcpip("do.meins", 80);

        let props = LayerProperties::new();
        let (client_side, accepted) = tokio::join!(
            client.create_socket(&props, None, Some(&remote)),
            server.accept()
        );
        let mut client_side = client_side.expect("client");
        let (mut accepted, destination) = accepted.expect("accepted");
        assert_eq!(destination, Some(remote));

        client_side.write_all(b"hi").await.expect("write");
        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"hi");

        assert!(matches!(
            layer.create_socket(&LayerProperties::new(), None, None).await,
            Err(NetError::Unsupported(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_layer_drops_stalled_client_after_timeout() {
        let listen = Arc::new(MockLayer::new());
        let layer =
            SocksServerLayer::new(listen.clone()).with_handshake_timeout(Duration::from_secs(3));
        let _server = layer
            .create_server_socket(&LayerProperties::new(), None)
            .await
            .expect("server socket");

        let (stalled, mut peer) = tokio::io::duplex(1024);
        listen.inject_connection(Box::new(stalled)).expect("inject");
        peer.write_all(&[5, 1]).await.expect("half a greeting");

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), peer.read_to_end(&mut rest))
            .await
            .expect("dropped within the handshake timeout")
            .expect("eof");
        assert!(rest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_session_ends_after_handshake_timeout() {
        let server = SocksServer::new(Arc::new(EchoLayer::new()))
            .with_handshake_timeout(Duration::from_secs(2));
        let (_client, far) = tokio::io::duplex(1024);

        let err = server
            .serve_connection(Box::new(far))
            .await
            .err()
            .expect("handshake expired");
        assert!(matches!(err, NetError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_relay_closes_both_sides_when_client_leaves() {
        // The destination end stays open for the whole test.
        let (destination, mut destination_peer) = tokio::io::duplex(1024);
        let server = SocksServer::new(Arc::new(SingleSocketLayer::new(Box::new(destination))));
        let (mut client, far) = tokio::io::duplex(1024);
        let session = tokio::spawn(async move { server.serve_connection(Box::new(far)).await });

        client.write_all(&[5, 1, 0]).await.expect("greeting");
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.expect("method");
        client
            .write_all(&[5, 1, 0, 1, 10, 0, 0, 1, 0, 80])
            .await
            .expect("request");
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.expect("reply");
        assert_eq!(reply[1], Reply::Succeeded.code());

        client.write_all(b"bye").await.expect("payload");
        let mut got = [0u8; 3];
        destination_peer.read_exact(&mut got).await.expect("relayed");
        assert_eq!(&got, b"bye");
        drop(client);

        let stats = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("relay ended with the client")
            .expect("session task")
            .expect("clean relay");
        assert_eq!(stats.client_to_target, 3);

        // The destination was shut down too.
        let mut rest = Vec::new();
        destination_peer.read_to_end(&mut rest).await.expect("eof");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_relay_closes_client_when_destination_leaves() {
        let (destination, destination_peer) = tokio::io::duplex(1024);
        let server = SocksServer::new(Arc::new(SingleSocketLayer::new(Box::new(destination))));
        let (mut client, far) = tokio::io::duplex(1024);
        let session = tokio::spawn(async move { server.serve_connection(Box::new(far)).await });

        client.write_all(&[5, 1, 0]).await.expect("greeting");
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.expect("method");
        client
            .write_all(&[5, 1, 0, 1, 10, 0, 0, 1, 0, 80])
            .await
            .expect("request");
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.expect("reply");

        // The destination closes while the client is parked in a read.
        let reader = tokio::spawn(async move {
            let mut rest = Vec::new();
            client.read_to_end(&mut rest).await.map(|_| rest)
        });
        drop(destination_peer);

        let rest = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("client read unblocked")
            .expect("reader task")
            .expect("eof");
        assert!(rest.is_empty());
        session.await.expect("session task").expect("clean relay");
    }

    #[tokio::test]
    async fn test_method_refusal_is_flushed() {
        let (mut client, far) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            let mut stream = tokio::io::BufStream::new(far);
            let failed = ServerHandshake::new().read_request(&mut stream).await.is_err();
            (failed, stream)
        });

        // Only username/password offered.
        client.write_all(&[5, 1, 2]).await.expect("greeting");
        let mut answer = [0u8; 2];
        client.read_exact(&mut answer).await.expect("refusal delivered");
        assert_eq!(answer, [SOCKS5_VERSION, METHOD_NONE_ACCEPTABLE]);

        let (failed, _stream) = server.await.expect("server task");
        assert!(failed);
    }

    #[tokio::test]
    async fn test_command_refusal_is_flushed() {
        let (mut client, far) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            let mut stream = tokio::io::BufStream::new(far);
            let result = ServerHandshake::new().read_request(&mut stream).await;
            (result.err(), stream)
        });

        client.write_all(&[5, 1, 0]).await.expect("greeting");
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.expect("method");
        // UDP ASSOCIATE to 1.2.3.4:80
        client
            .write_all(&[5, 3, 0, 1, 1, 2, 3, 4, 0, 80])
            .await
            .expect("request");
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.expect("refusal delivered");
        assert_eq!(reply[1], Reply::CommandNotSupported.code());

        let (err, _stream) = server.await.expect("server task");
        assert!(matches!(err, Some(NetError::Rejected { code: 7, .. })));
    }

    /// Lower layer handing out one pre-connected socket.
    struct SingleSocketLayer {
        socket: std::sync::Mutex<Option<Box<dyn NetSocket>>>,
    }

    impl SingleSocketLayer {
        fn new(socket: Box<dyn NetSocket>) -> Self {
            Self {
                socket: std::sync::Mutex::new(Some(socket)),
            }
        }
    }

    #[async_trait]
    impl NetLayer for SingleSocketLayer {
        async fn create_socket(
            &self,
            _props: &LayerProperties,
            _local: Option<&NetAddress>,
            _remote: Option<&NetAddress>,
        ) -> Result<Box<dyn NetSocket>> {
            self.socket
                .lock()
                .expect("lock")
                .take()
                .ok_or_else(|| NetError::Closed("socket already used".into()))
        }

        fn status(&self) -> LayerStatus {
            LayerStatus::Ready
        }

        async fn wait_until_ready(&self) {}

        fn clear(&self) -> Result<()> {
            Ok(())
        }

        fn name_service(&self) -> Arc<dyn NameResolver> {
            Arc::new(strata_net::resolve::NopResolver)
        }
    }
}
