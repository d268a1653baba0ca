//! Integration test: multi-layer stacks.
//!
//! Verifies that each layer strips its own property namespace on the way
//! down, that a timeout deep in the stack is reported against the address
//! the caller asked for, and that stacks assembled through the registry
//! carry real traffic.

use std::sync::Arc;

use strata_net::layers::buffered::CAPACITY_KEY;
use strata_net::layers::logging::LABEL_KEY;
use strata_net::layers::{BufferedLayer, ForwardingLayer, LoggingLayer, MockLayer, TcpipLayer};
use strata_net::registry::NetRegistry;
use strata_net::{LayerProperties, NetAddress, NetError, NetLayer, NetLayerId};
use strata_socks::client::VERSION_KEY;
use strata_socks::proto::{encode_reply_v5, Reply};
use strata_socks::{SocksClientLayer, SocksServerLayer};
use strata_tls::{TlsLayer, CIPHER_SUITES_KEY};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn socks5_script(payload: &[u8]) -> Vec<u8> {
    let mut script = vec![5, 0];
    script.extend(encode_reply_v5(Reply::Succeeded, None));
    script.extend_from_slice(payload);
    script
}

#[tokio::test]
async fn test_each_layer_strips_its_namespace() {
    let mock = Arc::new(MockLayer::new().with_response(socks5_script(b"hi")));
    let logging = Arc::new(LoggingLayer::new(mock.clone(), "bottom"));
    let buffered = Arc::new(BufferedLayer::new(logging));
    let proxy = NetAddress::tcpip("127.0.0.1", 9050);
    let stack = SocksClientLayer::new(buffered, proxy.clone());

    let props = LayerProperties::new()
        .with(VERSION_KEY, 5u8)
        .with(CAPACITY_KEY, 256usize)
        .with(LABEL_KEY, "composition".to_string())
        .with("tcpip.timeout_ms", 2000u64);
    let remote = NetAddress::tcpip("destination.test", 443);

    let mut socket = stack
        .create_socket(&props, None, Some(&remote))
        .await
        .expect("stack connect");
    let mut got = Vec::new();
    socket.read_to_end(&mut got).await.expect("read");
    assert_eq!(got, b"hi");

    let session = mock.last_session().expect("session");
    assert_eq!(session.remote, Some(proxy));
    assert_eq!(session.property_keys, vec!["tcpip.timeout_ms".to_string()]);
    // The greeting went out despite the buffering layer in between.
    assert_eq!(&session.written()[..3], &[5, 1, 0]);
}

#[tokio::test]
async fn test_deep_timeout_restated_for_requested_destination() {
    let mock = Arc::new(MockLayer::new().timing_out());
    let socks = Arc::new(SocksClientLayer::new(
        mock,
        NetAddress::tcpip("127.0.0.1", 9050),
    ));
    let stack = TlsLayer::new(socks);
    let remote = NetAddress::tcpip("slow.example", 443);

    let err = stack
        .create_socket(&LayerProperties::new(), None, Some(&remote))
        .await
        .err()
        .expect("timeout");
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "connect timed out to slow.example:443");
}

#[tokio::test]
async fn test_upper_layer_config_error_stops_before_lower_layers() {
    let mock = Arc::new(MockLayer::new());
    let socks = Arc::new(SocksClientLayer::new(
        mock.clone(),
        NetAddress::tcpip("127.0.0.1", 9050),
    ));
    let stack = TlsLayer::new(socks);
    let props = LayerProperties::new().with(CIPHER_SUITES_KEY, vec!["TLS_NOT_A_SUITE".to_string()]);
    let remote = NetAddress::tcpip("example.com", 443);

    let err = stack
        .create_socket(&props, None, Some(&remote))
        .await
        .err()
        .expect("bad suite");
    assert!(matches!(err, NetError::Tls(_)));
    assert!(mock.sessions().is_empty());
}

#[tokio::test]
async fn test_socks_server_layer_yields_requested_destination() {
    let listen = SocksServerLayer::new(Arc::new(TcpipLayer::new()));
    let mut listener = listen
        .create_server_socket(&LayerProperties::new(), None)
        .await
        .expect("listen");
    let proxy = listener.local_address().expect("address");

    let acceptor = tokio::spawn(async move {
        let (mut socket, destination) = listener.accept().await.expect("accept");
        let destination = destination.expect("destination");
        socket
            .write_all(destination.to_string().as_bytes())
            .await
            .expect("write");
        socket.shutdown().await.expect("shutdown");
        destination
    });

    let client = SocksClientLayer::new(Arc::new(TcpipLayer::new()), proxy);
    let remote = NetAddress::tcpip("hidden.test", 8080);
    let mut socket = client
        .create_socket(&LayerProperties::new(), None, Some(&remote))
        .await
        .expect("granted");
    let mut got = String::new();
    socket.read_to_string(&mut got).await.expect("read");

    assert_eq!(got, "hidden.test:8080");
    assert_eq!(acceptor.await.expect("join"), remote);
}

#[tokio::test]
async fn test_registry_built_stack_carries_traffic() {
    let target = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let target_addr = NetAddress::from(target.local_addr().expect("addr"));
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = target.accept().await {
            let mut buf = [0u8; 5];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
            }
        }
    });

    let registry = NetRegistry::new();
    registry.register(NetLayerId::Tcpip, &[], |_| {
        Ok(Arc::new(TcpipLayer::new()) as Arc<dyn NetLayer>)
    });
    let destination = target_addr.clone();
    let fixed = NetLayerId::Custom("fixed_forwarding");
    registry.register(fixed, &[NetLayerId::Tcpip], move |deps| {
        let lower = deps
            .first()
            .cloned()
            .ok_or_else(|| NetError::InvalidArgument("missing lower layer".into()))?;
        let logged = Arc::new(LoggingLayer::new(lower, "fixed"));
        Ok(Arc::new(ForwardingLayer::new(logged, destination.clone())) as Arc<dyn NetLayer>)
    });

    let stack = registry.get(fixed).expect("built");
    assert!(registry.is_built(NetLayerId::Tcpip));

    // The forwarding layer ignores where the caller asked to go.
    let elsewhere = NetAddress::tcpip("unused.test", 1);
    let mut socket = stack
        .create_socket(&LayerProperties::new(), None, Some(&elsewhere))
        .await
        .expect("connect");
    socket.write_all(b"strat").await.expect("write");
    let mut got = [0u8; 5];
    socket.read_exact(&mut got).await.expect("read");
    assert_eq!(&got, b"strat");
}
