use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use storeftp::Server;
use storeftp::config::ServerConfig;
use storeftp::error::{ResolveError, ServerError, TransferError};
use storeftp::server::{PortRange, ServerSettings};
use storeftp::storage::MemoryBackend;
use storeftp::transfer::TransferMode;

fn test_settings(listen_port: u16) -> ServerSettings {
    ServerSettings {
        listen_host: "127.0.0.1".into(),
        listen_port,
        passive_ports: PortRange::new(40000, 60000),
    }
}

fn test_server() -> Server {
    Server::with_storage(test_settings(0), Arc::new(MemoryBackend::new()))
}

fn test_config(storage: &str) -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".into(),
        control_port: 0,
        data_port_min: 40000,
        data_port_max: 60000,
        storage: storage.into(),
    }
}

#[test]
fn stop_before_start_is_a_no_op() {
    let server = test_server();
    server.stop();
    server.stop();
    assert!(!server.is_listening());
    assert_eq!(server.local_addr(), None);
}

#[tokio::test]
async fn stop_twice_after_start() {
    let server = test_server();
    server.start().await.unwrap();
    assert!(server.is_listening());

    server.stop();
    server.stop();
    assert!(!server.is_listening());
}

#[tokio::test]
async fn accept_before_start_reports_not_started() {
    let server = test_server();
    assert!(matches!(
        server.accept_client().await,
        Err(ServerError::NotStarted)
    ));
}

#[tokio::test]
async fn accept_returns_stream_and_peer_address() {
    let server = test_server();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let (accepted, client) = tokio::join!(server.accept_client(), TcpStream::connect(addr));
    let (mut stream, peer) = accepted.unwrap();
    let mut client = client.unwrap();
    assert_eq!(peer, client.local_addr().unwrap().to_string());

    stream.write_all(b"220 hello\r\n").await.unwrap();
    let mut buf = [0u8; 11];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"220 hello\r\n");
}

#[tokio::test]
async fn blocked_accept_returns_after_stop() {
    let server = Arc::new(test_server());
    server.start().await.unwrap();

    let accepting = Arc::clone(&server);
    let pending = tokio::spawn(async move { accepting.accept_client().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    server.stop();

    let result = timeout(Duration::from_secs(2), pending)
        .await
        .expect("accept did not return after stop")
        .unwrap();
    assert!(matches!(result, Err(ServerError::ListenerClosed)));
}

#[tokio::test]
async fn restart_binds_a_fresh_listener() {
    let server = test_server();
    server.start().await.unwrap();
    server.stop();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let (accepted, client) = tokio::join!(server.accept_client(), TcpStream::connect(addr));
    assert!(accepted.is_ok());
    assert!(client.is_ok());
}

#[tokio::test]
async fn second_start_replaces_listener() {
    let server = test_server();
    server.start().await.unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let (accepted, client) = tokio::join!(server.accept_client(), TcpStream::connect(addr));
    assert!(accepted.is_ok());
    assert!(client.is_ok());
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn second_start_reuses_fixed_port() {
    let port = free_port().await;
    let server = Server::with_storage(test_settings(port), Arc::new(MemoryBackend::new()));
    server.start().await.unwrap();
    server.start().await.unwrap();
    assert_eq!(server.local_addr().unwrap().port(), port);

    let (accepted, client) =
        tokio::join!(server.accept_client(), TcpStream::connect(("127.0.0.1", port)));
    assert!(accepted.is_ok());
    assert!(client.is_ok());
}

#[tokio::test]
async fn restart_on_fixed_port_while_accept_is_blocked() {
    let port = free_port().await;
    let server = Arc::new(Server::with_storage(
        test_settings(port),
        Arc::new(MemoryBackend::new()),
    ));
    server.start().await.unwrap();

    let accepting = Arc::clone(&server);
    let pending = tokio::spawn(async move { accepting.accept_client().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.stop();
    server.start().await.unwrap();
    let result = timeout(Duration::from_secs(2), pending)
        .await
        .expect("accept did not return after stop")
        .unwrap();
    assert!(matches!(result, Err(ServerError::ListenerClosed)));

    let pending = {
        let accepting = Arc::clone(&server);
        tokio::spawn(async move { accepting.accept_client().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.start().await.unwrap();
    let result = timeout(Duration::from_secs(2), pending)
        .await
        .expect("accept did not return after restart")
        .unwrap();
    assert!(matches!(result, Err(ServerError::ListenerClosed)));
    assert_eq!(server.local_addr().unwrap().port(), port);
}

#[tokio::test]
async fn start_fails_when_control_port_is_taken() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let server = Server::with_storage(test_settings(port), Arc::new(MemoryBackend::new()));
    match server.start().await {
        Err(ServerError::Bind(addr, _)) => assert_eq!(addr, format!("127.0.0.1:{port}")),
        other => panic!("expected bind failure, got {:?}", other.err()),
    }
    assert!(!server.is_listening());
}

#[test]
fn unknown_backend_prevents_construction() {
    match Server::new(&test_config("s3://bucket")) {
        Err(ServerError::Storage(ResolveError::UnknownBackend(name))) => assert_eq!(name, "s3"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("server built without storage"),
    }
}

#[test]
fn storage_handle_is_shared() {
    let server = Server::new(&test_config("memory://")).unwrap();
    assert_eq!(server.storager().name(), "memory");
    assert!(Arc::ptr_eq(&server.storager(), &server.storager()));
    assert_eq!(server.setting().passive_ports, PortRange::new(40000, 60000));
    assert!(server.start_time() <= std::time::SystemTime::now());
}

#[tokio::test]
async fn passive_handler_carries_bytes() {
    let server = test_server();
    let range = server.setting().passive_ports;
    let (handler, port) = server
        .passive_transfer_factory("127.0.0.1", &range)
        .await
        .unwrap();
    assert!(range.contains(port));
    assert_eq!(handler.mode(), TransferMode::Passive);

    let (data, client) = tokio::join!(handler.open(), TcpStream::connect(("127.0.0.1", port)));
    let mut data = data.unwrap();
    let mut client = client.unwrap();

    client.write_all(b"file bytes").await.unwrap();
    client.shutdown().await.unwrap();
    let mut received = Vec::new();
    data.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"file bytes");
}

#[tokio::test]
async fn active_handler_connects_back() {
    let server = test_server();
    let client_data = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = client_data.local_addr().unwrap();

    let handler = server.active_transfer_factory(target);
    assert_eq!(handler.mode(), TransferMode::Active);

    let (data, accepted) = tokio::join!(handler.open(), client_data.accept());
    let mut data = data.unwrap();
    let (mut client, _) = accepted.unwrap();

    data.write_all(b"listing").await.unwrap();
    data.shutdown().await.unwrap();
    let mut received = String::new();
    client.read_to_string(&mut received).await.unwrap();
    assert_eq!(received, "listing");
}

#[tokio::test]
async fn active_handler_reports_refused_connection() {
    let server = test_server();
    let target = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    match server.active_transfer_factory(target).open().await {
        Err(TransferError::Connect(addr, _)) => assert_eq!(addr, target),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("connected to a closed port"),
    }
}
