//! Drives one real client/server handshake over a loopback TCP socket,
//! matching the teacher's `start_tcp_stream()` helper
//! (`server/src/test/mod.rs`): bind port 0 so the OS assigns a free port,
//! then connect a real client against it.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use wsproto_core::{connect_plain, serve, Driver, EngineConfig, TcpTransport, Update};

async fn start_tcp_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[test_log::test(tokio::test)]
async fn client_and_server_complete_the_handshake() {
    let (listener, port) = start_tcp_listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(serve(
        listener,
        EngineConfig::default(),
        Duration::from_secs(1),
        tx,
        |stream, _addr| async move { Ok(TcpTransport::new(stream)) },
    ));

    let client_engine = connect_plain(("127.0.0.1", port), "localhost", port, "/chat", EngineConfig::default())
        .await
        .expect("client failed to connect");
    let mut client_driver: Driver<TcpTransport> = Driver::new();
    client_driver.insert(client_engine);

    let server_event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for the server to see the handshake")
        .expect("server event channel closed");
    assert_eq!(server_event, Update::NewConnection(0));

    let client_updates = tokio::time::timeout(Duration::from_secs(2), client_driver.run_cycle())
        .await
        .expect("timed out waiting for the client handshake to complete");
    assert_eq!(client_updates, vec![Update::ConnectionAccepted(0)]);
}

#[test_log::test(tokio::test)]
async fn server_denies_a_non_websocket_request() {
    let (listener, port) = start_tcp_listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(serve(
        listener,
        EngineConfig::default(),
        Duration::from_secs(1),
        tx,
        |stream, _addr| async move { Ok(TcpTransport::new(stream)) },
    ));

    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("failed to connect");
    use tokio::io::AsyncWriteExt;
    let mut stream = stream;
    stream
        .write_all(b"GET /chat HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let server_event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for the server to reject the request")
        .expect("server event channel closed");
    assert_eq!(server_event, Update::HandshakeFailure(0));
}
