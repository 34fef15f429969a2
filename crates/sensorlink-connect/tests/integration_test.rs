//! Integration tests for sensorlink-connect
//!
//! These run against a loopback listener; no external collector is needed.

use sensorlink_connect::{ConnectError, ConnectOptions, Connection};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn test_receive_returns_collector_reply() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut greeting = [0u8; 12];
        socket.read_exact(&mut greeting).await.unwrap();
        socket.write_all(b"Hello Client").await.unwrap();
        // Hold the socket open until the client leaves
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest).await;
    });

    let conn = Connection::connect("127.0.0.1", port, &ConnectOptions::default())
        .await
        .unwrap();
    conn.send(b"Hello Server").await.unwrap();

    let reply = conn.receive().await.unwrap();
    assert_eq!(&reply[..], b"Hello Client");
    assert_eq!(conn.remote_addr().port(), port);

    conn.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_cancels_pending_receive() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();
        rest
    });

    let conn = Arc::new(
        Connection::connect("127.0.0.1", port, &ConnectOptions::default())
            .await
            .unwrap(),
    );

    let pending = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.receive().await })
    };

    // Give the receive a chance to park on the socket
    tokio::time::sleep(Duration::from_millis(50)).await;
    conn.disconnect().await;

    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("receive should resolve once disconnected")
        .unwrap();
    assert!(matches!(outcome, Err(ConnectError::Disconnected)));

    // The collector observes a clean EOF with nothing written
    assert!(server.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop so the port is very likely closed
    let port = {
        let (listener, port) = bind().await;
        drop(listener);
        port
    };

    let result = Connection::connect("127.0.0.1", port, &ConnectOptions::default()).await;
    match result {
        Err(ConnectError::Connect { address, .. }) => {
            assert_eq!(address, format!("127.0.0.1:{}", port))
        }
        other => panic!("expected connect failure, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_sends_are_serialized() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });

    let conn = Arc::new(
        Connection::connect("127.0.0.1", port, &ConnectOptions::default())
            .await
            .unwrap(),
    );

    let big = vec![b'a'; 256 * 1024];
    let writer = {
        let conn = Arc::clone(&conn);
        let big = big.clone();
        tokio::spawn(async move { conn.send(&big).await })
    };
    tokio_test::assert_ok!(writer.await.unwrap());
    tokio_test::assert_ok!(conn.send(b"tail").await);
    conn.disconnect().await;

    let received = server.await.unwrap();
    assert_eq!(received.len(), big.len() + 4);
    assert_eq!(&received[big.len()..], b"tail");
}
