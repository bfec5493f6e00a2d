//! Raw-socket handshake scenario: a minimal stand-in server speaks the
//! version-negotiation and property exchange, confirming the client reaches
//! `TransactionStarted` without a real NiFi instance on the other end.

use s2s_client::peer::Peer;
use s2s_client::transaction::tcp::TcpTransaction;
use s2s_client::transaction::TransactionState;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn read_u32(stream: &mut tokio::net::TcpStream) -> u32 {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    u32::from_be_bytes(buf)
}

async fn read_string(stream: &mut tokio::net::TcpStream) -> String {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    String::from_utf8(buf).unwrap()
}

#[tokio::test]
async fn s5_tcp_handshake_reaches_transaction_started() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, b"NiFi");

        let client_version = read_u32(&mut stream).await;
        assert_eq!(client_version, 5);
        stream.write_all(&[20]).await.unwrap(); // MORE_DATA: version accepted

        let property_count = read_u32(&mut stream).await;
        let mut properties = Vec::new();
        for _ in 0..property_count {
            let key = read_string(&mut stream).await;
            let value = read_string(&mut stream).await;
            properties.push((key, value));
        }
        assert!(properties.iter().any(|(k, v)| k == "PORT_IDENTIFIER" && v == "P"));
        assert!(properties.iter().any(|(k, v)| k == "GZIP" && v == "false"));

        stream.write_all(&[1]).await.unwrap(); // PROPERTIES_OK
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let peer = Peer::new(addr.ip().to_string(), Some(addr.port()), false, 0).unwrap();

    let txn = TcpTransaction::create(stream, peer, "P", Duration::from_secs(5), None, None, None)
        .await
        .unwrap();

    assert_eq!(txn.state(), TransactionState::TransactionStarted);
    server.await.unwrap();
}

#[tokio::test]
async fn s5_tcp_handshake_rejects_unsupported_server_version() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic).await.unwrap();
        let _client_version = read_u32(&mut stream).await;

        // NO_MORE_DATA followed by a version higher than the client supports.
        stream.write_all(&[21]).await.unwrap();
        stream.write_all(&99u32.to_be_bytes()).await.unwrap();
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let peer = Peer::new(addr.ip().to_string(), Some(addr.port()), false, 0).unwrap();

    let result = TcpTransaction::create(stream, peer, "P", Duration::from_secs(5), None, None, None).await;
    assert!(result.is_err());
    server.await.unwrap();
}
