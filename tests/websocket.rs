//! End-to-end checks of the WebSocket adapter against a loopback server.

mod common;

use std::net::{Ipv4Addr, SocketAddr};

use common::{patterned, read_all};
use dbwire::{Connection, OutboundBody, TransportConfig, WebSocketConnector};
use dbwire_testing::{TestResult, recv_expect, response_message, send_expect};
use futures::{SinkExt, StreamExt};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Accept one WebSocket client, send `outbound`, then collect messages until
/// the client closes.
async fn serve_once(outbound: Vec<Vec<u8>>) -> TestResult<(String, JoinHandle<TestResult<Vec<Vec<u8>>>>)> {
    let listener = TcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).await?;
    let address = format!("ws://{}", listener.local_addr()?);
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut ws = accept_async(stream).await?;
        for message in outbound {
            ws.send(Message::binary(message)).await?;
        }
        let mut received = Vec::new();
        while let Some(message) = ws.next().await {
            match message? {
                Message::Binary(bytes) => received.push(bytes.to_vec()),
                Message::Close(_) => break,
                _ => {}
            }
        }
        TestResult::Ok(received)
    });
    Ok((address, server))
}

fn config() -> TransportConfig {
    TransportConfig::default()
        .with_receive_block_size(32)
        .with_send_block_size(8)
}

#[tokio::test]
async fn messages_round_trip_over_a_real_socket() -> TestResult {
    let payload = patterned(100);
    let (address, server) = serve_once(vec![
        response_message("small", false, b"hi"),
        response_message("large", false, &payload),
    ])
    .await?;

    let cancel = CancellationToken::new();
    let connection = Connection::builder(WebSocketConnector)
        .config(config())
        .build()?;
    connection.open(&address, &cancel).await?;

    let mut small = recv_expect!(connection.receive_one(&cancel));
    assert_eq!(small.id(), "small");
    assert!(small.body().is_buffered());
    assert_eq!(read_all(small.body()).await?, b"hi");

    let mut large = recv_expect!(connection.receive_one(&cancel));
    assert_eq!(large.id(), "large");
    assert!(!large.body().is_buffered());
    assert_eq!(read_all(large.body()).await?, payload);

    send_expect!(connection.send_one(&b"contiguous"[..], &cancel));
    let streamed = patterned(8 * 3);
    send_expect!(connection.send_one(
        OutboundBody::reader(std::io::Cursor::new(streamed.clone())),
        &cancel
    ));
    connection.close(&cancel).await?;

    let received = server.await??;
    assert_eq!(received, vec![b"contiguous".to_vec(), streamed]);
    Ok(())
}

#[tokio::test]
async fn server_close_is_observed() -> TestResult {
    let listener = TcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).await?;
    let address = format!("ws://{}", listener.local_addr()?);
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut ws = accept_async(stream).await?;
        ws.close(None).await?;
        TestResult::Ok(())
    });

    let cancel = CancellationToken::new();
    let connection = Connection::builder(WebSocketConnector).build()?;
    connection.open(&address, &cancel).await?;

    assert!(connection.receive_one(&cancel).await?.is_none());
    assert_eq!(connection.state(), dbwire::ConnectionState::Closed);
    server.await??;
    Ok(())
}
