//! Outbound queue consumer behaviour over the mock socket.

mod common;

use std::{io, sync::Arc};

use common::{patterned, small_blocks};
use dbwire::{Delivery, OutboundBody, OutboundQueue, TransportConfig, TransportError};
use dbwire_testing::{TestResult, open_mock, send_expect};
use rstest::rstest;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[rstest]
#[tokio::test]
async fn messages_are_framed_by_send_block(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::for_connection(connection);
    queue.open().await?;

    for len in [5, 4, 5] {
        send_expect!(handle.enqueue(patterned(len)));
    }
    peer.wait_for_frames(6).await;

    assert_eq!(
        peer.sent_shapes(),
        vec![
            (4, false),
            (1, true),
            (4, false),
            (0, true),
            (4, false),
            (1, true),
        ]
    );
    assert_eq!(
        peer.sent_messages(),
        vec![patterned(5), patterned(4), patterned(5)]
    );
    queue.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn tracked_messages_report_delivery(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, _peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::new(connection, 8);
    queue.open().await?;

    let receipt = send_expect!(handle.enqueue_tracked(patterned(9)));
    assert_eq!(receipt.wait().await, Delivery::Delivered { frames: 3 });
    queue.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn open_and_close_are_checked(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, _peer) = open_mock(small_blocks).await?;
    let (queue, _handle) = OutboundQueue::new(connection, 8);

    assert!(matches!(queue.close().await, Err(TransportError::NotOpen)));
    assert!(queue.stopped().is_none());

    queue.open().await?;
    assert!(queue.is_open());
    assert!(matches!(queue.open().await, Err(TransportError::AlreadyOpen)));

    queue.close().await?;
    assert!(!queue.is_open());
    assert!(queue.stopped().is_some_and(|t| t.is_cancelled()));
    assert!(matches!(queue.close().await, Err(TransportError::NotOpen)));

    queue.open().await?;
    assert!(queue.is_open());
    queue.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_open_and_close_run_one_loop(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, _peer) = open_mock(small_blocks).await?;
    let (queue, _handle) = OutboundQueue::new(connection, 8);
    let queue = Arc::new(queue);

    let opens: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.open().await })
        })
        .collect();
    let mut opened = 0;
    for task in opens {
        match task.await? {
            Ok(()) => opened += 1,
            Err(TransportError::AlreadyOpen) => {}
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(opened, 1);

    let stopped = queue.stopped().ok_or("no stop token")?;
    let closes: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.close().await })
        })
        .collect();
    let mut closed = 0;
    for task in closes {
        match task.await? {
            Ok(()) => {
                closed += 1;
                assert!(stopped.is_cancelled(), "close returned before the loop stopped");
            }
            Err(TransportError::NotOpen) => {}
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(closed, 1);
    assert!(!queue.is_open());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn queued_messages_wait_for_the_next_open(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::new(connection, 8);

    send_expect!(handle.enqueue(&b"ab"[..]));
    queue.open().await?;
    peer.wait_for_frames(1).await;
    queue.close().await?;

    send_expect!(handle.enqueue(&b"cd"[..]));
    assert_eq!(peer.sent_messages(), vec![b"ab".to_vec()]);

    queue.open().await?;
    peer.wait_for_frames(2).await;
    assert_eq!(peer.sent_messages(), vec![b"ab".to_vec(), b"cd".to_vec()]);
    queue.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn cancellation_mid_message_terminates_it(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::new(connection, 8);
    queue.open().await?;

    let (mut source, reader) = tokio::io::duplex(64);
    let receipt = send_expect!(handle.enqueue_tracked(OutboundBody::reader(reader)));
    source.write_all(b"1234").await?;
    peer.wait_for_frames(1).await;

    queue.close().await?;
    assert_eq!(receipt.wait().await, Delivery::Interrupted { frames: 1 });
    assert_eq!(peer.sent_shapes(), vec![(4, false), (0, true)]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn send_failures_stop_the_loop(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::new(connection, 8);
    queue.open().await?;
    let stopped = queue.stopped().ok_or("no stop token")?;

    peer.fail_sends(io::ErrorKind::BrokenPipe);
    let receipt = send_expect!(handle.enqueue_tracked(&b"doomed"[..]));
    assert_eq!(receipt.wait().await, Delivery::Failed);

    stopped.cancelled().await;
    assert!(!queue.is_open());
    let err = queue.close().await.expect_err("loop error is returned");
    assert!(matches!(err, TransportError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn a_stopped_loop_is_reaped_on_open(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::new(connection, 8);
    queue.open().await?;
    let first = queue.stopped().ok_or("no stop token")?;

    peer.fail_sends(io::ErrorKind::BrokenPipe);
    send_expect!(handle.enqueue(&b"doomed"[..]));
    first.cancelled().await;

    queue.open().await?;
    assert!(queue.is_open());
    queue.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn closed_connections_stop_the_loop(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, _peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::new(connection.clone(), 8);
    connection.close(&CancellationToken::new()).await?;
    queue.open().await?;

    let receipt = send_expect!(handle.enqueue_tracked(&b"late"[..]));
    assert_eq!(receipt.wait().await, Delivery::Interrupted { frames: 0 });
    assert!(matches!(queue.close().await, Err(TransportError::NotOpen)));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn dropping_the_queue_leaves_messages_undelivered(
    small_blocks: TransportConfig,
) -> TestResult {
    let (connection, _connector, _peer) = open_mock(small_blocks).await?;
    let (queue, handle) = OutboundQueue::new(connection, 8);
    let receipt = send_expect!(handle.enqueue_tracked(&b"never"[..]));

    drop(queue);
    assert_eq!(receipt.wait().await, Delivery::Undelivered);
    assert!(handle.is_closed());
    assert!(matches!(
        handle.enqueue(&b"x"[..]).await,
        Err(TransportError::QueueClosed)
    ));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn try_enqueue_reports_a_full_queue(small_blocks: TransportConfig) -> TestResult {
    let (connection, _connector, _peer) = open_mock(small_blocks).await?;
    let (_queue, handle) = OutboundQueue::new(connection, 1);

    handle.try_enqueue(&b"one"[..])?;
    assert!(matches!(
        handle.try_enqueue(&b"two"[..]),
        Err(TransportError::QueueFull)
    ));
    Ok(())
}
