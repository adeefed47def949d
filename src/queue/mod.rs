//! Single-writer outbound queue.
//!
//! Producers queue messages through a cloneable [`OutboundHandle`]. While
//! open, one background consumer task drains the queue in FIFO order and
//! writes each message to the connection in blocks of the configured send
//! size. [`OutboundQueue::open`] and [`OutboundQueue::close`] start and stop
//! that task; at most one runs at a time and messages left in the queue
//! survive a close for the next open.

mod handle;

use std::sync::{Mutex, PoisonError};

pub use handle::{Delivery, DeliveryReceipt, OutboundHandle};
use handle::{OutboundMessage, report};
use log::{error, info, warn};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    connection::Connection,
    error::{Result, TransportError},
    outbound::{Interruption, PumpOutcome},
};

struct Running {
    cancel: CancellationToken,
    stopped: CancellationToken,
    task: JoinHandle<ConsumerExit>,
}

struct ConsumerExit {
    rx: mpsc::Receiver<OutboundMessage>,
    result: Result<()>,
}

struct Consumer {
    rx: Option<mpsc::Receiver<OutboundMessage>>,
    running: Option<Running>,
}

/// Consumer side of the outbound queue.
///
/// # Examples
///
/// ```no_run
/// use dbwire::{Connection, OutboundQueue};
///
/// # async fn example(connection: Connection) -> Result<(), dbwire::TransportError> {
/// let (queue, handle) = OutboundQueue::new(connection, 64);
/// queue.open().await?;
/// handle.enqueue(&b"first"[..]).await?;
/// handle.enqueue(vec![0_u8; 40_000]).await?;
/// queue.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct OutboundQueue {
    connection: Connection,
    consumer: tokio::sync::Mutex<Consumer>,
    // Completion token of the most recently started loop.
    stopped: Mutex<Option<CancellationToken>>,
}

impl OutboundQueue {
    /// Create a queue holding up to `capacity` messages for `connection`.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(connection: Connection, capacity: usize) -> (Self, OutboundHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            connection,
            consumer: tokio::sync::Mutex::new(Consumer {
                rx: Some(rx),
                running: None,
            }),
            stopped: Mutex::new(None),
        };
        (queue, OutboundHandle::new(tx))
    }

    /// Create a queue sized by the connection's
    /// [`crate::TransportConfig::queue_capacity`].
    #[must_use]
    pub fn for_connection(connection: Connection) -> (Self, OutboundHandle) {
        let capacity = connection.config().queue_capacity();
        Self::new(connection, capacity)
    }

    /// Returns true while a consumer loop is running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stopped_slot()
            .as_ref()
            .is_some_and(|stopped| !stopped.is_cancelled())
    }

    /// Token cancelled when the current consumer loop ends, for whatever
    /// reason. `None` until the first [`OutboundQueue::open`].
    #[must_use]
    pub fn stopped(&self) -> Option<CancellationToken> { self.stopped_slot().clone() }

    fn stopped_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the consumer loop.
    ///
    /// A loop that already stopped on its own is reaped first; its error is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyOpen`] if a loop is running, or
    /// [`TransportError::ConsumerPanicked`] if an earlier loop panicked and
    /// took the queue's receiver with it.
    pub async fn open(&self) -> Result<()> {
        let mut consumer = self.consumer.lock().await;
        if let Some(running) = consumer.running.take() {
            if !running.stopped.is_cancelled() {
                consumer.running = Some(running);
                return Err(TransportError::AlreadyOpen);
            }
            let exit = running.task.await.map_err(|join_error| {
                error!("outbound consumer panicked: {join_error}");
                TransportError::ConsumerPanicked
            })?;
            consumer.rx = Some(exit.rx);
            if let Err(stop_error) = exit.result {
                warn!("reaped outbound consumer that stopped with error: {stop_error}");
            }
        }
        let rx = consumer.rx.take().ok_or(TransportError::ConsumerPanicked)?;

        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        let task = tokio::spawn(run(
            self.connection.clone(),
            rx,
            cancel.clone(),
            stopped.clone(),
        ));
        *self.stopped_slot() = Some(stopped.clone());
        consumer.running = Some(Running {
            cancel,
            stopped,
            task,
        });
        info!("outbound consumer started");
        Ok(())
    }

    /// Stop the consumer loop and wait for it to finish.
    ///
    /// A message being written when the close arrives is terminated early
    /// and reported [`Delivery::Interrupted`]. Messages still queued stay
    /// queued.
    ///
    /// Unlike [`Connection::close`], closing a queue whose loop is not
    /// running is an error rather than a no-op, including a second `close`
    /// after a successful one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotOpen`] if no loop is running, the
    /// error the loop stopped on if it failed by itself, or
    /// [`TransportError::ConsumerPanicked`] if it panicked.
    pub async fn close(&self) -> Result<()> {
        let mut consumer = self.consumer.lock().await;
        let running = consumer.running.take().ok_or(TransportError::NotOpen)?;
        running.cancel.cancel();
        let exit = running.task.await.map_err(|join_error| {
            error!("outbound consumer panicked: {join_error}");
            TransportError::ConsumerPanicked
        })?;
        consumer.rx = Some(exit.rx);
        info!("outbound consumer stopped");
        exit.result
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        if let Some(running) = self.consumer.get_mut().running.as_ref() {
            running.cancel.cancel();
        }
    }
}

async fn run(
    connection: Connection,
    mut rx: mpsc::Receiver<OutboundMessage>,
    cancel: CancellationToken,
    stopped: CancellationToken,
) -> ConsumerExit {
    let _stopped = stopped.drop_guard();
    let result = consume(&connection, &mut rx, &cancel).await;
    if let Err(stop_error) = &result {
        warn!("outbound consumer stopping on error: {stop_error}");
    }
    ConsumerExit { rx, result }
}

async fn consume(
    connection: &Connection,
    rx: &mut mpsc::Receiver<OutboundMessage>,
    cancel: &CancellationToken,
) -> Result<()> {
    let block_size = connection.config().send_block_size();
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            message = rx.recv() => match message {
                Some(message) => message,
                // Every handle was dropped.
                None => return Ok(()),
            },
        };
        let OutboundMessage { body, receipt } = message;
        match connection
            .send_message(body, block_size, cancel, true)
            .await
        {
            Ok(PumpOutcome::Completed { frames }) => {
                report(receipt, Delivery::Delivered { frames });
            }
            Ok(PumpOutcome::Interrupted { frames, reason }) => {
                report(receipt, Delivery::Interrupted { frames });
                return match reason {
                    Interruption::Cancelled => Ok(()),
                    Interruption::Closed => Err(TransportError::NotOpen),
                };
            }
            Err(send_error) => {
                report(receipt, Delivery::Failed);
                return Err(send_error);
            }
        }
    }
}

