//! Cloneable producer handle and delivery receipts.

use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{Result, TransportError},
    outbound::OutboundBody,
};

/// What happened to a tracked message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Every frame through end-of-message was written.
    Delivered { frames: usize },
    /// The consumer was cancelled mid-message. The message was terminated
    /// with an empty final frame and may not have reached the server intact.
    Interrupted { frames: usize },
    /// The socket failed while writing the message.
    Failed,
    /// The message was dropped before a consumer took it.
    Undelivered,
}

impl Delivery {
    #[must_use]
    pub fn is_delivered(&self) -> bool { matches!(self, Self::Delivered { .. }) }
}

/// Resolves once the consumer has finished with a tracked message.
#[derive(Debug)]
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<Delivery>,
}

impl DeliveryReceipt {
    /// Wait for the outcome.
    ///
    /// Yields [`Delivery::Undelivered`] if the message was discarded
    /// without being taken by a consumer.
    pub async fn wait(self) -> Delivery { self.rx.await.unwrap_or(Delivery::Undelivered) }
}

#[derive(Debug)]
pub(crate) struct OutboundMessage {
    pub(crate) body: OutboundBody,
    pub(crate) receipt: Option<oneshot::Sender<Delivery>>,
}

pub(crate) fn report(receipt: Option<oneshot::Sender<Delivery>>, delivery: Delivery) {
    if let Some(tx) = receipt {
        // The producer may have stopped waiting.
        let _ = tx.send(delivery);
    }
}

/// Cloneable handle used by producers to queue outbound messages.
#[derive(Clone, Debug)]
pub struct OutboundHandle {
    tx: mpsc::Sender<OutboundMessage>,
}

impl OutboundHandle {
    pub(crate) fn new(tx: mpsc::Sender<OutboundMessage>) -> Self { Self { tx } }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::QueueClosed)?;
        tracing::trace!("message queued");
        Ok(())
    }

    /// Queue `body`, waiting for capacity if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueClosed`] if the queue was dropped or
    /// its consumer panicked.
    pub async fn enqueue(&self, body: impl Into<OutboundBody>) -> Result<()> {
        self.send(OutboundMessage {
            body: body.into(),
            receipt: None,
        })
        .await
    }

    /// Queue `body` and obtain a receipt reporting its delivery.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueClosed`] if the queue was dropped or
    /// its consumer panicked.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dbwire::{Connection, Delivery, OutboundQueue};
    ///
    /// # async fn example(connection: Connection) -> Result<(), dbwire::TransportError> {
    /// let (queue, handle) = OutboundQueue::new(connection, 16);
    /// queue.open().await?;
    /// let receipt = handle.enqueue_tracked(&b"ping"[..]).await?;
    /// assert!(matches!(receipt.wait().await, Delivery::Delivered { .. }));
    /// queue.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue_tracked(&self, body: impl Into<OutboundBody>) -> Result<DeliveryReceipt> {
        let (tx, rx) = oneshot::channel();
        self.send(OutboundMessage {
            body: body.into(),
            receipt: Some(tx),
        })
        .await?;
        Ok(DeliveryReceipt { rx })
    }

    /// Queue `body` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueFull`] if the queue is at capacity or
    /// [`TransportError::QueueClosed`] if it was dropped.
    pub fn try_enqueue(&self, body: impl Into<OutboundBody>) -> Result<()> {
        self.tx
            .try_send(OutboundMessage {
                body: body.into(),
                receipt: None,
            })
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::QueueClosed,
            })
    }

    /// Returns true once the queue can no longer accept messages.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}
