//! Receiving logical messages.

use std::{io, sync::Arc};

use tokio_util::sync::CancellationToken;

use super::Connection;
use crate::{
    body::BodyStream,
    correlation::CorrelatedHeader,
    error::{Result, TransportError},
    header::{self, MessageHeader},
    metrics::{self, Direction},
    socket::ReceivedFrame,
};

/// One inbound message: its classified header and a stream over the body.
#[derive(Debug)]
pub struct InboundMessage {
    header: MessageHeader,
    body: BodyStream,
}

impl InboundMessage {
    /// Correlation id carried by the header. Never empty.
    #[must_use]
    pub fn id(&self) -> &str { self.header.correlation_id() }

    #[must_use]
    pub fn header(&self) -> &MessageHeader { &self.header }

    #[must_use]
    pub fn body(&mut self) -> &mut BodyStream { &mut self.body }

    /// Split into `(id, header, body)`.
    #[must_use]
    pub fn into_parts(self) -> (String, MessageHeader, BodyStream) {
        (self.header.correlation_id().to_owned(), self.header, self.body)
    }
}

impl Connection {
    /// Receive the next logical message.
    ///
    /// Returns `Ok(None)` when the first frame carries no bytes or the peer
    /// closed the socket; the latter also moves the connection to
    /// [`super::ConnectionState::Closed`].
    ///
    /// A message that fits in one receive block comes back with a buffered
    /// body. A larger one comes back socket-tailed: the body holds the
    /// socket's receive side until it reaches end-of-message or is dropped,
    /// and the next `receive_one` waits for it. Frames of a body dropped
    /// early are discarded before the next message is read.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotOpen`] unless the connection is open,
    /// [`TransportError::Cancelled`] if `cancel` fires while waiting,
    /// [`TransportError::Header`] if the header cannot be classified, or
    /// [`TransportError::Io`] if the socket fails.
    pub async fn receive_one(&self, cancel: &CancellationToken) -> Result<Option<InboundMessage>> {
        let session = self.shared.state.open_session().ok_or(TransportError::NotOpen)?;
        let mut slot = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            () = session.closed.cancelled() => return Err(TransportError::NotOpen),
            slot = Arc::clone(&session.reader).lock_owned() => slot,
        };
        if slot.is_peer_closed() {
            self.observe_peer_close(session.generation);
            return Ok(None);
        }

        let block_size = self.shared.config.receive_block_size();
        let mut buffer = self.shared.pool.rent();
        let block = buffer.get_mut(..block_size).ok_or_else(|| {
            io::Error::other("pool block is smaller than the receive block size")
        })?;
        let (frame, discarded) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            () = session.closed.cancelled() => return Err(TransportError::NotOpen),
            received = slot.next_message_frame(block) => received.inspect_err(|_| metrics::inc_errors())?,
        };
        if discarded > 0 {
            tracing::warn!(frames = discarded, "discarded tail of an abandoned message");
        }

        let (len, end_of_message) = match frame {
            ReceivedFrame::Close => {
                self.observe_peer_close(session.generation);
                return Ok(None);
            }
            ReceivedFrame::Data {
                len,
                end_of_message,
            } => (len, end_of_message),
        };
        metrics::inc_frames(Direction::Inbound);
        if len == 0 {
            slot.skip_message(end_of_message);
            return Ok(None);
        }
        let Some(bytes) = buffer.get(..len).filter(|_| len <= block_size) else {
            slot.skip_message(end_of_message);
            metrics::inc_errors();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "socket reported more bytes than the receive block holds",
            )
            .into());
        };

        let (header, offset) = match header::classify(&*self.shared.parser, bytes) {
            Ok(classified) => classified,
            Err(error) => {
                slot.skip_message(end_of_message);
                metrics::inc_errors();
                tracing::debug!(frame.bytes = len, %error, "unclassifiable message header");
                return Err(error.into());
            }
        };
        metrics::inc_messages(Direction::Inbound);
        tracing::debug!(
            correlation_id = header.correlation_id(),
            frame.bytes = len,
            end_of_message,
            "message received"
        );

        let body = if end_of_message {
            drop(slot);
            BodyStream::buffered(buffer, offset, len)
        } else {
            slot.begin_message();
            BodyStream::socket_tailed(buffer, offset, len, slot, block_size)
        };
        Ok(Some(InboundMessage { header, body }))
    }

    fn observe_peer_close(&self, generation: u64) {
        if self.shared.state.observe_peer_close(generation) {
            log::info!("connection closed by peer: generation={generation}");
        }
    }
}
