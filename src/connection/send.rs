//! Sending logical messages.

use tokio_util::sync::CancellationToken;

use super::Connection;
use crate::{
    error::{Result, TransportError},
    metrics::{self, Direction},
    outbound::{self, BlockSource, Interruption, OutboundBody, PumpOutcome},
};

impl Connection {
    /// Send `body` as one logical message.
    ///
    /// Contiguous bytes go out as a single final frame without copying.
    /// Readers are staged through a rented block and sent in blocks of
    /// [`crate::TransportConfig::send_block_size`]. A successful return
    /// means the end-of-message frame was written.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotOpen`] unless the connection is open or
    /// if it stops being open mid-message, [`TransportError::Cancelled`] if
    /// `cancel` fires, or [`TransportError::Io`] if the socket or the body
    /// source fails. A message cut short after its first frame is terminated
    /// with an empty final frame before the error is returned.
    pub async fn send_one(
        &self,
        body: impl Into<OutboundBody>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        let block_size = self.shared.config.send_block_size();
        match self.send_message(body.into(), block_size, cancel, false).await? {
            PumpOutcome::Completed { .. } => Ok(()),
            PumpOutcome::Interrupted {
                reason: Interruption::Cancelled,
                ..
            } => Err(TransportError::Cancelled),
            PumpOutcome::Interrupted {
                reason: Interruption::Closed,
                ..
            } => Err(TransportError::NotOpen),
        }
    }

    /// Write one message while holding the writer exclusively.
    ///
    /// With `chunk_contiguous` unset, contiguous bodies skip the pump and go
    /// out as one frame.
    pub(crate) async fn send_message(
        &self,
        body: OutboundBody,
        block_size: usize,
        cancel: &CancellationToken,
        chunk_contiguous: bool,
    ) -> Result<PumpOutcome> {
        let closed = PumpOutcome::Interrupted {
            frames: 0,
            reason: Interruption::Closed,
        };
        // Fired by `close` before it waits for the writer.
        let Some(session) = self.shared.state.open_session() else {
            return Ok(closed);
        };
        let closing = session.closed;
        let mut slot = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(PumpOutcome::Interrupted { frames: 0, reason: Interruption::Cancelled });
            }
            () = closing.cancelled() => return Ok(closed),
            slot = self.shared.writer.lock() => slot,
        };
        let Some(writer) = slot.as_mut() else {
            return Ok(closed);
        };
        if !self.is_open() {
            return Ok(closed);
        }

        let source = match body {
            OutboundBody::Contiguous(bytes) if !chunk_contiguous => {
                let len = bytes.len();
                if let Err(error) = writer.send_frame(bytes, true).await {
                    metrics::inc_errors();
                    return Err(error.into());
                }
                metrics::inc_frames(Direction::Outbound);
                metrics::inc_messages(Direction::Outbound);
                tracing::debug!(frame.bytes = len, frames_sent = 1, "message sent");
                return Ok(PumpOutcome::Completed { frames: 1 });
            }
            OutboundBody::Contiguous(bytes) => BlockSource::Contiguous(bytes),
            OutboundBody::Stream(reader) => BlockSource::Stream {
                reader,
                pool: self.shared.pool.clone(),
            },
        };
        let outcome = outbound::pump(
            &mut **writer,
            source,
            block_size,
            cancel,
            &closing,
            || self.is_open(),
            self.shared.config.close_timeout(),
        )
        .await?;
        match outcome {
            PumpOutcome::Completed { frames } => {
                tracing::debug!(frames_sent = frames, "message sent");
            }
            PumpOutcome::Interrupted { frames, reason } => {
                tracing::debug!(frames_sent = frames, ?reason, "message interrupted");
            }
        }
        Ok(outcome)
    }
}
