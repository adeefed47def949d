//! Outbound message bodies and the block pump that frames them.
//!
//! A body is cut into blocks of the configured send size. Each block goes
//! out as one frame; the first block shorter than the send size is flagged
//! end-of-message. A body whose length is an exact multiple of the block
//! size therefore ends with an empty final frame.

use std::{fmt, io, pin::Pin, time::Duration};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::{
    body::BodyStream,
    buffer::BufferPool,
    error::Result,
    metrics::{self, Direction},
    socket::FrameWriter,
};

/// Payload of one outbound logical message.
pub enum OutboundBody {
    /// Bytes already in memory. Sent without copying.
    Contiguous(Bytes),
    /// Any byte source; staged through a rented block.
    Stream(Pin<Box<dyn AsyncRead + Send>>),
}

impl OutboundBody {
    /// Wrap an arbitrary reader.
    pub fn reader(reader: impl AsyncRead + Send + 'static) -> Self { Self::Stream(Box::pin(reader)) }

    #[must_use]
    pub fn is_contiguous(&self) -> bool { matches!(self, Self::Contiguous(_)) }
}

impl fmt::Debug for OutboundBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contiguous(bytes) => f.debug_tuple("Contiguous").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for OutboundBody {
    fn from(bytes: Bytes) -> Self { Self::Contiguous(bytes) }
}

impl From<Vec<u8>> for OutboundBody {
    fn from(bytes: Vec<u8>) -> Self { Self::Contiguous(Bytes::from(bytes)) }
}

impl From<&'static [u8]> for OutboundBody {
    fn from(bytes: &'static [u8]) -> Self { Self::Contiguous(Bytes::from_static(bytes)) }
}

impl From<BodyStream> for OutboundBody {
    fn from(body: BodyStream) -> Self { Self::reader(body) }
}

/// Why a pump stopped before end-of-message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Interruption {
    /// The caller's token fired.
    Cancelled,
    /// The connection left the open state.
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PumpOutcome {
    Completed {
        frames: usize,
    },
    Interrupted {
        frames: usize,
        reason: Interruption,
    },
}

/// Source of outbound blocks.
pub(crate) enum BlockSource {
    Contiguous(Bytes),
    /// Each block is read into a freshly rented buffer that is handed to the
    /// writer as-is; it returns to the pool once the writer drops the frame.
    Stream {
        reader: Pin<Box<dyn AsyncRead + Send>>,
        pool: BufferPool,
    },
}

impl BlockSource {
    /// Next block of at most `block_size` bytes; shorter only at the end.
    async fn next_block(&mut self, block_size: usize) -> io::Result<Bytes> {
        match self {
            Self::Contiguous(bytes) => Ok(bytes.split_to(block_size.min(bytes.len()))),
            Self::Stream { reader, pool } => {
                let mut buffer = pool.rent();
                let block = buffer.get_mut(..block_size).ok_or_else(|| {
                    io::Error::other("staging block is smaller than the send block size")
                })?;
                let mut filled = 0;
                while filled < block.len() {
                    let n = reader.read(&mut block[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                Ok(Bytes::from_owner(buffer).slice(..filled))
            }
        }
    }
}

/// Write `source` to `writer` as one logical message.
///
/// Cancellation and `still_open` are checked before every block and again
/// before the block is written; `closing` is raced while the next block is
/// produced. An in-flight frame always completes. A message cut short after
/// at least one non-final frame is terminated with an empty final frame,
/// bounded by `terminate_timeout`, so the socket is never left mid-message.
pub(crate) async fn pump<W, F>(
    writer: &mut W,
    mut source: BlockSource,
    block_size: usize,
    cancel: &CancellationToken,
    closing: &CancellationToken,
    still_open: F,
    terminate_timeout: Duration,
) -> Result<PumpOutcome>
where
    W: FrameWriter + ?Sized,
    F: Fn() -> bool,
{
    let stop = || {
        if cancel.is_cancelled() {
            Some(Interruption::Cancelled)
        } else if closing.is_cancelled() || !still_open() {
            Some(Interruption::Closed)
        } else {
            None
        }
    };
    let mut frames = 0;
    loop {
        if let Some(reason) = stop() {
            return Ok(interrupt(writer, frames, reason, terminate_timeout).await);
        }

        let block = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            () = closing.cancelled() => None,
            block = source.next_block(block_size) => match block {
                Ok(block) => Some(block),
                Err(error) => {
                    metrics::inc_errors();
                    terminate(writer, frames, terminate_timeout).await;
                    return Err(error.into());
                }
            },
        };
        // The source may have stalled long enough for the connection to close.
        let (Some(block), None) = (block, stop()) else {
            let reason = stop().unwrap_or(Interruption::Closed);
            return Ok(interrupt(writer, frames, reason, terminate_timeout).await);
        };

        let len = block.len();
        let end_of_message = len < block_size;
        if let Err(error) = writer.send_frame(block, end_of_message).await {
            metrics::inc_errors();
            return Err(error.into());
        }
        frames += 1;
        metrics::inc_frames(Direction::Outbound);
        tracing::trace!(frame.bytes = len, end_of_message, "frame sent");
        if end_of_message {
            metrics::inc_messages(Direction::Outbound);
            return Ok(PumpOutcome::Completed { frames });
        }
    }
}

async fn interrupt<W>(
    writer: &mut W,
    frames: usize,
    reason: Interruption,
    timeout: Duration,
) -> PumpOutcome
where
    W: FrameWriter + ?Sized,
{
    terminate(writer, frames, timeout).await;
    PumpOutcome::Interrupted { frames, reason }
}

async fn terminate<W>(writer: &mut W, frames: usize, timeout: Duration)
where
    W: FrameWriter + ?Sized,
{
    if frames == 0 {
        return;
    }
    match tokio::time::timeout(timeout, writer.send_frame(Bytes::new(), true)).await {
        Ok(Ok(())) => metrics::inc_frames(Direction::Outbound),
        Ok(Err(error)) => tracing::debug!(%error, "failed to terminate interrupted message"),
        Err(_) => tracing::debug!("timed out terminating interrupted message"),
    }
}
