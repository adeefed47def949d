//! Readable payload of an inbound message.
//!
//! A [`BodyStream`] starts right after the message header. When the whole
//! message arrived in one receive it is *buffered*: the bytes sit in the
//! rented block the receive filled, and the stream only walks that block.
//! Otherwise it is *socket-tailed*: it drains what the first receive already
//! brought in, then keeps pulling frames from the socket into the same block
//! until the end-of-message frame. A socket-tailed stream holds the socket's
//! receive side exclusively until it reaches end-of-message or is dropped.
//!
//! The rented block goes back to the pool as soon as the stream reaches its
//! end, or when the stream is dropped, whichever comes first.

use std::{
    fmt,
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::OwnedMutexGuard,
};

use crate::{
    buffer::RentedBuffer,
    connection::ReaderSlot,
    metrics,
    socket::ReceivedFrame,
};

struct SocketTail {
    reader: OwnedMutexGuard<ReaderSlot>,
    block_size: usize,
}

/// Forward-only, read-once stream over a message body.
///
/// # Examples
///
/// ```no_run
/// use dbwire::Connection;
/// use tokio::io::AsyncReadExt;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(connection: Connection) -> Result<(), dbwire::TransportError> {
/// let cancel = CancellationToken::new();
/// if let Some(message) = connection.receive_one(&cancel).await? {
///     let (_id, _header, mut body) = message.into_parts();
///     let mut payload = Vec::new();
///     body.read_to_end(&mut payload).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct BodyStream {
    buffer: Option<RentedBuffer>,
    pos: usize,
    end: usize,
    tail: Option<SocketTail>,
    socket_tailed: bool,
    tail_reads: usize,
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("socket_tailed", &self.socket_tailed)
            .field("buffered_remaining", &(self.end - self.pos))
            .field("tail_reads", &self.tail_reads)
            .finish_non_exhaustive()
    }
}

impl BodyStream {
    /// Body wholly contained in `buffer[start..end]`.
    pub(crate) fn buffered(buffer: RentedBuffer, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= buffer.len());
        let mut stream = Self {
            buffer: Some(buffer),
            pos: start,
            end,
            tail: None,
            socket_tailed: false,
            tail_reads: 0,
        };
        if start == end {
            stream.release();
        }
        stream
    }

    /// Body starting at `buffer[start..end]` and continuing on the socket.
    pub(crate) fn socket_tailed(
        buffer: RentedBuffer,
        start: usize,
        end: usize,
        reader: OwnedMutexGuard<ReaderSlot>,
        block_size: usize,
    ) -> Self {
        debug_assert!(start <= end && end <= buffer.len() && block_size <= buffer.len());
        Self {
            buffer: Some(buffer),
            pos: start,
            end,
            tail: Some(SocketTail { reader, block_size }),
            socket_tailed: true,
            tail_reads: 0,
        }
    }

    /// Returns true if the whole body was received with its header.
    #[must_use]
    pub fn is_buffered(&self) -> bool { !self.socket_tailed }

    /// Remaining length, when known ahead of reading.
    ///
    /// Buffered bodies know their length; socket-tailed bodies return
    /// `None` until the end-of-message frame has arrived.
    #[must_use]
    pub fn len_hint(&self) -> Option<usize> {
        self.tail.is_none().then(|| self.end - self.pos)
    }

    /// Number of socket receives issued after the first one.
    #[must_use]
    pub fn tail_reads(&self) -> usize { self.tail_reads }

    /// Returns true once the end-of-message frame was seen and every byte
    /// was read.
    #[must_use]
    pub fn is_finished(&self) -> bool { self.tail.is_none() && self.pos >= self.end }

    fn release(&mut self) {
        self.buffer = None;
        self.pos = 0;
        self.end = 0;
    }

    fn copy_buffered(&mut self, buf: &mut ReadBuf<'_>) -> io::Result<()> {
        let len = (self.end - self.pos).min(buf.remaining());
        let src = self
            .buffer
            .as_deref()
            .and_then(|block| block.get(self.pos..self.pos + len))
            .ok_or_else(|| io::Error::other("body buffer released while bytes remain"))?;
        buf.put_slice(src);
        self.pos += len;
        if self.pos >= self.end && self.tail.is_none() {
            self.release();
        }
        Ok(())
    }
}

impl AsyncRead for BodyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.end {
                return Poll::Ready(this.copy_buffered(buf));
            }
            let Some(tail) = this.tail.as_mut() else {
                this.release();
                return Poll::Ready(Ok(()));
            };
            let Some(block) = this
                .buffer
                .as_deref_mut()
                .and_then(|block| block.get_mut(..tail.block_size))
            else {
                return Poll::Ready(Err(io::Error::other("body buffer already released")));
            };

            let frame = match ready!(tail.reader.poll_receive(cx, block)) {
                Ok(frame) => frame,
                Err(error) => {
                    // The slot stays mid-message; the next receive discards the rest.
                    this.tail = None;
                    this.release();
                    metrics::inc_errors();
                    return Poll::Ready(Err(error));
                }
            };
            this.tail_reads += 1;
            match frame {
                ReceivedFrame::Close => {
                    tail.reader.mark_peer_closed();
                    this.tail = None;
                    this.release();
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "socket closed before end of message",
                    )));
                }
                ReceivedFrame::Data {
                    len,
                    end_of_message,
                } => {
                    if len > tail.block_size {
                        this.tail = None;
                        this.release();
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "socket reported more bytes than the receive block holds",
                        )));
                    }
                    metrics::inc_frames(metrics::Direction::Inbound);
                    tracing::trace!(frame.bytes = len, end_of_message, "body frame received");
                    this.pos = 0;
                    this.end = len;
                    if end_of_message {
                        tail.reader.finish_message();
                        this.tail = None;
                    }
                }
            }
        }
    }
}
