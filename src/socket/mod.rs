//! Socket abstraction the transport is written against.
//!
//! A socket is a full-duplex, ordered stream of frames, each flagged final
//! or non-final; one logical message is a run of non-final frames closed by
//! a final one. [`Connector::connect`] yields the two halves separately so
//! receives and sends can proceed concurrently.

use std::{
    io,
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;

#[cfg(feature = "websocket")]
pub mod websocket;

/// Outcome of one socket receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceivedFrame {
    /// `len` bytes were written to the front of the receive buffer.
    Data {
        len: usize,
        /// Set on the last frame of a logical message.
        end_of_message: bool,
    },
    /// The peer closed the socket.
    Close,
}

/// Receiving half of a socket.
///
/// `poll_receive` fills at most `buf.len()` bytes. A message larger than
/// `buf` is delivered across several calls, only the last flagged
/// `end_of_message`.
pub trait FrameReader: Send + Unpin + 'static {
    /// Attempt to receive the next frame into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the socket fails.
    fn poll_receive(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<ReceivedFrame>>;
}

/// Sending half of a socket.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write one frame, marking it final when `end_of_message` is set.
    async fn send_frame(&mut self, payload: Bytes, end_of_message: bool) -> io::Result<()>;

    /// Send the graceful close frame and shut the write side down.
    async fn close(&mut self) -> io::Result<()>;
}

/// The two halves of an established socket.
pub type SocketHalves = (Box<dyn FrameReader>, Box<dyn FrameWriter>);

/// Establishes sockets for [`crate::Connection::open`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `address` and split the socket into its halves.
    async fn connect(&self, address: &str) -> io::Result<SocketHalves>;
}

/// Receive one frame from `reader` into `buf`.
pub(crate) async fn receive_frame<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<ReceivedFrame>
where
    R: FrameReader + ?Sized,
{
    std::future::poll_fn(|cx| reader.poll_receive(cx, &mut *buf)).await
}
