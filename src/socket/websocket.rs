//! WebSocket sockets over `tokio-tungstenite`.
//!
//! Outbound frames go out as raw binary/continuation frames carrying the FIN
//! bit, so a logical message is streamed without being buffered whole.
//! Inbound messages arrive already reassembled by tungstenite; the reader
//! hands them out in receive-buffer sized slices and flags the last slice
//! end-of-message.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    SinkExt,
    Stream,
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream,
    connect_async,
    tungstenite::{
        self,
        Message,
        protocol::frame::{
            Frame,
            coding::{Data, OpCode},
        },
    },
};

use super::{Connector, FrameReader, FrameWriter, ReceivedFrame, SocketHalves};

/// [`Connector`] dialling `ws://` URLs.
///
/// # Examples
///
/// ```no_run
/// use dbwire::{Connection, WebSocketConnector};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), dbwire::TransportError> {
/// let connection = Connection::builder(WebSocketConnector).build()?;
/// connection
///     .open("ws://127.0.0.1:8000/rpc", &CancellationToken::new())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &str) -> io::Result<SocketHalves> {
        let (stream, _response) = connect_async(address).await.map_err(into_io)?;
        Ok(split(stream))
    }
}

/// Split an established WebSocket into transport halves.
///
/// Useful for sockets accepted on the server side or dialled with custom
/// handshake options.
pub fn split<S>(stream: WebSocketStream<S>) -> SocketHalves
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = stream.split();
    (
        Box::new(WebSocketReader {
            stream,
            pending: None,
            closed: false,
        }),
        Box::new(WebSocketWriter {
            sink,
            continuing: false,
        }),
    )
}

fn into_io(error: tungstenite::Error) -> io::Error {
    match error {
        tungstenite::Error::Io(error) => error,
        other => io::Error::other(other),
    }
}

struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    // Remainder of the message currently being handed out.
    pending: Option<Bytes>,
    closed: bool,
}

impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn poll_receive(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<ReceivedFrame>> {
        loop {
            if let Some(pending) = self.pending.as_mut() {
                let len = pending.len().min(buf.len());
                let chunk = pending.split_to(len);
                if let Some(dst) = buf.get_mut(..len) {
                    dst.copy_from_slice(&chunk);
                }
                let end_of_message = pending.is_empty();
                if end_of_message {
                    self.pending = None;
                }
                return Poll::Ready(Ok(ReceivedFrame::Data {
                    len,
                    end_of_message,
                }));
            }
            if self.closed {
                return Poll::Ready(Ok(ReceivedFrame::Close));
            }

            match ready!(Pin::new(&mut self.stream).poll_next(cx)) {
                Some(Ok(Message::Binary(bytes))) => self.pending = Some(bytes),
                Some(Ok(Message::Text(text))) => {
                    self.pending = Some(Bytes::copy_from_slice(text.as_bytes()));
                }
                Some(Ok(Message::Close(_))) | None => self.closed = true,
                // Control frames are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                )) => self.closed = true,
                Some(Err(error)) => return Poll::Ready(Err(into_io(error))),
            }
        }
    }
}

struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    // A non-final frame was sent; the next frame continues that message.
    continuing: bool,
}

#[async_trait]
impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&mut self, payload: Bytes, end_of_message: bool) -> io::Result<()> {
        let message = if self.continuing {
            Message::Frame(Frame::message(
                payload,
                OpCode::Data(Data::Continue),
                end_of_message,
            ))
        } else if end_of_message {
            Message::Binary(payload)
        } else {
            Message::Frame(Frame::message(payload, OpCode::Data(Data::Binary), false))
        };
        self.sink.send(message).await.map_err(into_io)?;
        self.continuing = !end_of_message;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(error) => Err(into_io(error)),
        }
    }
}
