//! Connection manager for one persistent, message-oriented socket.
//!
//! A [`Connection`] owns the socket's two halves. Receives and sends run
//! concurrently: the reader sits behind its own lock, held by
//! [`Connection::receive_one`] or by a socket-tailed [`crate::BodyStream`],
//! while the writer lock keeps the frames of one logical message from
//! interleaving with another. Opening and closing are serialized by a
//! separate lifecycle lock.

mod reader;
mod receive;
mod send;
mod state;

use std::{fmt, sync::Arc};

use log::{info, warn};
pub(crate) use reader::ReaderSlot;
pub use receive::InboundMessage;
pub use state::ConnectionState;
use state::StateCell;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::BufferPool,
    config::TransportConfig,
    error::{Result, TransportError},
    header::{BincodeHeaderParser, HeaderParser},
    socket::{Connector, FrameWriter},
};

struct Shared {
    config: TransportConfig,
    pool: BufferPool,
    parser: Box<dyn HeaderParser>,
    connector: Box<dyn Connector>,
    state: StateCell,
    lifecycle: Mutex<()>,
    writer: Mutex<Option<Box<dyn FrameWriter>>>,
}

/// Cloneable handle to one transport connection.
///
/// Clones share the same socket, so a receive loop, direct senders and an
/// [`crate::OutboundQueue`] consumer can each hold their own copy.
///
/// # Examples
///
/// ```no_run
/// use dbwire::{Connection, TransportConfig, WebSocketConnector};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connection = Connection::builder(WebSocketConnector)
///     .config(TransportConfig::default().with_send_block_size(4096))
///     .build()?;
/// let cancel = CancellationToken::new();
/// connection.open("ws://127.0.0.1:8000/rpc", &cancel).await?;
/// connection.send_one(&b"hello"[..], &cancel).await?;
/// connection.close(&cancel).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Connection`].
pub struct ConnectionBuilder {
    connector: Box<dyn Connector>,
    config: TransportConfig,
    parser: Box<dyn HeaderParser>,
}

impl ConnectionBuilder {
    /// Use `config` instead of [`TransportConfig::default`].
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Classify inbound headers with `parser` instead of
    /// [`BincodeHeaderParser`].
    #[must_use]
    pub fn header_parser(mut self, parser: impl HeaderParser) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Validate the configuration and build the connection.
    ///
    /// The connection starts [`ConnectionState::Disconnected`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] if the configuration cannot move
    /// any bytes.
    pub fn build(self) -> Result<Connection> {
        self.config.validate()?;
        Ok(Connection {
            shared: Arc::new(Shared {
                pool: BufferPool::new(self.config.buffer_block_size()),
                config: self.config,
                parser: self.parser,
                connector: self.connector,
                state: StateCell::default(),
                lifecycle: Mutex::new(()),
                writer: Mutex::new(None),
            }),
        })
    }
}

impl Connection {
    /// Start building a connection that dials through `connector`.
    #[must_use]
    pub fn builder(connector: impl Connector) -> ConnectionBuilder {
        ConnectionBuilder {
            connector: Box::new(connector),
            config: TransportConfig::default(),
            parser: Box::new(BincodeHeaderParser),
        }
    }

    /// Last observed lifecycle state. Never blocks on socket activity.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.shared.state.get() }

    #[must_use]
    pub fn is_open(&self) -> bool { self.state() == ConnectionState::Open }

    #[must_use]
    pub fn config(&self) -> &TransportConfig { &self.shared.config }

    /// Pool supplying receive blocks and outbound staging blocks.
    #[must_use]
    pub fn buffer_pool(&self) -> &BufferPool { &self.shared.pool }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }

    /// Connect to `address` and move to [`ConnectionState::Open`].
    ///
    /// A connection that was closed may be opened again.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyOpen`] if the connection is open or
    /// closing, [`TransportError::Cancelled`] if `cancel` fires before the
    /// socket is established, or [`TransportError::Io`] if connecting fails.
    pub async fn open(&self, address: &str, cancel: &CancellationToken) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if matches!(
            self.state(),
            ConnectionState::Open | ConnectionState::Closing
        ) {
            return Err(TransportError::AlreadyOpen);
        }

        let (reader, writer) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            halves = self.shared.connector.connect(address) => halves?,
        };
        *self.shared.writer.lock().await = Some(writer);
        let generation = self.shared.state.install(ReaderSlot::new(reader));
        info!("connection opened: address={address}, generation={generation}");
        Ok(())
    }

    /// Gracefully close the socket.
    ///
    /// Does nothing when the connection is already closed or was never
    /// opened. The close handshake is bounded by
    /// [`TransportConfig::close_timeout`]; running out of that time is
    /// logged and otherwise ignored. Whatever the outcome, the connection
    /// ends [`ConnectionState::Closed`] with both socket halves released.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Cancelled`] if `cancel` fires during the
    /// handshake, or [`TransportError::Io`] if the close frame cannot be
    /// sent.
    pub async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if !self.shared.state.begin_close() {
            // A close frame from the peer leaves the halves installed.
            if let Ok(mut writer) = self.shared.writer.try_lock() {
                writer.take();
            }
            self.shared.state.take_session();
            return Ok(());
        }
        // Wake receives parked on the socket before waiting for the writer.
        self.shared.state.take_session();

        let timeout = self.shared.config.close_timeout();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.close_writer()) => {
                outcome.unwrap_or_else(|_| {
                    warn!("close handshake timed out after {timeout:?}; dropping socket");
                    Ok(())
                })
            }
        };
        if let Ok(mut writer) = self.shared.writer.try_lock() {
            writer.take();
        }
        self.shared.state.finish_close();
        match &result {
            Ok(()) => info!("connection closed"),
            Err(error) => warn!("connection closed with error: {error}"),
        }
        result
    }

    async fn close_writer(&self) -> Result<()> {
        let writer = self.shared.writer.lock().await.take();
        match writer {
            Some(mut writer) => writer.close().await.map_err(TransportError::from),
            None => Ok(()),
        }
    }
}

