#![doc(html_root_url = "https://docs.rs/dbwire/latest")]
//! Public API for the `dbwire` library.
//!
//! This crate provides the message transport engine of a database client
//! speaking an RPC protocol over one persistent, message-oriented socket:
//! header classification of inbound frames, pooled body streams, chunked
//! outbound sends and a single-writer outbound queue.

pub mod body;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod header;
pub mod metrics;
pub mod outbound;
pub mod queue;
pub mod socket;

pub use body::BodyStream;
pub use buffer::{BufferPool, RentedBuffer};
pub use config::TransportConfig;
pub use connection::{Connection, ConnectionBuilder, ConnectionState, InboundMessage};
pub use correlation::CorrelatedHeader;
pub use error::{ConfigError, HeaderError, HeaderParseFailure, Result, TransportError};
pub use header::{
    BincodeHeaderParser,
    HeaderParser,
    MessageHeader,
    NotificationHeader,
    ResponseHeader,
    classify,
};
pub use outbound::OutboundBody;
pub use queue::{Delivery, DeliveryReceipt, OutboundHandle, OutboundQueue};
#[cfg(feature = "websocket")]
pub use socket::websocket::WebSocketConnector;
pub use socket::{Connector, FrameReader, FrameWriter, ReceivedFrame};
