//! Canonical error and result types for the crate.
//!
//! State misuse, header classification failures, caller cancellation and
//! socket errors all surface through [`TransportError`]. Header failures keep
//! their own [`HeaderError`] so callers can decide whether a malformed frame
//! makes the connection unusable.

use std::io;

use thiserror::Error;

/// Failure of one structured header parse attempt.
///
/// `offset` is the number of bytes the parser consumed before giving up.
#[derive(Debug, Error)]
#[error("header parse failed at byte {offset}")]
pub struct HeaderParseFailure {
    /// Bytes consumed before the failure.
    pub offset: usize,
    /// Underlying parser error.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl HeaderParseFailure {
    /// Wrap a parser error together with the offset it reached.
    pub fn new(offset: usize, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            offset,
            source: source.into(),
        }
    }
}

/// Errors raised while classifying an inbound frame's header.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The bytes parsed as neither a response nor a notification header.
    #[error(
        "frame is neither a response nor a notification header (furthest offset {offset}): \
         response: {response}; notification: {notification}"
    )]
    Unrecognized {
        /// Failure of the response attempt.
        #[source]
        response: HeaderParseFailure,
        /// Failure of the notification attempt.
        notification: HeaderParseFailure,
        /// The larger of the two offsets reached.
        offset: usize,
    },
    /// A structurally valid header carried an empty correlation id.
    #[error("header has an empty correlation id")]
    MissingCorrelationId,
}

/// Errors emitted by [`crate::Connection`] and [`crate::OutboundQueue`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection or consumer is not open.
    #[error("transport is not open")]
    NotOpen,
    /// The connection or consumer is already open.
    #[error("transport is already open")]
    AlreadyOpen,
    /// The inbound frame header could not be classified.
    #[error("invalid message header: {0}")]
    Header(#[from] HeaderError),
    /// The caller's cancellation token fired.
    #[error("operation cancelled by caller")]
    Cancelled,
    /// Socket or body source failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The transport configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Every outbound handle or the consumer side of the queue is gone.
    #[error("outbound queue closed")]
    QueueClosed,
    /// The outbound queue is at capacity.
    #[error("outbound queue full")]
    QueueFull,
    /// The consumer task panicked; its channel receiver is lost.
    #[error("outbound consumer task panicked")]
    ConsumerPanicked,
}

impl TransportError {
    /// Returns true if this error is the caller's own cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled) }
}

/// Errors returned when validating a [`crate::TransportConfig`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A block size was configured as zero.
    #[error("{name} must be at least one byte")]
    ZeroBlockSize {
        /// Name of the offending setting.
        name: &'static str,
    },
    /// The outbound queue capacity was zero.
    #[error("queue capacity must be >= 1")]
    ZeroQueueCapacity,
}

/// Canonical result alias used by `dbwire` public APIs.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
