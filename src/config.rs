//! Transport configuration.
//!
//! [`TransportConfig`] carries block sizes and timeouts shared by the
//! connection manager and the outbound queue consumer.

use std::time::Duration;

use crate::error::ConfigError;

/// Default size of one receive block.
pub const DEFAULT_RECEIVE_BLOCK_SIZE: usize = 16 * 1024;
/// Default size of one outbound block.
pub const DEFAULT_SEND_BLOCK_SIZE: usize = 16 * 1024;
/// Default bound on the graceful close handshake.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of messages the outbound queue buffers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Block sizes and timeouts for one transport instance.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use dbwire::TransportConfig;
///
/// let config = TransportConfig::default()
///     .with_receive_block_size(4096)
///     .with_send_block_size(1024)
///     .with_close_timeout(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// assert_eq!(config.buffer_block_size(), 4096);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    receive_block_size: usize,
    send_block_size: usize,
    close_timeout: Duration,
    queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_block_size: DEFAULT_RECEIVE_BLOCK_SIZE,
            send_block_size: DEFAULT_SEND_BLOCK_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// Set the number of bytes requested from the socket per receive.
    ///
    /// A message header must fit within one receive block.
    #[must_use]
    pub fn with_receive_block_size(mut self, size: usize) -> Self {
        self.receive_block_size = size;
        self
    }

    /// Set the number of body bytes written per outbound frame.
    #[must_use]
    pub fn with_send_block_size(mut self, size: usize) -> Self {
        self.send_block_size = size;
        self
    }

    /// Bound the graceful close handshake.
    ///
    /// Expiry is treated as an interruption the caller did not request and
    /// is swallowed by [`crate::Connection::close`].
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity used by [`crate::OutboundQueue::new`].
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn receive_block_size(&self) -> usize { self.receive_block_size }

    #[must_use]
    pub const fn send_block_size(&self) -> usize { self.send_block_size }

    #[must_use]
    pub const fn close_timeout(&self) -> Duration { self.close_timeout }

    #[must_use]
    pub const fn queue_capacity(&self) -> usize { self.queue_capacity }

    /// Size of the blocks the connection's buffer pool hands out.
    ///
    /// One pool serves both directions, so blocks fit the larger of the two
    /// block sizes.
    #[must_use]
    pub fn buffer_block_size(&self) -> usize { self.receive_block_size.max(self.send_block_size) }

    /// Reject configurations that cannot move any bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a block size or the queue capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_block_size == 0 {
            return Err(ConfigError::ZeroBlockSize {
                name: "receive_block_size",
            });
        }
        if self.send_block_size == 0 {
            return Err(ConfigError::ZeroBlockSize {
                name: "send_block_size",
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}
