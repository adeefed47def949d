//! Utilities for driving a [`dbwire::Connection`] over an in-memory,
//! scripted socket during tests.
//!
//! [`MockConnector`] hands every connect a fresh socket whose far end is a
//! [`MockPeer`]: tests push inbound frames through the peer and inspect the
//! frames the connection wrote.
//!
//! ```rust
//! use dbwire_testing::{open_mock, response_message};
//!
//! # async fn example() -> dbwire_testing::TestResult {
//! let (connection, _connector, peer) = open_mock(dbwire::TransportConfig::default()).await?;
//! peer.push_message(response_message("req-1", false, b"{}"));
//! let message = connection
//!     .receive_one(&tokio_util::sync::CancellationToken::new())
//!     .await?
//!     .ok_or("no message")?;
//! assert_eq!(message.id(), "req-1");
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod logging;
pub mod macros;
pub mod socket;

use dbwire::{Connection, TransportConfig};
pub use fixtures::{notification_message, response_header_len, response_message};
pub use logging::{LoggerHandle, logger};
pub use socket::{MockConnector, MockPeer, SentFrame};
use tokio_util::sync::CancellationToken;

/// Result type for tests that propagate errors with `?`.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Address handed to [`MockConnector`]; the mock ignores it apart from
/// recording it.
pub const MOCK_ADDRESS: &str = "mock://dbwire";

/// Build a connection over a [`MockConnector`], open it and return the
/// server side of the socket.
///
/// # Errors
///
/// Returns an error if the configuration is rejected or opening fails.
pub async fn open_mock(config: TransportConfig) -> TestResult<(Connection, MockConnector, MockPeer)> {
    let connector = MockConnector::new();
    let connection = Connection::builder(connector.clone()).config(config).build()?;
    connection.open(MOCK_ADDRESS, &CancellationToken::new()).await?;
    let peer = connector.next_peer().await.ok_or("connector produced no peer")?;
    Ok((connection, connector, peer))
}
