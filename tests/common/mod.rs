//! Shared fixtures for integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::time::Duration;

use dbwire::TransportConfig;
use rstest::fixture;
use tokio::io::AsyncReadExt;

/// Receive block used by tests exercising socket-tailed bodies.
pub const RECEIVE_BLOCK: usize = 16;
/// Send block used by tests exercising outbound chunking.
pub const SEND_BLOCK: usize = 4;

/// Configuration with tiny blocks so short payloads span several frames.
#[fixture]
pub fn small_blocks() -> TransportConfig {
    TransportConfig::default()
        .with_receive_block_size(RECEIVE_BLOCK)
        .with_send_block_size(SEND_BLOCK)
        .with_close_timeout(Duration::from_secs(1))
}

/// `len` bytes counting up from zero, wrapping at 256.
pub fn patterned(len: usize) -> Vec<u8> { (0..len).map(|i| (i % 256) as u8).collect() }

/// Read `body` to the end.
pub async fn read_all(body: &mut dbwire::BodyStream) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    body.read_to_end(&mut out).await?;
    Ok(out)
}
