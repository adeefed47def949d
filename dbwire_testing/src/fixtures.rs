//! Encoded inbound messages for tests.

use dbwire::{NotificationHeader, ResponseHeader};

/// Encode a response header followed by `body`.
///
/// # Panics
///
/// Panics if the header cannot be encoded.
#[must_use]
pub fn response_message(id: &str, is_error: bool, body: &[u8]) -> Vec<u8> {
    let mut message = ResponseHeader::new(id, is_error)
        .to_bytes()
        .expect("encode response header");
    message.extend_from_slice(body);
    message
}

/// Encode a notification header followed by `body`.
///
/// # Panics
///
/// Panics if the header cannot be encoded.
#[must_use]
pub fn notification_message(id: &str, action: &str, body: &[u8]) -> Vec<u8> {
    let mut message = NotificationHeader::new(id, action)
        .to_bytes()
        .expect("encode notification header");
    message.extend_from_slice(body);
    message
}

/// Encoded length of a response header.
#[must_use]
pub fn response_header_len(id: &str, is_error: bool) -> usize { response_message(id, is_error, &[]).len() }
