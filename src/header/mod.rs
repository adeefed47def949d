//! Message headers and the response/notification classifier.
//!
//! The protocol multiplexes responses and server-pushed notifications over
//! one socket with no discriminator outside the header itself. [`classify`]
//! therefore tries the response shape first, falls back to the notification
//! shape, and only then gives up with both failures attached.

mod codec;

pub use codec::{BincodeHeaderParser, MAX_HEADER_BYTES, NOTIFICATION_KIND, RESPONSE_KIND};

use crate::{
    correlation::CorrelatedHeader,
    error::{HeaderError, HeaderParseFailure},
};

/// Header of a reply to a client request.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Correlation id of the originating request.
    pub id: String,
    /// Set when the body carries an error result.
    pub is_error: bool,
}

/// Header of a server-pushed live-query notification.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct NotificationHeader {
    /// Correlation id of the live-query subscription.
    pub id: String,
    /// Opaque live-query marker, passed through untouched.
    pub action: String,
}

impl ResponseHeader {
    #[must_use]
    pub fn new(id: impl Into<String>, is_error: bool) -> Self {
        Self {
            id: id.into(),
            is_error,
        }
    }
}

impl NotificationHeader {
    #[must_use]
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
        }
    }
}

impl CorrelatedHeader for ResponseHeader {
    fn correlation_id(&self) -> &str { &self.id }
}

impl CorrelatedHeader for NotificationHeader {
    fn correlation_id(&self) -> &str { &self.id }
}

/// Header of one inbound logical message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageHeader {
    Response(ResponseHeader),
    Notification(NotificationHeader),
}

impl MessageHeader {
    #[must_use]
    pub fn is_response(&self) -> bool { matches!(self, Self::Response(_)) }

    #[must_use]
    pub fn is_notification(&self) -> bool { matches!(self, Self::Notification(_)) }

    #[must_use]
    pub fn as_response(&self) -> Option<&ResponseHeader> {
        match self {
            Self::Response(header) => Some(header),
            Self::Notification(_) => None,
        }
    }

    #[must_use]
    pub fn as_notification(&self) -> Option<&NotificationHeader> {
        match self {
            Self::Notification(header) => Some(header),
            Self::Response(_) => None,
        }
    }
}

impl CorrelatedHeader for MessageHeader {
    fn correlation_id(&self) -> &str {
        match self {
            Self::Response(header) => header.correlation_id(),
            Self::Notification(header) => header.correlation_id(),
        }
    }
}

/// Structured header parsers for the two inbound message shapes.
///
/// Each method returns the parsed header and the number of bytes it
/// consumed, which is where the message body starts. On failure the
/// returned [`HeaderParseFailure`] records how far the parser got.
pub trait HeaderParser: Send + Sync + 'static {
    /// Parse `bytes` as a response header.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderParseFailure`] if `bytes` is not a response header.
    fn parse_response(&self, bytes: &[u8]) -> Result<(ResponseHeader, usize), HeaderParseFailure>;

    /// Parse `bytes` as a notification header.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderParseFailure`] if `bytes` is not a notification header.
    fn parse_notification(
        &self,
        bytes: &[u8],
    ) -> Result<(NotificationHeader, usize), HeaderParseFailure>;
}

/// Classify the start of an inbound message.
///
/// Returns the header and the offset at which the body begins. Bytes past
/// that offset are not inspected.
///
/// # Errors
///
/// Returns [`HeaderError::Unrecognized`] if neither header shape parses and
/// [`HeaderError::MissingCorrelationId`] if the chosen header has an empty
/// id.
///
/// # Examples
///
/// ```
/// use dbwire::{BincodeHeaderParser, CorrelatedHeader, ResponseHeader, classify};
///
/// let mut frame = ResponseHeader::new("42", false).to_bytes().expect("encode header");
/// let header_len = frame.len();
/// frame.extend_from_slice(b"body");
///
/// let (header, offset) = classify(&BincodeHeaderParser, &frame).expect("classify");
/// assert!(header.is_response());
/// assert_eq!(header.correlation_id(), "42");
/// assert_eq!(offset, header_len);
/// ```
pub fn classify<P>(parser: &P, bytes: &[u8]) -> Result<(MessageHeader, usize), HeaderError>
where
    P: HeaderParser + ?Sized,
{
    let (header, offset) = match parser.parse_response(bytes) {
        Ok((header, offset)) => (MessageHeader::Response(header), offset),
        Err(response) => match parser.parse_notification(bytes) {
            Ok((header, offset)) => (MessageHeader::Notification(header), offset),
            Err(notification) => {
                let offset = response.offset.max(notification.offset);
                return Err(HeaderError::Unrecognized {
                    response,
                    notification,
                    offset,
                });
            }
        },
    };

    if !header.has_correlation_id() {
        return Err(HeaderError::MissingCorrelationId);
    }
    Ok((header, offset))
}

#[cfg(test)]
mod tests;
