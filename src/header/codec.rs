//! Bincode encoding of message headers.
//!
//! A header is a one-byte kind tag followed by the header fields in
//! bincode's standard configuration. Decoding goes through a counting
//! reader so a failed attempt still reports how many bytes it consumed.

use std::cell::Cell;

use bincode::{
    Decode,
    config::{self, Config},
    de::read::Reader,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use thiserror::Error;

use super::{HeaderParser, NotificationHeader, ResponseHeader};
use crate::error::HeaderParseFailure;

/// Kind tag leading every encoded response header.
pub const RESPONSE_KIND: u8 = 1;
/// Kind tag leading every encoded notification header.
pub const NOTIFICATION_KIND: u8 = 2;
/// Upper bound on the bytes one header may claim while decoding.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

fn header_config() -> impl Config { config::standard().with_limit::<MAX_HEADER_BYTES>() }

#[derive(Debug, Error)]
#[error("expected header kind {expected}, found {found}")]
struct KindMismatch {
    expected: u8,
    found: u8,
}

/// Slice reader recording how many bytes were consumed.
struct CountingReader<'a> {
    bytes: &'a [u8],
    pos: &'a Cell<usize>,
}

impl Reader for CountingReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> Result<(), DecodeError> {
        let start = self.pos.get();
        let end = start.saturating_add(out.len());
        let Some(src) = self.bytes.get(start..end) else {
            self.pos.set(self.bytes.len());
            return Err(DecodeError::UnexpectedEnd {
                additional: end - self.bytes.len(),
            });
        };
        out.copy_from_slice(src);
        self.pos.set(end);
        Ok(())
    }
}

fn decode_tagged<T: Decode<()>>(bytes: &[u8], kind: u8) -> Result<(T, usize), HeaderParseFailure> {
    let pos = Cell::new(0);
    let reader = || CountingReader { bytes, pos: &pos };

    let found: u8 = bincode::decode_from_reader(reader(), header_config())
        .map_err(|e| HeaderParseFailure::new(pos.get(), e))?;
    if found != kind {
        return Err(HeaderParseFailure::new(
            pos.get(),
            KindMismatch {
                expected: kind,
                found,
            },
        ));
    }
    let header = bincode::decode_from_reader(reader(), header_config())
        .map_err(|e| HeaderParseFailure::new(pos.get(), e))?;
    Ok((header, pos.get()))
}

fn encode_tagged<T: bincode::Encode>(kind: u8, header: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = encode_to_vec(kind, header_config())?;
    bytes.extend(encode_to_vec(header, header_config())?);
    Ok(bytes)
}

impl ResponseHeader {
    /// Encode the header in the layout [`BincodeHeaderParser`] reads.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_tagged(RESPONSE_KIND, self) }
}

impl NotificationHeader {
    /// Encode the header in the layout [`BincodeHeaderParser`] reads.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_tagged(NOTIFICATION_KIND, self)
    }
}

/// Default [`HeaderParser`] reading kind-tagged bincode headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeHeaderParser;

impl HeaderParser for BincodeHeaderParser {
    fn parse_response(&self, bytes: &[u8]) -> Result<(ResponseHeader, usize), HeaderParseFailure> {
        decode_tagged(bytes, RESPONSE_KIND)
    }

    fn parse_notification(
        &self,
        bytes: &[u8],
    ) -> Result<(NotificationHeader, usize), HeaderParseFailure> {
        decode_tagged(bytes, NOTIFICATION_KIND)
    }
}
