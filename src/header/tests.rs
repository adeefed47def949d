//! Unit tests for header classification.

use proptest::prelude::*;
use rstest::rstest;

use super::*;
use crate::error::HeaderParseFailure;

fn response_frame(id: &str, is_error: bool, body: &[u8]) -> (Vec<u8>, usize) {
    let mut frame = ResponseHeader::new(id, is_error)
        .to_bytes()
        .expect("encode response header");
    let offset = frame.len();
    frame.extend_from_slice(body);
    (frame, offset)
}

fn notification_frame(id: &str, action: &str, body: &[u8]) -> (Vec<u8>, usize) {
    let mut frame = NotificationHeader::new(id, action)
        .to_bytes()
        .expect("encode notification header");
    let offset = frame.len();
    frame.extend_from_slice(body);
    (frame, offset)
}

#[test]
fn response_header_is_tried_first() {
    let (frame, offset) = response_frame("req-1", true, b"{\"error\":1}");
    let (header, body_offset) = classify(&BincodeHeaderParser, &frame).expect("classify");

    assert_eq!(
        header,
        MessageHeader::Response(ResponseHeader::new("req-1", true))
    );
    assert_eq!(body_offset, offset);
    assert_eq!(&frame[body_offset..], b"{\"error\":1}");
}

#[test]
fn notification_header_is_the_fallback() {
    let (frame, offset) = notification_frame("live-7", "CREATE", b"payload");
    let (header, body_offset) = classify(&BincodeHeaderParser, &frame).expect("classify");

    assert!(header.is_notification());
    assert_eq!(header.correlation_id(), "live-7");
    assert_eq!(
        header.as_notification().map(|n| n.action.as_str()),
        Some("CREATE")
    );
    assert_eq!(body_offset, offset);
}

#[rstest]
#[case::response(response_frame("", false, b"x").0)]
#[case::notification(notification_frame("", "DELETE", b"x").0)]
fn empty_correlation_id_is_rejected(#[case] frame: Vec<u8>) {
    let err = classify(&BincodeHeaderParser, &frame).expect_err("empty id must fail");
    assert!(matches!(err, HeaderError::MissingCorrelationId));
}

#[test]
fn unrecognized_frames_carry_both_failures() {
    let frame = [0xFF_u8, 0x00, 0x01];
    let err = classify(&BincodeHeaderParser, &frame).expect_err("garbage must fail");

    let HeaderError::Unrecognized {
        response,
        notification,
        offset,
    } = err
    else {
        panic!("expected Unrecognized, got {err:?}");
    };
    assert_eq!(response.offset, 1);
    assert_eq!(notification.offset, 1);
    assert_eq!(offset, 1);
}

#[test]
fn empty_input_is_unrecognized() {
    let err = classify(&BincodeHeaderParser, &[]).expect_err("empty input must fail");
    assert!(matches!(err, HeaderError::Unrecognized { offset: 0, .. }));
}

#[test]
fn truncated_header_reports_furthest_offset() {
    let (frame, offset) = response_frame("a-long-correlation-id", false, b"");
    let truncated = &frame[..offset - 1];

    let err = classify(&BincodeHeaderParser, truncated).expect_err("truncated must fail");
    let HeaderError::Unrecognized {
        response,
        notification,
        offset: furthest,
    } = err
    else {
        panic!("expected Unrecognized, got {err:?}");
    };
    assert!(response.offset > notification.offset);
    assert_eq!(furthest, response.offset);
}

/// Parser stub failing both attempts at fixed offsets.
struct FailingParser {
    response_offset: usize,
    notification_offset: usize,
}

impl HeaderParser for FailingParser {
    fn parse_response(&self, _: &[u8]) -> Result<(ResponseHeader, usize), HeaderParseFailure> {
        Err(HeaderParseFailure::new(self.response_offset, "not a response"))
    }

    fn parse_notification(
        &self,
        _: &[u8],
    ) -> Result<(NotificationHeader, usize), HeaderParseFailure> {
        Err(HeaderParseFailure::new(
            self.notification_offset,
            "not a notification",
        ))
    }
}

#[rstest]
#[case(3, 9, 9)]
#[case(12, 4, 12)]
#[case(0, 0, 0)]
fn aggregate_offset_is_the_larger_one(
    #[case] response_offset: usize,
    #[case] notification_offset: usize,
    #[case] expected: usize,
) {
    let parser = FailingParser {
        response_offset,
        notification_offset,
    };
    let err = classify(&parser, b"anything").expect_err("stub always fails");
    assert!(matches!(err, HeaderError::Unrecognized { offset, .. } if offset == expected));
    assert!(
        err.to_string()
            .contains(&format!("furthest offset {expected}"))
    );
}

proptest! {
    #[test]
    fn valid_response_headers_round_trip_offsets(
        id in "[a-z0-9-]{1,32}",
        is_error in any::<bool>(),
        body in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let (frame, offset) = response_frame(&id, is_error, &body);
        let (header, body_offset) = classify(&BincodeHeaderParser, &frame).expect("classify");
        prop_assert_eq!(header.as_response(), Some(&ResponseHeader::new(id, is_error)));
        prop_assert_eq!(body_offset, offset);
        prop_assert_eq!(&frame[body_offset..], &body[..]);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        match classify(&BincodeHeaderParser, &bytes) {
            Ok((header, offset)) => {
                prop_assert!(header.has_correlation_id());
                prop_assert!(offset <= bytes.len());
            }
            Err(HeaderError::Unrecognized { offset, .. }) => prop_assert!(offset <= bytes.len()),
            Err(HeaderError::MissingCorrelationId) => {}
        }
    }
}
