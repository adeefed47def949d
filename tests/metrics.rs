//! Tests for `dbwire` metrics.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

use dbwire::{
    TransportConfig,
    metrics::{self as dbwire_metrics, Direction},
};
use dbwire_testing::{open_mock, response_message};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter(snapshotter: &Snapshotter, name: &str, direction: Option<&str>) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(k, _, _, _)| {
            k.key().name() == name
                && direction.is_none_or(|dir| {
                    k.key()
                        .labels()
                        .any(|l| l.key() == "direction" && l.value() == dir)
                })
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(c) => c,
            _ => 0,
        })
        .sum()
}

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn frame_counters_are_labelled_by_direction(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        dbwire_metrics::inc_frames(direction);
        dbwire_metrics::inc_frames(direction);
    });
    assert_eq!(
        counter(&snapshotter, dbwire_metrics::FRAMES_TOTAL, Some(label)),
        2
    );
}

#[test]
fn error_metric_increments() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, dbwire_metrics::inc_errors);
    assert_eq!(counter(&snapshotter, dbwire_metrics::ERRORS_TOTAL, None), 1);
}

#[test]
fn connection_traffic_is_counted() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime");

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let config = TransportConfig::default().with_send_block_size(4);
            let (connection, _connector, peer) = open_mock(config).await.expect("open");
            let cancel = CancellationToken::new();

            peer.push_message(response_message("m", false, b"body"));
            peer.push_message(b"\xFF".to_vec());
            let _ = connection
                .receive_one(&cancel)
                .await
                .expect("receive")
                .expect("message");
            connection
                .receive_one(&cancel)
                .await
                .expect_err("garbage header");

            connection
                .send_one(dbwire::OutboundBody::reader(std::io::Cursor::new(vec![0_u8; 5])), &cancel)
                .await
                .expect("send");
            connection.close(&cancel).await.expect("close");
        });
    });

    assert_eq!(
        counter(&snapshotter, dbwire_metrics::FRAMES_TOTAL, Some("inbound")),
        2
    );
    assert_eq!(
        counter(&snapshotter, dbwire_metrics::MESSAGES_TOTAL, Some("inbound")),
        1
    );
    assert_eq!(
        counter(&snapshotter, dbwire_metrics::FRAMES_TOTAL, Some("outbound")),
        2
    );
    assert_eq!(
        counter(&snapshotter, dbwire_metrics::MESSAGES_TOTAL, Some("outbound")),
        1
    );
    assert_eq!(counter(&snapshotter, dbwire_metrics::ERRORS_TOTAL, None), 1);

    let gauge = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find(|(k, _, _, _)| k.key().name() == dbwire_metrics::CONNECTIONS_OPEN)
        .map(|(_, _, _, v)| v);
    assert!(matches!(gauge, Some(DebugValue::Gauge(g)) if g.into_inner().abs() < f64::EPSILON));
}
