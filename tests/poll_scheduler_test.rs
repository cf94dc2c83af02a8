//! Continuous-mode behavior against the simulated server.

mod common;

use acq_core::ErrorKind;
use acq_driver_mock::{ErrorConfig, ErrorScenario, SimStreamConfig, SimulatedServer};
use acq_stream::legacy::LegacyStreamOptions;
use acq_stream::scheduler::{PollOptions, PollScheduler, RegressionPolicy};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn delivers_every_sample_exactly_once_in_order() {
    let server = server(1_000.0, 4, 1_000);
    let channels = vec![3, 0];
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(channels.clone()), poll_options(10))
        .unwrap()
        .into_shared(64);

    let mut sub = stream.subscribe();
    wait_for_session(&server);

    server.advance(probe(), 35);
    let mut expected_start = 1_000;
    for _ in 0..3 {
        let buffer = next_buffer(&mut sub);
        assert_eq!(buffer.start_sample(), expected_start);
        assert_eq!(buffer.n_samples(), 10);
        assert_eq!(buffer.channels(), channels.as_slice());
        assert_ramp(&buffer, &channels);
        expected_start += 10;
    }
    // 5 samples left over: not enough for a buffer.
    assert_quiet(&mut sub, Duration::from_millis(30));

    server.advance(probe(), 5);
    let buffer = next_buffer(&mut sub);
    assert_eq!(buffer.sample_range(), 1_030..1_040);
}

#[test]
fn decimates_and_converts_each_buffer() {
    let server = SimulatedServer::builder()
        .stream(
            probe(),
            SimStreamConfig::new(1_000.0, 2).with_multipliers(vec![0.5, 2.0]),
        )
        .build();
    let options = PollOptions {
        downsample: 3,
        convert_to_volts: true,
        ..poll_options(10)
    };
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![1]), options)
        .unwrap()
        .into_shared(8);

    let mut sub = stream.subscribe();
    wait_for_session(&server);
    server.advance(probe(), 10);

    let buffer = next_buffer(&mut sub);
    assert!(buffer.is_volts());
    assert_eq!(buffer.n_samples(), 4);
    assert_eq!(buffer.span(), 10);
    let expected: Vec<f64> = [0u64, 3, 6, 9]
        .iter()
        .map(|&i| f64::from(acq_driver_mock::ramp_value(1, i)) * 2.0)
        .collect();
    assert_eq!(buffer.volts_row(0).unwrap(), expected.as_slice());
}

#[test]
fn evicted_samples_move_cursor_forward() {
    let server = SimulatedServer::builder()
        .stream(
            probe(),
            SimStreamConfig::new(1_000.0, 1)
                .with_initial_count(1_000)
                .with_ring_capacity(50),
        )
        .build();
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), poll_options(10))
        .unwrap()
        .into_shared(64);

    let mut sub = stream.subscribe();
    wait_for_session(&server);

    // Oldest retained sample becomes 1150; the cursor is still at 1000.
    server.advance(probe(), 200);
    let starts: Vec<u64> = (0..5).map(|_| next_buffer(&mut sub).start_sample()).collect();
    assert_eq!(starts, vec![1_150, 1_160, 1_170, 1_180, 1_190]);
    assert_quiet(&mut sub, Duration::from_millis(30));
}

#[test]
fn history_shorter_than_window_keeps_streaming() {
    let server = SimulatedServer::builder()
        .stream(
            probe(),
            SimStreamConfig::new(1_000.0, 1).with_ring_capacity(5),
        )
        .build();
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), poll_options(10))
        .unwrap()
        .into_shared(64);

    let mut sub = stream.subscribe();
    wait_for_session(&server);

    // Only the newest five samples of each ten-sample window survive.
    server.advance(probe(), 30);
    let first = next_buffer(&mut sub);
    assert_eq!(first.sample_range(), 25..30);
    assert_eq!(first.n_samples(), 5);
    assert_ramp(&first, &[0]);
    assert_quiet(&mut sub, Duration::from_millis(30));

    server.advance(probe(), 10);
    let second = next_buffer(&mut sub);
    assert_eq!(second.sample_range(), 35..40);
    assert_eq!(second.n_samples(), 5);
    assert_quiet(&mut sub, Duration::from_millis(30));
    assert!(stream.is_active());
    assert_eq!(server.stats().disconnects, 0);
}

#[test]
fn count_regression_fails_by_default() {
    let server = server(1_000.0, 1, 1_000);
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), poll_options(10))
        .unwrap()
        .into_shared(64);

    let mut sub = stream.subscribe();
    wait_for_session(&server);
    server.advance(probe(), 20);
    next_buffer(&mut sub);
    next_buffer(&mut sub);

    server.set_sample_count(probe(), 500);
    let err = next_item(&mut sub).unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(next_item(&mut sub).is_none());
    wait_until("disconnect", || server.stats().disconnects == 1);
}

#[test]
fn count_regression_resyncs_when_configured() {
    let server = server(1_000.0, 1, 1_000);
    let options = PollOptions {
        on_count_regression: RegressionPolicy::Resync,
        ..poll_options(10)
    };
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), options)
        .unwrap()
        .into_shared(64);

    let mut sub = stream.subscribe();
    wait_for_session(&server);
    server.advance(probe(), 10);
    assert_eq!(next_buffer(&mut sub).start_sample(), 1_000);

    server.set_sample_count(probe(), 500);
    let calls = server.stats().calls("get_sample_count");
    wait_until("resync poll", || {
        server.stats().calls("get_sample_count") > calls + 1
    });
    server.advance(probe(), 10);
    assert_eq!(next_buffer(&mut sub).start_sample(), 500);
}

#[test]
fn construction_rejects_bad_options_without_connecting() {
    let server = server(1_000.0, 1, 0);
    let bad = PollOptions {
        downsample: 0,
        ..Default::default()
    };
    let err = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), bad).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(server.stats().connects, 0);
}

#[test]
fn fetch_failure_ends_sequence_with_one_error() {
    let server = SimulatedServer::builder()
        .stream(probe(), SimStreamConfig::new(1_000.0, 1))
        .errors(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "fetch",
            count: 2,
        }))
        .build();
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), poll_options(10))
        .unwrap()
        .into_shared(64);

    let mut sub = stream.subscribe();
    wait_for_session(&server);
    server.advance(probe(), 50);

    assert!(next_item(&mut sub).unwrap().is_ok());
    assert!(next_item(&mut sub).unwrap().is_ok());
    assert!(next_item(&mut sub).unwrap().is_err());
    assert!(next_item(&mut sub).is_none());
    assert!(!stream.is_active());
    assert_eq!(server.stats().disconnects, 1);
}

#[test]
fn refused_connection_is_reported_to_subscriber() {
    let server = SimulatedServer::builder()
        .stream(probe(), SimStreamConfig::new(1_000.0, 1))
        .errors(ErrorConfig::scenario(ErrorScenario::RefuseConnections))
        .build();
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), poll_options(10))
        .unwrap()
        .into_shared(64);

    let mut sub = stream.subscribe();
    let err = next_item(&mut sub).unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(next_item(&mut sub).is_none());
    assert_eq!(server.stats().refused, 1);
}

#[test]
fn cancellation_does_not_wait_for_poll_period() {
    let server = server(1_000.0, 1, 0);
    // Ten-second buffers: a 5 s poll period.
    let stream = PollScheduler::new(Arc::new(server.clone()), spec(vec![0]), poll_options(10_000))
        .unwrap()
        .into_shared(64);

    let sub = stream.subscribe();
    wait_for_session(&server);
    let started = std::time::Instant::now();
    drop(sub);
    wait_until("disconnect", || server.stats().disconnects == 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn legacy_stream_options_drive_poll_mode() {
    let server = server(1_000.0, 4, 0);
    let scheduler = LegacyStreamOptions {
        stream_type: 2,
        channels: vec![1, 2],
        buffer_length: 20,
        use_high_res_timer: true,
        ..Default::default()
    }
    .into_scheduler(Arc::new(server.clone()))
    .unwrap();
    let stream = scheduler.into_shared(16);

    let mut sub = stream.subscribe();
    wait_for_session(&server);
    server.advance(probe(), 40);
    let first = next_buffer(&mut sub);
    let second = next_buffer(&mut sub);
    assert_eq!(first.sample_range(), 0..20);
    assert_eq!(second.sample_range(), 20..40);
    assert_ramp(&second, &[1, 2]);
}
