//! Shared helpers for the integration tests.

#![allow(dead_code)]

use acq_core::{AcqResult, ChannelSet, Endpoint, StreamId, StreamKind, StreamSpec};
use acq_driver_mock::{ramp_value, SimStreamConfig, SimulatedServer};
use acq_stream::multicast::{SharedBuffer, Subscription, TryRecvError};
use acq_stream::scheduler::{PollOptions, TimerResolution};
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn probe() -> StreamId {
    StreamId::new(StreamKind::Probe, 0)
}

/// Manual-clock server with one probe substream.
pub fn server(sample_rate: f64, n_channels: u32, initial_count: u64) -> SimulatedServer {
    SimulatedServer::builder()
        .stream(
            probe(),
            SimStreamConfig::new(sample_rate, n_channels).with_initial_count(initial_count),
        )
        .build()
}

pub fn spec(channels: Vec<u32>) -> StreamSpec {
    StreamSpec::new(
        Endpoint::default(),
        probe(),
        ChannelSet::new(channels).unwrap(),
    )
}

/// Poll options with the fine timer so tests tick quickly.
pub fn poll_options(buffer_length_ms: u64) -> PollOptions {
    PollOptions {
        buffer_length_ms,
        timer: TimerResolution::Fine,
        ..Default::default()
    }
}

/// Next item of a subscription, `None` once it ended. Panics after [`TIMEOUT`].
pub fn next_item(sub: &mut Subscription) -> Option<AcqResult<SharedBuffer>> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        match sub.try_recv() {
            Ok(item) => return Some(item),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {
                assert!(Instant::now() < deadline, "timed out waiting for a buffer");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Next buffer, panicking on error or end of sequence.
pub fn next_buffer(sub: &mut Subscription) -> SharedBuffer {
    next_item(sub)
        .expect("sequence ended")
        .expect("sequence failed")
}

/// Assert nothing arrives for `quiet`.
pub fn assert_quiet(sub: &mut Subscription, quiet: Duration) {
    std::thread::sleep(quiet);
    assert!(
        matches!(sub.try_recv(), Err(TryRecvError::Empty)),
        "unexpected item"
    );
}

pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Wait until a poll session has read its initial cursor.
pub fn wait_for_session(server: &SimulatedServer) {
    wait_until("session start", || {
        server.stats().calls("get_sample_count") >= 1
    });
}

/// Check every raw sample of `buffer` against the ramp waveform.
pub fn assert_ramp(buffer: &SharedBuffer, channels: &[u32]) {
    let step = u64::from(buffer.downsample());
    for (row, &ch) in channels.iter().enumerate() {
        let samples = buffer.raw_row(row).expect("raw row");
        for (col, &v) in samples.iter().enumerate() {
            let index = buffer.start_sample() + col as u64 * step;
            assert_eq!(v, ramp_value(ch, index), "row {} col {}", row, col);
        }
    }
}
