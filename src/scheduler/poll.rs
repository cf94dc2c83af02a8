//! Continuous, gap-free acquisition.
//!
//! A [`PollScheduler`] session connects, records the server's current sample
//! count as its cursor, and then repeatedly fetches fixed-size windows
//! `[cursor, cursor + buffer_samples)` as soon as the server has produced
//! them. Between drains it sleeps until the next poll-timer tick.

use super::fetcher::{PollTiming, StreamConnection};
use super::signal::{PollTimer, TimerResolution};
use crate::multicast::{BufferSink, Producer, RunContext, SharedStream};
use acq_core::{AcqError, AcqResult, Connector, StreamSpec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do when the server reports fewer samples than already delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionPolicy {
    /// End the session with a protocol error.
    #[default]
    Fail,
    /// Restart the cursor at the new count and keep going.
    Resync,
}

/// Poll-mode acquisition parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollOptions {
    /// Length of each buffer in milliseconds of acquisition time.
    pub buffer_length_ms: u64,
    /// Keep every n-th sample.
    pub downsample: u32,
    /// Deliver volts instead of raw units.
    pub convert_to_volts: bool,
    /// Poll timer resolution.
    pub timer: TimerResolution,
    /// Handling of a regressed server sample count.
    pub on_count_regression: RegressionPolicy,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            buffer_length_ms: 1000,
            downsample: 1,
            convert_to_volts: false,
            timer: TimerResolution::Coarse,
            on_count_regression: RegressionPolicy::Fail,
        }
    }
}

impl PollOptions {
    /// Reject non-positive buffer lengths and downsample factors.
    pub fn validate(&self) -> AcqResult<()> {
        if self.buffer_length_ms == 0 {
            return Err(AcqError::configuration("buffer_length_ms must be positive"));
        }
        if self.downsample == 0 {
            return Err(AcqError::configuration("downsample must be at least 1"));
        }
        Ok(())
    }
}

/// Next sample not yet delivered. Never moves backward on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(u64);

impl Cursor {
    /// Start at `position`.
    pub fn new(position: u64) -> Self {
        Self(position)
    }

    /// Current position.
    pub fn position(self) -> u64 {
        self.0
    }

    /// Move past a window of `span` samples the server reported as starting
    /// at `reported_start`. Returns the number of samples skipped.
    pub fn advance(&mut self, reported_start: u64, span: u64) -> u64 {
        let skipped = reported_start.saturating_sub(self.0);
        self.0 = self.0.max(reported_start.saturating_add(span));
        skipped
    }

    /// Jump to `position`, backward if necessary.
    pub fn resync(&mut self, position: u64) {
        self.0 = position;
    }
}

/// Continuous-mode producer. Each run opens its own connection.
pub struct PollScheduler {
    connector: Arc<dyn Connector>,
    spec: StreamSpec,
    options: PollOptions,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("spec", &self.spec)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PollScheduler {
    /// Validate options. No connection is attempted here.
    pub fn new(
        connector: Arc<dyn Connector>,
        spec: StreamSpec,
        options: PollOptions,
    ) -> AcqResult<Self> {
        options.validate()?;
        Ok(Self {
            connector,
            spec,
            options,
        })
    }

    /// Stream being polled.
    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    /// Acquisition parameters.
    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    /// Share this scheduler between subscribers.
    pub fn into_shared(self, subscriber_capacity: usize) -> SharedStream {
        SharedStream::with_capacity(self, subscriber_capacity)
    }
}

impl Producer for PollScheduler {
    fn label(&self) -> String {
        format!("poll-{}", self.spec.stream)
    }

    fn run(&self, ctx: &RunContext, sink: &mut dyn BufferSink) -> AcqResult<()> {
        let mut conn = StreamConnection::open(self.connector.as_ref(), &self.spec)?;
        let timing = PollTiming::new(conn.handle().sample_rate(), self.options.buffer_length_ms);
        let window = timing.buffer_samples as u64;
        let mut last_count = conn.sample_count()?;
        let mut cursor = Cursor::new(last_count);

        info!(
            stream = %self.spec.stream,
            sample_rate = conn.handle().sample_rate(),
            buffer_samples = timing.buffer_samples,
            poll_period_ms = timing.poll_period.as_millis() as u64,
            cursor = cursor.position(),
            "poll session started"
        );

        let wake = Arc::clone(ctx.wake());
        let _timer = PollTimer::start(timing.poll_period, self.options.timer, move || {
            wake.notify()
        })?;

        while !ctx.is_cancelled() {
            loop {
                // A short window taken after eviction can leave the cursor
                // ahead of the count, so regressions are judged against the
                // last observed count.
                let count = conn.sample_count()?;
                if count < last_count {
                    match self.options.on_count_regression {
                        RegressionPolicy::Fail => {
                            return Err(AcqError::protocol(
                                "get_sample_count",
                                format!(
                                    "sample count went backwards from {} to {}",
                                    last_count, count
                                ),
                            ));
                        }
                        RegressionPolicy::Resync => {
                            warn!(
                                stream = %self.spec.stream,
                                cursor = cursor.position(),
                                last_count,
                                count,
                                "sample count went backwards, resynchronising"
                            );
                            cursor.resync(count);
                        }
                    }
                }
                last_count = count;

                if window == 0 || count.saturating_sub(cursor.position()) < window {
                    break;
                }

                let buffer = conn.fetch_window(
                    cursor.position(),
                    timing.buffer_samples,
                    self.options.downsample,
                    self.options.convert_to_volts,
                )?;
                let skipped = cursor.advance(buffer.start_sample(), buffer.span());
                if skipped > 0 {
                    warn!(
                        stream = %self.spec.stream,
                        skipped,
                        cursor = cursor.position(),
                        "samples evicted before fetch, cursor jumped forward"
                    );
                }

                if !sink.emit(buffer) {
                    debug!(stream = %self.spec.stream, "no subscribers left");
                    return Ok(());
                }
                if ctx.is_cancelled() {
                    break;
                }
            }
            ctx.sleep();
        }

        info!(stream = %self.spec.stream, cursor = cursor.position(), "poll session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::ErrorKind;

    #[test]
    fn test_cursor_advance_never_backward() {
        let mut cursor = Cursor::new(100);
        assert_eq!(cursor.advance(100, 50), 0);
        assert_eq!(cursor.position(), 150);

        // Server reported an evicted start: jump forward.
        assert_eq!(cursor.advance(400, 50), 250);
        assert_eq!(cursor.position(), 450);

        // A start behind the cursor never moves it back.
        assert_eq!(cursor.advance(10, 50), 0);
        assert_eq!(cursor.position(), 450);

        cursor.resync(5);
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn test_cursor_advance_saturates_at_end_of_range() {
        let mut cursor = Cursor::new(u64::MAX - 20);
        assert_eq!(cursor.advance(u64::MAX - 1, 10), 19);
        assert_eq!(cursor.position(), u64::MAX);
        assert_eq!(cursor.advance(u64::MAX, 10), 0);
        assert_eq!(cursor.position(), u64::MAX);
    }

    #[test]
    fn test_options_validation() {
        assert!(PollOptions::default().validate().is_ok());
        let bad = PollOptions {
            buffer_length_ms: 0,
            ..Default::default()
        };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Configuration);
        let bad = PollOptions {
            downsample: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_options_deserialize_policy() {
        let options: PollOptions =
            toml::from_str("buffer_length_ms = 20\non_count_regression = \"resync\"\ntimer = \"fine\"")
                .unwrap();
        assert_eq!(options.buffer_length_ms, 20);
        assert_eq!(options.on_count_regression, RegressionPolicy::Resync);
        assert_eq!(options.timer, TimerResolution::Fine);
        assert_eq!(options.downsample, 1);
    }
}
