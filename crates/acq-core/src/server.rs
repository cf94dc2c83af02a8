//! Collaborator traits: the acquisition server as seen by the scheduler.
//!
//! The server is opaque. A [`Connector`] opens connections; an
//! [`AcquisitionServer`] is one open connection. Connections are released by
//! dropping them, so every exit path of a poll loop (cancel, error, panic)
//! gives the connection back.
//!
//! All methods take `&mut self`: a connection handle is never shared between
//! threads, which is what keeps at most one call in flight per connection.

use crate::buffer::RawBlock;
use crate::error::AcqResult;
use crate::stream::{Endpoint, StreamId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gate or trigger level for recording control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerLevel {
    /// Leave the current level alone.
    #[default]
    NoChange = -1,
    /// Drive low.
    SetLow = 0,
    /// Drive high.
    SetHigh = 1,
}

impl TriggerLevel {
    /// Server level code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for TriggerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TriggerLevel::NoChange => "no-change",
            TriggerLevel::SetLow => "low",
            TriggerLevel::SetHigh => "high",
        };
        write!(f, "{}", label)
    }
}

/// Control command sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Set digital output lines to `value`.
    ///
    /// `lines` is the server's line selector string, passed through untouched.
    SetDigitalOut {
        /// Output value.
        value: i32,
        /// Line selector, e.g. `"Dev6/port0/line2,Dev6/port0/line5"`.
        lines: String,
    },
    /// Set the recording gate and trigger. Codes: -1 no change, 0 low, 1 high.
    TriggerGt {
        /// Gate level code.
        gate: i32,
        /// Trigger level code.
        trigger: i32,
    },
}

impl Command {
    /// Short name for logs and statistics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetDigitalOut { .. } => "set_digital_out",
            Command::TriggerGt { .. } => "trigger_gt",
        }
    }
}

/// One open connection to the acquisition server.
pub trait AcquisitionServer: Send {
    /// Sample rate of `stream` in Hz.
    fn sample_rate(&mut self, stream: StreamId) -> AcqResult<f64>;

    /// Total samples produced so far on `stream`.
    fn sample_count(&mut self, stream: StreamId) -> AcqResult<u64>;

    /// Multiplier converting a raw i16 sample on `channel` to volts.
    fn i16_to_volts(&mut self, stream: StreamId, channel: u32) -> AcqResult<f64>;

    /// Fetch up to `max_samples` scans starting at `start_sample`.
    ///
    /// The returned block reports where it actually starts, which may be
    /// later than requested if old samples were evicted upstream.
    fn fetch(
        &mut self,
        stream: StreamId,
        start_sample: u64,
        max_samples: usize,
        channels: &[u32],
        downsample: u32,
    ) -> AcqResult<RawBlock>;

    /// Whether `fetch` and `fetch_latest` apply `downsample` themselves.
    ///
    /// Clients decimate locally when this is `false`.
    fn decimates(&self) -> bool {
        true
    }

    /// Fetch the newest `max_samples` scans.
    fn fetch_latest(
        &mut self,
        stream: StreamId,
        max_samples: usize,
        channels: &[u32],
        downsample: u32,
    ) -> AcqResult<RawBlock>;

    /// Issue a control command.
    fn send_command(&mut self, command: &Command) -> AcqResult<()>;

    /// Probe geometry map as `key=value` strings.
    fn geom_map(&mut self, probe: u32) -> AcqResult<Vec<String>>;
}

/// Opens connections to an acquisition server.
pub trait Connector: Send + Sync {
    /// Connect to `endpoint`.
    fn connect(&self, endpoint: &Endpoint) -> AcqResult<Box<dyn AcquisitionServer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_level_codes() {
        assert_eq!(TriggerLevel::NoChange.code(), -1);
        assert_eq!(TriggerLevel::SetLow.code(), 0);
        assert_eq!(TriggerLevel::SetHigh.code(), 1);
        assert_eq!(TriggerLevel::default(), TriggerLevel::NoChange);
    }

    #[test]
    fn test_trigger_level_serde() {
        let level: TriggerLevel = serde_json::from_str("\"set-high\"").unwrap();
        assert_eq!(level, TriggerLevel::SetHigh);
    }

    #[test]
    fn test_command_name() {
        let cmd = Command::TriggerGt {
            gate: 1,
            trigger: -1,
        };
        assert_eq!(cmd.name(), "trigger_gt");
    }
}
