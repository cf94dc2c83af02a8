//! Stream identity and the per-connection [`StreamHandle`].

use crate::error::{AcqError, AcqResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default host of the acquisition command server.
pub const DEFAULT_HOST: &str = "localhost";

/// Default port of the acquisition command server.
pub const DEFAULT_PORT: u16 = 4142;

/// Kind of acquisition stream. Discriminants match the server's stream codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Primary DAQ line (NI-DAQ).
    #[default]
    Daq = 0,
    /// Auxiliary acquisition box.
    OneBox = 1,
    /// Recording probe.
    Probe = 2,
}

impl StreamKind {
    /// Server stream code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for StreamKind {
    type Error = AcqError;

    fn try_from(code: i32) -> AcqResult<Self> {
        match code {
            0 => Ok(Self::Daq),
            1 => Ok(Self::OneBox),
            2 => Ok(Self::Probe),
            other => Err(AcqError::configuration(format!(
                "unknown stream type {} (expected 0: DAQ, 1: OneBox, 2: Probe)",
                other
            ))),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamKind::Daq => "daq",
            StreamKind::OneBox => "onebox",
            StreamKind::Probe => "probe",
        };
        write!(f, "{}", label)
    }
}

/// A substream on the server: stream kind plus substream index
/// (0 for the DAQ line, probe number for probes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StreamId {
    /// Stream kind.
    pub kind: StreamKind,
    /// Substream index.
    pub substream: u32,
}

impl StreamId {
    /// Create a stream id.
    pub fn new(kind: StreamKind, substream: u32) -> Self {
        Self { kind, substream }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.substream)
    }
}

/// Address of the acquisition command server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Non-empty, ordered set of unique channel indices.
///
/// Order is preserved as given; it is the row order of every buffer fetched
/// for this set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct ChannelSet(Arc<[u32]>);

impl ChannelSet {
    /// Validate and wrap a list of channel indices.
    pub fn new(channels: impl Into<Vec<u32>>) -> AcqResult<Self> {
        let channels = channels.into();
        if channels.is_empty() {
            return Err(AcqError::configuration("channel set must not be empty"));
        }
        let mut seen = std::collections::HashSet::with_capacity(channels.len());
        for &ch in &channels {
            if !seen.insert(ch) {
                return Err(AcqError::configuration(format!(
                    "channel {} listed more than once",
                    ch
                )));
            }
        }
        Ok(Self(channels.into()))
    }

    /// Channel indices in row order.
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Shared view of the indices (cheap to clone into buffers).
    pub fn shared(&self) -> Arc<[u32]> {
        Arc::clone(&self.0)
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `channel` is part of the set.
    pub fn contains(&self, channel: u32) -> bool {
        self.0.contains(&channel)
    }

    /// Row index of `channel`, if present.
    pub fn position(&self, channel: u32) -> Option<usize> {
        self.0.iter().position(|&c| c == channel)
    }
}

impl TryFrom<Vec<u32>> for ChannelSet {
    type Error = AcqError;

    fn try_from(channels: Vec<u32>) -> AcqResult<Self> {
        Self::new(channels)
    }
}

impl From<ChannelSet> for Vec<u32> {
    fn from(set: ChannelSet) -> Self {
        set.0.to_vec()
    }
}

/// What to connect to: server, substream and channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Command server address.
    pub endpoint: Endpoint,
    /// Substream to read.
    pub stream: StreamId,
    /// Channels to fetch, in row order.
    pub channels: ChannelSet,
}

impl StreamSpec {
    /// Create a stream spec.
    pub fn new(endpoint: Endpoint, stream: StreamId, channels: ChannelSet) -> Self {
        Self {
            endpoint,
            stream,
            channels,
        }
    }
}

/// Immutable description of one connected substream.
///
/// Built once per connection from the [`StreamSpec`] plus the values the server
/// reports at connect time (sample rate, i16→volts multipliers).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHandle {
    spec: StreamSpec,
    sample_rate: f64,
    multipliers: Arc<[f64]>,
}

impl StreamHandle {
    /// Assemble a handle. `multipliers` must have one entry per channel.
    pub fn new(spec: StreamSpec, sample_rate: f64, multipliers: Vec<f64>) -> AcqResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(AcqError::protocol(
                "get_sample_rate",
                format!("invalid sample rate {} for stream {}", sample_rate, spec.stream),
            ));
        }
        if multipliers.len() != spec.channels.len() {
            return Err(AcqError::protocol(
                "get_i16_to_volts",
                format!(
                    "got {} multipliers for {} channels",
                    multipliers.len(),
                    spec.channels.len()
                ),
            ));
        }
        Ok(Self {
            spec,
            sample_rate,
            multipliers: multipliers.into(),
        })
    }

    /// Server endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.spec.endpoint
    }

    /// Substream id.
    pub fn stream(&self) -> StreamId {
        self.spec.stream
    }

    /// Channel set.
    pub fn channels(&self) -> &ChannelSet {
        &self.spec.channels
    }

    /// Sample rate in Hz, fixed at connect time.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Raw→volts multiplier per row.
    pub fn multipliers(&self) -> &[f64] {
        &self.multipliers
    }

    /// The stream spec this handle was opened from.
    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }
}
