//! Simulated acquisition server.
//!
//! [`SimulatedServer`] implements [`Connector`]; every `connect` hands out a
//! [`SimConnection`] implementing [`AcquisitionServer`] over shared state.
//! Each configured substream has a sample counter, a bounded ring of retained
//! history and a deterministic [`Waveform`].
//!
//! The counter is driven either by the test ([`SampleClock::Manual`], via
//! [`SimulatedServer::advance`]) or by the wall clock
//! ([`SampleClock::Realtime`]). Tests observe connection lifecycle and call
//! concurrency through [`ServerStats`] and the command log.

use crate::common::{ErrorConfig, TimingConfig};
use crate::waveform::Waveform;
use acq_core::{
    AcqError, AcqResult, AcquisitionServer, Command, Connector, Endpoint, RawBlock, StreamId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default raw-to-volts multiplier (±5 V over the i16 range).
pub const DEFAULT_I16_TO_VOLTS: f64 = 5.0 / 32768.0;

/// Configuration of one simulated substream.
#[derive(Debug, Clone, PartialEq)]
pub struct SimStreamConfig {
    /// Samples per second per channel.
    pub sample_rate: f64,
    /// Channels available on the substream.
    pub n_channels: u32,
    /// Raw-to-volts multiplier per channel.
    pub multipliers: Vec<f64>,
    /// Samples of history retained; older samples are evicted.
    pub ring_capacity: u64,
    /// Sample counter value at start.
    pub initial_count: u64,
    /// Signal shape.
    pub waveform: Waveform,
}

impl SimStreamConfig {
    /// A substream with ten seconds of history and uniform multipliers.
    pub fn new(sample_rate: f64, n_channels: u32) -> Self {
        Self {
            sample_rate,
            n_channels,
            multipliers: vec![DEFAULT_I16_TO_VOLTS; n_channels as usize],
            ring_capacity: (sample_rate.max(0.0) * 10.0) as u64,
            initial_count: 0,
            waveform: Waveform::Ramp,
        }
    }

    /// Set per-channel multipliers.
    pub fn with_multipliers(mut self, multipliers: Vec<f64>) -> Self {
        self.multipliers = multipliers;
        self
    }

    /// Set the retained history in samples.
    pub fn with_ring_capacity(mut self, capacity: u64) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Start the counter at `count`.
    pub fn with_initial_count(mut self, count: u64) -> Self {
        self.initial_count = count;
        self
    }

    /// Set the signal shape.
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }
}

/// What advances the sample counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleClock {
    /// Counters move only through [`SimulatedServer::advance`].
    #[default]
    Manual,
    /// Counters follow the wall clock at each stream's sample rate.
    Realtime,
}

/// Observable server-side statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Successful connects.
    pub connects: u64,
    /// Connections released.
    pub disconnects: u64,
    /// Refused connection attempts.
    pub refused: u64,
    /// Connections currently open.
    pub active_connections: usize,
    /// Highest number of calls in flight at once, across all connections.
    pub max_concurrent_calls: usize,
    /// Calls per operation name.
    pub calls: HashMap<&'static str, u64>,
}

impl ServerStats {
    /// Number of calls of `operation`.
    pub fn calls(&self, operation: &str) -> u64 {
        self.calls.get(operation).copied().unwrap_or(0)
    }
}

struct SimStream {
    config: SimStreamConfig,
    count: u64,
    origin: Instant,
}

impl SimStream {
    fn new(config: SimStreamConfig) -> Self {
        Self {
            count: config.initial_count,
            config,
            origin: Instant::now(),
        }
    }

    fn current_count(&self, clock: SampleClock) -> u64 {
        match clock {
            SampleClock::Manual => self.count,
            SampleClock::Realtime => {
                let elapsed = self.origin.elapsed().as_secs_f64() * self.config.sample_rate;
                self.count + elapsed as u64
            }
        }
    }

    fn check_channels(&self, operation: &'static str, channels: &[u32]) -> AcqResult<()> {
        match channels.iter().find(|&&ch| ch >= self.config.n_channels) {
            Some(ch) => Err(AcqError::protocol(
                operation,
                format!(
                    "channel {} out of range (stream has {})",
                    ch, self.config.n_channels
                ),
            )),
            None => Ok(()),
        }
    }

    fn read(&self, start: u64, n_scans: u64, channels: &[u32], step: u64) -> RawBlock {
        let step = step.max(1);
        let capacity = (n_scans.div_ceil(step) as usize) * channels.len();
        let mut data = Vec::with_capacity(capacity);
        let mut scan = 0;
        while scan < n_scans {
            data.extend(
                channels
                    .iter()
                    .map(|&ch| self.config.waveform.sample(ch, start + scan)),
            );
            scan += step;
        }
        RawBlock::new(data, channels.len(), start)
    }
}

#[derive(Default)]
struct State {
    streams: HashMap<StreamId, SimStream>,
    probes: HashMap<u32, String>,
    commands: Vec<Command>,
    stats: ServerStats,
    in_flight: usize,
    next_connection: u64,
}

impl State {
    fn stream(&self, operation: &'static str, id: StreamId) -> AcqResult<&SimStream> {
        self.streams
            .get(&id)
            .ok_or_else(|| AcqError::protocol(operation, format!("unknown stream {}", id)))
    }
}

struct Inner {
    clock: SampleClock,
    errors: ErrorConfig,
    timing: TimingConfig,
    server_decimation: bool,
    state: Mutex<State>,
}

/// Builder for [`SimulatedServer`].
#[derive(Default)]
pub struct SimulatedServerBuilder {
    streams: Vec<(StreamId, SimStreamConfig)>,
    probes: Vec<(u32, String)>,
    clock: SampleClock,
    errors: ErrorConfig,
    timing: TimingConfig,
    client_decimation: bool,
}

impl SimulatedServerBuilder {
    /// Add a substream.
    pub fn stream(mut self, id: StreamId, config: SimStreamConfig) -> Self {
        self.streams.push((id, config));
        self
    }

    /// Register a probe with the given head part number for `geom_map`.
    pub fn probe(mut self, probe: u32, part_number: impl Into<String>) -> Self {
        self.probes.push((probe, part_number.into()));
        self
    }

    /// Choose the sample clock.
    pub fn clock(mut self, clock: SampleClock) -> Self {
        self.clock = clock;
        self
    }

    /// Inject errors.
    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Per-call latency.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// When `false`, the server ignores the downsample factor and returns
    /// every scan.
    pub fn server_side_decimation(mut self, enabled: bool) -> Self {
        self.client_decimation = !enabled;
        self
    }

    /// Build the server.
    pub fn build(self) -> SimulatedServer {
        let mut state = State::default();
        for (id, config) in self.streams {
            state.streams.insert(id, SimStream::new(config));
        }
        state.probes.extend(self.probes);
        SimulatedServer {
            inner: Arc::new(Inner {
                clock: self.clock,
                errors: self.errors,
                timing: self.timing,
                server_decimation: !self.client_decimation,
                state: Mutex::new(state),
            }),
        }
    }
}

/// Simulated acquisition server. Cloning shares the same state.
#[derive(Clone)]
pub struct SimulatedServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimulatedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedServer")
            .field("clock", &self.inner.clock)
            .field("server_decimation", &self.inner.server_decimation)
            .finish_non_exhaustive()
    }
}

impl SimulatedServer {
    /// Start building a server.
    pub fn builder() -> SimulatedServerBuilder {
        SimulatedServerBuilder::default()
    }

    /// Advance the counter of `stream` by `n` samples (manual clock).
    pub fn advance(&self, stream: StreamId, n: u64) {
        let mut state = self.inner.state.lock();
        match state.streams.get_mut(&stream) {
            Some(s) => s.count += n,
            None => warn!(stream = %stream, "advance on unknown stream"),
        }
    }

    /// Overwrite the counter of `stream`, e.g. to simulate a server restart.
    pub fn set_sample_count(&self, stream: StreamId, count: u64) {
        let mut state = self.inner.state.lock();
        if let Some(s) = state.streams.get_mut(&stream) {
            s.count = count;
            s.origin = Instant::now();
        }
    }

    /// Current counter of `stream`.
    pub fn sample_count(&self, stream: StreamId) -> Option<u64> {
        let state = self.inner.state.lock();
        state
            .streams
            .get(&stream)
            .map(|s| s.current_count(self.inner.clock))
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> ServerStats {
        self.inner.state.lock().stats.clone()
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.inner.state.lock().commands.clone()
    }

    /// The injected error configuration.
    pub fn errors(&self) -> &ErrorConfig {
        &self.inner.errors
    }
}

impl Connector for SimulatedServer {
    fn connect(&self, endpoint: &Endpoint) -> AcqResult<Box<dyn AcquisitionServer>> {
        if let Err(e) = self.inner.errors.check_connect() {
            self.inner.state.lock().stats.refused += 1;
            warn!(endpoint = %endpoint, "simulated server refused connection");
            return Err(e.into_acq(endpoint));
        }

        let id = {
            let mut state = self.inner.state.lock();
            state.stats.connects += 1;
            state.stats.active_connections += 1;
            state.next_connection += 1;
            state.next_connection
        };
        info!(endpoint = %endpoint, connection = id, "simulated server connection opened");

        Ok(Box::new(SimConnection {
            inner: Arc::clone(&self.inner),
            endpoint: endpoint.clone(),
            id,
        }))
    }
}

/// One open connection to a [`SimulatedServer`]. Dropping it disconnects.
pub struct SimConnection {
    inner: Arc<Inner>,
    endpoint: Endpoint,
    id: u64,
}

impl SimConnection {
    fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut State) -> AcqResult<T>,
    ) -> AcqResult<T> {
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.in_flight += 1;
            state.stats.max_concurrent_calls = state.stats.max_concurrent_calls.max(state.in_flight);
        }

        if !self.inner.timing.call_delay.is_zero() {
            std::thread::sleep(self.inner.timing.call_delay);
        }

        let result = self
            .inner
            .errors
            .check_operation(operation)
            .map_err(|e| e.into_acq(&self.endpoint))
            .and_then(|()| f(&mut self.inner.state.lock()));

        // Counted on completion, so a counted read has observed the state.
        let mut state = self.inner.state.lock();
        state.in_flight -= 1;
        *state.stats.calls.entry(operation).or_insert(0) += 1;
        result
    }
}

impl AcquisitionServer for SimConnection {
    fn sample_rate(&mut self, stream: StreamId) -> AcqResult<f64> {
        self.call("get_sample_rate", |state| {
            Ok(state.stream("get_sample_rate", stream)?.config.sample_rate)
        })
    }

    fn sample_count(&mut self, stream: StreamId) -> AcqResult<u64> {
        let clock = self.inner.clock;
        self.call("get_sample_count", |state| {
            Ok(state
                .stream("get_sample_count", stream)?
                .current_count(clock))
        })
    }

    fn i16_to_volts(&mut self, stream: StreamId, channel: u32) -> AcqResult<f64> {
        self.call("get_i16_to_volts", |state| {
            let s = state.stream("get_i16_to_volts", stream)?;
            s.check_channels("get_i16_to_volts", &[channel])?;
            s.config
                .multipliers
                .get(channel as usize)
                .copied()
                .ok_or_else(|| {
                    AcqError::protocol("get_i16_to_volts", format!("no multiplier for {}", channel))
                })
        })
    }

    fn fetch(
        &mut self,
        stream: StreamId,
        start_sample: u64,
        max_samples: usize,
        channels: &[u32],
        downsample: u32,
    ) -> AcqResult<RawBlock> {
        let clock = self.inner.clock;
        let step = if self.inner.server_decimation {
            u64::from(downsample)
        } else {
            1
        };
        self.call("fetch", |state| {
            if downsample == 0 {
                return Err(AcqError::protocol("fetch", "downsample must be at least 1"));
            }
            let s = state.stream("fetch", stream)?;
            s.check_channels("fetch", channels)?;
            let count = s.current_count(clock);
            let oldest = count.saturating_sub(s.config.ring_capacity);
            let start = start_sample.max(oldest).min(count);
            let n = (max_samples as u64).min(count - start);
            if start > start_sample {
                debug!(
                    stream = %stream,
                    requested = start_sample,
                    served = start,
                    "fetch start evicted from history"
                );
            }
            Ok(s.read(start, n, channels, step))
        })
    }

    fn decimates(&self) -> bool {
        self.inner.server_decimation
    }

    fn fetch_latest(
        &mut self,
        stream: StreamId,
        max_samples: usize,
        channels: &[u32],
        downsample: u32,
    ) -> AcqResult<RawBlock> {
        let clock = self.inner.clock;
        let step = if self.inner.server_decimation {
            u64::from(downsample)
        } else {
            1
        };
        self.call("fetch_latest", |state| {
            if downsample == 0 {
                return Err(AcqError::protocol(
                    "fetch_latest",
                    "downsample must be at least 1",
                ));
            }
            let s = state.stream("fetch_latest", stream)?;
            s.check_channels("fetch_latest", channels)?;
            let count = s.current_count(clock);
            let window = (max_samples as u64).min(s.config.ring_capacity);
            let start = count.saturating_sub(window);
            Ok(s.read(start, count - start, channels, step))
        })
    }

    fn send_command(&mut self, command: &Command) -> AcqResult<()> {
        let id = self.id;
        self.call(command.name(), |state| {
            debug!(connection = id, command = ?command, "simulated server command");
            state.commands.push(command.clone());
            Ok(())
        })
    }

    fn geom_map(&mut self, probe: u32) -> AcqResult<Vec<String>> {
        self.call("get_geom_map", |state| {
            let part = state.probes.get(&probe).ok_or_else(|| {
                AcqError::protocol("get_geom_map", format!("no probe {}", probe))
            })?;
            Ok(vec![
                format!("head_partNumber={}", part),
                format!("probe_index={}", probe),
                "shank_count=1".to_string(),
            ])
        })
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.stats.disconnects += 1;
        state.stats.active_connections = state.stats.active_connections.saturating_sub(1);
        drop(state);
        info!(endpoint = %self.endpoint, connection = self.id, "simulated server connection closed");
    }
}
