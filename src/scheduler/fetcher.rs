//! Connection-scoped window fetching and unit conversion.

use acq_core::{
    AcqError, AcqResult, AcquisitionServer, Buffer, Connector, RawBlock, Samples,
    StreamHandle, StreamSpec,
};
use std::time::Duration;
use tracing::{debug, info};

/// Buffer size and poll period derived from a stream's sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// `ceil(sample_rate * buffer_length_ms / 1000)`.
    pub buffer_samples: usize,
    /// `floor(buffer_length_ms / 2)`, at least 1 ms.
    pub poll_period: Duration,
}

impl PollTiming {
    /// Resolve timing for `sample_rate` Hz and `buffer_length_ms`.
    pub fn new(sample_rate: f64, buffer_length_ms: u64) -> Self {
        let buffer_samples = (sample_rate * buffer_length_ms as f64 / 1000.0).ceil() as usize;
        Self {
            buffer_samples,
            poll_period: Duration::from_millis((buffer_length_ms / 2).max(1)),
        }
    }
}

/// Samples in a fetch-latest window: `floor(buffer_length_ms * sample_rate / 1000)`.
pub fn latest_window(sample_rate: f64, buffer_length_ms: u64) -> usize {
    (buffer_length_ms as f64 * sample_rate / 1000.0).floor() as usize
}

/// One open connection plus the [`StreamHandle`] resolved on it.
///
/// Owned by exactly one session; dropping it releases the connection.
pub struct StreamConnection {
    server: Box<dyn AcquisitionServer>,
    handle: StreamHandle,
}

impl StreamConnection {
    /// Connect and resolve sample rate and per-channel multipliers.
    pub fn open(connector: &dyn Connector, spec: &StreamSpec) -> AcqResult<Self> {
        let mut server = connector.connect(&spec.endpoint)?;
        let sample_rate = server.sample_rate(spec.stream)?;
        let multipliers = spec
            .channels
            .as_slice()
            .iter()
            .map(|&ch| server.i16_to_volts(spec.stream, ch))
            .collect::<AcqResult<Vec<f64>>>()?;
        let handle = StreamHandle::new(spec.clone(), sample_rate, multipliers)?;
        if !server.decimates() {
            debug!(endpoint = %spec.endpoint, "server does not decimate, decimating locally");
        }

        info!(
            endpoint = %spec.endpoint,
            stream = %spec.stream,
            channels = spec.channels.len(),
            sample_rate,
            "stream connection opened"
        );
        Ok(Self { server, handle })
    }

    /// The resolved handle.
    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    /// Current server sample count for the stream.
    pub fn sample_count(&mut self) -> AcqResult<u64> {
        self.server.sample_count(self.handle.stream())
    }

    /// Fetch `[start, start + count)`, decimated and optionally converted.
    ///
    /// The returned buffer's `start_sample` is the server-reported start,
    /// which is later than `start` when those samples were evicted.
    pub fn fetch_window(
        &mut self,
        start: u64,
        count: usize,
        downsample: u32,
        convert: bool,
    ) -> AcqResult<Buffer> {
        let block = self.server.fetch(
            self.handle.stream(),
            start,
            count,
            self.handle.channels().as_slice(),
            downsample,
        )?;
        if block.start_sample < start {
            return Err(AcqError::protocol(
                "fetch",
                format!(
                    "server returned start {} before requested {}",
                    block.start_sample, start
                ),
            ));
        }
        self.finish(block, count, downsample, convert)
    }

    /// Fetch the newest `count` samples.
    pub fn fetch_latest(&mut self, count: usize, downsample: u32, convert: bool) -> AcqResult<Buffer> {
        let block = self.server.fetch_latest(
            self.handle.stream(),
            count,
            self.handle.channels().as_slice(),
            downsample,
        )?;
        self.finish(block, count, downsample, convert)
    }

    /// Decimate locally when the server does not, and work out how many raw
    /// samples the block covers.
    ///
    /// A server-decimated block only reports its kept scans, so a block cut
    /// short by the end of data is taken to cover whole decimation steps.
    fn finish(
        &self,
        block: RawBlock,
        count: usize,
        downsample: u32,
        convert: bool,
    ) -> AcqResult<Buffer> {
        let channels = self.handle.channels();
        block.validate(channels.len())?;

        let downsample = downsample.max(1);
        let scans = block.n_scans();
        let (step, span) = if self.server.decimates() {
            (1, (scans * downsample as usize).min(count))
        } else {
            (downsample as usize, scans.min(count))
        };

        let buffer = Buffer::new(
            channels.shared(),
            block.start_sample,
            span as u64,
            downsample,
            Samples::Raw(block.to_channel_major(step)),
        )?;

        if convert {
            buffer.into_volts(self.handle.multipliers())
        } else {
            Ok(buffer)
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        info!(
            endpoint = %self.handle.endpoint(),
            stream = %self.handle.stream(),
            "stream connection released"
        );
    }
}
