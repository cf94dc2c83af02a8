//! Adapters for the older stream and fetch-latest configuration shapes.
//!
//! Both translate into the unified producers: [`LegacyStreamOptions`] builds a
//! [`PollScheduler`], [`LegacyFetchOptions`] a [`DemandFetcher`] driven by an
//! [`IntervalTrigger`] (or any other trigger source).

use crate::scheduler::{
    DemandFetcher, DemandOptions, IntervalTrigger, PollOptions, PollScheduler, RegressionPolicy,
    TimerResolution, TriggerSource,
};
use acq_core::{
    AcqError, AcqResult, ChannelSet, Connector, Endpoint, StreamId, StreamKind, StreamSpec,
    DEFAULT_HOST, DEFAULT_PORT,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn legacy_spec(
    host: &str,
    port: u16,
    stream_type: i32,
    stream_index: u32,
    channels: &[u32],
) -> AcqResult<StreamSpec> {
    let kind = StreamKind::try_from(stream_type)?;
    Ok(StreamSpec::new(
        Endpoint::new(host, port),
        StreamId::new(kind, stream_index),
        ChannelSet::new(channels.to_vec())?,
    ))
}

/// Old continuous-stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyStreamOptions {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Stream kind code: 0 DAQ, 1 OneBox, 2 probe.
    pub stream_type: i32,
    /// Substream index.
    pub stream_index: u32,
    /// Channels to read.
    pub channels: Vec<u32>,
    /// Buffer length in milliseconds.
    pub buffer_length: u64,
    /// Keep every n-th sample.
    pub downsample: u32,
    /// Deliver volts.
    pub convert_to_voltage: bool,
    /// Use the fine poll timer.
    pub use_high_res_timer: bool,
}

impl Default for LegacyStreamOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            stream_type: StreamKind::Daq.code(),
            stream_index: 0,
            channels: Vec::new(),
            buffer_length: 1000,
            downsample: 1,
            convert_to_voltage: false,
            use_high_res_timer: false,
        }
    }
}

impl LegacyStreamOptions {
    /// Build the equivalent poll scheduler.
    pub fn into_scheduler(self, connector: Arc<dyn Connector>) -> AcqResult<PollScheduler> {
        let spec = legacy_spec(
            &self.host,
            self.port,
            self.stream_type,
            self.stream_index,
            &self.channels,
        )?;
        let options = PollOptions {
            buffer_length_ms: self.buffer_length,
            downsample: self.downsample,
            convert_to_volts: self.convert_to_voltage,
            timer: TimerResolution::from_high_resolution(self.use_high_res_timer),
            on_count_regression: RegressionPolicy::Fail,
        };
        debug!(stream = %spec.stream, ?options, "legacy stream mapped to poll scheduler");
        PollScheduler::new(connector, spec, options)
    }
}

/// Old timer-driven fetch-latest settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyFetchOptions {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Stream kind code: 0 DAQ, 1 OneBox, 2 probe.
    pub stream_type: i32,
    /// Substream index.
    pub stream_index: u32,
    /// Channels to read.
    pub channels: Vec<u32>,
    /// Window length in milliseconds.
    pub fetch_length: u64,
    /// Milliseconds between fetches.
    pub fetch_period: u64,
    /// Keep every n-th sample.
    pub downsample: u32,
    /// Deliver volts.
    pub convert_to_voltage: bool,
    /// Use the fine timer for the fetch period.
    pub use_high_res_timer: bool,
}

impl Default for LegacyFetchOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            stream_type: StreamKind::Daq.code(),
            stream_index: 0,
            channels: Vec::new(),
            fetch_length: 1000,
            fetch_period: 1000,
            downsample: 1,
            convert_to_voltage: false,
            use_high_res_timer: false,
        }
    }
}

impl LegacyFetchOptions {
    /// Build a fetcher triggered every `fetch_period` milliseconds.
    pub fn into_fetcher(self, connector: Arc<dyn Connector>) -> AcqResult<DemandFetcher> {
        if self.fetch_period == 0 {
            return Err(AcqError::configuration("fetch_period must be positive"));
        }
        let trigger = IntervalTrigger::new(
            Duration::from_millis(self.fetch_period),
            TimerResolution::from_high_resolution(self.use_high_res_timer),
        );
        self.into_fetcher_with(connector, Arc::new(trigger))
    }

    /// Build a fetcher driven by `trigger` instead of the fetch period.
    pub fn into_fetcher_with(
        self,
        connector: Arc<dyn Connector>,
        trigger: Arc<dyn TriggerSource>,
    ) -> AcqResult<DemandFetcher> {
        let spec = legacy_spec(
            &self.host,
            self.port,
            self.stream_type,
            self.stream_index,
            &self.channels,
        )?;
        let options = DemandOptions {
            buffer_length_ms: self.fetch_length,
            downsample: self.downsample,
            convert_to_volts: self.convert_to_voltage,
        };
        debug!(stream = %spec.stream, ?options, "legacy fetch mapped to demand fetcher");
        DemandFetcher::new(connector, spec, trigger, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::ErrorKind;
    use acq_driver_mock::SimulatedServer;

    fn connector() -> Arc<dyn Connector> {
        Arc::new(SimulatedServer::builder().build())
    }

    #[test]
    fn test_stream_defaults() {
        let options = LegacyStreamOptions::default();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, 4142);
        assert_eq!(options.buffer_length, 1000);
    }

    #[test]
    fn test_stream_maps_to_poll_options() {
        let scheduler = LegacyStreamOptions {
            stream_type: 2,
            stream_index: 1,
            channels: vec![4, 5],
            buffer_length: 250,
            downsample: 3,
            convert_to_voltage: true,
            use_high_res_timer: true,
            ..Default::default()
        }
        .into_scheduler(connector())
        .unwrap();

        assert_eq!(scheduler.spec().stream, StreamId::new(StreamKind::Probe, 1));
        assert_eq!(scheduler.spec().channels.as_slice(), &[4, 5]);
        let options = scheduler.options();
        assert_eq!(options.buffer_length_ms, 250);
        assert_eq!(options.downsample, 3);
        assert!(options.convert_to_volts);
        assert_eq!(options.timer, TimerResolution::Fine);
    }

    #[test]
    fn test_invalid_stream_type_rejected() {
        let err = LegacyStreamOptions {
            stream_type: 7,
            channels: vec![0],
            ..Default::default()
        }
        .into_scheduler(connector())
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_empty_channels_rejected() {
        assert!(LegacyStreamOptions::default()
            .into_scheduler(connector())
            .is_err());
    }

    #[test]
    fn test_fetch_maps_to_demand_options() {
        let fetcher = LegacyFetchOptions {
            channels: vec![0],
            fetch_length: 50,
            fetch_period: 20,
            ..Default::default()
        }
        .into_fetcher(connector())
        .unwrap();
        assert_eq!(fetcher.options().buffer_length_ms, 50);
        assert_eq!(fetcher.spec().endpoint, Endpoint::default());
    }

    #[test]
    fn test_fetch_zero_period_rejected() {
        let err = LegacyFetchOptions {
            channels: vec![0],
            fetch_period: 0,
            ..Default::default()
        }
        .into_fetcher(connector())
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_fetch_options_from_toml() {
        let options: LegacyFetchOptions =
            toml::from_str("channels = [1, 2]\nfetch_period = 250\nstream_type = 1").unwrap();
        assert_eq!(options.fetch_period, 250);
        assert_eq!(options.fetch_length, 1000);
        assert_eq!(options.stream_type, 1);
    }
}
