//! Configuration loading with Figment.
//!
//! Configuration is loaded from:
//! 1. `config/acq.toml` (or an explicit path)
//! 2. Environment variables prefixed with `ACQ_STREAM_`, `__` separating
//!    nested keys, e.g. `ACQ_STREAM_ACQUISITION__DOWNSAMPLE=4`
//!
//! Every section has defaults, so a missing file yields a usable
//! configuration except for the channel list.
//!
//! # Example
//! ```no_run
//! use acq_stream::config::AcqConfig;
//!
//! let config = AcqConfig::load()?;
//! config.validate()?;
//! println!("streaming {} from {}", config.stream.stream_id(), config.server);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::multicast::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::scheduler::{DemandOptions, PollOptions, RegressionPolicy, TimerResolution};
use crate::tracing_config::{parse_log_level, OutputFormat};
use acq_core::{AcqError, AcqResult, ChannelSet, Endpoint, StreamId, StreamKind, StreamSpec};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/acq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ACQ_STREAM_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Acquisition server address
    pub server: Endpoint,
    /// Substream and channels
    pub stream: StreamConfig,
    /// Buffering and delivery
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "acq-stream".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Which substream to read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Stream kind
    pub kind: StreamKind,
    /// Substream index (probe number for probes)
    pub substream: u32,
    /// Channels, in row order. Must be non-empty and unique.
    pub channels: Vec<u32>,
}

impl StreamConfig {
    /// Stream id.
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(self.kind, self.substream)
    }

    /// Validated channel set.
    pub fn channel_set(&self) -> AcqResult<ChannelSet> {
        ChannelSet::new(self.channels.clone())
    }
}

/// Buffering and delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Buffer length in milliseconds
    pub buffer_length_ms: u64,
    /// Keep every n-th sample
    pub downsample: u32,
    /// Deliver volts instead of raw units
    pub convert_to_volts: bool,
    /// Use the fine poll timer
    pub high_resolution_timer: bool,
    /// Queue depth per subscriber
    pub subscriber_capacity: usize,
    /// Handling of a regressed server sample count
    pub on_count_regression: RegressionPolicy,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            buffer_length_ms: 1000,
            downsample: 1,
            convert_to_volts: false,
            high_resolution_timer: false,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            on_count_regression: RegressionPolicy::Fail,
        }
    }
}

impl AcqConfig {
    /// Load configuration from `config/acq.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider stack, for callers that want to merge more sources.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AcqResult<()> {
        parse_log_level(&self.application.log_level)?;

        if self.server.host.trim().is_empty() {
            return Err(AcqError::configuration("server.host must not be empty"));
        }
        if self.server.port == 0 {
            return Err(AcqError::configuration("server.port must be positive"));
        }
        self.stream.channel_set()?;

        let acq = &self.acquisition;
        if acq.subscriber_capacity == 0 {
            return Err(AcqError::configuration(
                "acquisition.subscriber_capacity must be positive",
            ));
        }
        self.poll_options().validate()
    }

    /// What to connect to.
    pub fn stream_spec(&self) -> AcqResult<StreamSpec> {
        Ok(StreamSpec::new(
            self.server.clone(),
            self.stream.stream_id(),
            self.stream.channel_set()?,
        ))
    }

    /// Poll-mode options.
    pub fn poll_options(&self) -> PollOptions {
        let acq = &self.acquisition;
        PollOptions {
            buffer_length_ms: acq.buffer_length_ms,
            downsample: acq.downsample,
            convert_to_volts: acq.convert_to_volts,
            timer: TimerResolution::from_high_resolution(acq.high_resolution_timer),
            on_count_regression: acq.on_count_regression,
        }
    }

    /// Demand-mode options.
    pub fn demand_options(&self) -> DemandOptions {
        let acq = &self.acquisition;
        DemandOptions {
            buffer_length_ms: acq.buffer_length_ms,
            downsample: acq.downsample,
            convert_to_volts: acq.convert_to_volts,
        }
    }
}
