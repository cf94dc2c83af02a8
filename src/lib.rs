//! # acq_stream
//!
//! Shared, cancellable streaming of sample buffers from an acquisition
//! server.
//!
//! ## Crate Structure
//!
//! - **`scheduler`**: the two producers. [`PollScheduler`] delivers every sample
//!   exactly once in fixed windows; [`DemandFetcher`] fetches the newest
//!   window per trigger notification.
//! - **`multicast`**: [`SharedStream`], the reference-counted broadcast that
//!   connects on the first subscriber and disconnects after the last.
//! - **`command`**: digital output and gate/trigger command sinks.
//! - **`legacy`**: adapters from the older stream and fetch-latest settings.
//! - **`mux`**: probe mux-group tables and channel filtering.
//! - **`config`** / **`tracing_config`**: Figment configuration and logging
//!   setup.
//!
//! Core types ([`StreamSpec`], [`Buffer`], [`AcqError`], the collaborator
//! traits) live in `acq-core` and are re-exported here.
//!
//! ## Example
//!
//! ```no_run
//! use acq_stream::prelude::*;
//! use acq_driver_mock::{SampleClock, SimStreamConfig, SimulatedServer};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let probe = StreamId::new(StreamKind::Probe, 0);
//! let server = SimulatedServer::builder()
//!     .stream(probe, SimStreamConfig::new(30_000.0, 384))
//!     .clock(SampleClock::Realtime)
//!     .build();
//!
//! let spec = StreamSpec::new(Endpoint::default(), probe, ChannelSet::new(vec![0, 1, 2])?);
//! let stream = PollScheduler::new(Arc::new(server), spec, PollOptions::default())?.into_shared(64);
//!
//! let mut sub = stream.subscribe();
//! if let Some(buffer) = sub.blocking_recv() {
//!     let buffer = buffer?;
//!     println!("{} samples from {}", buffer.n_samples(), buffer.start_sample());
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod legacy;
pub mod multicast;
pub mod mux;
pub mod scheduler;
pub mod tracing_config;

pub use acq_core::{
    AcqError, AcqResult, AcquisitionServer, Buffer, ChannelSet, Command, Connector, Endpoint,
    ErrorKind, Samples, StreamHandle, StreamId, StreamKind, StreamSpec, TriggerLevel,
};
pub use command::{CommandSink, DigitalOutput, DigitalValue, GateControl, GateTrigger};
pub use multicast::{
    BufferSink, Producer, RunContext, SharedBuffer, SharedStream, Subscription,
};
pub use scheduler::{
    DemandFetcher, DemandOptions, IntervalTrigger, ManualTrigger, PollOptions, PollScheduler,
    RegressionPolicy, TimerResolution, TriggerSource,
};

/// Common imports for consumers.
pub mod prelude {
    pub use crate::command::{CommandSink, DigitalOutput, GateControl, GateTrigger};
    pub use crate::multicast::{SharedStream, Subscription};
    pub use crate::scheduler::{
        DemandFetcher, DemandOptions, IntervalTrigger, ManualTrigger, PollOptions, PollScheduler,
        TimerResolution,
    };
    pub use acq_core::{
        AcqError, AcqResult, Buffer, ChannelSet, Endpoint, StreamId, StreamKind, StreamSpec,
        TriggerLevel,
    };
}
