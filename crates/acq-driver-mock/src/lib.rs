//! Simulated acquisition server.
//!
//! Implements the `acq-core` collaborator traits in memory so the scheduler,
//! the multicast and the command sinks can be exercised without hardware.
//!
//! # Features
//!
//! - Manual or real-time sample clocks per substream
//! - Bounded history with eviction, reported through the block start sample
//! - Deterministic waveforms so tests can verify exactly which samples arrive
//! - Error injection (refused connects, lost link, fail-after-N)
//! - Connection, call and command accounting
//!
//! # Example
//!
//! ```
//! use acq_core::{Connector, Endpoint, StreamId, StreamKind};
//! use acq_driver_mock::{SimStreamConfig, SimulatedServer};
//!
//! let probe = StreamId::new(StreamKind::Probe, 0);
//! let server = SimulatedServer::builder()
//!     .stream(probe, SimStreamConfig::new(30_000.0, 384))
//!     .build();
//! server.advance(probe, 1_000);
//!
//! let mut conn = server.connect(&Endpoint::default()).unwrap();
//! assert_eq!(conn.sample_count(probe).unwrap(), 1_000);
//! ```

pub mod common;
pub mod server;
pub mod waveform;

pub use common::{DriverError, DriverErrorKind, ErrorConfig, ErrorScenario, TimingConfig};
pub use server::{
    SampleClock, ServerStats, SimConnection, SimStreamConfig, SimulatedServer,
    SimulatedServerBuilder, DEFAULT_I16_TO_VOLTS,
};
pub use waveform::{ramp_value, Waveform};
