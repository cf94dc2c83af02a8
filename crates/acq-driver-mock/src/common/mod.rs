//! Common infrastructure for the simulated server.
//!
//! - **timing**: per-call latency
//! - **errors**: error injection framework
//! - **rng**: seeded random number generator

pub mod errors;
pub mod rng;
pub mod timing;

// Re-export commonly used types
pub use errors::{DriverError, DriverErrorKind, ErrorConfig, ErrorScenario};
pub use rng::MockRng;
pub use timing::TimingConfig;
