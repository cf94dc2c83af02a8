//! Acquisition producers.
//!
//! - [`PollScheduler`]: continuous, cursor-driven windows
//! - [`DemandFetcher`]: newest window per trigger notification
//! - [`StreamConnection`]: the connection-scoped fetch and conversion both use
//! - [`WakeSignal`] / [`PollTimer`]: what the session threads sleep on

pub mod demand;
pub mod fetcher;
pub mod poll;
pub mod signal;

pub use demand::{
    DemandFetcher, DemandOptions, IntervalTrigger, ManualTrigger, TriggerPoll, TriggerSource,
    TriggerSubscription,
};
pub use fetcher::{latest_window, PollTiming, StreamConnection};
pub use poll::{Cursor, PollOptions, PollScheduler, RegressionPolicy};
pub use signal::{PollTimer, TimerResolution, WakeSignal};
