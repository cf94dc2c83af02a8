//! Triggered "fetch latest" acquisition.
//!
//! A [`DemandFetcher`] session fetches the newest window of samples each time
//! its trigger source fires. There is no cursor: consecutive windows may
//! overlap or leave gaps depending on trigger spacing.

use super::fetcher::{latest_window, StreamConnection};
use super::signal::{PollTimer, TimerResolution, WakeSignal};
use crate::multicast::{BufferSink, Producer, RunContext, SharedStream};
use acq_core::{AcqError, AcqResult, Connector, StreamSpec};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of polling a trigger subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPoll {
    /// A notification is pending; consume it and fetch.
    Fired,
    /// Nothing pending; sleep on the wake signal.
    Pending,
    /// The trigger sequence completed.
    Closed,
}

/// A cold sequence of trigger notifications.
///
/// Each demand session subscribes afresh. The subscription sets `wake`
/// whenever it has something to report.
pub trait TriggerSource: Send + Sync {
    /// Start receiving notifications.
    fn subscribe(&self, wake: Arc<WakeSignal>) -> AcqResult<Box<dyn TriggerSubscription>>;
}

/// A live subscription to a [`TriggerSource`]. Dropping it unsubscribes.
pub trait TriggerSubscription: Send {
    /// Consume one pending notification, if any.
    fn poll_trigger(&mut self) -> TriggerPoll;
}

#[derive(Debug, Default)]
struct ListenerState {
    pending: u64,
    closed: bool,
}

#[derive(Debug)]
struct Listener {
    state: Mutex<ListenerState>,
    wake: Arc<WakeSignal>,
}

#[derive(Debug, Default)]
struct ManualState {
    listeners: Vec<Weak<Listener>>,
    closed: bool,
}

/// Trigger fired explicitly by the caller.
///
/// Clones share the same sequence. Every `fire` queues one notification on
/// each live subscription; `close` ends the sequence.
#[derive(Debug, Clone, Default)]
pub struct ManualTrigger {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTrigger {
    /// Create an open trigger with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one notification on every live subscription.
    pub fn fire(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                listener.state.lock().pending += 1;
                listener.wake.notify();
                true
            }
            None => false,
        });
    }

    /// Complete the sequence. Pending notifications are still delivered.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for listener in state.listeners.drain(..).filter_map(|weak| weak.upgrade()) {
            listener.state.lock().closed = true;
            listener.wake.notify();
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.listeners.retain(|weak| weak.strong_count() > 0);
        state.listeners.len()
    }
}

struct ManualSubscription {
    listener: Arc<Listener>,
}

impl TriggerSource for ManualTrigger {
    fn subscribe(&self, wake: Arc<WakeSignal>) -> AcqResult<Box<dyn TriggerSubscription>> {
        let mut state = self.state.lock();
        let listener = Arc::new(Listener {
            state: Mutex::new(ListenerState {
                pending: 0,
                closed: state.closed,
            }),
            wake,
        });
        if !state.closed {
            state.listeners.push(Arc::downgrade(&listener));
        }
        Ok(Box::new(ManualSubscription { listener }))
    }
}

impl TriggerSubscription for ManualSubscription {
    fn poll_trigger(&mut self) -> TriggerPoll {
        let mut state = self.listener.state.lock();
        if state.pending > 0 {
            state.pending -= 1;
            TriggerPoll::Fired
        } else if state.closed {
            TriggerPoll::Closed
        } else {
            TriggerPoll::Pending
        }
    }
}

/// Trigger firing every `period`, driven by a [`PollTimer`].
///
/// Ticks that arrive while a fetch is still running are coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTrigger {
    period: Duration,
    resolution: TimerResolution,
}

impl IntervalTrigger {
    /// Fire every `period`, checked at `resolution`.
    pub fn new(period: Duration, resolution: TimerResolution) -> Self {
        Self { period, resolution }
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

struct IntervalSubscription {
    fired: Arc<AtomicBool>,
    _timer: PollTimer,
}

impl TriggerSource for IntervalTrigger {
    fn subscribe(&self, wake: Arc<WakeSignal>) -> AcqResult<Box<dyn TriggerSubscription>> {
        let fired = Arc::new(AtomicBool::new(false));
        let tick_fired = Arc::clone(&fired);
        let timer = PollTimer::start(self.period, self.resolution, move || {
            tick_fired.store(true, Ordering::Release);
            wake.notify();
        })?;
        Ok(Box::new(IntervalSubscription {
            fired,
            _timer: timer,
        }))
    }
}

impl TriggerSubscription for IntervalSubscription {
    fn poll_trigger(&mut self) -> TriggerPoll {
        if self.fired.swap(false, Ordering::AcqRel) {
            TriggerPoll::Fired
        } else {
            TriggerPoll::Pending
        }
    }
}

/// Demand-mode acquisition parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandOptions {
    /// Window length in milliseconds of acquisition time.
    pub buffer_length_ms: u64,
    /// Keep every n-th sample.
    pub downsample: u32,
    /// Deliver volts instead of raw units.
    pub convert_to_volts: bool,
}

impl Default for DemandOptions {
    fn default() -> Self {
        Self {
            buffer_length_ms: 1000,
            downsample: 1,
            convert_to_volts: false,
        }
    }
}

impl DemandOptions {
    /// Reject non-positive window lengths and downsample factors.
    pub fn validate(&self) -> AcqResult<()> {
        if self.buffer_length_ms == 0 {
            return Err(AcqError::configuration("buffer_length_ms must be positive"));
        }
        if self.downsample == 0 {
            return Err(AcqError::configuration("downsample must be at least 1"));
        }
        Ok(())
    }
}

/// Triggered-mode producer. Each run opens its own connection and trigger
/// subscription.
pub struct DemandFetcher {
    connector: Arc<dyn Connector>,
    spec: StreamSpec,
    trigger: Arc<dyn TriggerSource>,
    options: DemandOptions,
}

impl std::fmt::Debug for DemandFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemandFetcher")
            .field("spec", &self.spec)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DemandFetcher {
    /// Validate options. No connection is attempted here.
    pub fn new(
        connector: Arc<dyn Connector>,
        spec: StreamSpec,
        trigger: Arc<dyn TriggerSource>,
        options: DemandOptions,
    ) -> AcqResult<Self> {
        options.validate()?;
        Ok(Self {
            connector,
            spec,
            trigger,
            options,
        })
    }

    /// Stream being fetched.
    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    /// Acquisition parameters.
    pub fn options(&self) -> &DemandOptions {
        &self.options
    }

    /// Share this fetcher between subscribers.
    pub fn into_shared(self, subscriber_capacity: usize) -> SharedStream {
        SharedStream::with_capacity(self, subscriber_capacity)
    }
}

impl Producer for DemandFetcher {
    fn label(&self) -> String {
        format!("demand-{}", self.spec.stream)
    }

    fn run(&self, ctx: &RunContext, sink: &mut dyn BufferSink) -> AcqResult<()> {
        let mut conn = StreamConnection::open(self.connector.as_ref(), &self.spec)?;
        let window = latest_window(conn.handle().sample_rate(), self.options.buffer_length_ms);
        let mut triggers = self.trigger.subscribe(Arc::clone(ctx.wake()))?;

        info!(
            stream = %self.spec.stream,
            sample_rate = conn.handle().sample_rate(),
            window,
            "demand session started"
        );

        while !ctx.is_cancelled() {
            match triggers.poll_trigger() {
                TriggerPoll::Fired => {
                    let buffer = conn.fetch_latest(
                        window,
                        self.options.downsample,
                        self.options.convert_to_volts,
                    )?;
                    if !sink.emit(buffer) {
                        debug!(stream = %self.spec.stream, "no subscribers left");
                        return Ok(());
                    }
                }
                TriggerPoll::Pending => ctx.sleep(),
                TriggerPoll::Closed => {
                    info!(stream = %self.spec.stream, "trigger sequence completed");
                    return Ok(());
                }
            }
        }

        info!(stream = %self.spec.stream, "demand session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_trigger_counts_fires() {
        let trigger = ManualTrigger::new();
        let wake = Arc::new(WakeSignal::new());
        let mut sub = trigger.subscribe(Arc::clone(&wake)).unwrap();
        assert_eq!(sub.poll_trigger(), TriggerPoll::Pending);

        trigger.fire();
        trigger.fire();
        assert!(wake.wait_timeout(Duration::from_millis(10)));
        assert_eq!(sub.poll_trigger(), TriggerPoll::Fired);
        assert_eq!(sub.poll_trigger(), TriggerPoll::Fired);
        assert_eq!(sub.poll_trigger(), TriggerPoll::Pending);
    }

    #[test]
    fn test_manual_trigger_close_after_pending() {
        let trigger = ManualTrigger::new();
        let mut sub = trigger.subscribe(Arc::new(WakeSignal::new())).unwrap();
        trigger.fire();
        trigger.close();
        trigger.fire();
        assert_eq!(sub.poll_trigger(), TriggerPoll::Fired);
        assert_eq!(sub.poll_trigger(), TriggerPoll::Closed);

        let mut late = trigger.subscribe(Arc::new(WakeSignal::new())).unwrap();
        assert_eq!(late.poll_trigger(), TriggerPoll::Closed);
    }

    #[test]
    fn test_manual_trigger_forgets_dropped_subscriptions() {
        let trigger = ManualTrigger::new();
        let sub = trigger.subscribe(Arc::new(WakeSignal::new())).unwrap();
        assert_eq!(trigger.subscriber_count(), 1);
        drop(sub);
        assert_eq!(trigger.subscriber_count(), 0);
    }

    #[test]
    fn test_interval_trigger_fires() {
        let trigger = IntervalTrigger::new(Duration::from_millis(10), TimerResolution::Fine);
        let wake = Arc::new(WakeSignal::new());
        let mut sub = trigger.subscribe(Arc::clone(&wake)).unwrap();
        assert!(wake.wait_timeout(Duration::from_millis(500)));
        assert_eq!(sub.poll_trigger(), TriggerPoll::Fired);
    }

    #[test]
    fn test_demand_options_validation() {
        assert!(DemandOptions::default().validate().is_ok());
        let bad = DemandOptions {
            buffer_length_ms: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
