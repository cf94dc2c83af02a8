//! Wake signal and poll timer.
//!
//! A session thread blocks on a [`WakeSignal`] between fetches. Timer ticks,
//! trigger notifications and cancellation all set the same signal, so the loop
//! has a single place to sleep and never busy-spins.

use acq_core::{AcqError, AcqResult};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Auto-reset event.
///
/// `notify` sets the signal; `wait` blocks until it is set and clears it.
/// Several notifies before a wait collapse into one wake-up.
#[derive(Debug, Default)]
pub struct WakeSignal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal, waking one waiter.
    pub fn notify(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_one();
    }

    /// Block until the signal is set, then clear it.
    pub fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cond.wait(&mut flag);
        }
        *flag = false;
    }

    /// Like [`wait`](Self::wait) with an upper bound. Returns `true` if the
    /// signal was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            if self.cond.wait_until(&mut flag, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *flag, false)
    }
}

/// How often the timer thread checks its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerResolution {
    /// About 15 ms; ticks may land up to one resolution late.
    #[default]
    Coarse,
    /// About 1 ms.
    Fine,
}

impl TimerResolution {
    /// Map the legacy "high resolution timer" flag.
    pub fn from_high_resolution(high_resolution: bool) -> Self {
        if high_resolution {
            TimerResolution::Fine
        } else {
            TimerResolution::Coarse
        }
    }

    /// Deadline check interval.
    pub fn granularity(self) -> Duration {
        match self {
            TimerResolution::Coarse => Duration::from_millis(15),
            TimerResolution::Fine => Duration::from_millis(1),
        }
    }
}

/// Periodic timer on its own thread. Dropping it stops and joins the thread.
pub struct PollTimer {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    period: Duration,
}

impl PollTimer {
    /// Invoke `tick` every `period`, checking the deadline at `resolution`.
    pub fn start<F>(period: Duration, resolution: TimerResolution, mut tick: F) -> AcqResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let granularity = resolution.granularity().min(period);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("acq-poll-timer".into())
            .spawn(move || {
                let mut next = Instant::now() + period;
                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::sleep(granularity);
                    let now = Instant::now();
                    if now >= next {
                        tick();
                        next += period;
                        if next <= now {
                            next = now + period;
                        }
                    }
                }
            })
            .map_err(|e| AcqError::configuration(format!("failed to start poll timer: {}", e)))?;

        debug!(period_ms = period.as_millis() as u64, ?resolution, "poll timer started");
        Ok(Self {
            stop,
            thread: Some(thread),
            period,
        })
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("poll timer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_wake_signal_auto_resets() {
        let signal = WakeSignal::new();
        signal.notify();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wake_signal_across_threads() {
        let signal = Arc::new(WakeSignal::new());
        let remote = Arc::clone(&signal);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.notify();
        });
        signal.wait();
        handle.join().unwrap();
    }

    #[test]
    fn test_resolution_granularity() {
        assert_eq!(
            TimerResolution::from_high_resolution(true),
            TimerResolution::Fine
        );
        assert_eq!(
            TimerResolution::from_high_resolution(false).granularity(),
            Duration::from_millis(15)
        );
    }

    #[test]
    fn test_poll_timer_ticks_and_stops() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let timer = PollTimer::start(Duration::from_millis(10), TimerResolution::Fine, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(120));
        drop(timer);
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 3, "only {} ticks", seen);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(ticks.load(Ordering::SeqCst), seen, "ticked after drop");
    }

    #[test]
    fn test_zero_period_is_clamped() {
        let timer = PollTimer::start(Duration::ZERO, TimerResolution::Fine, || {}).unwrap();
        assert_eq!(timer.period(), Duration::from_millis(1));
    }
}
