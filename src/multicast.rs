//! Reference-counted broadcast of a cold producer.
//!
//! [`SharedStream`] wraps a [`Producer`] (poll or demand session) so that any
//! number of consumers share one connection and one fetch loop:
//!
//! - the first [`subscribe`](SharedStream::subscribe) connects and starts the
//!   loop on a dedicated thread,
//! - later subscribers receive live buffers from the moment they join,
//! - dropping the last [`Subscription`] cancels the loop, which releases the
//!   connection,
//! - subscribing again after that is a cold start.
//!
//! A failing session delivers its error exactly once to every subscriber it
//! had, after the buffers already queued for them, and then ends their
//! sequences. A later subscribe starts a new session.
//!
//! Delivery never blocks the loop: each subscriber has a bounded queue and
//! buffers that do not fit are dropped for that subscriber only.

use crate::scheduler::WakeSignal;
use acq_core::{AcqError, AcqResult, Buffer};
use futures::Stream;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use tokio::sync::mpsc::error::TryRecvError;

/// Buffers as handed to consumers.
pub type SharedBuffer = Arc<Buffer>;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Where a producer delivers its buffers.
pub trait BufferSink {
    /// Deliver one buffer. Returns `false` once nobody is listening, after
    /// which the producer should return `Ok(())`.
    fn emit(&mut self, buffer: Buffer) -> bool;
}

/// Cancellation and wake-up plumbing handed to a running producer.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    wake: Arc<WakeSignal>,
}

impl RunContext {
    /// Create a context. Cancelling `cancel` should be followed by
    /// `wake.notify()` so a sleeping producer observes it.
    pub fn new(cancel: CancellationToken, wake: Arc<WakeSignal>) -> Self {
        Self { cancel, wake }
    }

    /// Whether the session has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal the producer sleeps on.
    pub fn wake(&self) -> &Arc<WakeSignal> {
        &self.wake
    }

    /// Block until woken by a timer tick, a trigger or cancellation.
    pub fn sleep(&self) {
        self.wake.wait();
    }

    /// Cancel and wake the producer.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.wake.notify();
    }
}

/// A cold sequence of buffers: every call to `run` is an independent session
/// that connects, fetches until told to stop, and releases its connection
/// before returning.
pub trait Producer: Send + Sync + 'static {
    /// Short label for thread names and logs.
    fn label(&self) -> String;

    /// Run one session. Returns `Ok(())` on cancellation, on completion, or
    /// when `sink` reports that nobody is listening.
    fn run(&self, ctx: &RunContext, sink: &mut dyn BufferSink) -> AcqResult<()>;
}

enum Terminal {
    Open,
    Completed,
    Failed(AcqError),
    Reported,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<SharedBuffer>,
    dropped: Arc<AtomicU64>,
    terminal: Arc<Mutex<Terminal>>,
    overflowing: bool,
}

struct Session {
    generation: u64,
    ctx: RunContext,
}

#[derive(Default)]
struct State {
    subscribers: Vec<Subscriber>,
    session: Option<Session>,
    next_id: u64,
    generation: u64,
}

struct Shared {
    producer: Arc<dyn Producer>,
    capacity: usize,
    state: Mutex<State>,
}

/// Shared, reconnect-on-demand broadcast of a [`Producer`].
///
/// Cloning yields another handle to the same broadcast.
#[derive(Clone)]
pub struct SharedStream {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStream")
            .field("producer", &self.shared.producer.label())
            .field("subscribers", &self.subscriber_count())
            .field("active", &self.is_active())
            .finish()
    }
}

impl SharedStream {
    /// Wrap `producer` with the default subscriber queue depth.
    pub fn new(producer: impl Producer) -> Self {
        Self::with_capacity(producer, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Wrap `producer`; each subscriber queues at most `capacity` buffers.
    pub fn with_capacity(producer: impl Producer, capacity: usize) -> Self {
        Self::from_arc(Arc::new(producer), capacity)
    }

    /// Wrap an already shared producer.
    pub fn from_arc(producer: Arc<dyn Producer>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                producer,
                capacity: capacity.max(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Join the broadcast, starting a session if none is running.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let terminal = Arc::new(Mutex::new(Terminal::Open));

        let mut state = self.shared.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.push(Subscriber {
            id,
            tx,
            dropped: Arc::clone(&dropped),
            terminal: Arc::clone(&terminal),
            overflowing: false,
        });
        debug!(
            producer = %self.shared.producer.label(),
            subscriber = id,
            subscribers = state.subscribers.len(),
            "subscriber joined"
        );

        if state.session.is_none() {
            Shared::start_session(&self.shared, &mut state);
        }
        drop(state);

        Subscription {
            shared: Arc::clone(&self.shared),
            id,
            rx,
            dropped,
            terminal,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Whether a session is currently running.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().session.is_some()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown cause"
    }
}

impl Shared {
    fn start_session(shared: &Arc<Shared>, state: &mut State) {
        state.generation += 1;
        let generation = state.generation;
        let ctx = RunContext::new(CancellationToken::new(), Arc::new(WakeSignal::new()));
        let label = shared.producer.label();

        let thread_shared = Arc::clone(shared);
        let thread_ctx = ctx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("acq-{}", label))
            .spawn(move || {
                let mut emitter = Emitter {
                    shared: Arc::clone(&thread_shared),
                    generation,
                };
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    thread_shared.producer.run(&thread_ctx, &mut emitter)
                }))
                .unwrap_or_else(|payload| {
                    Err(AcqError::protocol(
                        "run",
                        format!("session panicked: {}", panic_message(payload.as_ref())),
                    ))
                });
                thread_shared.finish(generation, result);
            });

        match spawned {
            Ok(_) => {
                info!(producer = %label, generation, "session started");
                state.session = Some(Session { generation, ctx });
            }
            Err(e) => {
                let err = AcqError::configuration(format!("failed to spawn session thread: {}", e));
                error!(producer = %label, error = %err, "session could not start");
                Self::terminate(state, Err(err));
            }
        }
    }

    fn finish(&self, generation: u64, result: AcqResult<()>) {
        let mut state = self.state.lock();
        let current = state
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation);
        if !current {
            // Retired by the last unsubscribe; nobody is waiting for the outcome.
            if let Err(e) = result {
                debug!(generation, error = %e, "retired session ended with error");
            }
            return;
        }

        state.session = None;
        match &result {
            Ok(()) => info!(generation, "session completed"),
            Err(e) => error!(generation, error = %e, "session failed"),
        }
        Self::terminate(&mut state, result);
    }

    // Record the outcome for every subscriber, then drop their senders so
    // their queues close behind the buffers already delivered.
    fn terminate(state: &mut State, result: AcqResult<()>) {
        let subscribers = std::mem::take(&mut state.subscribers);
        for sub in &subscribers {
            *sub.terminal.lock() = match &result {
                Ok(()) => Terminal::Completed,
                Err(e) => Terminal::Failed(e.clone()),
            };
        }
        drop(subscribers);
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| s.id != id);
        debug!(subscriber = id, subscribers = state.subscribers.len(), "subscriber left");

        if state.subscribers.is_empty() {
            if let Some(session) = state.session.take() {
                info!(
                    producer = %self.producer.label(),
                    generation = session.generation,
                    "last subscriber left, stopping session"
                );
                session.ctx.cancel();
            }
        }
    }
}

struct Emitter {
    shared: Arc<Shared>,
    generation: u64,
}

impl BufferSink for Emitter {
    fn emit(&mut self, buffer: Buffer) -> bool {
        let mut state = self.shared.state.lock();
        let current = state
            .session
            .as_ref()
            .is_some_and(|s| s.generation == self.generation);
        if !current || state.subscribers.is_empty() {
            return false;
        }

        let buffer = Arc::new(buffer);
        for sub in state.subscribers.iter_mut() {
            match sub.tx.try_send(Arc::clone(&buffer)) {
                Ok(()) => sub.overflowing = false,
                Err(TrySendError::Full(_)) => {
                    let total = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if !sub.overflowing {
                        warn!(
                            subscriber = sub.id,
                            dropped_total = total,
                            start_sample = buffer.start_sample(),
                            "subscriber queue full, dropping buffers"
                        );
                        sub.overflowing = true;
                    }
                }
                // Receiver already gone; its entry is removed on drop.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        true
    }
}

/// One consumer's view of a [`SharedStream`].
///
/// Yields `Ok(buffer)` items, then at most one `Err`, then ends. Dropping it
/// leaves the broadcast; dropping the last one stops the session.
pub struct Subscription {
    shared: Arc<Shared>,
    id: u64,
    rx: mpsc::Receiver<SharedBuffer>,
    dropped: Arc<AtomicU64>,
    terminal: Arc<Mutex<Terminal>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Next buffer, the terminal error, or `None` once the sequence ended.
    pub async fn recv(&mut self) -> Option<AcqResult<SharedBuffer>> {
        match self.rx.recv().await {
            Some(buffer) => Some(Ok(buffer)),
            None => self.take_terminal(),
        }
    }

    /// Blocking variant of [`recv`](Self::recv) for synchronous consumers.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<AcqResult<SharedBuffer>> {
        match self.rx.blocking_recv() {
            Some(buffer) => Some(Ok(buffer)),
            None => self.take_terminal(),
        }
    }

    /// Non-blocking receive. `Err(Disconnected)` once the sequence ended and
    /// any error was reported.
    pub fn try_recv(&mut self) -> Result<AcqResult<SharedBuffer>, TryRecvError> {
        match self.rx.try_recv() {
            Ok(buffer) => Ok(Ok(buffer)),
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
            Err(TryRecvError::Disconnected) => {
                self.take_terminal().ok_or(TryRecvError::Disconnected)
            }
        }
    }

    /// Buffers dropped for this subscriber because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the sequence finished without error. `false` while running.
    pub fn completed(&self) -> bool {
        matches!(*self.terminal.lock(), Terminal::Completed)
    }

    fn take_terminal(&self) -> Option<AcqResult<SharedBuffer>> {
        let mut terminal = self.terminal.lock();
        match std::mem::replace(&mut *terminal, Terminal::Reported) {
            Terminal::Failed(e) => Some(Err(e)),
            Terminal::Completed => {
                *terminal = Terminal::Completed;
                None
            }
            Terminal::Open | Terminal::Reported => None,
        }
    }
}

impl Stream for Subscription {
    type Item = AcqResult<SharedBuffer>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(buffer)) => Poll::Ready(Some(Ok(buffer))),
            Poll::Ready(None) => Poll::Ready(self.take_terminal()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::Samples;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn buffer(start: u64) -> Buffer {
        Buffer::new(
            Arc::from(vec![0u32]),
            start,
            1,
            1,
            Samples::Raw(vec![start as i16]),
        )
        .unwrap()
    }

    /// Emits `count` buffers, then either fails or waits for cancellation.
    struct Scripted {
        count: u64,
        fail: bool,
        panics: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Producer for Scripted {
        fn label(&self) -> String {
            "scripted".into()
        }

        fn run(&self, ctx: &RunContext, sink: &mut dyn BufferSink) -> AcqResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            for i in 0..self.count {
                if !sink.emit(buffer(i)) {
                    return Ok(());
                }
            }
            if self.fail {
                return Err(AcqError::protocol("fetch", "scripted failure"));
            }
            if self.panics {
                panic!("scripted panic");
            }
            while !ctx.is_cancelled() {
                ctx.sleep();
            }
            Ok(())
        }
    }

    fn scripted(count: u64, fail: bool) -> (SharedStream, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let stream = SharedStream::with_capacity(
            Scripted {
                count,
                fail,
                panics: false,
                runs: Arc::clone(&runs),
            },
            8,
        );
        (stream, runs)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_error_delivered_once_after_buffers() {
        let (stream, _) = scripted(3, true);
        let mut sub = stream.subscribe();
        for i in 0..3 {
            let b = sub.blocking_recv().unwrap().unwrap();
            assert_eq!(b.start_sample(), i);
        }
        assert!(sub.blocking_recv().unwrap().is_err());
        assert!(sub.blocking_recv().is_none());
        assert!(sub.blocking_recv().is_none());
        assert!(!stream.is_active());
    }

    #[test]
    fn test_panicking_session_fails_subscribers_and_restarts() {
        let runs = Arc::new(AtomicUsize::new(0));
        let stream = SharedStream::with_capacity(
            Scripted {
                count: 2,
                fail: false,
                panics: true,
                runs: Arc::clone(&runs),
            },
            8,
        );
        let mut sub = stream.subscribe();
        for i in 0..2 {
            assert_eq!(sub.blocking_recv().unwrap().unwrap().start_sample(), i);
        }
        let err = sub.blocking_recv().unwrap().unwrap_err();
        assert_eq!(err.kind(), acq_core::ErrorKind::Protocol);
        assert!(err.to_string().contains("scripted panic"));
        assert!(sub.blocking_recv().is_none());
        assert!(!stream.is_active());

        let mut again = stream.subscribe();
        assert_eq!(again.blocking_recv().unwrap().unwrap().start_sample(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_last_unsubscribe_cancels_session() {
        let (stream, runs) = scripted(0, false);
        let sub = stream.subscribe();
        assert!(stream.is_active());
        drop(sub);
        assert!(!stream.is_active());
        assert_eq!(stream.subscriber_count(), 0);

        let _again = stream.subscribe();
        wait_until(|| runs.load(Ordering::SeqCst) == 2);
    }

    #[test]
    fn test_overflow_counts_drops() {
        let (stream, _) = scripted(20, false);
        let mut sub = stream.subscribe();
        wait_until(|| sub.dropped() == 12);
        let mut received = 0;
        while let Ok(item) = sub.try_recv() {
            item.unwrap();
            received += 1;
        }
        assert_eq!(received, 8);
    }

    #[test]
    fn test_try_recv_empty_while_running() {
        let (stream, _) = scripted(0, false);
        let mut sub = stream.subscribe();
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
        assert!(!sub.completed());
    }
}
