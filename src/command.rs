//! Command sinks: digital output and gate/trigger control.
//!
//! Each sink owns a short-lived connection opened when it is created and
//! released when it is dropped. Every call blocks until the server accepts the
//! command and fails if the server reports an error.
//!
//! [`CommandSink::pass_through`] turns a sink into an iterator adapter that
//! issues the command for each item and yields the item.

use acq_core::{AcqResult, AcquisitionServer, Command, Connector, Endpoint, TriggerLevel};
use tracing::{debug, info};

/// Value accepted by [`DigitalOutput`].
///
/// Booleans map to 0/1. Floats are truncated toward zero and saturate at
/// the `i32` range; NaN writes 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalValue(pub i32);

impl From<i32> for DigitalValue {
    fn from(v: i32) -> Self {
        DigitalValue(v)
    }
}

impl From<bool> for DigitalValue {
    fn from(v: bool) -> Self {
        DigitalValue(i32::from(v))
    }
}

impl From<f32> for DigitalValue {
    fn from(v: f32) -> Self {
        DigitalValue(v as i32)
    }
}

impl From<f64> for DigitalValue {
    fn from(v: f64) -> Self {
        DigitalValue(v as i32)
    }
}

struct CommandConnection {
    server: Box<dyn AcquisitionServer>,
    endpoint: Endpoint,
}

impl CommandConnection {
    fn open(connector: &dyn Connector, endpoint: &Endpoint, sink: &'static str) -> AcqResult<Self> {
        let server = connector.connect(endpoint)?;
        info!(endpoint = %endpoint, sink, "command connection opened");
        Ok(Self {
            server,
            endpoint: endpoint.clone(),
        })
    }

    fn send(&mut self, command: &Command) -> AcqResult<()> {
        debug!(endpoint = %self.endpoint, command = ?command, "sending command");
        self.server.send_command(command)
    }
}

impl Drop for CommandConnection {
    fn drop(&mut self) {
        info!(endpoint = %self.endpoint, "command connection released");
    }
}

/// Side effect applied per notification.
pub trait CommandSink<T> {
    /// Issue the command for `item`.
    fn apply(&mut self, item: &T) -> AcqResult<()>;

    /// Issue the command for every item of `items`, yielding each item after
    /// its command succeeded. The first failure is yielded as `Err` and ends
    /// the iteration; the connection is released when iteration ends.
    fn pass_through<I>(self, items: I) -> PassThrough<Self, I::IntoIter>
    where
        Self: Sized,
        I: IntoIterator<Item = T>,
    {
        PassThrough {
            sink: Some(self),
            items: items.into_iter(),
        }
    }
}

/// Iterator adapter returned by [`CommandSink::pass_through`].
pub struct PassThrough<S, I> {
    sink: Option<S>,
    items: I,
}

impl<S, I> Iterator for PassThrough<S, I>
where
    I: Iterator,
    S: CommandSink<I::Item>,
{
    type Item = AcqResult<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let sink = self.sink.as_mut()?;
        let Some(item) = self.items.next() else {
            self.sink = None;
            return None;
        };
        match sink.apply(&item) {
            Ok(()) => Some(Ok(item)),
            Err(e) => {
                self.sink = None;
                Some(Err(e))
            }
        }
    }
}

/// Writes values to a fixed set of digital output lines.
pub struct DigitalOutput {
    conn: CommandConnection,
    lines: String,
}

impl DigitalOutput {
    /// Connect to `endpoint`. `lines` is passed to the server untouched,
    /// e.g. `"Dev6/port0/line2,Dev6/port0/line5"`.
    pub fn open(
        connector: &dyn Connector,
        endpoint: &Endpoint,
        lines: impl Into<String>,
    ) -> AcqResult<Self> {
        Ok(Self {
            conn: CommandConnection::open(connector, endpoint, "digital_output")?,
            lines: lines.into(),
        })
    }

    /// Line selector.
    pub fn lines(&self) -> &str {
        &self.lines
    }

    /// Set the lines to `value`.
    pub fn write(&mut self, value: impl Into<DigitalValue>) -> AcqResult<()> {
        let DigitalValue(value) = value.into();
        self.conn.send(&Command::SetDigitalOut {
            value,
            lines: self.lines.clone(),
        })
    }
}

impl<T> CommandSink<T> for DigitalOutput
where
    T: Copy + Into<DigitalValue>,
{
    fn apply(&mut self, item: &T) -> AcqResult<()> {
        self.write(*item)
    }
}

/// Applies fixed gate and trigger levels on every notification.
pub struct GateTrigger {
    conn: CommandConnection,
    gate: TriggerLevel,
    trigger: TriggerLevel,
}

impl GateTrigger {
    /// Connect to `endpoint` with the levels to apply.
    pub fn open(
        connector: &dyn Connector,
        endpoint: &Endpoint,
        gate: TriggerLevel,
        trigger: TriggerLevel,
    ) -> AcqResult<Self> {
        Ok(Self {
            conn: CommandConnection::open(connector, endpoint, "gate_trigger")?,
            gate,
            trigger,
        })
    }

    /// Send the configured levels.
    pub fn fire(&mut self) -> AcqResult<()> {
        self.conn.send(&Command::TriggerGt {
            gate: self.gate.code(),
            trigger: self.trigger.code(),
        })
    }
}

impl<T> CommandSink<T> for GateTrigger {
    fn apply(&mut self, _item: &T) -> AcqResult<()> {
        self.fire()
    }
}

/// Applies the `(gate, trigger)` levels carried by each notification.
pub struct GateControl {
    conn: CommandConnection,
}

impl std::fmt::Debug for GateControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateControl")
            .field("endpoint", &self.conn.endpoint)
            .finish_non_exhaustive()
    }
}

impl GateControl {
    /// Connect to `endpoint`.
    pub fn open(connector: &dyn Connector, endpoint: &Endpoint) -> AcqResult<Self> {
        Ok(Self {
            conn: CommandConnection::open(connector, endpoint, "gate_control")?,
        })
    }

    /// Send one pair of levels.
    pub fn set(&mut self, gate: TriggerLevel, trigger: TriggerLevel) -> AcqResult<()> {
        self.conn.send(&Command::TriggerGt {
            gate: gate.code(),
            trigger: trigger.code(),
        })
    }
}

impl CommandSink<(TriggerLevel, TriggerLevel)> for GateControl {
    fn apply(&mut self, item: &(TriggerLevel, TriggerLevel)) -> AcqResult<()> {
        self.set(item.0, item.1)
    }
}
