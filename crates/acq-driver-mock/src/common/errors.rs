//! Error injection framework for the simulated server.
//!
//! Enables configurable failures for resilience testing of the scheduler and
//! the multicast. Injected faults surface as [`DriverError`]s, which convert
//! into the scheduler-facing [`AcqError`].

use super::rng::MockRng;
use acq_core::AcqError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Category of an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Link to the server is gone.
    Communication,
    /// Server answered with a failure indicator.
    Protocol,
    /// Server refused the connection.
    Refused,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Protocol => "protocol",
            DriverErrorKind::Refused => "refused",
        };
        write!(f, "{}", label)
    }
}

/// Fault raised by the simulated server.
#[derive(Error, Debug, Clone)]
#[error("Simulated server {kind} error in '{operation}': {message}")]
pub struct DriverError {
    /// Operation that failed.
    pub operation: &'static str,
    /// Fault category.
    pub kind: DriverErrorKind,
    /// Description.
    pub message: String,
}

impl DriverError {
    /// Create a driver error.
    pub fn new(operation: &'static str, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    /// Map to the scheduler error taxonomy.
    pub fn into_acq(self, endpoint: impl fmt::Display) -> AcqError {
        match self.kind {
            DriverErrorKind::Communication | DriverErrorKind::Refused => {
                AcqError::connection(endpoint, self.message)
            }
            DriverErrorKind::Protocol => AcqError::protocol(self.operation, self.message),
        }
    }
}

/// A specific failure to inject.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail every call of `operation` after `count` successful ones.
    FailAfterN {
        /// Operation name, e.g. `"fetch"`.
        operation: &'static str,
        /// Calls allowed to succeed first.
        count: u32,
    },
    /// The next call of any kind loses the link; every later call fails too.
    CommunicationLoss,
    /// Refuse every connection attempt.
    RefuseConnections,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

/// Error injection configuration.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

impl ErrorConfig {
    /// No injected errors (default).
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Uniform random failures on every operation, seeded.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            failure_rates: Arc::new(HashMap::new()),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(Some(0))),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check whether a connection attempt should be refused.
    pub fn check_connect(&self) -> Result<(), DriverError> {
        if self
            .scenarios
            .iter()
            .any(|s| matches!(s, ErrorScenario::RefuseConnections))
        {
            return Err(DriverError::new(
                "connect",
                DriverErrorKind::Refused,
                "connection refused",
            ));
        }
        Ok(())
    }

    /// Check if `operation` should fail.
    pub fn check_operation(&self, operation: &'static str) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                operation,
                DriverErrorKind::Communication,
                "communication lost",
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(DriverError::new(
                            operation,
                            DriverErrorKind::Protocol,
                            format!("injected failure after {} calls", count),
                        ));
                    }
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        operation,
                        DriverErrorKind::Communication,
                        "communication lost",
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                operation,
                DriverErrorKind::Protocol,
                format!("random failure on '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Clear counters and a lost link.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::ErrorKind;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("fetch").is_ok());
        }
        assert!(config.check_connect().is_ok());
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "fetch",
            count: 3,
        });
        for i in 0..3 {
            assert!(config.check_operation("fetch").is_ok(), "call {} should pass", i);
        }
        let err = config.check_operation("fetch").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Protocol);
        // Other operations are unaffected
        assert!(config.check_operation("get_sample_count").is_ok());

        config.reset();
        assert!(config.check_operation("fetch").is_ok());
    }

    #[test]
    fn test_communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        let err = config.check_operation("get_sample_count").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        assert!(config.check_operation("fetch").is_err());
        assert_eq!(
            err.into_acq("localhost:4142").kind(),
            ErrorKind::Connection
        );
    }

    #[test]
    fn test_refuse_connections() {
        let config = ErrorConfig::scenario(ErrorScenario::RefuseConnections);
        let err = config.check_connect().unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Refused);
    }

    #[test]
    fn test_random_failures_seeded() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("fetch").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_protocol_error_mapping() {
        let err = DriverError::new("fetch", DriverErrorKind::Protocol, "bad");
        match err.into_acq("h:1") {
            AcqError::Protocol { operation, .. } => assert_eq!(operation, "fetch"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
