//! Call latency for realistic mode.

use std::time::Duration;

/// Per-call latency of the simulated server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Delay added to every collaborator call.
    pub call_delay: Duration,
}

impl TimingConfig {
    /// Zero delays, for unit tests.
    pub fn instant() -> Self {
        Self::default()
    }

    /// Round-trip of a local command server (~2 ms).
    pub fn realistic() -> Self {
        Self {
            call_delay: Duration::from_millis(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        assert_eq!(TimingConfig::default().call_delay, Duration::ZERO);
        assert_eq!(TimingConfig::instant(), TimingConfig::default());
        assert_eq!(
            TimingConfig::realistic().call_delay,
            Duration::from_millis(2)
        );
    }
}
