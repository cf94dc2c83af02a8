//! Deterministic sample generation.
//!
//! The value of a sample depends only on its channel and absolute index, so
//! repeated fetches of the same window return identical data and tests can
//! check which samples a buffer carries.

use serde::{Deserialize, Serialize};

/// Simple pseudo-random number generator (LCG) for reproducible noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Shape of the simulated signal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Waveform {
    /// `(index + 1000 * channel) mod 32768`. Lets tests recover the index.
    #[default]
    Ramp,
    /// Sine per channel with a channel-dependent phase and low-level noise.
    Sine {
        /// Peak amplitude in raw units.
        amplitude: i16,
        /// Period in samples.
        period: u32,
        /// Noise amplitude in raw units.
        noise: i16,
    },
}

impl Waveform {
    /// Raw value of `channel` at sample `index`.
    pub fn sample(&self, channel: u32, index: u64) -> i16 {
        match *self {
            Waveform::Ramp => ramp_value(channel, index),
            Waveform::Sine {
                amplitude,
                period,
                noise,
            } => {
                let period = period.max(1) as f64;
                let phase = channel as f64 * 0.7;
                let angle = 2.0 * std::f64::consts::PI * (index as f64 / period) + phase;
                let clean = f64::from(amplitude) * angle.sin();
                let jitter = if noise > 0 {
                    let span = 2 * i64::from(noise) + 1;
                    let seed = prng(index.wrapping_mul(2654435761) ^ u64::from(channel));
                    (seed as i64 % span) - i64::from(noise)
                } else {
                    0
                };
                (clean as i64 + jitter).clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
            }
        }
    }
}

/// Value of the ramp waveform, exposed so tests can predict buffer contents.
pub fn ramp_value(channel: u32, index: u64) -> i16 {
    ((index + 1000 * u64::from(channel)) % 32768) as i16
}
