//! Sample blocks as returned by the server and as delivered to consumers.
//!
//! The server hands back [`RawBlock`]s: 16-bit samples interleaved by scan
//! (`[s0c0, s0c1, ..., s1c0, ...]`). Consumers receive [`Buffer`]s: one row
//! per channel, one column per retained sample, optionally converted to volts.

use crate::error::{AcqError, AcqResult};
use std::ops::Range;
use std::sync::Arc;

/// Keep every `step`-th element of `samples`, starting with the first.
///
/// `decimate(x, 1) == x` and `decimate(x, n).len() == ceil(x.len() / n)`.
/// A step of zero is treated as one.
pub fn decimate<T: Copy>(samples: &[T], step: usize) -> Vec<T> {
    samples.iter().step_by(step.max(1)).copied().collect()
}

/// Number of columns left after decimating `count` samples by `step`.
pub fn decimated_len(count: usize, step: usize) -> usize {
    count.div_ceil(step.max(1))
}

/// Block of raw samples as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Interleaved samples, scan-major.
    pub data: Vec<i16>,
    /// Channels per scan.
    pub n_channels: usize,
    /// Server-reported sample index of the first scan.
    pub start_sample: u64,
}

impl RawBlock {
    /// Create a raw block.
    pub fn new(data: Vec<i16>, n_channels: usize, start_sample: u64) -> Self {
        Self {
            data,
            n_channels,
            start_sample,
        }
    }

    /// Number of complete scans.
    pub fn n_scans(&self) -> usize {
        if self.n_channels > 0 {
            self.data.len() / self.n_channels
        } else {
            0
        }
    }

    /// Reject blocks that don't hold whole scans for `expected_channels`.
    pub fn validate(&self, expected_channels: usize) -> AcqResult<()> {
        if self.n_channels != expected_channels {
            return Err(AcqError::protocol(
                "fetch",
                format!(
                    "server returned {} channels, requested {}",
                    self.n_channels, expected_channels
                ),
            ));
        }
        if self.n_channels == 0 || self.data.len() % self.n_channels != 0 {
            return Err(AcqError::protocol(
                "fetch",
                format!(
                    "block of {} samples is not a whole number of {}-channel scans",
                    self.data.len(),
                    self.n_channels
                ),
            ));
        }
        Ok(())
    }

    /// Transpose into channel-major rows, keeping every `step`-th scan.
    pub fn to_channel_major(&self, step: usize) -> Vec<i16> {
        let n_channels = self.n_channels;
        let n_scans = self.n_scans();
        let n_cols = decimated_len(n_scans, step);
        let step = step.max(1);
        let mut out = Vec::with_capacity(n_channels * n_cols);
        for ch in 0..n_channels {
            out.extend(
                (0..n_scans)
                    .step_by(step)
                    .map(|scan| self.data[scan * n_channels + ch]),
            );
        }
        out
    }
}

/// Sample storage of a [`Buffer`], channel-major.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// Raw server units.
    Raw(Vec<i16>),
    /// Physical units (volts).
    Volts(Vec<f64>),
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Samples::Raw(v) => v.len(),
            Samples::Volts(v) => v.len(),
        }
    }
}

/// Dense block of samples delivered to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    channels: Arc<[u32]>,
    n_samples: usize,
    start_sample: u64,
    span: u64,
    downsample: u32,
    samples: Samples,
}

impl Buffer {
    /// Build a buffer from channel-major samples.
    ///
    /// `span` is the number of server samples the buffer covers before
    /// decimation.
    pub fn new(
        channels: Arc<[u32]>,
        start_sample: u64,
        span: u64,
        downsample: u32,
        samples: Samples,
    ) -> AcqResult<Self> {
        let n_channels = channels.len();
        if n_channels == 0 || samples.len() % n_channels != 0 {
            return Err(AcqError::protocol(
                "fetch",
                format!(
                    "{} samples do not fill {} channel rows",
                    samples.len(),
                    n_channels
                ),
            ));
        }
        Ok(Self {
            n_samples: samples.len() / n_channels,
            channels,
            start_sample,
            span,
            downsample: downsample.max(1),
            samples,
        })
    }

    /// Channel index of each row.
    pub fn channels(&self) -> &[u32] {
        &self.channels
    }

    /// Number of rows.
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of columns (samples kept after decimation).
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Server-reported index of the first sample.
    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    /// Server samples covered before decimation.
    pub fn span(&self) -> u64 {
        self.span
    }

    /// `[start_sample, start_sample + span)`.
    pub fn sample_range(&self) -> Range<u64> {
        self.start_sample..self.start_sample + self.span
    }

    /// Decimation factor applied.
    pub fn downsample(&self) -> u32 {
        self.downsample
    }

    /// Whether the samples are in physical units.
    pub fn is_volts(&self) -> bool {
        matches!(self.samples, Samples::Volts(_))
    }

    /// Underlying storage.
    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Raw samples of one row.
    pub fn raw_row(&self, row: usize) -> Option<&[i16]> {
        match &self.samples {
            Samples::Raw(v) if row < self.n_channels() => {
                Some(&v[row * self.n_samples..(row + 1) * self.n_samples])
            }
            _ => None,
        }
    }

    /// Converted samples of one row.
    pub fn volts_row(&self, row: usize) -> Option<&[f64]> {
        match &self.samples {
            Samples::Volts(v) if row < self.n_channels() => {
                Some(&v[row * self.n_samples..(row + 1) * self.n_samples])
            }
            _ => None,
        }
    }

    /// Value at `(row, col)` as `f64`, whatever the storage.
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.n_channels() || col >= self.n_samples {
            return None;
        }
        let idx = row * self.n_samples + col;
        Some(match &self.samples {
            Samples::Raw(v) => f64::from(v[idx]),
            Samples::Volts(v) => v[idx],
        })
    }

    /// Convert raw samples to volts, row `r` scaled by `multipliers[r]`.
    ///
    /// Consumes the raw buffer. Already converted buffers are returned as is.
    pub fn into_volts(self, multipliers: &[f64]) -> AcqResult<Self> {
        let raw = match self.samples {
            Samples::Raw(raw) => raw,
            Samples::Volts(_) => return Ok(self),
        };
        if multipliers.len() != self.channels.len() {
            return Err(AcqError::configuration(format!(
                "{} multipliers for {} channels",
                multipliers.len(),
                self.channels.len()
            )));
        }
        let n = self.n_samples;
        let volts = raw
            .iter()
            .enumerate()
            .map(|(i, &v)| f64::from(v) * multipliers[i / n.max(1)])
            .collect();
        Ok(Self {
            samples: Samples::Volts(volts),
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimate_law() {
        let x: Vec<i32> = (0..10).collect();
        assert_eq!(decimate(&x, 1), x);
        assert_eq!(decimate(&x, 3), vec![0, 3, 6, 9]);
        assert_eq!(decimate(&x, 4).len(), decimated_len(10, 4));
        assert_eq!(decimate(&x, 20), vec![0]);
        assert!(decimate::<i32>(&[], 3).is_empty());
        for step in 1..12 {
            for len in 0..25 {
                let x: Vec<usize> = (0..len).collect();
                assert_eq!(decimate(&x, step).len(), len.div_ceil(step));
            }
        }
    }

    #[test]
    fn test_raw_block_transpose() {
        // 3 scans x 2 channels
        let block = RawBlock::new(vec![1, 10, 2, 20, 3, 30], 2, 100);
        assert_eq!(block.n_scans(), 3);
        assert_eq!(block.to_channel_major(1), vec![1, 2, 3, 10, 20, 30]);
        assert_eq!(block.to_channel_major(2), vec![1, 3, 10, 30]);
    }

    #[test]
    fn test_raw_block_validate() {
        assert!(RawBlock::new(vec![1, 2, 3], 2, 0).validate(2).is_err());
        assert!(RawBlock::new(vec![1, 2], 2, 0).validate(3).is_err());
        assert!(RawBlock::new(vec![1, 2, 3, 4], 2, 0).validate(2).is_ok());
    }

    #[test]
    fn test_buffer_rows_and_range() {
        let buffer = Buffer::new(
            Arc::from(vec![4u32, 7]),
            500,
            6,
            2,
            Samples::Raw(vec![1, 2, 3, -1, -2, -3]),
        )
        .unwrap();
        assert_eq!(buffer.n_channels(), 2);
        assert_eq!(buffer.n_samples(), 3);
        assert_eq!(buffer.raw_row(1).unwrap(), &[-1, -2, -3]);
        assert_eq!(buffer.sample_range(), 500..506);
        assert_eq!(buffer.value(0, 2), Some(3.0));
        assert_eq!(buffer.value(2, 0), None);
        assert!(buffer.volts_row(0).is_none());
    }

    #[test]
    fn test_into_volts_is_exact_and_keeps_shape() {
        let mults = [0.25, 3.0e-6];
        let buffer = Buffer::new(
            Arc::from(vec![0u32, 1]),
            0,
            2,
            1,
            Samples::Raw(vec![8, -4, 1000, i16::MIN]),
        )
        .unwrap();
        let volts = buffer.clone().into_volts(&mults).unwrap();
        assert!(volts.is_volts());
        assert_eq!(volts.channels(), buffer.channels());
        assert_eq!(volts.n_samples(), buffer.n_samples());
        assert_eq!(volts.volts_row(0).unwrap(), &[8.0 * 0.25, -4.0 * 0.25]);
        assert_eq!(
            volts.volts_row(1).unwrap(),
            &[1000.0 * 3.0e-6, f64::from(i16::MIN) * 3.0e-6]
        );
    }

    #[test]
    fn test_into_volts_rejects_wrong_multiplier_count() {
        let buffer =
            Buffer::new(Arc::from(vec![0u32]), 0, 1, 1, Samples::Raw(vec![1])).unwrap();
        assert!(buffer.into_volts(&[1.0, 2.0]).is_err());
    }
}
