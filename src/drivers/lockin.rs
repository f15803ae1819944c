// Lock-in detection: I = (2/N)·Σy·cos, Q = (2/N)·Σy·sin over whole cycles,
// phase = atan2(I, Q), so A·sin(ωt + φ) reads back as (A, φ).
use std::f64::consts::PI;

use crate::drivers::SweepError;
use crate::types::{PhasorEstimate, Waveform};

/// Below this many whole cycles the estimate is noisy; still usable.
pub const RELIABLE_CYCLES: u32 = 4;

/// Slack when counting whole cycles so 7.9999999 still counts as eight.
const CYCLE_EPSILON: f64 = 1e-9;

/// Wrap an angle into (-180, 180].
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Reference generator shared by both channels of one frequency point.
pub struct LockInExtractor {
    reference_hz: f64,
    sample_rate_hz: f64,
    cos_table: Vec<f64>,
    sin_table: Vec<f64>,
}

impl LockInExtractor {
    /// Precompute `len` samples of the cosine/sine references.
    pub fn new(reference_hz: f64, sample_rate_hz: f64, len: usize) -> Result<Self, SweepError> {
        if !(sample_rate_hz > 0.0 && sample_rate_hz.is_finite()) {
            return Err(SweepError::InvalidSampleRate);
        }
        if !(reference_hz > 0.0) {
            return Err(SweepError::Configuration(format!(
                "reference frequency must be positive, got {reference_hz} Hz"
            )));
        }
        let omega = 2.0 * PI * reference_hz / sample_rate_hz;
        let (cos_table, sin_table) = (0..len)
            .map(|n| {
                let theta = omega * n as f64;
                (theta.cos(), theta.sin())
            })
            .unzip();
        Ok(Self {
            reference_hz,
            sample_rate_hz,
            cos_table,
            sin_table,
        })
    }

    /// Recover magnitude and phase of `waveform` at the reference frequency.
    pub fn extract(&self, waveform: &Waveform) -> Result<PhasorEstimate, SweepError> {
        if waveform.sample_rate_hz != self.sample_rate_hz {
            return Err(SweepError::SampleRateMismatch {
                expected: self.sample_rate_hz,
                actual: waveform.sample_rate_hz,
            });
        }
        let available = waveform.sample_count().min(self.cos_table.len());
        let cycles = available as f64 * self.reference_hz / self.sample_rate_hz;
        if cycles + CYCLE_EPSILON < 1.0 {
            return Err(SweepError::InsufficientSamples {
                cycles,
                required: 1,
            });
        }
        let whole_cycles = (cycles + CYCLE_EPSILON).floor();
        let n = ((whole_cycles * self.sample_rate_hz / self.reference_hz).round() as usize)
            .clamp(1, available);
        if (whole_cycles as u32) < RELIABLE_CYCLES {
            log::warn!(
                "{:?}: only {} cycle(s) of {:.3} Hz captured; estimate may be noisy",
                waveform.channel_id,
                whole_cycles,
                self.reference_hz
            );
        }

        let samples = &waveform.samples[..n];
        let (sum_i, sum_q) = samples
            .iter()
            .zip(&self.cos_table[..n])
            .zip(&self.sin_table[..n])
            .fold((0.0, 0.0), |(i, q), ((y, c), s)| (i + y * c, q + y * s));
        let scale = 2.0 / n as f64;
        let in_phase = sum_i * scale;
        let quadrature = sum_q * scale;
        Ok(PhasorEstimate {
            magnitude: in_phase.hypot(quadrature),
            phase_degrees: wrap_degrees(in_phase.atan2(quadrature).to_degrees()),
            in_phase,
            quadrature,
            cycles_used: whole_cycles as u32,
        })
    }

    /// Build one reference for the pair and extract both channels against it.
    pub fn extract_pair(
        reference_hz: f64,
        ch1: &Waveform,
        ch2: &Waveform,
    ) -> Result<(PhasorEstimate, PhasorEstimate), SweepError> {
        if ch1.sample_rate_hz != ch2.sample_rate_hz {
            return Err(SweepError::SampleRateMismatch {
                expected: ch1.sample_rate_hz,
                actual: ch2.sample_rate_hz,
            });
        }
        let len = ch1.sample_count().max(ch2.sample_count());
        let extractor = Self::new(reference_hz, ch1.sample_rate_hz, len)?;
        Ok((extractor.extract(ch1)?, extractor.extract(ch2)?))
    }
}
