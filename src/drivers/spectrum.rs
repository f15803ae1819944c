use rustfft::{num_complex::Complex64, FftPlanner};

use crate::types::Waveform;

/// Magnitude spectrum of a single capture.
#[derive(Clone, Debug)]
pub struct FrequencySpectrum {
    pub sample_rate_hz: f64,
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl FrequencySpectrum {
    pub fn bin_width_hz(&self) -> f64 {
        self.frequencies_hz.get(1).copied().unwrap_or(self.sample_rate_hz)
    }

    /// Strongest bin, ignoring DC.
    pub fn dominant_frequency_hz(&self) -> Option<f64> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| self.frequencies_hz[k])
    }
}

/// Helper that computes FFTs over a capped window of the capture.
pub struct SpectrumBuilder {
    max_size: usize,
}

impl SpectrumBuilder {
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn compute(&self, waveform: &Waveform) -> FrequencySpectrum {
        let fft_size = waveform.sample_count().min(self.max_size);
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let frequencies_hz = (0..fft_size / 2)
            .map(|k| k as f64 * waveform.sample_rate_hz / fft_size as f64)
            .collect();
        let mut buffer: Vec<Complex64> = waveform
            .samples
            .iter()
            .take(fft_size)
            .map(|&v| Complex64::new(v, 0.0))
            .collect();
        fft.process(&mut buffer);
        let magnitudes = buffer
            .iter()
            .take(fft_size / 2)
            .map(|c| 2.0 * c.norm() / fft_size as f64)
            .collect();
        FrequencySpectrum {
            sample_rate_hz: waveform.sample_rate_hz,
            frequencies_hz,
            magnitudes,
        }
    }
}

/// Outcome of comparing the captured tone with the commanded frequency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ToneCheck {
    Matches,
    Mismatch { observed_hz: f64 },
    /// Too few samples to resolve the tone.
    Unresolved,
}

/// Relative frequency error tolerated before warning.
pub const TONE_TOLERANCE: f64 = 0.1;

/// Checks the strongest tone in `waveform` sits near `expected_hz`.
///
/// A mismatch must exceed both [`TONE_TOLERANCE`] and two FFT bins.
pub fn check_tone(builder: &SpectrumBuilder, waveform: &Waveform, expected_hz: f64) -> ToneCheck {
    if waveform.sample_count() < 4 {
        return ToneCheck::Unresolved;
    }
    let spectrum = builder.compute(waveform);
    let Some(observed_hz) = spectrum.dominant_frequency_hz() else {
        return ToneCheck::Unresolved;
    };
    let error = (observed_hz - expected_hz).abs();
    if error > expected_hz * TONE_TOLERANCE && error > 2.0 * spectrum.bin_width_hz() {
        ToneCheck::Mismatch { observed_hz }
    } else {
        ToneCheck::Matches
    }
}
