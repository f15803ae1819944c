// src/types.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::drivers::SweepError;

/// Shape of the generator output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WaveformShape {
    Sine,
    Square,
}

/// Scope input. Channel 1 sits across source + sense resistor, channel 2 across the DUT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelId {
    Ch1,
    Ch2,
}

impl ChannelId {
    pub fn number(self) -> u8 {
        match self {
            ChannelId::Ch1 => 1,
            ChannelId::Ch2 => 2,
        }
    }
}

/// How successive sweep frequencies are spaced.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepSpacing {
    Logarithmic { points_per_decade: u32 },
    Linear { step_hz: f64 },
}

/// Everything the sweep needs to know up front. Validated once, then never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub start_hz: f64,
    pub end_hz: f64,
    pub spacing: SweepSpacing,
    pub amplitude_vpp: f64,
    pub waveform_shape: WaveformShape,
    /// Sense resistor in series with the DUT; 0 disables impedance.
    pub sense_resistance_ohm: f64,
    /// Bandwidth of the generator.
    pub max_output_hz: f64,
    pub min_cycles: u32,
    pub max_attempts: u32,
    pub settle_ms: u64,
    /// Take one unlogged shot at the first frequency to range the scope.
    pub warmup: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_hz: 1.0,
            end_hz: 1.0e6,
            spacing: SweepSpacing::Logarithmic {
                points_per_decade: 10,
            },
            amplitude_vpp: 1.0,
            waveform_shape: WaveformShape::Sine,
            sense_resistance_ohm: 0.0,
            max_output_hz: 25.0e6,
            min_cycles: 4,
            max_attempts: 3,
            settle_ms: 300,
            warmup: true,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), SweepError> {
        let finite = [
            self.start_hz,
            self.end_hz,
            self.amplitude_vpp,
            self.sense_resistance_ohm,
            self.max_output_hz,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(SweepError::Configuration(
                "sweep parameters must be finite numbers".into(),
            ));
        }
        if self.start_hz <= 0.0 {
            return Err(SweepError::Configuration(format!(
                "start frequency must be positive, got {} Hz",
                self.start_hz
            )));
        }
        if self.end_hz < self.start_hz {
            return Err(SweepError::Configuration(format!(
                "end frequency {} Hz is below start frequency {} Hz",
                self.end_hz, self.start_hz
            )));
        }
        if !(self.max_output_hz > 0.0) || self.start_hz > self.max_output_hz {
            return Err(SweepError::Configuration(format!(
                "start frequency {} Hz is above the source maximum of {} Hz",
                self.start_hz, self.max_output_hz
            )));
        }
        match self.spacing {
            SweepSpacing::Logarithmic { points_per_decade } if points_per_decade == 0 => {
                return Err(SweepError::Configuration(
                    "points per decade must be greater than zero".into(),
                ));
            }
            SweepSpacing::Linear { step_hz } if !(step_hz > 0.0 && step_hz.is_finite()) => {
                return Err(SweepError::Configuration(format!(
                    "linear step must be greater than zero, got {step_hz} Hz"
                )));
            }
            _ => {}
        }
        if self.amplitude_vpp <= 0.0 {
            return Err(SweepError::Configuration(
                "output amplitude must be greater than zero".into(),
            ));
        }
        if self.sense_resistance_ohm < 0.0 {
            return Err(SweepError::Configuration(
                "sense resistance cannot be negative".into(),
            ));
        }
        if self.min_cycles == 0 {
            return Err(SweepError::Configuration(
                "minimum cycle count must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SweepError::Configuration(
                "at least one acquisition attempt per point is required".into(),
            ));
        }
        Ok(())
    }

    pub fn impedance_enabled(&self) -> bool {
        self.sense_resistance_ohm > 0.0
    }

    pub fn is_logarithmic(&self) -> bool {
        matches!(self.spacing, SweepSpacing::Logarithmic { .. })
    }

    /// One-line human description, also written into the log header.
    pub fn describe(&self) -> String {
        match self.spacing {
            SweepSpacing::Logarithmic { points_per_decade } => format!(
                "Analysing from {:.3} Hz to {:.3} Hz, {points_per_decade} points/decade; {:.1} decades",
                self.start_hz,
                self.end_hz,
                (self.end_hz / self.start_hz).log10()
            ),
            SweepSpacing::Linear { step_hz } => format!(
                "Analysing from {:.3} Hz to {:.3} Hz, {step_hz:.3} Hz steps",
                self.start_hz, self.end_hz
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyPoint {
    pub index: usize,
    pub frequency_hz: f64,
}

/// One channel of a single-shot capture, in volts.
#[derive(Clone, Debug)]
pub struct Waveform {
    pub channel_id: ChannelId,
    pub samples: Vec<f64>,
    pub sample_rate_hz: f64,
}

impl Waveform {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Magnitude (peak volts) and phase of one channel at the reference frequency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhasorEstimate {
    pub magnitude: f64,
    /// Always in (-180, 180].
    pub phase_degrees: f64,
    pub in_phase: f64,
    pub quadrature: f64,
    pub cycles_used: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Impedance {
    Finite { re: f64, im: f64 },
    /// V1 == V2: open circuit, the divider equation has no solution.
    Singular,
}

impl Impedance {
    pub fn magnitude(&self) -> Option<f64> {
        match self {
            Impedance::Finite { re, im } => Some(re.hypot(*im)),
            Impedance::Singular => None,
        }
    }

    pub fn phase_degrees(&self) -> Option<f64> {
        match self {
            Impedance::Finite { re, im } => Some(im.atan2(*re).to_degrees()),
            Impedance::Singular => None,
        }
    }
}

impl fmt::Display for Impedance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Impedance::Finite { re, im } => {
                let sign = if *im < 0.0 { '-' } else { '+' };
                write!(f, "{re:.4} {sign} {:.4}j", im.abs())
            }
            Impedance::Singular => write!(f, "inf"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MeasurementStatus {
    Ok,
    Skipped(String),
    Degraded(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub index: usize,
    pub frequency_hz: f64,
    pub mag1: f64,
    pub mag2: f64,
    /// Absent when channel 1 read zero volts.
    pub ratio_db: Option<f64>,
    pub phase_deg: f64,
    /// `None` when impedance measurement is disabled.
    pub impedance: Option<Impedance>,
    pub status: MeasurementStatus,
}

impl Measurement {
    pub fn skipped(point: FrequencyPoint, reason: impl Into<String>) -> Self {
        Self {
            index: point.index,
            frequency_hz: point.frequency_hz,
            mag1: f64::NAN,
            mag2: f64::NAN,
            ratio_db: None,
            phase_deg: f64::NAN,
            impedance: None,
            status: MeasurementStatus::Skipped(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == MeasurementStatus::Ok
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, MeasurementStatus::Skipped(_))
    }
}

/// Append-only list of measurements for one sweep.
pub type SweepResult = Vec<Measurement>;
