use crate::drivers::lockin::wrap_degrees;
use crate::types::PhasorEstimate;

/// Gain and phase of channel 2 relative to channel 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransferFunction {
    /// `None` when channel 1 read zero and the ratio is undefined.
    pub ratio_db: Option<f64>,
    pub phase_deg: f64,
}

impl TransferFunction {
    pub fn is_degraded(&self) -> bool {
        self.ratio_db.is_none()
    }
}

pub fn gain_db(mag1: f64, mag2: f64) -> Option<f64> {
    if mag1 > 0.0 && mag1.is_finite() && mag2.is_finite() {
        Some(20.0 * (mag2 / mag1).log10())
    } else {
        None
    }
}

pub fn transfer_function(ch1: &PhasorEstimate, ch2: &PhasorEstimate) -> TransferFunction {
    TransferFunction {
        ratio_db: gain_db(ch1.magnitude, ch2.magnitude),
        phase_deg: wrap_degrees(ch2.phase_degrees - ch1.phase_degrees),
    }
}
