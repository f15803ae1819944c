use crate::drivers::SweepError;
use crate::types::{FrequencyPoint, SweepConfig, SweepSpacing};

/// Relative distance under which a generated point is considered to land on the end frequency.
const END_SNAP_TOLERANCE: f64 = 1e-9;

/// Longest sweep the planner will build.
pub const MAX_SWEEP_POINTS: usize = 100_000;

/// Builds the ordered list of frequencies a sweep visits.
///
/// The first point is always `start_hz`; the last is the first point at or
/// above `end_hz`. Points past the source bandwidth are not generated: the
/// sweep ends on `max_output_hz` instead.
pub fn plan_sweep(config: &SweepConfig) -> Result<Vec<FrequencyPoint>, SweepError> {
    config.validate()?;
    let start = config.start_hz;
    let end = config.end_hz;
    let ceiling = config.max_output_hz;
    let expected = expected_len(config);
    if expected > MAX_SWEEP_POINTS as f64 {
        return Err(SweepError::Configuration(format!(
            "sweep would need about {expected:.0} points, at most {MAX_SWEEP_POINTS} allowed"
        )));
    }
    let mut points: Vec<FrequencyPoint> = Vec::with_capacity(expected as usize);
    let mut i = 0usize;
    loop {
        let raw = match config.spacing {
            SweepSpacing::Logarithmic { points_per_decade } => {
                start * 10f64.powf(i as f64 / points_per_decade as f64)
            }
            SweepSpacing::Linear { step_hz } => start + i as f64 * step_hz,
        };
        let reached_end = raw >= end * (1.0 - END_SNAP_TOLERANCE);
        let reached_ceiling = raw >= ceiling;
        let frequency_hz = if i == 0 {
            start
        } else if (raw - end).abs() <= end * END_SNAP_TOLERANCE {
            end.min(ceiling)
        } else {
            raw.min(ceiling)
        };
        if let Some(last) = points.last() {
            if frequency_hz <= last.frequency_hz {
                return Err(SweepError::Configuration(format!(
                    "step is too small to separate points near {frequency_hz} Hz"
                )));
            }
        }
        points.push(FrequencyPoint {
            index: i,
            frequency_hz,
        });
        if reached_ceiling && !reached_end {
            log::warn!("sweep truncated at the source maximum of {ceiling:.3} Hz");
        }
        if reached_end || reached_ceiling {
            break;
        }
        i += 1;
    }
    log::debug!(
        "planned {} points from {:.3} Hz to {:.3} Hz",
        points.len(),
        points[0].frequency_hz,
        points[points.len() - 1].frequency_hz
    );
    Ok(points)
}

/// Upper estimate of the point count, before the bandwidth ceiling cuts it.
fn expected_len(config: &SweepConfig) -> f64 {
    let span_end = config.end_hz.min(config.max_output_hz);
    let steps = match config.spacing {
        SweepSpacing::Logarithmic { points_per_decade } => {
            (span_end / config.start_hz).log10() * points_per_decade as f64
        }
        SweepSpacing::Linear { step_hz } => (span_end - config.start_hz) / step_hz,
    };
    steps.max(0.0).ceil() + 2.0
}
