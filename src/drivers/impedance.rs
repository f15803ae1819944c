// Z = R·V2 / (V1 − V2), with R the sense resistor between the two probes.
use rustfft::num_complex::Complex64;

use crate::types::{Impedance, PhasorEstimate};

/// |V1 - V2| at or below this fraction of the larger phasor counts as zero.
pub const SINGULAR_RELATIVE_TOLERANCE: f64 = 1e-9;

pub fn phasor(magnitude: f64, phase_degrees: f64) -> Complex64 {
    Complex64::from_polar(magnitude, phase_degrees.to_radians())
}

/// `Z = R * V2 / (V1 - V2)`.
pub fn divider_impedance(sense_ohms: f64, v1: Complex64, v2: Complex64) -> Impedance {
    let difference = v1 - v2;
    let scale = v1.norm().max(v2.norm());
    if scale == 0.0 || difference.norm() <= scale * SINGULAR_RELATIVE_TOLERANCE {
        return Impedance::Singular;
    }
    let z = v2 / difference * sense_ohms;
    if z.re.is_finite() && z.im.is_finite() {
        Impedance::Finite { re: z.re, im: z.im }
    } else {
        Impedance::Singular
    }
}

/// Impedance for a measured channel pair, or `None` when no sense resistor is fitted.
pub fn impedance_from_phasors(
    sense_ohms: f64,
    ch1: &PhasorEstimate,
    ch2: &PhasorEstimate,
) -> Option<Impedance> {
    if sense_ohms <= 0.0 {
        return None;
    }
    Some(divider_impedance(
        sense_ohms,
        phasor(ch1.magnitude, ch1.phase_degrees),
        phasor(ch2.magnitude, ch2.phase_degrees),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(magnitude: f64, phase_degrees: f64) -> PhasorEstimate {
        PhasorEstimate {
            magnitude,
            phase_degrees,
            in_phase: 0.0,
            quadrature: 0.0,
            cycles_used: 8,
        }
    }

    #[test]
    fn half_voltage_across_dut_matches_sense_resistor() {
        let z = impedance_from_phasors(1000.0, &estimate(1.0, 0.0), &estimate(0.5, 0.0)).unwrap();
        match z {
            Impedance::Finite { re, im } => {
                assert!((re - 1000.0).abs() < 1e-9);
                assert!(im.abs() < 1e-9);
            }
            Impedance::Singular => panic!("expected a finite impedance"),
        }
    }

    #[test]
    fn quadrature_voltage_gives_reactive_part() {
        // V2 = j * V1 / (1 + j) -> Z = R * j.
        let v1 = Complex64::new(1.0, 0.0);
        let v2 = Complex64::new(0.0, 1.0) / Complex64::new(1.0, 1.0);
        match divider_impedance(50.0, v1, v2) {
            Impedance::Finite { re, im } => {
                assert!(re.abs() < 1e-9);
                assert!((im - 50.0).abs() < 1e-9);
            }
            Impedance::Singular => panic!("expected a finite impedance"),
        }
    }

    #[test]
    fn equal_channels_are_singular() {
        let z = impedance_from_phasors(1000.0, &estimate(0.8, 12.0), &estimate(0.8, 12.0));
        assert_eq!(z, Some(Impedance::Singular));
        assert_eq!(
            divider_impedance(10.0, Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)),
            Impedance::Singular
        );
    }

    #[test]
    fn disabled_without_sense_resistor() {
        assert_eq!(
            impedance_from_phasors(0.0, &estimate(1.0, 0.0), &estimate(0.5, 0.0)),
            None
        );
    }

    #[test]
    fn magnitude_and_angle_helpers() {
        let z = Impedance::Finite { re: 3.0, im: 4.0 };
        assert_eq!(z.magnitude(), Some(5.0));
        assert!((z.phase_degrees().unwrap() - 53.130_102).abs() < 1e-5);
        assert_eq!(Impedance::Singular.magnitude(), None);
    }
}
