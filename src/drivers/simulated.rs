use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex64;

use crate::drivers::instrument::{InstrumentLink, Operation, RawCapture, Reply};
use crate::drivers::SweepError;
use crate::types::WaveformShape;

/// Software bench: generator -> sense resistor -> series-RC device under test.
///
/// Channel 1 probes the generator output, channel 2 the DUT. Noise comes from
/// a seeded RNG that is reset per capture from the seed and the frequency, so
/// the same sweep always produces the same samples.
#[derive(Clone, Debug)]
pub struct SimulatedBench {
    pub sense_resistance_ohm: f64,
    pub dut_resistance_ohm: f64,
    pub dut_capacitance_f: f64,
    pub noise_volts: f64,
    pub seed: u64,
    pub record_length: usize,
    pub max_sample_rate_hz: f64,
    generator: GeneratorModel,
}

#[derive(Clone, Copy, Debug)]
struct GeneratorModel {
    frequency_hz: f64,
    amplitude_vpp: f64,
    shape: WaveformShape,
    output_on: bool,
}

impl Default for SimulatedBench {
    fn default() -> Self {
        Self {
            sense_resistance_ohm: 1000.0,
            dut_resistance_ohm: 100.0,
            dut_capacitance_f: 100e-9,
            noise_volts: 1e-3,
            seed: 0x5eed,
            record_length: 30_000,
            max_sample_rate_hz: 250e6,
            generator: GeneratorModel {
                frequency_hz: 1000.0,
                amplitude_vpp: 1.0,
                shape: WaveformShape::Sine,
                output_on: false,
            },
        }
    }
}

impl SimulatedBench {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Impedance of the DUT at `frequency_hz`.
    pub fn dut_impedance(&self, frequency_hz: f64) -> Complex64 {
        let omega = 2.0 * PI * frequency_hz;
        Complex64::new(self.dut_resistance_ohm, -1.0 / (omega * self.dut_capacitance_f))
    }

    /// V2 / V1 of the divider at `frequency_hz`.
    pub fn divider_response(&self, frequency_hz: f64) -> Complex64 {
        let z = self.dut_impedance(frequency_hz);
        z / (z + self.sense_resistance_ohm)
    }

    fn capture(&self, frequency_hz: f64, min_cycles: u32) -> Result<RawCapture, SweepError> {
        if frequency_hz <= 0.0 {
            return Err(SweepError::Device("acquire before frequency was set".into()));
        }
        let n = self.record_length;
        let window_cycles = min_cycles.max(12) as f64;
        let sample_rate_hz = (n as f64 * frequency_hz / window_cycles).min(self.max_sample_rate_hz);
        let peak = if self.generator.output_on {
            self.generator.amplitude_vpp / 2.0
        } else {
            0.0
        };
        let response = self.divider_response(frequency_hz);
        let gain = response.norm();
        let shift = response.arg();
        let omega = 2.0 * PI * frequency_hz / sample_rate_hz;
        let mut rng = StdRng::seed_from_u64(self.seed ^ frequency_hz.to_bits());
        let shape = self.generator.shape;
        let wave = |theta: f64| match shape {
            WaveformShape::Sine => theta.sin(),
            WaveformShape::Square => {
                if theta.sin() >= 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        let mut ch1 = Vec::with_capacity(n);
        let mut ch2 = Vec::with_capacity(n);
        for i in 0..n {
            let theta = omega * i as f64;
            ch1.push(peak * wave(theta) + self.noise_volts * rng.gen_range(-1.0..=1.0));
            // Only the fundamental is shaped by the DUT model.
            ch2.push(peak * gain * wave(theta + shift) + self.noise_volts * rng.gen_range(-1.0..=1.0));
        }
        Ok(RawCapture {
            sample_rate_hz,
            buffers: vec![ch1, ch2],
        })
    }
}

impl InstrumentLink for SimulatedBench {
    fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError> {
        match op {
            Operation::Identify => {
                return Ok(Reply::Identity(vec![
                    "SIM,SIGNAL-GENERATOR,0,1.0".into(),
                    "SIM,OSCILLOSCOPE,0,1.0".into(),
                ]))
            }
            Operation::SetFrequency(hz) => self.generator.frequency_hz = *hz,
            Operation::SetAmplitude(vpp) => self.generator.amplitude_vpp = *vpp,
            Operation::SetWaveform(shape) => self.generator.shape = *shape,
            Operation::SetOutput(on) => self.generator.output_on = *on,
            Operation::SetVerticalScale { .. } => {}
            Operation::Acquire {
                frequency_hz,
                min_cycles,
                ..
            } => {
                if (*frequency_hz - self.generator.frequency_hz).abs() > 1e-9 * frequency_hz {
                    log::debug!(
                        "acquire at {frequency_hz} Hz while generator runs at {} Hz",
                        self.generator.frequency_hz
                    );
                }
                let running = self.generator.frequency_hz;
                return self.capture(running, *min_cycles).map(Reply::Capture);
            }
        }
        Ok(Reply::Done)
    }
}
