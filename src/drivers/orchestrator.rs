use std::sync::mpsc::Receiver;
use std::time::Duration;

use chrono::Local;

use crate::drivers::impedance::impedance_from_phasors;
use crate::drivers::instrument::{InstrumentController, InstrumentLink, SourceState};
use crate::drivers::lockin::LockInExtractor;
use crate::drivers::planner::plan_sweep;
use crate::drivers::spectrum::{check_tone, SpectrumBuilder, ToneCheck};
use crate::drivers::transfer::transfer_function;
use crate::drivers::SweepError;
use crate::recorder::{LogHeader, ResultSink};
use crate::types::{
    ChannelId, FrequencyPoint, Impedance, Measurement, MeasurementStatus, PhasorEstimate,
    SweepConfig, SweepResult,
};

/// Smallest vertical scale the auto-ranging will ask for (V/div).
const MIN_VOLTS_PER_DIV: f64 = 1e-3;
/// FFT length used for the tone check.
const TONE_CHECK_FFT: usize = 8192;

/// Messages accepted between points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepControl {
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SweepState {
    Idle,
    Configuring(FrequencyPoint),
    Acquiring(FrequencyPoint),
    Processing(FrequencyPoint),
    Logged(FrequencyPoint),
    Done,
    AbortedOnError,
}

/// Result of one attempt at one point.
#[derive(Debug)]
pub enum PointOutcome {
    Measured(Measurement),
    Skipped(String),
    Fatal(SweepError),
}

/// What the orchestrator does next with a point.
#[derive(Debug)]
pub enum Decision {
    Record(Measurement),
    Retry,
    Abort(SweepError),
}

/// Retry/skip/abort policy for one attempt.
pub fn decide(
    point: FrequencyPoint,
    outcome: PointOutcome,
    attempt: u32,
    max_attempts: u32,
) -> Decision {
    match outcome {
        PointOutcome::Measured(m) => Decision::Record(m),
        PointOutcome::Fatal(err) => Decision::Abort(err),
        PointOutcome::Skipped(_) if attempt < max_attempts => Decision::Retry,
        PointOutcome::Skipped(reason) => Decision::Record(Measurement::skipped(
            point,
            format!("{reason} (after {attempt} attempts)"),
        )),
    }
}

/// Classify an attempt's result: transient errors become `Skipped`.
pub fn classify(result: Result<Measurement, SweepError>) -> PointOutcome {
    match result {
        Ok(m) => PointOutcome::Measured(m),
        Err(err) if err.is_transient() => PointOutcome::Skipped(err.to_string()),
        Err(err) => PointOutcome::Fatal(err),
    }
}

#[derive(Debug)]
pub enum Termination {
    Completed,
    Cancelled,
    Aborted(SweepError),
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub result: SweepResult,
    pub termination: Termination,
}

impl SweepOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self.termination, Termination::Aborted(_))
    }

    pub fn skipped(&self) -> usize {
        self.result.iter().filter(|m| m.is_skipped()).count()
    }
}

/// Runs one sweep: owns the instrument, the result list and the log for its lifetime.
pub struct SweepOrchestrator<L: InstrumentLink, R: ResultSink> {
    controller: InstrumentController<L>,
    sink: R,
    config: SweepConfig,
    control: Option<Receiver<SweepControl>>,
    state: SweepState,
    source: SourceState,
    result: SweepResult,
    spectrum: SpectrumBuilder,
}

impl<L: InstrumentLink, R: ResultSink> SweepOrchestrator<L, R> {
    pub fn new(link: L, sink: R, config: SweepConfig) -> Self {
        let settle = Duration::from_millis(config.settle_ms);
        Self {
            controller: InstrumentController::new(link, settle),
            sink,
            config,
            control: None,
            state: SweepState::Idle,
            source: SourceState::default(),
            result: Vec::new(),
            spectrum: SpectrumBuilder::with_max_size(TONE_CHECK_FFT),
        }
    }

    pub fn with_control(mut self, control: Receiver<SweepControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn source_state(&self) -> SourceState {
        self.source
    }

    /// Run the whole sweep. The generator output is switched off on every exit path.
    pub fn run(&mut self) -> SweepOutcome {
        let termination = match self.sweep() {
            Ok(termination) => {
                self.transition(SweepState::Done);
                termination
            }
            Err(err) => {
                log::error!("sweep aborted: {err}");
                self.transition(SweepState::AbortedOnError);
                Termination::Aborted(err)
            }
        };
        match self.controller.enable_output(self.source, false) {
            Ok(next) => self.source = next,
            Err(err) => log::warn!("failed to switch generator output off: {err}"),
        }
        SweepOutcome {
            result: std::mem::take(&mut self.result),
            termination,
        }
    }

    fn transition(&mut self, next: SweepState) {
        log::trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn sweep(&mut self) -> Result<Termination, SweepError> {
        let points = plan_sweep(&self.config)?;
        let Some(&first) = points.first() else {
            return Ok(Termination::Completed);
        };
        self.setup(first)?;

        for point in points {
            self.measure_point(point)?;
            if self.cancel_requested() {
                log::warn!(
                    "sweep cancelled after {:.3} Hz; {} point(s) recorded",
                    point.frequency_hz,
                    self.result.len()
                );
                return Ok(Termination::Cancelled);
            }
        }
        Ok(Termination::Completed)
    }

    /// Everything here is fatal on failure.
    fn setup(&mut self, first: FrequencyPoint) -> Result<(), SweepError> {
        let instruments = self.controller.identify()?;
        for id in &instruments {
            log::info!("instrument: {id}");
        }
        self.sink.begin(&LogHeader {
            captured_at: Local::now(),
            instruments,
            description: self.config.describe(),
        })?;
        log::info!("{}", self.config.describe());
        self.transition(SweepState::Configuring(first));
        self.source = self.controller.set_output(
            self.source,
            first.frequency_hz,
            self.config.amplitude_vpp,
            self.config.waveform_shape,
        )?;
        self.source = self.controller.enable_output(self.source, true)?;
        if self.config.warmup {
            self.warmup(first);
        }
        Ok(())
    }

    /// Unlogged shot that sets the scope's vertical range for the first point.
    fn warmup(&mut self, first: FrequencyPoint) {
        self.controller.wait_settled();
        let shot = self
            .controller
            .acquire_dual_channel(first.frequency_hz, self.config.min_cycles)
            .and_then(|(ch1, ch2)| {
                LockInExtractor::extract_pair(first.frequency_hz, &ch1, &ch2)
            });
        match shot {
            Ok((p1, p2)) => self.autoscale(&p1, &p2),
            Err(err) => log::warn!("warm-up acquisition failed: {err}"),
        }
    }

    fn measure_point(&mut self, point: FrequencyPoint) -> Result<(), SweepError> {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 1;
        let measurement = loop {
            let outcome = classify(self.attempt(point));
            if let PointOutcome::Skipped(reason) = &outcome {
                log::warn!(
                    "point {} ({:.3} Hz) attempt {attempt}/{max_attempts} failed: {reason}",
                    point.index,
                    point.frequency_hz
                );
            }
            match decide(point, outcome, attempt, max_attempts) {
                Decision::Record(m) => break m,
                Decision::Retry => attempt += 1,
                Decision::Abort(err) => return Err(err),
            }
        };
        self.report(&measurement);
        self.sink.record(&measurement)?;
        self.result.push(measurement);
        self.transition(SweepState::Logged(point));
        Ok(())
    }

    fn attempt(&mut self, point: FrequencyPoint) -> Result<Measurement, SweepError> {
        self.transition(SweepState::Configuring(point));
        self.source = self.controller.set_output(
            self.source,
            point.frequency_hz,
            self.config.amplitude_vpp,
            self.config.waveform_shape,
        )?;
        self.controller.wait_settled();

        self.transition(SweepState::Acquiring(point));
        let (ch1, ch2) = self
            .controller
            .acquire_dual_channel(point.frequency_hz, self.config.min_cycles)?;

        self.transition(SweepState::Processing(point));
        if let ToneCheck::Mismatch { observed_hz } =
            check_tone(&self.spectrum, &ch1, point.frequency_hz)
        {
            log::warn!(
                "channel 1 tone at {observed_hz:.3} Hz, expected {:.3} Hz; check the generator",
                point.frequency_hz
            );
        }
        let (p1, p2) = LockInExtractor::extract_pair(point.frequency_hz, &ch1, &ch2)?;
        self.autoscale(&p1, &p2);
        Ok(self.build_measurement(point, &p1, &p2))
    }

    fn build_measurement(
        &self,
        point: FrequencyPoint,
        p1: &PhasorEstimate,
        p2: &PhasorEstimate,
    ) -> Measurement {
        let tf = transfer_function(p1, p2);
        let impedance = impedance_from_phasors(self.config.sense_resistance_ohm, p1, p2);
        let status = if tf.is_degraded() {
            MeasurementStatus::Degraded("channel 1 magnitude is zero".into())
        } else if impedance == Some(Impedance::Singular) {
            MeasurementStatus::Degraded("impedance undefined: V1 equals V2".into())
        } else {
            MeasurementStatus::Ok
        };
        Measurement {
            index: point.index,
            frequency_hz: point.frequency_hz,
            mag1: p1.magnitude,
            mag2: p2.magnitude,
            ratio_db: tf.ratio_db,
            phase_deg: tf.phase_deg,
            impedance,
            status,
        }
    }

    /// Range each channel to about three divisions of signal for the next shot.
    fn autoscale(&mut self, p1: &PhasorEstimate, p2: &PhasorEstimate) {
        for (channel, est) in [(ChannelId::Ch1, p1), (ChannelId::Ch2, p2)] {
            let volts_per_div = (est.magnitude / 3.0).max(MIN_VOLTS_PER_DIV);
            if let Err(err) = self.controller.set_vertical_scale(channel, volts_per_div) {
                log::debug!("could not rescale {channel:?}: {err}");
            }
        }
    }

    fn report(&self, m: &Measurement) {
        match &m.status {
            MeasurementStatus::Ok => log::info!(
                "Sample {:3}, {:11.3} Hz -> {:7.2} dB @ {:7.2} deg",
                m.index,
                m.frequency_hz,
                m.ratio_db.unwrap_or(f64::NAN),
                m.phase_deg
            ),
            MeasurementStatus::Degraded(reason) => log::warn!(
                "Sample {:3}, {:11.3} Hz degraded: {reason}",
                m.index,
                m.frequency_hz
            ),
            MeasurementStatus::Skipped(reason) => log::warn!(
                "Sample {:3}, {:11.3} Hz skipped: {reason}",
                m.index,
                m.frequency_hz
            ),
        }
    }

    fn cancel_requested(&self) -> bool {
        self.control
            .as_ref()
            .map(|rx| rx.try_iter().any(|msg| msg == SweepControl::Cancel))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::instrument::{Operation, Reply};
    use crate::drivers::simulated::SimulatedBench;
    use crate::recorder::DataRecorder;
    use crate::types::SweepSpacing;
    use std::sync::mpsc;

    fn config(start: f64, end: f64, ppd: u32) -> SweepConfig {
        SweepConfig {
            start_hz: start,
            end_hz: end,
            spacing: SweepSpacing::Logarithmic {
                points_per_decade: ppd,
            },
            settle_ms: 0,
            ..SweepConfig::default()
        }
    }

    /// Wraps the simulated bench and fails acquisitions at chosen frequencies.
    struct FlakyBench {
        inner: SimulatedBench,
        fail_at: Vec<f64>,
        /// Fail only the first `fail_times` attempts at each listed frequency.
        fail_times: u32,
        failures: u32,
        /// Error returned by a failing acquisition.
        fault: fn() -> SweepError,
        reject_identify: bool,
        /// Commands the bench refuses with a `Device` error.
        reject: fn(&Operation) -> bool,
        ops: Vec<Operation>,
    }

    impl FlakyBench {
        fn new(fail_at: Vec<f64>, fail_times: u32) -> Self {
            Self {
                inner: SimulatedBench::new(3),
                fail_at,
                fail_times,
                failures: 0,
                fault: || SweepError::AcquisitionTimeout(Duration::from_millis(2000)),
                reject_identify: false,
                reject: |_| false,
                ops: Vec::new(),
            }
        }
    }

    impl InstrumentLink for FlakyBench {
        fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError> {
            self.ops.push(op.clone());
            match op {
                Operation::Identify if self.reject_identify => {
                    return Err(SweepError::DeviceNotFound("no generator on bus".into()))
                }
                _ if (self.reject)(op) => {
                    return Err(SweepError::Device(format!("{op:?} rejected")));
                }
                Operation::Acquire { frequency_hz, .. }
                    if self
                        .fail_at
                        .iter()
                        .any(|f| (f - frequency_hz).abs() < 1e-6 * f) =>
                {
                    if self.failures < self.fail_times {
                        self.failures += 1;
                        return Err((self.fault)());
                    }
                }
                _ => {}
            }
            self.inner.dispatch(op)
        }
    }

    /// Scope that hands back only the first `keep` samples of every capture.
    struct ShortCapture {
        inner: SimulatedBench,
        keep: usize,
        acquisitions: u32,
    }

    impl InstrumentLink for ShortCapture {
        fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError> {
            match self.inner.dispatch(op)? {
                Reply::Capture(mut capture) => {
                    self.acquisitions += 1;
                    for buffer in &mut capture.buffers {
                        buffer.truncate(self.keep);
                    }
                    Ok(Reply::Capture(capture))
                }
                other => Ok(other),
            }
        }
    }

    /// Log that accepts `capacity` rows and then reports a full disk.
    struct FullDisk {
        capacity: usize,
        rows: usize,
    }

    impl ResultSink for FullDisk {
        fn begin(&mut self, _header: &LogHeader) -> Result<(), SweepError> {
            Ok(())
        }

        fn record(&mut self, _measurement: &Measurement) -> Result<(), SweepError> {
            if self.rows == self.capacity {
                return Err(SweepError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
            self.rows += 1;
            Ok(())
        }
    }

    fn four_points() -> (SweepConfig, Vec<FrequencyPoint>) {
        let cfg = SweepConfig {
            warmup: false,
            ..config(1000.0, 1900.0, 10)
        };
        let points = plan_sweep(&cfg).unwrap();
        assert_eq!(points.len(), 4);
        (cfg, points)
    }

    fn rows(log: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(log)
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn partial_failures_are_skipped_and_sweep_completes() {
        // Ten points: 1 kHz .. 10 kHz at 9 points/decade.
        let cfg = SweepConfig {
            warmup: false,
            ..config(1000.0, 10_000.0, 9)
        };
        let points = plan_sweep(&cfg).unwrap();
        assert_eq!(points.len(), 10);
        let fail_at = vec![points[2].frequency_hz, points[7].frequency_hz];
        let mut bench = FlakyBench::new(fail_at, u32::MAX);
        let mut recorder = DataRecorder::new(Vec::new());
        let outcome = SweepOrchestrator::new(&mut bench, &mut recorder, cfg).run();

        assert!(matches!(outcome.termination, Termination::Completed));
        assert!(!outcome.is_fatal());
        assert_eq!(outcome.result.len(), 10);
        assert_eq!(outcome.skipped(), 2);
        assert!(outcome.result[2].is_skipped());
        assert!(outcome.result[7].is_skipped());
        // Three attempts each at the two failing points.
        assert_eq!(bench.failures, 6);

        let rows = rows(&recorder.into_inner());
        assert_eq!(rows.len(), 10);
        assert_eq!(rows.iter().filter(|r| r.contains("# SKIPPED")).count(), 2);
        assert_eq!(rows.iter().filter(|r| !r.contains('#')).count(), 8);
        assert_eq!(bench.ops.last(), Some(&Operation::SetOutput(false)));
    }

    #[test]
    fn transient_failure_recovers_within_retry_budget() {
        let cfg = config(100.0, 100.0, 10);
        let mut bench = FlakyBench::new(vec![100.0], 2);
        let mut recorder = DataRecorder::new(Vec::new());
        let outcome = SweepOrchestrator::new(&mut bench, &mut recorder, cfg).run();
        assert_eq!(outcome.result.len(), 1);
        assert!(outcome.result[0].is_ok());
    }

    #[test]
    fn identical_config_gives_identical_measurements() {
        let run = || {
            let mut recorder = DataRecorder::new(Vec::new());
            SweepOrchestrator::new(SimulatedBench::new(11), &mut recorder, config(10.0, 1.0e5, 5))
                .run()
                .result
        };
        let first = run();
        assert_eq!(first.len(), 21);
        assert!(first.iter().all(Measurement::is_ok));
        assert_eq!(first, run());
    }

    #[test]
    fn single_frequency_sweep_has_one_measurement() {
        let cfg = SweepConfig {
            sense_resistance_ohm: 1000.0,
            ..config(1590.0, 1590.0, 10)
        };
        let bench = SimulatedBench::new(5);
        let expected = bench.dut_impedance(1590.0);
        let mut recorder = DataRecorder::new(Vec::new());
        let mut sweep = SweepOrchestrator::new(bench, &mut recorder, cfg);
        let outcome = sweep.run();
        assert_eq!(sweep.state(), SweepState::Done);
        assert!(!sweep.source_state().output_enabled);
        assert_eq!(outcome.result.len(), 1);
        let Some(Impedance::Finite { re, im }) = outcome.result[0].impedance else {
            panic!("expected finite impedance");
        };
        assert!((re - expected.re).abs() / expected.norm() < 0.01, "{re}");
        assert!((im - expected.im).abs() / expected.norm() < 0.01, "{im}");
    }

    #[test]
    fn setup_failure_aborts_with_output_disabled() {
        let mut bench = FlakyBench::new(Vec::new(), 0);
        bench.reject_identify = true;
        let mut recorder = DataRecorder::new(Vec::new());
        let mut sweep = SweepOrchestrator::new(&mut bench, &mut recorder, config(10.0, 100.0, 10));
        let outcome = sweep.run();
        assert_eq!(sweep.state(), SweepState::AbortedOnError);
        assert!(outcome.is_fatal());
        assert!(matches!(
            outcome.termination,
            Termination::Aborted(SweepError::DeviceNotFound(_))
        ));
        assert!(outcome.result.is_empty());
        assert_eq!(bench.ops.last(), Some(&Operation::SetOutput(false)));
    }

    #[test]
    fn invalid_config_aborts_before_touching_instrument() {
        let mut bench = FlakyBench::new(Vec::new(), 0);
        let mut recorder = DataRecorder::new(Vec::new());
        let outcome =
            SweepOrchestrator::new(&mut bench, &mut recorder, config(100.0, 10.0, 10)).run();
        assert!(matches!(
            outcome.termination,
            Termination::Aborted(SweepError::Configuration(_))
        ));
        // Only the cleanup command reached the bench.
        assert_eq!(bench.ops, vec![Operation::SetOutput(false)]);
    }

    #[test]
    fn cancel_finishes_current_point_then_stops() {
        let (tx, rx) = mpsc::channel();
        tx.send(SweepControl::Cancel).unwrap();
        let mut recorder = DataRecorder::new(Vec::new());
        let mut sweep =
            SweepOrchestrator::new(SimulatedBench::new(2), &mut recorder, config(10.0, 1000.0, 10))
                .with_control(rx);
        let outcome = sweep.run();
        assert!(matches!(outcome.termination, Termination::Cancelled));
        assert_eq!(outcome.result.len(), 1);
        assert_eq!(sweep.state(), SweepState::Done);
        assert!(!sweep.source_state().output_enabled);
    }

    #[test]
    fn silent_channel_one_is_degraded() {
        struct DeadChannel(SimulatedBench);
        impl InstrumentLink for DeadChannel {
            fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError> {
                match self.0.dispatch(op)? {
                    Reply::Capture(mut capture) => {
                        capture.buffers[0].iter_mut().for_each(|v| *v = 0.0);
                        Ok(Reply::Capture(capture))
                    }
                    other => Ok(other),
                }
            }
        }
        let mut recorder = DataRecorder::new(Vec::new());
        let outcome = SweepOrchestrator::new(
            DeadChannel(SimulatedBench::new(9)),
            &mut recorder,
            config(500.0, 500.0, 10),
        )
        .run();
        let m = &outcome.result[0];
        assert!(matches!(m.status, MeasurementStatus::Degraded(_)));
        assert_eq!(m.ratio_db, None);
        let rows = rows(&recorder.into_inner());
        assert!(rows[0].contains("# DEGRADED"));
    }

    #[test]
    fn lost_device_mid_sweep_skips_the_point() {
        let (cfg, points) = four_points();
        let mut bench = FlakyBench::new(vec![points[2].frequency_hz], u32::MAX);
        bench.fault = || SweepError::DeviceNotFound("usb glitch".into());
        let mut recorder = DataRecorder::new(Vec::new());
        let outcome = SweepOrchestrator::new(&mut bench, &mut recorder, cfg).run();
        assert!(matches!(outcome.termination, Termination::Completed));
        assert_eq!(outcome.result.len(), 4);
        assert_eq!(outcome.skipped(), 1);
        assert!(outcome.result[2].is_skipped());
        assert_eq!(bench.failures, 3);
        assert_eq!(rows(&recorder.into_inner()).len(), 4);
    }

    #[test]
    fn device_error_after_setup_is_retried_then_skipped() {
        let (cfg, points) = four_points();
        let mut bench = FlakyBench::new(vec![points[1].frequency_hz], u32::MAX);
        bench.fault = || SweepError::Device("scope busy".into());
        let mut recorder = DataRecorder::new(Vec::new());
        let outcome = SweepOrchestrator::new(&mut bench, &mut recorder, cfg).run();
        assert!(!outcome.is_fatal());
        assert_eq!(outcome.result.len(), 4);
        assert!(outcome.result[1].is_skipped());
        assert_eq!(bench.failures, 3);
        let MeasurementStatus::Skipped(reason) = &outcome.result[1].status else {
            panic!("expected a skipped point");
        };
        assert!(reason.contains("scope busy"), "{reason}");
    }

    #[test]
    fn short_captures_exhaust_the_retry_budget() {
        let (cfg, _) = four_points();
        let mut bench = ShortCapture {
            inner: SimulatedBench::new(4),
            keep: 2,
            acquisitions: 0,
        };
        let mut recorder = DataRecorder::new(Vec::new());
        let outcome = SweepOrchestrator::new(&mut bench, &mut recorder, cfg).run();
        assert!(matches!(outcome.termination, Termination::Completed));
        assert_eq!(outcome.skipped(), 4);
        assert_eq!(bench.acquisitions, 12);
        let rows = rows(&recorder.into_inner());
        assert!(rows.iter().all(|r| r.contains("# SKIPPED: capture spans")));
    }

    #[test]
    fn rejected_setup_commands_abort() {
        let refuse_waveform: fn(&Operation) -> bool = |op| matches!(op, Operation::SetWaveform(_));
        let refuse_output_on: fn(&Operation) -> bool = |op| *op == Operation::SetOutput(true);
        for reject in [refuse_waveform, refuse_output_on] {
            let mut bench = FlakyBench::new(Vec::new(), 0);
            bench.reject = reject;
            let mut recorder = DataRecorder::new(Vec::new());
            let outcome =
                SweepOrchestrator::new(&mut bench, &mut recorder, config(10.0, 100.0, 10)).run();
            assert!(matches!(
                outcome.termination,
                Termination::Aborted(SweepError::Device(_))
            ));
            assert!(outcome.result.is_empty());
            assert!(!bench.ops.iter().any(|op| matches!(op, Operation::Acquire { .. })));
            assert_eq!(bench.ops.last(), Some(&Operation::SetOutput(false)));
        }
    }

    #[test]
    fn log_write_failure_aborts_with_output_off() {
        let (cfg, _) = four_points();
        let mut bench = FlakyBench::new(Vec::new(), 0);
        let mut sink = FullDisk {
            capacity: 2,
            rows: 0,
        };
        let mut sweep = SweepOrchestrator::new(&mut bench, &mut sink, cfg);
        let outcome = sweep.run();
        assert_eq!(sweep.state(), SweepState::AbortedOnError);
        assert!(!sweep.source_state().output_enabled);
        assert!(matches!(
            outcome.termination,
            Termination::Aborted(SweepError::Io(_))
        ));
        assert_eq!(outcome.result.len(), 2);
        drop(sweep);
        assert_eq!(bench.ops.last(), Some(&Operation::SetOutput(false)));
    }

    #[test]
    fn policy_is_a_pure_function_of_outcome() {
        let point = FrequencyPoint {
            index: 0,
            frequency_hz: 10.0,
        };
        assert!(matches!(
            decide(point, PointOutcome::Skipped("x".into()), 1, 3),
            Decision::Retry
        ));
        match decide(point, PointOutcome::Skipped("timeout".into()), 3, 3) {
            Decision::Record(m) => assert!(m.is_skipped()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            decide(point, PointOutcome::Fatal(SweepError::Io(std::io::ErrorKind::Other.into())), 1, 3),
            Decision::Abort(_)
        ));
        assert!(matches!(
            classify(Err(SweepError::InsufficientSamples {
                cycles: 0.5,
                required: 1
            })),
            PointOutcome::Skipped(_)
        ));
        assert!(matches!(
            classify(Err(SweepError::DeviceNotFound("unplugged".into()))),
            PointOutcome::Skipped(_)
        ));
        assert!(matches!(
            classify(Err(SweepError::Configuration("bad".into()))),
            PointOutcome::Fatal(_)
        ));
    }
}
