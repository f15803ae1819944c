use std::thread;
use std::time::Duration;

use crate::drivers::SweepError;
use crate::types::{ChannelId, Waveform, WaveformShape};

/// Closed set of things the sweep asks of the bench.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Identify,
    SetFrequency(f64),
    SetAmplitude(f64),
    SetWaveform(WaveformShape),
    SetOutput(bool),
    SetVerticalScale {
        channel: ChannelId,
        volts_per_div: f64,
    },
    /// Single-shot capture of both channels from one trigger.
    Acquire {
        channels: [ChannelId; 2],
        frequency_hz: f64,
        min_cycles: u32,
    },
}

/// Sample buffers straight off the scope, one per requested channel.
#[derive(Clone, Debug)]
pub struct RawCapture {
    pub sample_rate_hz: f64,
    pub buffers: Vec<Vec<f64>>,
}

#[derive(Clone, Debug)]
pub enum Reply {
    Done,
    Identity(Vec<String>),
    Capture(RawCapture),
}

/// Transport-side half of the bench: executes one operation at a time.
pub trait InstrumentLink {
    fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError>;
}

impl<L: InstrumentLink + ?Sized> InstrumentLink for Box<L> {
    fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError> {
        (**self).dispatch(op)
    }
}

impl<L: InstrumentLink + ?Sized> InstrumentLink for &mut L {
    fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError> {
        (**self).dispatch(op)
    }
}

/// Last settings known to have been accepted by the generator.
///
/// Instruments cannot be trusted to report their own state, so every
/// `set_*` call returns the new value and the caller hands it back next time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SourceState {
    pub frequency_hz: Option<f64>,
    pub amplitude_vpp: Option<f64>,
    pub shape: Option<WaveformShape>,
    pub output_enabled: bool,
}

/// Typed wrapper over a link with the operations the sweep needs.
pub struct InstrumentController<L: InstrumentLink> {
    link: L,
    settle_time: Duration,
}

impl<L: InstrumentLink> InstrumentController<L> {
    pub fn new(link: L, settle_time: Duration) -> Self {
        Self { link, settle_time }
    }

    pub fn identify(&mut self) -> Result<Vec<String>, SweepError> {
        match self.link.dispatch(&Operation::Identify)? {
            Reply::Identity(lines) => Ok(lines),
            other => Err(unexpected_reply("identify", &other)),
        }
    }

    /// Bring the generator to the requested frequency/amplitude/shape,
    /// sending only settings that differ from `state`.
    pub fn set_output(
        &mut self,
        state: SourceState,
        frequency_hz: f64,
        amplitude_vpp: f64,
        shape: WaveformShape,
    ) -> Result<SourceState, SweepError> {
        let mut next = state;
        if state.shape != Some(shape) {
            self.expect_done(&Operation::SetWaveform(shape))?;
            next.shape = Some(shape);
        }
        if state.frequency_hz != Some(frequency_hz) {
            self.expect_done(&Operation::SetFrequency(frequency_hz))?;
            next.frequency_hz = Some(frequency_hz);
        }
        if state.amplitude_vpp != Some(amplitude_vpp) {
            self.expect_done(&Operation::SetAmplitude(amplitude_vpp))?;
            next.amplitude_vpp = Some(amplitude_vpp);
        }
        Ok(next)
    }

    pub fn enable_output(
        &mut self,
        state: SourceState,
        enabled: bool,
    ) -> Result<SourceState, SweepError> {
        self.expect_done(&Operation::SetOutput(enabled))?;
        Ok(SourceState {
            output_enabled: enabled,
            ..state
        })
    }

    pub fn wait_settled(&mut self) {
        if !self.settle_time.is_zero() {
            thread::sleep(self.settle_time);
        }
    }

    pub fn set_vertical_scale(
        &mut self,
        channel: ChannelId,
        volts_per_div: f64,
    ) -> Result<(), SweepError> {
        self.expect_done(&Operation::SetVerticalScale {
            channel,
            volts_per_div,
        })
    }

    pub fn acquire_dual_channel(
        &mut self,
        frequency_hz: f64,
        min_cycles: u32,
    ) -> Result<(Waveform, Waveform), SweepError> {
        let op = Operation::Acquire {
            channels: [ChannelId::Ch1, ChannelId::Ch2],
            frequency_hz,
            min_cycles,
        };
        let capture = match self.link.dispatch(&op)? {
            Reply::Capture(capture) => capture,
            other => return Err(unexpected_reply("acquire", &other)),
        };
        if !(capture.sample_rate_hz > 0.0 && capture.sample_rate_hz.is_finite()) {
            return Err(SweepError::InvalidSampleRate);
        }
        let RawCapture {
            sample_rate_hz,
            buffers,
        } = capture;
        let mut buffers = buffers.into_iter();
        match (buffers.next(), buffers.next()) {
            (Some(ch1), Some(ch2)) => Ok((
                Waveform {
                    channel_id: ChannelId::Ch1,
                    samples: ch1,
                    sample_rate_hz,
                },
                Waveform {
                    channel_id: ChannelId::Ch2,
                    samples: ch2,
                    sample_rate_hz,
                },
            )),
            _ => Err(SweepError::Device(
                "scope returned fewer than two channels".into(),
            )),
        }
    }

    fn expect_done(&mut self, op: &Operation) -> Result<(), SweepError> {
        match self.link.dispatch(op)? {
            Reply::Done => Ok(()),
            other => Err(unexpected_reply("command", &other)),
        }
    }
}

fn unexpected_reply(context: &str, reply: &Reply) -> SweepError {
    let kind = match reply {
        Reply::Done => "acknowledgement",
        Reply::Identity(_) => "identity",
        Reply::Capture(_) => "capture",
    };
    SweepError::Device(format!("unexpected {kind} reply to {context}"))
}
