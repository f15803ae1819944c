use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use crate::drivers::instrument::{InstrumentLink, Operation, RawCapture, Reply};
use crate::drivers::SweepError;
use crate::types::WaveformShape;

/// Horizontal divisions on the scope screen.
const SCREEN_DIVISIONS: f64 = 12.0;
/// Cycles to place on screen when the caller asks for fewer.
const SCREEN_CYCLES: u32 = 12;
/// Scope record length while the generator's sync output is in use.
pub const MEMORY_DEPTH: usize = 30_000;
/// Highest frequency the generator still drives its sync output at.
pub const SYNC_MAX_HZ: f64 = 2.0e6;
const SYNC_SWITCH_SETTLE: Duration = Duration::from_millis(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Generator,
    Scope,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expect {
    Nothing,
    Line,
    Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScpiStep {
    pub target: Target,
    pub text: String,
    pub expect: Expect,
}

impl ScpiStep {
    fn write(target: Target, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
            expect: Expect::Nothing,
        }
    }

    fn query(target: Target, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
            expect: Expect::Line,
        }
    }

    fn block(target: Target, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
            expect: Expect::Block,
        }
    }
}

/// Every SCPI string the link sends comes from here.
pub fn translate(op: &Operation) -> Vec<ScpiStep> {
    use Target::*;
    match op {
        Operation::Identify => vec![
            ScpiStep::query(Generator, "*IDN?"),
            ScpiStep::query(Scope, "*IDN?"),
        ],
        Operation::SetFrequency(hz) => vec![ScpiStep::write(Generator, format!("FREQ {hz:.3}"))],
        Operation::SetAmplitude(vpp) => {
            vec![ScpiStep::write(Generator, format!("VOLT {vpp:.3}"))]
        }
        Operation::SetWaveform(shape) => {
            let name = match shape {
                WaveformShape::Sine => "SIN",
                WaveformShape::Square => "SQU",
            };
            vec![ScpiStep::write(Generator, format!("FUNC {name}"))]
        }
        Operation::SetOutput(on) => vec![ScpiStep::write(
            Generator,
            if *on { "OUTP ON" } else { "OUTP OFF" },
        )],
        Operation::SetVerticalScale {
            channel,
            volts_per_div,
        } => vec![ScpiStep::write(
            Scope,
            format!("CHAN{}:SCAL {volts_per_div:.4}", channel.number()),
        )],
        Operation::Acquire {
            channels,
            frequency_hz,
            min_cycles,
        } => {
            let cycles = (*min_cycles).max(SCREEN_CYCLES) as f64;
            let time_per_div = cycles / (frequency_hz * SCREEN_DIVISIONS);
            // Without sync the scope can spend the memory on a single trigger source.
            let depth = if *frequency_hz >= SYNC_MAX_HZ {
                2 * MEMORY_DEPTH
            } else {
                MEMORY_DEPTH
            };
            let mut steps = vec![
                ScpiStep::write(Scope, "FORM REAL,32;FORM:BORD LSBF"),
                ScpiStep::write(Scope, format!("TIM:SCAL {time_per_div:.9}")),
                ScpiStep::write(Scope, format!("ACQ:POIN {depth}")),
                ScpiStep::write(Scope, "SING"),
                ScpiStep::query(Scope, "*OPC?"),
            ];
            for channel in channels {
                let n = channel.number();
                steps.push(ScpiStep::write(Scope, format!("CHAN{n}:DATA:POIN MAX")));
                steps.push(ScpiStep::query(Scope, format!("CHAN{n}:DATA:HEAD?")));
                steps.push(ScpiStep::block(Scope, format!("CHAN{n}:DATA?")));
            }
            steps
        }
    }
}

/// One-time switch for frequencies the sync output cannot follow:
/// trigger on channel 1 instead.
pub fn sync_off_steps() -> Vec<ScpiStep> {
    vec![
        ScpiStep::write(Target::Generator, "SYNC OFF"),
        ScpiStep::write(Target::Scope, "TRIG:EDGE:SOUR CHAN1"),
    ]
}

#[derive(Clone, Debug, PartialEq)]
enum Response {
    Line(String),
    Block(Vec<u8>),
}

/// Generator and scope, each on its own byte stream.
pub struct ScpiLink<G: Read + Write, S: Read + Write> {
    generator: G,
    scope: S,
    timeout: Duration,
    sync_off: bool,
}

impl<G: Read + Write, S: Read + Write> ScpiLink<G, S> {
    pub fn new(generator: G, scope: S, timeout: Duration) -> Self {
        Self {
            generator,
            scope,
            timeout,
            sync_off: false,
        }
    }

    fn run(&mut self, steps: &[ScpiStep]) -> Result<Vec<Response>, SweepError> {
        let timeout = self.timeout;
        let mut responses = Vec::new();
        for step in steps {
            log::trace!("{:?} <- {}", step.target, step.text);
            let stream: &mut dyn ReadWrite = match step.target {
                Target::Generator => &mut self.generator,
                Target::Scope => &mut self.scope,
            };
            match exchange(stream, step) {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => {}
                Err(err) => return Err(map_io(err, timeout, &step.text)),
            }
        }
        Ok(responses)
    }

    fn capture(responses: Vec<Response>, channel_count: usize) -> Result<RawCapture, SweepError> {
        let mut responses = responses.into_iter();
        match responses.next() {
            Some(Response::Line(done)) if done.trim() == "1" => {}
            other => {
                return Err(SweepError::Device(format!(
                    "scope did not confirm acquisition: {other:?}"
                )))
            }
        }
        let mut sample_rate_hz = None;
        let mut buffers = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            let (Some(Response::Line(header)), Some(Response::Block(data))) =
                (responses.next(), responses.next())
            else {
                return Err(SweepError::Device("truncated waveform transfer".into()));
            };
            let (rate, points) = parse_header(&header)?;
            sample_rate_hz.get_or_insert(rate);
            let mut samples = decode_f32_le(&data);
            samples.truncate(points);
            buffers.push(samples);
        }
        let shortest = buffers.iter().map(Vec::len).min().unwrap_or(0);
        for buffer in &mut buffers {
            buffer.truncate(shortest);
        }
        Ok(RawCapture {
            sample_rate_hz: sample_rate_hz.unwrap_or(0.0),
            buffers,
        })
    }
}

trait ReadWrite: Read + Write {}
impl<T: Read + Write> ReadWrite for T {}

impl<G: Read + Write, S: Read + Write> InstrumentLink for ScpiLink<G, S> {
    fn dispatch(&mut self, op: &Operation) -> Result<Reply, SweepError> {
        if let Operation::SetFrequency(hz) = op {
            if *hz >= SYNC_MAX_HZ && !self.sync_off {
                log::info!("⚡ {hz:.3} Hz is past the sync output; triggering on CH1");
                self.run(&sync_off_steps())?;
                thread::sleep(SYNC_SWITCH_SETTLE);
                self.sync_off = true;
            }
        }
        let responses = self.run(&translate(op))?;
        match op {
            Operation::Identify => Ok(Reply::Identity(
                responses
                    .into_iter()
                    .filter_map(|r| match r {
                        Response::Line(line) => Some(line.trim().to_string()),
                        Response::Block(_) => None,
                    })
                    .collect(),
            )),
            Operation::Acquire { channels, .. } => {
                Self::capture(responses, channels.len()).map(Reply::Capture)
            }
            _ => Ok(Reply::Done),
        }
    }
}

fn map_io(err: io::Error, timeout: Duration, command: &str) -> SweepError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            SweepError::AcquisitionTimeout(timeout)
        }
        io::ErrorKind::NotFound | io::ErrorKind::NotConnected => {
            SweepError::DeviceNotFound(err.to_string())
        }
        _ => SweepError::Device(format!("`{command}` failed: {err}")),
    }
}

fn exchange(stream: &mut dyn ReadWrite, step: &ScpiStep) -> io::Result<Option<Response>> {
    stream.write_all(step.text.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(match step.expect {
        Expect::Nothing => None,
        Expect::Line => Some(Response::Line(read_line(stream)?)),
        Expect::Block => Some(Response::Block(read_block(stream)?)),
    })
}

fn read_byte(stream: &mut dyn ReadWrite) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_line(stream: &mut dyn ReadWrite) -> io::Result<String> {
    let mut line = Vec::new();
    loop {
        match read_byte(stream)? {
            b'\n' => break,
            b => line.push(b),
        }
    }
    Ok(String::from_utf8_lossy(&line).trim_end().to_string())
}

/// `#<digits><length><payload>` followed by a newline.
fn read_block(stream: &mut dyn ReadWrite) -> io::Result<Vec<u8>> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
    if read_byte(stream)? != b'#' {
        return Err(invalid("block does not start with '#'"));
    }
    let digits = (read_byte(stream)? as char)
        .to_digit(10)
        .filter(|d| *d > 0)
        .ok_or_else(|| invalid("bad block length digit count"))? as usize;
    let mut len_text = vec![0u8; digits];
    stream.read_exact(&mut len_text)?;
    let len: usize = std::str::from_utf8(&len_text)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("bad block length"))?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    if read_byte(stream)? != b'\n' {
        return Err(invalid("block not terminated by newline"));
    }
    Ok(payload)
}

/// Header is `x_start,x_stop,points[,...]`; returns sample rate and point count.
fn parse_header(header: &str) -> Result<(f64, usize), SweepError> {
    let fields: Vec<f64> = header
        .split(',')
        .take(3)
        .map(|f| f.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| SweepError::Device(format!("malformed waveform header `{header}`")))?;
    let [x0, x1, points] = fields[..] else {
        return Err(SweepError::Device(format!(
            "malformed waveform header `{header}`"
        )));
    };
    let points = points as usize;
    if points < 2 || x1 <= x0 {
        return Err(SweepError::InvalidSampleRate);
    }
    Ok(((points - 1) as f64 / (x1 - x0), points))
}

fn decode_f32_le(data: &[u8]) -> Vec<f64> {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
        .collect()
}

/// Open a serial port for SCPI traffic.
pub fn open_serial(
    path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn serialport::SerialPort>, SweepError> {
    serialport::new(path, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|err| match err.kind() {
            serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
                SweepError::DeviceNotFound(format!("{path}: {}", err.description))
            }
            _ => SweepError::from(err),
        })
}
