// src/main.rs
mod drivers;
mod recorder;
mod types;

use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use drivers::{
    open_serial, plan_sweep, render_bode_png, render_impedance_png, InstrumentLink, PlotStyle,
    ScpiLink, SimulatedBench, SweepControl, SweepOrchestrator, Termination,
};
use recorder::{log_path, DataRecorder};
use types::{Measurement, SweepConfig, SweepSpacing, WaveformShape};

/// Sweep a signal generator across a frequency range and measure gain, phase
/// and (optionally) impedance with a two-channel scope.
#[derive(Parser, Debug)]
#[command(name = "vna-sweep", version, about)]
struct Args {
    /// Start frequency (Hz)
    #[arg(short = 'b', long = "begin")]
    begin: Option<f64>,

    /// End frequency (Hz)
    #[arg(short = 'e', long = "end")]
    end: Option<f64>,

    /// Logarithmic sweep with this many points per decade
    #[arg(short = 'p', long, conflicts_with = "step")]
    points_per_decade: Option<u32>,

    /// Linear sweep with this step (Hz)
    #[arg(short = 's', long)]
    step: Option<f64>,

    /// Output amplitude (Vpp)
    #[arg(short = 'v', long)]
    amplitude: Option<f64>,

    #[arg(short = 'w', long, value_enum)]
    waveform: Option<WaveformShape>,

    /// Sense resistor (ohm); 0 disables impedance
    #[arg(short = 'z', long)]
    sense_resistance: Option<f64>,

    /// Prefix for the log and plot files
    #[arg(short = 'f', long, default_value = "sweep")]
    prefix: String,

    #[arg(short = 'n', long)]
    no_plot: bool,

    /// Print the planned frequencies and exit
    #[arg(short = 'l', long)]
    list: bool,

    /// JSON file with a base sweep configuration; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against the built-in simulated bench
    #[arg(long)]
    simulate: bool,

    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    #[arg(long, required_unless_present_any = ["simulate", "list"])]
    generator_port: Option<String>,

    #[arg(long, required_unless_present_any = ["simulate", "list"])]
    scope_port: Option<String>,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Acquisition attempts per point before it is skipped
    #[arg(long)]
    attempts: Option<u32>,

    #[arg(long)]
    min_cycles: Option<u32>,

    /// Skip the unlogged ranging shot at the first frequency
    #[arg(long)]
    no_warmup: bool,
}

impl Args {
    fn sweep_config(&self) -> anyhow::Result<SweepConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => SweepConfig::default(),
        };
        if let Some(hz) = self.begin {
            config.start_hz = hz;
        }
        if let Some(hz) = self.end {
            config.end_hz = hz;
        }
        if let Some(step_hz) = self.step {
            config.spacing = SweepSpacing::Linear { step_hz };
        } else if let Some(points_per_decade) = self.points_per_decade {
            config.spacing = SweepSpacing::Logarithmic { points_per_decade };
        }
        if let Some(vpp) = self.amplitude {
            config.amplitude_vpp = vpp;
        }
        if let Some(shape) = self.waveform {
            config.waveform_shape = shape;
        }
        if let Some(ohm) = self.sense_resistance {
            config.sense_resistance_ohm = ohm;
        }
        if let Some(n) = self.attempts {
            config.max_attempts = n;
        }
        if let Some(n) = self.min_cycles {
            config.min_cycles = n;
        }
        if self.no_warmup {
            config.warmup = false;
        }
        Ok(config)
    }

    fn open_link(&self, config: &SweepConfig) -> anyhow::Result<Box<dyn InstrumentLink>> {
        if self.simulate {
            let mut bench = SimulatedBench::new(self.seed);
            if config.impedance_enabled() {
                bench.sense_resistance_ohm = config.sense_resistance_ohm;
            }
            log::info!("🧪 Using simulated bench (seed {})", self.seed);
            return Ok(Box::new(bench));
        }
        let (Some(gen_port), Some(scope_port)) = (&self.generator_port, &self.scope_port) else {
            bail!("--generator-port and --scope-port are required without --simulate");
        };
        let timeout = Duration::from_millis(self.timeout_ms);
        let generator = open_serial(gen_port, self.baud, timeout)
            .with_context(|| format!("opening generator on {gen_port}"))?;
        let scope = open_serial(scope_port, self.baud, timeout)
            .with_context(|| format!("opening scope on {scope_port}"))?;
        Ok(Box::new(ScpiLink::new(generator, scope, timeout)))
    }
}

/// Typing `q` + Enter cancels the sweep after the current point.
fn spawn_cancel_reader(tx: Sender<SweepControl>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("q") {
                log::info!("🛑 Cancel requested");
                let _ = tx.send(SweepControl::Cancel);
                break;
            }
        }
    });
}

fn write_plots(prefix: &str, result: &[Measurement], config: &SweepConfig) -> anyhow::Result<()> {
    let style = PlotStyle {
        log_frequency: config.is_logarithmic(),
        ..PlotStyle::default()
    };
    let bode = format!("{prefix}_bode.png");
    let png = render_bode_png(result, style.clone())?;
    fs::write(&bode, png).with_context(|| format!("writing {bode}"))?;
    log::info!("📈 Bode plot saved to {bode}");
    if config.impedance_enabled() {
        let path = format!("{prefix}_impedance.png");
        let png = render_impedance_png(result, style)?;
        fs::write(&path, png).with_context(|| format!("writing {path}"))?;
        log::info!("📈 Impedance plot saved to {path}");
    }
    Ok(())
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = args.sweep_config()?;
    if args.list {
        let points = plan_sweep(&config)?;
        println!("{}", config.describe());
        for p in &points {
            println!("{:6}, {:12.3}", p.index, p.frequency_hz);
        }
        return Ok(ExitCode::SUCCESS);
    }
    config.validate()?;

    let link = args.open_link(&config)?;
    let path = log_path(&args.prefix);
    let recorder = DataRecorder::create(&path).with_context(|| format!("opening {}", path.display()))?;

    let (tx, rx) = mpsc::channel();
    spawn_cancel_reader(tx);
    log::info!("Type q + Enter to stop the sweep after the current point");

    let mut orchestrator = SweepOrchestrator::new(link, recorder, config.clone()).with_control(rx);
    let outcome = orchestrator.run();
    let measured = outcome.result.len() - outcome.skipped();
    let clean = outcome.result.iter().filter(|m| m.is_ok()).count();
    log::debug!("sweep finished in state {:?}", orchestrator.state());
    if orchestrator.source_state().output_enabled {
        log::warn!("generator output may still be on; switch it off by hand");
    }
    match &outcome.termination {
        Termination::Completed => log::info!(
            "✅ Sweep complete: {measured} measured ({} degraded), {} skipped",
            measured - clean,
            outcome.skipped()
        ),
        Termination::Cancelled => log::info!(
            "Sweep cancelled after {} points ({measured} measured)",
            outcome.result.len()
        ),
        Termination::Aborted(err) => log::error!("❌ {err}"),
    }

    if !args.no_plot && measured > 0 {
        if let Err(err) = write_plots(&args.prefix, &outcome.result, &config) {
            log::warn!("plotting failed: {err:#}");
        }
    }

    Ok(if outcome.is_fatal() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

// 入口函数
fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
