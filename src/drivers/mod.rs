// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod error;
pub mod impedance;
pub mod instrument;
pub mod lockin;
pub mod orchestrator;
pub mod planner;
pub mod plot;
pub mod scpi;
pub mod simulated;
pub mod spectrum;
pub mod transfer;
// 公开导出这些模块里的结构体，方便外部调用
pub use error::SweepError;
pub use instrument::InstrumentLink;
pub use orchestrator::{SweepControl, SweepOrchestrator, Termination};
pub use planner::plan_sweep;
pub use plot::{render_bode_png, render_impedance_png, PlotStyle};
pub use scpi::{open_serial, ScpiLink};
pub use simulated::SimulatedBench;
