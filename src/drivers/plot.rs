use std::io::Cursor;
use std::ops::Range;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::drivers::error::SweepError;
use crate::types::Measurement;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    /// Draw frequency on a log10 axis.
    pub log_frequency: bool,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 700,
            background: RGBColor(10, 10, 10),
            log_frequency: true,
        }
    }
}

/// One panel: a named series of (frequency, value) pairs.
struct Trace<'a> {
    caption: &'a str,
    unit: &'a str,
    color: RGBColor,
    points: Vec<(f64, f64)>,
}

/// Gain (dB) and phase (degrees) of ch2/ch1 against frequency.
pub fn render_bode_png(result: &[Measurement], style: PlotStyle) -> Result<Vec<u8>, SweepError> {
    let gain = result
        .iter()
        .filter_map(|m| m.ratio_db.map(|db| (m.frequency_hz, db)))
        .collect();
    let phase = result
        .iter()
        .filter(|m| m.ratio_db.is_some())
        .map(|m| (m.frequency_hz, m.phase_deg))
        .collect();
    render_panels(
        [
            Trace {
                caption: "CH2 / CH1 gain",
                unit: "dB",
                color: RED,
                points: gain,
            },
            Trace {
                caption: "CH2 - CH1 phase",
                unit: "deg",
                color: CYAN,
                points: phase,
            },
        ],
        style,
    )
}

/// |Z| and angle of Z against frequency; singular points are left out.
pub fn render_impedance_png(
    result: &[Measurement],
    style: PlotStyle,
) -> Result<Vec<u8>, SweepError> {
    let finite: Vec<_> = result
        .iter()
        .filter_map(|m| {
            let z = m.impedance?;
            Some((m.frequency_hz, z.magnitude()?, z.phase_degrees()?))
        })
        .collect();
    render_panels(
        [
            Trace {
                caption: "|Z|",
                unit: "ohm",
                color: GREEN,
                points: finite.iter().map(|&(f, mag, _)| (f, mag)).collect(),
            },
            Trace {
                caption: "angle Z",
                unit: "deg",
                color: MAGENTA,
                points: finite.iter().map(|&(f, _, ph)| (f, ph)).collect(),
            },
        ],
        style,
    )
}

fn render_panels(traces: [Trace<'_>; 2], style: PlotStyle) -> Result<Vec<u8>, SweepError> {
    if traces.iter().all(|t| t.points.is_empty()) {
        return Err(SweepError::Plot("no measured points to plot".into()));
    }
    let to_x = |f: f64| if style.log_frequency { f.log10() } else { f };
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let panels = root.split_evenly((2, 1));
        for (area, trace) in panels.iter().zip(traces.iter()) {
            let xs: Vec<f64> = trace.points.iter().map(|p| to_x(p.0)).collect();
            let ys: Vec<f64> = trace.points.iter().map(|p| p.1).collect();
            let x_range = padded_range(&xs);
            let y_range = padded_range(&ys);
            let log_frequency = style.log_frequency;
            let mut chart = ChartBuilder::on(area)
                .margin(10)
                .caption(trace.caption, ("sans-serif", 20).into_font().color(&WHITE))
                .set_label_area_size(LabelAreaPosition::Left, 55)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .build_cartesian_2d(x_range, y_range)?;
            chart
                .configure_mesh()
                .light_line_style(WHITE.mix(0.1))
                .label_style(("sans-serif", 12).into_font().color(&WHITE))
                .x_desc("Frequency (Hz)")
                .y_desc(trace.unit)
                .x_label_formatter(&|x| {
                    let hz = if log_frequency { 10f64.powf(*x) } else { *x };
                    format_hz(hz)
                })
                .draw()?;
            let series = xs.iter().copied().zip(ys.iter().copied());
            chart.draw_series(LineSeries::new(series, &trace.color))?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

fn padded_range(values: &[f64]) -> Range<f64> {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 1.0)..(hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad)..(hi + pad)
}

fn format_hz(hz: f64) -> String {
    if hz >= 1e6 {
        format!("{:.1}M", hz / 1e6)
    } else if hz >= 1e3 {
        format!("{:.1}k", hz / 1e3)
    } else {
        format!("{hz:.1}")
    }
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, SweepError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| SweepError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
