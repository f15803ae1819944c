use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::drivers::SweepError;
use crate::types::{Measurement, MeasurementStatus};

pub const COLUMN_HEADER: &str = "# Sample, Frequency, Mag1, Mag2, Ratio (dB), Phase, Z(re,im)";

/// Lines written once at the top of a sweep log.
#[derive(Clone, Debug)]
pub struct LogHeader {
    pub captured_at: DateTime<Local>,
    pub instruments: Vec<String>,
    pub description: String,
}

/// Where measurements go as soon as they are taken.
pub trait ResultSink {
    fn begin(&mut self, header: &LogHeader) -> Result<(), SweepError>;
    fn record(&mut self, measurement: &Measurement) -> Result<(), SweepError>;
}

impl<R: ResultSink + ?Sized> ResultSink for &mut R {
    fn begin(&mut self, header: &LogHeader) -> Result<(), SweepError> {
        (**self).begin(header)
    }

    fn record(&mut self, measurement: &Measurement) -> Result<(), SweepError> {
        (**self).record(measurement)
    }
}

pub fn log_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}_VNA.log"))
}

/// Plain-text sweep log, one row per frequency point, flushed per row.
pub struct DataRecorder<W: Write> {
    writer: W,
}

impl DataRecorder<BufWriter<std::fs::File>> {
    pub fn create(path: &Path) -> Result<Self, SweepError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("💾 Logging to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> DataRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for DataRecorder<W> {
    fn begin(&mut self, header: &LogHeader) -> Result<(), SweepError> {
        writeln!(self.writer, "# {}", header.captured_at.format("%Y-%m-%d %H:%M"))?;
        for id in &header.instruments {
            writeln!(self.writer, "# {id}")?;
        }
        writeln!(self.writer, "# {}", header.description)?;
        writeln!(self.writer, "{COLUMN_HEADER}")?;
        self.writer.flush()?;
        Ok(())
    }

    fn record(&mut self, measurement: &Measurement) -> Result<(), SweepError> {
        writeln!(self.writer, "{}", format_row(measurement))?;
        self.writer.flush()?;
        Ok(())
    }
}

fn number(value: f64, width: usize, precision: usize) -> String {
    if value.is_finite() {
        format!("{value:width$.precision$}")
    } else {
        format!("{:>width$}", "nan")
    }
}

pub fn format_row(m: &Measurement) -> String {
    let skipped = m.is_skipped();
    let impedance = match (&m.impedance, skipped) {
        (_, true) => "nan".to_string(),
        (Some(z), false) => z.to_string(),
        (None, false) => "0.0000 + 0.0000j".to_string(),
    };
    let mut row = format!(
        "{:6}, {}, {}, {}, {}, {}, {}",
        m.index,
        number(m.frequency_hz, 12, 3),
        number(m.mag1, 9, 5),
        number(m.mag2, 9, 5),
        number(m.ratio_db.unwrap_or(f64::NAN), 7, 2),
        number(m.phase_deg, 7, 2),
        impedance
    );
    match &m.status {
        MeasurementStatus::Ok => {}
        MeasurementStatus::Skipped(reason) => row.push_str(&format!("  # SKIPPED: {reason}")),
        MeasurementStatus::Degraded(reason) => row.push_str(&format!("  # DEGRADED: {reason}")),
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FrequencyPoint, Impedance};
    use chrono::TimeZone;

    fn ok_row() -> Measurement {
        Measurement {
            index: 3,
            frequency_hz: 1000.0,
            mag1: 0.5,
            mag2: 0.25,
            ratio_db: Some(-6.0206),
            phase_deg: -45.0,
            impedance: Some(Impedance::Finite { re: 1000.0, im: -12.5 }),
            status: MeasurementStatus::Ok,
        }
    }

    #[test]
    fn formats_measured_row() {
        assert_eq!(
            format_row(&ok_row()),
            "     3,     1000.000,   0.50000,   0.25000,   -6.02,  -45.00, 1000.0000 - 12.5000j"
        );
    }

    #[test]
    fn skipped_row_uses_sentinels() {
        let m = Measurement::skipped(
            FrequencyPoint {
                index: 4,
                frequency_hz: 2000.0,
            },
            "acquisition timed out",
        );
        let row = format_row(&m);
        assert!(row.contains("nan"));
        assert!(row.ends_with("# SKIPPED: acquisition timed out"));
    }

    #[test]
    fn impedance_disabled_writes_zero() {
        let m = Measurement {
            impedance: None,
            ..ok_row()
        };
        assert!(format_row(&m).ends_with("0.0000 + 0.0000j"));
    }

    #[test]
    fn header_precedes_rows() {
        let mut rec = DataRecorder::new(Vec::new());
        let header = LogHeader {
            captured_at: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
            instruments: vec!["SIM,GEN".into()],
            description: "Analysing from 1 Hz to 10 Hz".into(),
        };
        rec.begin(&header).unwrap();
        rec.record(&ok_row()).unwrap();
        let text = String::from_utf8(rec.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# 2024-03-09 14:05");
        assert_eq!(lines[1], "# SIM,GEN");
        assert_eq!(lines[3], COLUMN_HEADER);
        assert!(lines[4].starts_with("     3,"));
    }
}
