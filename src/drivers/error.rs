use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid sweep configuration: {0}")]
    Configuration(String),
    #[error("instrument not found: {0}")]
    DeviceNotFound(String),
    #[error("instrument error: {0}")]
    Device(String),
    #[error("acquisition timed out after {0:?}")]
    AcquisitionTimeout(Duration),
    #[error("capture spans {cycles:.2} cycles of the reference, at least {required} required")]
    InsufficientSamples { cycles: f64, required: u32 },
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch { expected: f64, actual: f64 },
    #[error("failed to write sweep log: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
}

impl SweepError {
    /// Errors that may clear up on a second shot at the same point.
    /// Setup never asks: anything failing there ends the sweep.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SweepError::DeviceNotFound(_)
                | SweepError::Device(_)
                | SweepError::AcquisitionTimeout(_)
                | SweepError::InsufficientSamples { .. }
                | SweepError::InvalidSampleRate
                | SweepError::SampleRateMismatch { .. }
        )
    }
}

impl From<serialport::Error> for SweepError {
    fn from(value: serialport::Error) -> Self {
        match value.kind() {
            serialport::ErrorKind::NoDevice => SweepError::DeviceNotFound(value.description),
            _ => SweepError::Device(value.description),
        }
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(value: serde_json::Error) -> Self {
        SweepError::Configuration(value.to_string())
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for SweepError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        SweepError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for SweepError {
    fn from(value: image::ImageError) -> Self {
        SweepError::Plot(value.to_string())
    }
}
