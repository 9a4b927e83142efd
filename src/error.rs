//! Error types for the detector

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectorError>;

#[derive(Error, Debug)]
pub enum DetectorError {
    /// An OpenCV call failed
    #[error("OpenCV error during {operation}: {source}")]
    OpenCv {
        operation: String,
        #[source]
        source: opencv::Error,
    },

    /// Camera or video file could not be opened
    #[error("Cannot open video capture: {0}")]
    SourceUnavailable(String),

    /// The source opened but never produced a frame
    #[error("Cannot open webcam: no frames from {0}")]
    NoFrames(String),

    /// Output video could not be created
    #[error("Cannot open video writer: {0}")]
    SinkUnavailable(String),

    #[error("Invalid configuration {key}: {message}")]
    Config { key: String, message: String },

    /// Snapshot encoding or file IO failed
    #[error("Failed to save snapshot: {0}")]
    Snapshot(#[from] image::ImageError),
}

impl DetectorError {
    pub fn opencv(operation: impl Into<String>, source: opencv::Error) -> Self {
        Self::OpenCv {
            operation: operation.into(),
            source,
        }
    }

    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Attach the name of the failing OpenCV operation to a raw `opencv::Result`.
pub trait OpenCvContext<T> {
    fn during(self, operation: &str) -> Result<T>;
}

impl<T> OpenCvContext<T> for opencv::Result<T> {
    fn during(self, operation: &str) -> Result<T> {
        self.map_err(|e| DetectorError::opencv(operation, e))
    }
}
