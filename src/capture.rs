use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};

use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};

use crate::error::{DetectorError, OpenCvContext, Result};

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Camera(i32),
    File(PathBuf),
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Camera(index) => write!(f, "camera {index}"),
            SourceSpec::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub struct FrameSource {
    capture: VideoCapture,
    spec: SourceSpec,
    primed: Option<Mat>,
}

impl FrameSource {
    /// Open the device or file and read one frame to prove it delivers.
    pub fn open(spec: &SourceSpec) -> Result<Self> {
        let capture = match spec {
            SourceSpec::Camera(index) => VideoCapture::new(*index, videoio::CAP_ANY),
            SourceSpec::File(path) => VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY),
        }
        .map_err(|e| DetectorError::SourceUnavailable(format!("{spec}: {e}")))?;

        Self::from_capture(capture, spec.clone())
    }

    /// Wrap a capture that was opened and configured elsewhere.
    pub fn from_capture(capture: VideoCapture, spec: SourceSpec) -> Result<Self> {
        if !capture.is_opened().during("VideoCapture::is_opened")? {
            return Err(DetectorError::SourceUnavailable(spec.to_string()));
        }

        let mut source = Self {
            capture,
            spec,
            primed: None,
        };

        match source.read()? {
            Some(frame) => source.primed = Some(frame),
            None => return Err(DetectorError::NoFrames(source.spec.to_string())),
        }

        info!(
            "Opened {} ({:?} @ {:.1} fps)",
            source.spec,
            source.frame_size()?,
            source.fps()?
        );
        Ok(source)
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    /// Next frame, or `None` once the stream is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Mat>> {
        if let Some(frame) = self.primed.take() {
            return Ok(Some(frame));
        }
        self.read()
    }

    pub fn frame_size(&self) -> Result<Size> {
        let width = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH).during("VideoCapture::get")?;
        let height = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT).during("VideoCapture::get")?;
        Ok(Size::new(width as i32, height as i32))
    }

    /// Reported frame rate; cameras that report nothing get 30.
    pub fn fps(&self) -> Result<f64> {
        let fps = self.capture.get(videoio::CAP_PROP_FPS).during("VideoCapture::get")?;
        Ok(if fps > 0.0 { fps } else { 30.0 })
    }

    fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        match self.capture.read(&mut frame) {
            Ok(true) if !frame.empty() => Ok(Some(frame)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Error reading frame from {}: {:?}", self.spec, e);
                Err(DetectorError::opencv("VideoCapture::read", e))
            }
        }
    }
}

/// Open an mp4v writer, failing when OpenCV cannot actually write to `path`.
pub fn open_writer(path: &Path, fps: f64, size: Size) -> Result<VideoWriter> {
    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v').during("VideoWriter::fourcc")?;
    let writer = VideoWriter::new(&path.to_string_lossy(), fourcc, fps, size, true)
        .map_err(|e| DetectorError::SinkUnavailable(format!("{}: {e}", path.display())))?;

    if !writer.is_opened().during("VideoWriter::is_opened")? {
        return Err(DetectorError::SinkUnavailable(path.display().to_string()));
    }
    Ok(writer)
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("Failed to release {}: {:?}", self.spec, e);
        }
    }
}
