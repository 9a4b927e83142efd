//! Live detection of coloured rectangles in a video stream.
//!
//! Frames are thresholded on a hue range, edge-detected, and searched for
//! four-cornered contours above a size threshold. The first match is boxed and
//! labelled on the displayed frame.

pub mod app;
pub mod capture;
pub mod config;
pub mod detect;
pub mod display;
pub mod error;
pub mod session;

pub use capture::{FrameSource, SourceSpec};
pub use config::{DetectorConfig, HsvBound, SessionConfig};
pub use detect::{Detection, Quad, QuadDetector, Stages};
pub use error::{DetectorError, Result};
