//! Detector and session configuration.
//!
//! Values come from a `.env` file and `QUAD_*` environment variables on top of
//! the built-in defaults. Loading goes through a lookup closure so tests can
//! feed a map instead of the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use opencv::core::Scalar;

use crate::capture::SourceSpec;
use crate::error::{DetectorError, Result};

/// Largest hue OpenCV produces for 8-bit HSV images.
pub const MAX_HUE: u8 = 179;

/// One corner of the HSV threshold box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvBound {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl HsvBound {
    pub const fn new(h: u8, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }

    pub fn to_scalar(self) -> Scalar {
        Scalar::new(self.h as f64, self.s as f64, self.v as f64, 0.0)
    }

    fn channels(self) -> [u8; 3] {
        [self.h, self.s, self.v]
    }
}

impl FromStr for HsvBound {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("expected \"h,s,v\" with values 0-255: {e}"))?;

        match parts.as_slice() {
            [h, s, v] => Ok(Self::new(*h, *s, *v)),
            _ => Err(format!("expected 3 components, got {}", parts.len())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub hsv_lower: HsvBound,
    pub hsv_upper: HsvBound,
    /// Side of the square Gaussian kernel, odd
    pub blur_kernel: i32,
    pub canny_low: f64,
    pub canny_high: f64,
    /// Polygon approximation tolerance as a fraction of the contour perimeter
    pub approx_epsilon_ratio: f64,
    /// Bounding boxes must be strictly wider than this
    pub min_width: i32,
    /// Bounding boxes must be strictly taller than this
    pub min_height: i32,
    pub label: String,
    /// BGR
    pub box_color: Scalar,
    /// BGR
    pub label_color: Scalar,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            hsv_lower: HsvBound::new(20, 100, 100),
            hsv_upper: HsvBound::new(30, 255, 255),
            blur_kernel: 5,
            canny_low: 50.0,
            canny_high: 150.0,
            approx_epsilon_ratio: 0.02,
            min_width: 30,
            min_height: 30,
            label: "Yellow Rectangle".to_string(),
            box_color: Scalar::new(0.0, 255.0, 0.0, 0.0),
            label_color: Scalar::new(0.0, 255.0, 0.0, 0.0),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, bound) in [("QUAD_HSV_LOWER", self.hsv_lower), ("QUAD_HSV_UPPER", self.hsv_upper)] {
            if bound.h > MAX_HUE {
                return Err(DetectorError::config(
                    key,
                    format!("hue {} exceeds {}", bound.h, MAX_HUE),
                ));
            }
        }

        let lower = self.hsv_lower.channels();
        let upper = self.hsv_upper.channels();
        if lower.iter().zip(upper.iter()).any(|(lo, hi)| lo > hi) {
            return Err(DetectorError::config(
                "QUAD_HSV_LOWER",
                format!("{:?} is not below {:?}", self.hsv_lower, self.hsv_upper),
            ));
        }

        if self.blur_kernel <= 0 || self.blur_kernel % 2 == 0 {
            return Err(DetectorError::config(
                "QUAD_BLUR_KERNEL",
                format!("kernel size must be odd and positive, got {}", self.blur_kernel),
            ));
        }

        if self.canny_low < 0.0 || self.canny_low > self.canny_high {
            return Err(DetectorError::config(
                "QUAD_CANNY_LOW",
                format!(
                    "thresholds must satisfy 0 <= low <= high, got {} / {}",
                    self.canny_low, self.canny_high
                ),
            ));
        }

        if !(self.approx_epsilon_ratio > 0.0 && self.approx_epsilon_ratio < 1.0) {
            return Err(DetectorError::config(
                "QUAD_APPROX_EPSILON",
                format!("ratio must be in (0, 1), got {}", self.approx_epsilon_ratio),
            ));
        }

        if self.min_width < 0 {
            return Err(DetectorError::config("QUAD_MIN_WIDTH", "size threshold must not be negative"));
        }
        if self.min_height < 0 {
            return Err(DetectorError::config("QUAD_MIN_HEIGHT", "size threshold must not be negative"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub source: SourceSpec,
    /// Pause between processed frames
    pub frame_interval: Duration,
    /// Freeze on the first matching frame instead of continuing capture
    pub stop_on_match: bool,
    pub window_title: String,
    pub window_size: [f32; 2],
    pub detector: DetectorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source: SourceSpec::Camera(0),
            frame_interval: Duration::from_millis(33),
            stop_on_match: true,
            window_title: "Multiple Yellow Rectangle Detection".to_string(),
            window_size: [640.0, 480.0],
            detector: DetectorConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load from the process environment. Call `dotenv().ok()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("QUAD_VIDEO_PATH").filter(|p| !p.trim().is_empty()) {
            config.source = SourceSpec::File(PathBuf::from(path));
        } else if let Some(index) = parse_var::<i32, _>(&lookup, "QUAD_CAMERA_INDEX")? {
            config.source = SourceSpec::Camera(index);
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "QUAD_FRAME_INTERVAL_MS")? {
            config.frame_interval = Duration::from_millis(ms);
        }
        if let Some(stop) = lookup("QUAD_STOP_ON_MATCH") {
            config.stop_on_match = parse_flag("QUAD_STOP_ON_MATCH", &stop)?;
        }

        let detector = &mut config.detector;
        if let Some(bound) = parse_var(&lookup, "QUAD_HSV_LOWER")? {
            detector.hsv_lower = bound;
        }
        if let Some(bound) = parse_var(&lookup, "QUAD_HSV_UPPER")? {
            detector.hsv_upper = bound;
        }
        if let Some(kernel) = parse_var(&lookup, "QUAD_BLUR_KERNEL")? {
            detector.blur_kernel = kernel;
        }
        if let Some(low) = parse_var(&lookup, "QUAD_CANNY_LOW")? {
            detector.canny_low = low;
        }
        if let Some(high) = parse_var(&lookup, "QUAD_CANNY_HIGH")? {
            detector.canny_high = high;
        }
        if let Some(ratio) = parse_var(&lookup, "QUAD_APPROX_EPSILON")? {
            detector.approx_epsilon_ratio = ratio;
        }
        if let Some(width) = parse_var(&lookup, "QUAD_MIN_WIDTH")? {
            detector.min_width = width;
        }
        if let Some(height) = parse_var(&lookup, "QUAD_MIN_HEIGHT")? {
            detector.min_height = height;
        }
        if let Some(label) = lookup("QUAD_LABEL") {
            detector.label = label;
        }

        detector.validate()?;
        debug!("Loaded session config: {:?}", config);
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| DetectorError::config(key, format!("{raw:?}: {e}"))),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DetectorError::config(key, format!("expected a boolean, got {other:?}"))),
    }
}
