//! Per-frame hue-gated rectangle detection.
//!
//! The pipeline runs HSV conversion, an in-range threshold, Gaussian blur and
//! Canny on each frame, then approximates every contour of the edge map to a
//! polygon and keeps the four-cornered ones whose bounding box clears the size
//! threshold.

use log::{debug, trace};
use opencv::{
    core::{self, Mat, Point, Rect, Size, Vector, BORDER_DEFAULT},
    imgproc::{
        self, approx_poly_dp, arc_length, bounding_rect, canny, cvt_color, find_contours,
        gaussian_blur, CHAIN_APPROX_SIMPLE, COLOR_BGR2HSV, FONT_HERSHEY_SIMPLEX, LINE_8,
        RETR_TREE,
    },
    prelude::*,
};

use crate::config::DetectorConfig;
use crate::error::{OpenCvContext, Result};

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f64 = 0.8;
const LABEL_THICKNESS: i32 = 2;
/// Gap between the label baseline and the top of the box
const LABEL_OFFSET: i32 = 10;

/// Intermediate images of one pipeline run.
#[derive(Debug, Clone)]
pub struct Stages {
    pub hsv: Mat,
    /// Single-channel 8-bit, 255 where the pixel is inside the HSV range
    pub mask: Mat,
    pub blurred: Mat,
    pub edges: Mat,
}

/// A four-cornered contour that passed the size filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Quad {
    pub rect: Rect,
    pub corners: Vec<Point>,
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub stages: Stages,
    /// Matches in contour order
    pub quads: Vec<Quad>,
}

impl Detection {
    pub fn first(&self) -> Option<&Quad> {
        self.quads.first()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }
}

pub struct QuadDetector {
    config: DetectorConfig,
}

impl QuadDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn hsv(&self, frame: &Mat) -> Result<Mat> {
        let mut hsv = Mat::default();
        cvt_color(frame, &mut hsv, COLOR_BGR2HSV, 0).during("cvt_color(BGR2HSV)")?;
        Ok(hsv)
    }

    pub fn mask(&self, hsv: &Mat) -> Result<Mat> {
        let mut mask = Mat::default();
        core::in_range(
            hsv,
            &self.config.hsv_lower.to_scalar(),
            &self.config.hsv_upper.to_scalar(),
            &mut mask,
        )
        .during("in_range")?;
        Ok(mask)
    }

    pub fn blur(&self, mask: &Mat) -> Result<Mat> {
        let mut blurred = Mat::default();
        let k = self.config.blur_kernel;
        gaussian_blur(mask, &mut blurred, Size::new(k, k), 0.0, 0.0, BORDER_DEFAULT)
            .during("gaussian_blur")?;
        Ok(blurred)
    }

    pub fn edges(&self, blurred: &Mat) -> Result<Mat> {
        let mut edges = Mat::default();
        canny(blurred, &mut edges, self.config.canny_low, self.config.canny_high, 3, false)
            .during("canny")?;
        Ok(edges)
    }

    pub fn stages(&self, frame: &Mat) -> Result<Stages> {
        let hsv = self.hsv(frame)?;
        let mask = self.mask(&hsv)?;
        let blurred = self.blur(&mask)?;
        let edges = self.edges(&blurred)?;
        Ok(Stages {
            hsv,
            mask,
            blurred,
            edges,
        })
    }

    /// Four-vertex approximations of the edge contours that clear the size threshold.
    pub fn find_quads(&self, edges: &Mat) -> Result<Vec<Quad>> {
        let mut contours = Vector::<Vector<Point>>::new();
        find_contours(edges, &mut contours, RETR_TREE, CHAIN_APPROX_SIMPLE, Point::new(0, 0))
            .during("find_contours")?;

        let mut quads = Vec::new();
        for contour in contours.iter() {
            let perimeter = arc_length(&contour, true).during("arc_length")?;
            let mut approx = Vector::<Point>::new();
            approx_poly_dp(&contour, &mut approx, self.config.approx_epsilon_ratio * perimeter, true)
                .during("approx_poly_dp")?;

            if approx.len() != 4 {
                continue;
            }

            let rect = bounding_rect(&approx).during("bounding_rect")?;
            if rect.width > self.config.min_width && rect.height > self.config.min_height {
                quads.push(Quad {
                    rect,
                    corners: approx.to_vec(),
                });
            } else {
                trace!("Dropping small quad {:?}", rect);
            }
        }

        debug!("{} contours, {} quads", contours.len(), quads.len());
        Ok(quads)
    }

    pub fn detect(&self, frame: &Mat) -> Result<Detection> {
        let stages = self.stages(frame)?;
        let quads = self.find_quads(&stages.edges)?;
        Ok(Detection { stages, quads })
    }

    /// Box every match and put the label above the first one.
    pub fn annotate(&self, frame: &mut Mat, detection: &Detection) -> Result<()> {
        for quad in &detection.quads {
            imgproc::rectangle(frame, quad.rect, self.config.box_color, BOX_THICKNESS, LINE_8, 0)
                .during("rectangle")?;
        }

        if let Some(first) = detection.first() {
            imgproc::put_text(
                frame,
                &self.config.label,
                Point::new(first.rect.x, first.rect.y - LABEL_OFFSET),
                FONT_HERSHEY_SIMPLEX,
                LABEL_SCALE,
                self.config.label_color,
                LABEL_THICKNESS,
                LINE_8,
                false,
            )
            .during("put_text")?;
        }

        Ok(())
    }
}
