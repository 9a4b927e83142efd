//! Conversions between OpenCV frames, egui textures and `image` buffers.

use std::path::Path;

use egui::ColorImage;
use image::RgbaImage;
use log::info;
use opencv::{
    core::Mat,
    imgproc::{cvt_color, COLOR_BGR2RGBA, COLOR_GRAY2RGBA},
    prelude::*,
};

use crate::error::{DetectorError, OpenCvContext, Result};

/// Convert a BGR or single-channel frame into an egui image.
pub fn mat_to_color_image(mat: &Mat) -> Result<ColorImage> {
    let code = match mat.channels() {
        1 => COLOR_GRAY2RGBA,
        3 => COLOR_BGR2RGBA,
        n => {
            return Err(DetectorError::opencv(
                "mat_to_color_image",
                opencv::Error::new(opencv::core::StsBadArg, format!("unsupported channel count {n}")),
            ))
        }
    };

    let mut rgba = Mat::default();
    cvt_color(mat, &mut rgba, code, 0).during("cvt_color(to RGBA)")?;
    let data = rgba.data_bytes().during("Mat::data_bytes")?;

    Ok(ColorImage::from_rgba_unmultiplied(
        [rgba.cols() as usize, rgba.rows() as usize],
        data,
    ))
}

pub fn color_image_to_rgba(image: &ColorImage) -> RgbaImage {
    let [width, height] = image.size;
    let mut buffer = RgbaImage::new(width as u32, height as u32);
    for (pixel, color) in buffer.pixels_mut().zip(image.pixels.iter()) {
        *pixel = image::Rgba(color.to_srgba_unmultiplied());
    }
    buffer
}

/// Write the image to disk, format picked from the file extension.
pub fn save_snapshot(image: &ColorImage, path: &Path) -> Result<()> {
    color_image_to_rgba(image).save(path)?;
    info!("Saved snapshot to {}", path.display());
    Ok(())
}
