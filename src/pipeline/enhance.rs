//! Scan enhancement: grayscale → denoise → Otsu binarisation → contrast lift.
//!
//! Phone and flatbed scans of the registration form carry paper texture,
//! shadows and uneven ink. Binarising after a median pass removes most of it
//! without eroding handwriting strokes, and the final linear lift keeps the
//! background off pure black for the document service's layout detector.

use super::ImageEnhancer;
use crate::error::PageError;
use image::GrayImage;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::median_filter;
use std::path::Path;
use tracing::debug;

/// Default enhancer built on `image` + `imageproc`.
#[derive(Debug, Clone, Copy)]
pub struct ScanEnhancer {
    /// Median filter radius in pixels (0 disables denoising).
    pub denoise_radius: u32,
    /// Contrast gain applied after thresholding.
    pub alpha: f32,
    /// Brightness offset applied after thresholding.
    pub beta: f32,
}

impl Default for ScanEnhancer {
    fn default() -> Self {
        Self {
            denoise_radius: 2,
            alpha: 1.2,
            beta: 10.0,
        }
    }
}

impl ScanEnhancer {
    /// Run the enhancement chain on an in-memory grayscale page.
    pub fn enhance_gray(&self, gray: &GrayImage) -> GrayImage {
        let denoised = if self.denoise_radius > 0 {
            median_filter(gray, self.denoise_radius, self.denoise_radius)
        } else {
            gray.clone()
        };
        let level = otsu_level(&denoised);
        let mut binary = threshold(&denoised, level, ThresholdType::Binary);
        for px in binary.pixels_mut() {
            px.0[0] = scale_abs(px.0[0], self.alpha, self.beta);
        }
        binary
    }
}

impl ImageEnhancer for ScanEnhancer {
    fn enhance(&self, input: &Path, output: &Path) -> Result<(), PageError> {
        let fail = |detail: String| PageError::EnhanceFailed {
            page: input.to_path_buf(),
            detail,
        };
        let gray = image::open(input)
            .map_err(|e| fail(format!("unreadable image: {e}")))?
            .to_luma8();
        let enhanced = self.enhance_gray(&gray);
        enhanced
            .save(output)
            .map_err(|e| fail(format!("write {}: {e}", output.display())))?;
        debug!("Enhanced {} → {}", input.display(), output.display());
        Ok(())
    }
}

/// `|v * alpha + beta|`, rounded and saturated to `u8`.
fn scale_abs(v: u8, alpha: f32, beta: f32) -> u8 {
    (v as f32 * alpha + beta).abs().round().clamp(0.0, 255.0) as u8
}
