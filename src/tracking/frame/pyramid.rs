//! Grayscale image pyramid matching the extractor's scale levels.

use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;

use super::scale::ScalePyramid;

/// One resized grayscale image per scale level; level 0 is the input image.
#[derive(Clone)]
pub struct ImagePyramid {
    levels: Vec<GrayImage>,
}

impl ImagePyramid {
    /// Build the pyramid by resizing the base image with each level's inverse scale.
    pub fn new(image: GrayImage, scales: &ScalePyramid) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            bail!("Cannot build image pyramid from an empty {}x{} image", width, height);
        }

        let mut levels = Vec::with_capacity(scales.n_levels());
        for level in 1..scales.n_levels() {
            let inv = scales.inv_scale(level);
            let w = ((width as f64) * inv).round().max(1.0) as u32;
            let h = ((height as f64) * inv).round().max(1.0) as u32;
            levels.push(imageops::resize(&image, w, h, FilterType::Triangle));
        }
        levels.insert(0, image);

        Ok(Self { levels })
    }

    pub fn level(&self, level: usize) -> &GrayImage {
        &self.levels[level.min(self.levels.len() - 1)]
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }
}

impl std::fmt::Debug for ImagePyramid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims: Vec<(u32, u32)> = self.levels.iter().map(|l| l.dimensions()).collect();
        f.debug_struct("ImagePyramid").field("levels", &dims).finish()
    }
}
