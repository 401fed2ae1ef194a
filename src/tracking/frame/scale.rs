//! ORB scale pyramid parameters.
//!
//! Keypoints carry the octave they were detected at. Search radii,
//! reprojection tolerances and scale prediction all read per-level factors
//! from here.

use serde::{Deserialize, Serialize};

/// Extractor pyramid settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Scale ratio between consecutive levels (typically 1.2).
    pub scale_factor: f64,
    /// Number of pyramid levels (typically 8).
    pub n_levels: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.2,
            n_levels: 8,
        }
    }
}

/// Precomputed per-level scale tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalePyramid {
    scale_factor: f64,
    log_scale_factor: f64,
    scale_factors: Vec<f64>,
    inv_scale_factors: Vec<f64>,
    level_sigma2: Vec<f64>,
    inv_level_sigma2: Vec<f64>,
}

impl ScalePyramid {
    pub fn new(config: PyramidConfig) -> Self {
        let n_levels = config.n_levels.max(1);
        let scale_factor = if config.scale_factor > 1.0 {
            config.scale_factor
        } else {
            1.2
        };

        let scale_factors: Vec<f64> = (0..n_levels)
            .map(|level| scale_factor.powi(level as i32))
            .collect();
        let inv_scale_factors = scale_factors.iter().map(|s| 1.0 / s).collect();
        let level_sigma2: Vec<f64> = scale_factors.iter().map(|s| s * s).collect();
        let inv_level_sigma2 = level_sigma2.iter().map(|s2| 1.0 / s2).collect();

        Self {
            scale_factor,
            log_scale_factor: scale_factor.ln(),
            scale_factors,
            inv_scale_factors,
            level_sigma2,
            inv_level_sigma2,
        }
    }

    pub fn n_levels(&self) -> usize {
        self.scale_factors.len()
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Scale factor of a level. Levels past the top clamp to the last level.
    pub fn scale(&self, level: usize) -> f64 {
        self.scale_factors[self.clamp(level)]
    }

    pub fn inv_scale(&self, level: usize) -> f64 {
        self.inv_scale_factors[self.clamp(level)]
    }

    pub fn sigma2(&self, level: usize) -> f64 {
        self.level_sigma2[self.clamp(level)]
    }

    pub fn inv_sigma2(&self, level: usize) -> f64 {
        self.inv_level_sigma2[self.clamp(level)]
    }

    /// Largest scale factor (top level).
    pub fn max_scale(&self) -> f64 {
        self.scale_factors[self.n_levels() - 1]
    }

    /// Predict the octave a landmark should be detected at from its current
    /// distance and the maximum distance of its scale-invariance range.
    pub fn predict_scale(&self, current_dist: f64, max_distance: f64) -> usize {
        if current_dist <= 0.0 || !max_distance.is_finite() {
            return 0;
        }
        let ratio = max_distance / current_dist;
        let level = (ratio.ln() / self.log_scale_factor).ceil();
        if level < 0.0 {
            0
        } else {
            (level as usize).min(self.n_levels() - 1)
        }
    }

    fn clamp(&self, level: usize) -> usize {
        level.min(self.n_levels() - 1)
    }
}

impl Default for ScalePyramid {
    fn default() -> Self {
        Self::new(PyramidConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_tables() {
        let pyr = ScalePyramid::default();
        assert_eq!(pyr.n_levels(), 8);
        assert_relative_eq!(pyr.scale(0), 1.0);
        assert_relative_eq!(pyr.scale(2), 1.44, epsilon = 1e-12);
        assert_relative_eq!(pyr.sigma2(1), 1.44, epsilon = 1e-12);
        assert_relative_eq!(pyr.inv_sigma2(1) * pyr.sigma2(1), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pyr.scale(100), pyr.max_scale());
    }

    #[test]
    fn test_predict_scale() {
        let pyr = ScalePyramid::default();
        let max_dist = 10.0;
        // At the far limit the point is seen at the finest level.
        assert_eq!(pyr.predict_scale(10.0, max_dist), 0);
        // Less than one scale step closer than the far limit: level 1.
        assert_eq!(pyr.predict_scale(10.0 / 1.1, max_dist), 1);
        assert_eq!(pyr.predict_scale(10.0 / 1.3, max_dist), 2);
        // Very close: clamped at the coarsest level.
        assert_eq!(pyr.predict_scale(0.01, max_dist), 7);
        // Farther than the limit: clamped at zero.
        assert_eq!(pyr.predict_scale(50.0, max_dist), 0);
    }
}
