//! YAML settings: camera intrinsics, pyramid, matcher, tracking and fusion
//! parameters, and the optional left-to-right stereo extrinsic.
//!
//! ```yaml
//! camera:
//!   intrinsics: [458.654, 457.296, 367.215, 248.375]  # fx, fy, cx, cy
//!   resolution: [752, 480]
//!   baseline: 0.11           # optional, defaults to |t| of T_l2r
//! T_l2r:                     # optional, row-major 4x4
//!   data: [1, 0, 0, -0.11, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1]
//! pyramid: { scale_factor: 1.2, n_levels: 8 }
//! matcher: { nn_ratio: 0.6 }
//! ```

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nalgebra::Matrix4;
use serde::Deserialize;

use crate::geometry::SE3;
use crate::matcher::{FusionConfig, KltConfig, MatcherConfig};
use crate::tracking::frame::{CameraModel, PyramidConfig, ScalePyramid};

/// Parsed and validated settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub camera: CameraModel,
    pub pyramid: PyramidConfig,
    pub matcher: MatcherConfig,
    pub klt: KltConfig,
    pub fusion: FusionConfig,
    /// Left camera coordinates to right camera coordinates.
    pub t_l2r: Option<SE3>,
}

impl Settings {
    pub fn scale_pyramid(&self) -> ScalePyramid {
        ScalePyramid::new(self.pyramid)
    }
}

#[derive(Debug, Deserialize)]
struct TransformYaml {
    data: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct CameraYaml {
    /// [fx, fy, cx, cy]
    intrinsics: Vec<f64>,
    /// [width, height]
    resolution: Vec<f64>,
    baseline: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SettingsYaml {
    camera: CameraYaml,
    #[serde(rename = "T_l2r")]
    t_l2r: Option<TransformYaml>,
    #[serde(default)]
    pyramid: PyramidConfig,
    #[serde(default)]
    matcher: MatcherConfig,
    #[serde(default)]
    klt: KltConfig,
    #[serde(default)]
    fusion: FusionConfig,
}

/// Load settings from a YAML file.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let raw: SettingsYaml =
        serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))?;
    let settings = build(raw).with_context(|| format!("Invalid settings in {:?}", path))?;
    tracing::info!(
        "Loaded settings from {:?}: {}x{} camera, {} pyramid levels",
        path,
        settings.camera.width,
        settings.camera.height,
        settings.pyramid.n_levels
    );
    Ok(settings)
}

/// Parse settings from a YAML string.
pub fn parse_settings(yaml: &str) -> Result<Settings> {
    let raw: SettingsYaml = serde_yaml::from_str(yaml).context("Failed to parse settings")?;
    build(raw)
}

fn build(raw: SettingsYaml) -> Result<Settings> {
    let intrinsics = &raw.camera.intrinsics;
    if intrinsics.len() != 4 {
        bail!("Expected 4 intrinsics [fx, fy, cx, cy], got {}", intrinsics.len());
    }
    let resolution = &raw.camera.resolution;
    if resolution.len() != 2 {
        bail!("Expected resolution [width, height], got {} values", resolution.len());
    }

    let t_l2r = raw.t_l2r.as_ref().map(|t| transform_from(&t.data)).transpose()?;
    let baseline = match (raw.camera.baseline, &t_l2r) {
        (Some(b), _) => b,
        (None, Some(t)) => t.translation.norm(),
        (None, None) => 0.0,
    };

    let camera = CameraModel::new(
        intrinsics[0],
        intrinsics[1],
        intrinsics[2],
        intrinsics[3],
        baseline,
        resolution[0],
        resolution[1],
    )?;
    if raw.pyramid.n_levels == 0 || raw.pyramid.scale_factor <= 1.0 {
        bail!(
            "Pyramid needs at least one level and a scale factor above 1 (got {} levels, factor {})",
            raw.pyramid.n_levels,
            raw.pyramid.scale_factor
        );
    }

    Ok(Settings {
        camera,
        pyramid: raw.pyramid,
        matcher: raw.matcher,
        klt: raw.klt,
        fusion: raw.fusion,
        t_l2r,
    })
}

fn transform_from(data: &[f64]) -> Result<SE3> {
    if data.len() != 16 {
        bail!("Expected 16 elements for transform, got {}", data.len());
    }
    Ok(SE3::from_matrix(Matrix4::from_row_slice(data)))
}
