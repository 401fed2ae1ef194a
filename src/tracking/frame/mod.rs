//! Frame-level data: camera model, features, scale tables, image pyramid and spatial grid.

pub mod camera;
pub mod features;
pub mod grid;
pub mod pyramid;
pub mod scale;
pub mod view;

pub use camera::CameraModel;
pub use features::{Descriptor, FeatureSet, KeyPoint, DESCRIPTOR_BYTES};
pub use grid::FeatureGrid;
pub use pyramid::ImagePyramid;
pub use scale::{PyramidConfig, ScalePyramid};
pub use view::FeatureView;
