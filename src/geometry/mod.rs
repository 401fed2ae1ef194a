//! Geometry utilities: SE3 and Sim3 transforms, epipolar relations.

pub mod epipolar;
pub mod se3;
pub mod sim3;

pub use epipolar::{epipolar_distance_sq, fundamental_matrix, skew};
pub use se3::SE3;
pub use sim3::Sim3;
