//! Tracking-side data: frames being tracked and the motion prior that seeds them.
//!
//! - [`frame`] - per-image feature data shared by Frames and KeyFrames
//! - [`Frame`] - an observation being tracked, with temporary landmark matches
//! - [`MotionModel`] - constant-velocity pose prediction

pub mod frame;
pub mod motion_model;
pub mod tracking_frame;

pub use motion_model::MotionModel;
pub use tracking_frame::Frame;
