//! Velocity-based motion model for pose prediction.

use crate::geometry::SE3;

use super::tracking_frame::Frame;

/// Constant velocity motion model.
///
/// Predicts the next camera pose by repeating the relative motion observed
/// between the previous two poses. The prediction seeds projection search
/// from the last frame.
#[derive(Debug, Clone, Default)]
pub struct MotionModel {
    /// Last camera-to-world pose (T_wc).
    last_pose: Option<SE3>,
    /// Motion from the previous camera to the last camera (T_prev_last).
    velocity: Option<SE3>,
}

impl MotionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the model with a new pose observation (T_wc).
    pub fn update(&mut self, pose: &SE3) {
        if let Some(ref prev) = self.last_pose {
            self.velocity = Some(prev.inverse().compose(pose));
        }
        self.last_pose = Some(pose.clone());
    }

    /// Predict the next pose. Before two poses were seen, repeats the last one.
    pub fn predict(&self) -> Option<SE3> {
        let last = self.last_pose.as_ref()?;
        Some(match &self.velocity {
            Some(v) => last.compose(v),
            None => last.clone(),
        })
    }

    /// Set the predicted pose on a frame. Returns false if there is no prediction yet.
    pub fn seed(&self, frame: &mut Frame) -> bool {
        match self.predict() {
            Some(pose) => {
                frame.set_pose(pose);
                true
            }
            None => false,
        }
    }

    pub fn has_velocity(&self) -> bool {
        self.velocity.is_some()
    }

    /// Reset the motion model.
    pub fn reset(&mut self) {
        self.last_pose = None;
        self.velocity = None;
    }
}
