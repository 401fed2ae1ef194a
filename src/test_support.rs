//! Synthetic scenes shared by unit tests.

use nalgebra::{Point2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::atlas::map::{KeyFrameId, Map, MapPointId};
use crate::geometry::SE3;
use crate::tracking::frame::{CameraModel, Descriptor, FeatureSet, KeyPoint, ScalePyramid, DESCRIPTOR_BYTES};
use crate::tracking::tracking_frame::Frame;

/// 640x480 pinhole camera with a 10 cm stereo baseline.
pub fn camera() -> CameraModel {
    CameraModel::new(500.0, 500.0, 320.0, 240.0, 0.1, 640.0, 480.0).unwrap()
}

pub fn mono_camera() -> CameraModel {
    CameraModel::new(500.0, 500.0, 320.0, 240.0, 0.0, 640.0, 480.0).unwrap()
}

pub fn random_descriptor(rng: &mut StdRng) -> Descriptor {
    let mut bytes = [0u8; DESCRIPTOR_BYTES];
    rng.fill(&mut bytes[..]);
    Descriptor(bytes)
}

/// Seeded random descriptors; pairwise distances are far above `TH_HIGH`
/// with overwhelming probability.
pub fn random_descriptors(n: usize, seed: u64) -> Vec<Descriptor> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| random_descriptor(&mut rng)).collect()
}

/// Copy of `base` with bits `0..n` inverted.
pub fn descriptor_with_flips(base: &Descriptor, n: usize) -> Descriptor {
    let mut d = *base;
    for i in 0..n {
        d.set_bit(i, !d.bit(i));
    }
    d
}

/// `n` keypoints on one image row, 10 px apart.
pub fn keypoint_row(n: usize, octave: usize) -> Vec<KeyPoint> {
    (0..n)
        .map(|i| KeyPoint::new(20.0 + 10.0 * i as f64, 20.0, octave, 0.0))
        .collect()
}

pub fn frame_from(keypoints: Vec<KeyPoint>, descriptors: Vec<Descriptor>, pose: Option<SE3>) -> Frame {
    frame_with_camera(keypoints, descriptors, pose, camera())
}

pub fn frame_with_camera(
    keypoints: Vec<KeyPoint>,
    descriptors: Vec<Descriptor>,
    pose: Option<SE3>,
    camera: CameraModel,
) -> Frame {
    let features = FeatureSet::new(keypoints, descriptors).unwrap();
    let mut frame = Frame::new(0, features, camera, ScalePyramid::default()).unwrap();
    frame.pose = pose;
    frame
}

/// World points seen by the identity camera on a 10x`rows` pixel lattice
/// (50 px spacing) at depths between 4 and 5 m.
pub fn lattice_points(n: usize) -> Vec<Vector3<f64>> {
    let cam = camera();
    (0..n)
        .map(|i| {
            let px = Point2::new(70.0 + 50.0 * (i % 10) as f64, 70.0 + 50.0 * (i / 10) as f64);
            cam.unproject(&px, 4.0 + 0.25 * (i % 5) as f64)
        })
        .collect()
}

/// Keypoints where `points` project in a camera at `pose_wc`. Points that do
/// not project into the image are left out; the returned indices say which
/// point each keypoint came from.
pub fn observe(points: &[Vector3<f64>], pose_wc: &SE3, octave: usize) -> (Vec<KeyPoint>, Vec<usize>) {
    let cam = camera();
    let pose_cw = pose_wc.inverse();
    points
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let px = cam.project(&pose_cw.transform_point(p))?;
            cam.is_in_image(px.x, px.y)
                .then(|| (KeyPoint::new(px.x, px.y, octave, 0.0), i))
        })
        .unzip()
}

/// A frame at `pose_wc` observing `points` with the matching descriptors.
pub fn observing_frame(points: &[Vector3<f64>], descriptors: &[Descriptor], pose_wc: &SE3) -> Frame {
    let (keypoints, source) = observe(points, pose_wc, 0);
    let descs = source.iter().map(|&i| descriptors[i]).collect();
    frame_from(keypoints, descs, Some(pose_wc.clone()))
}

/// Map with one KeyFrame at `pose_wc` observing `points`; landmark `i` sits
/// in slot `i` and carries `descriptors[i]`.
pub struct Scene {
    pub map: Map,
    pub kf: KeyFrameId,
    pub landmarks: Vec<MapPointId>,
}

pub fn scene_with_keyframe(points: &[Vector3<f64>], descriptors: &[Descriptor], pose_wc: &SE3) -> Scene {
    let mut map = Map::new();
    let frame = observing_frame(points, descriptors, pose_wc);
    assert_eq!(frame.features.len(), points.len(), "all points must be visible");
    let kf = map.create_keyframe(&frame).unwrap();
    let landmarks = points
        .iter()
        .zip(descriptors)
        .enumerate()
        .map(|(i, (p, d))| {
            let mp = map.create_map_point(*p, *d, kf);
            map.associate(kf, i, mp);
            map.update_map_point_normal_and_depth(mp);
            mp
        })
        .collect();
    Scene { map, kf, landmarks }
}
