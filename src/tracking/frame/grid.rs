//! Spatial grid over a view's keypoints for radius queries.

use super::features::KeyPoint;

/// Uniform grid of keypoint indices.
///
/// The image is divided into `GRID_COLS × GRID_ROWS` cells; each cell stores
/// indices of keypoints whose position falls inside it. Area queries visit
/// only the cells overlapping the search window.
#[derive(Debug, Clone)]
pub struct FeatureGrid {
    /// Row-major: `cells[row * GRID_COLS + col]`.
    cells: Vec<Vec<usize>>,
    cell_width_inv: f64,
    cell_height_inv: f64,
}

impl FeatureGrid {
    pub const GRID_COLS: usize = 64;
    pub const GRID_ROWS: usize = 48;

    pub fn new(keypoints: &[KeyPoint], img_width: f64, img_height: f64) -> Self {
        let cell_width_inv = Self::GRID_COLS as f64 / img_width.max(1.0);
        let cell_height_inv = Self::GRID_ROWS as f64 / img_height.max(1.0);

        let mut cells: Vec<Vec<usize>> = vec![Vec::new(); Self::GRID_COLS * Self::GRID_ROWS];

        for (idx, kp) in keypoints.iter().enumerate() {
            let cx = (kp.pt.x * cell_width_inv).floor();
            let cy = (kp.pt.y * cell_height_inv).floor();
            // Keypoints outside the image are not indexed.
            if cx < 0.0 || cy < 0.0 || cx >= Self::GRID_COLS as f64 || cy >= Self::GRID_ROWS as f64 {
                continue;
            }
            cells[cy as usize * Self::GRID_COLS + cx as usize].push(idx);
        }

        Self {
            cells,
            cell_width_inv,
            cell_height_inv,
        }
    }

    /// Keypoint indices inside the square window of half-width `r` around
    /// `(x, y)` whose octave lies in `[min_level, max_level]` (each bound optional).
    ///
    /// Results are ordered by cell, then by keypoint index within a cell.
    pub fn features_in_area(
        &self,
        keypoints: &[KeyPoint],
        x: f64,
        y: f64,
        r: f64,
        min_level: Option<usize>,
        max_level: Option<usize>,
    ) -> Vec<usize> {
        let mut indices = Vec::new();
        if !(x.is_finite() && y.is_finite() && r.is_finite()) || r <= 0.0 {
            return indices;
        }

        let min_cell_x = ((x - r) * self.cell_width_inv).floor().max(0.0);
        let max_cell_x = ((x + r) * self.cell_width_inv).ceil();
        let min_cell_y = ((y - r) * self.cell_height_inv).floor().max(0.0);
        let max_cell_y = ((y + r) * self.cell_height_inv).ceil();

        if min_cell_x >= Self::GRID_COLS as f64 || max_cell_x < 0.0 {
            return indices;
        }
        if min_cell_y >= Self::GRID_ROWS as f64 || max_cell_y < 0.0 {
            return indices;
        }

        let min_cell_x = min_cell_x as usize;
        let max_cell_x = (max_cell_x as usize).min(Self::GRID_COLS - 1);
        let min_cell_y = min_cell_y as usize;
        let max_cell_y = (max_cell_y as usize).min(Self::GRID_ROWS - 1);

        for cell_y in min_cell_y..=max_cell_y {
            for cell_x in min_cell_x..=max_cell_x {
                for &idx in &self.cells[cell_y * Self::GRID_COLS + cell_x] {
                    let kp = &keypoints[idx];
                    if min_level.map_or(false, |min| kp.octave < min) {
                        continue;
                    }
                    if max_level.map_or(false, |max| kp.octave > max) {
                        continue;
                    }
                    if (kp.pt.x - x).abs() < r && (kp.pt.y - y).abs() < r {
                        indices.push(idx);
                    }
                }
            }
        }

        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypoints() -> Vec<KeyPoint> {
        vec![
            KeyPoint::new(100.0, 100.0, 0, 0.0),
            KeyPoint::new(103.0, 98.0, 1, 0.0),
            KeyPoint::new(110.0, 100.0, 2, 0.0),
            KeyPoint::new(600.0, 400.0, 0, 0.0),
        ]
    }

    #[test]
    fn test_area_query_radius() {
        let kps = keypoints();
        let grid = FeatureGrid::new(&kps, 640.0, 480.0);

        let mut found = grid.features_in_area(&kps, 101.0, 100.0, 5.0, None, None);
        found.sort();
        assert_eq!(found, vec![0, 1]);

        let found = grid.features_in_area(&kps, 600.0, 400.0, 1.0, None, None);
        assert_eq!(found, vec![3]);
    }

    #[test]
    fn test_area_query_level_bounds() {
        let kps = keypoints();
        let grid = FeatureGrid::new(&kps, 640.0, 480.0);

        let found = grid.features_in_area(&kps, 105.0, 100.0, 20.0, Some(1), Some(1));
        assert_eq!(found, vec![1]);

        let mut found = grid.features_in_area(&kps, 105.0, 100.0, 20.0, Some(1), None);
        found.sort();
        assert_eq!(found, vec![1, 2]);

        let mut found = grid.features_in_area(&kps, 105.0, 100.0, 20.0, None, Some(1));
        found.sort();
        assert_eq!(found, vec![0, 1]);
    }

    #[test]
    fn test_query_outside_image_is_empty() {
        let kps = keypoints();
        let grid = FeatureGrid::new(&kps, 640.0, 480.0);
        assert!(grid.features_in_area(&kps, -500.0, 100.0, 5.0, None, None).is_empty());
        assert!(grid.features_in_area(&kps, 2000.0, 2000.0, 5.0, None, None).is_empty());
        assert!(grid.features_in_area(&kps, f64::NAN, 0.0, 5.0, None, None).is_empty());
    }
}
