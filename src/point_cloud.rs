//! Point cloud primitives shared by the whole pipeline.

/// A 3D point: (x, y, z). One LiDAR return.
pub type Point3D = [f64; 3];

/// A point together with the density mode its kernel converged to.
#[derive(Debug, Clone, PartialEq)]
pub struct ModedPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// X coordinate of the mode.
    pub mode_x: f64,
    /// Y coordinate of the mode.
    pub mode_y: f64,
    /// Z coordinate of the mode.
    pub mode_z: f64,
}

impl ModedPoint {
    /// The mode position as a point.
    #[inline]
    pub fn mode(&self) -> Point3D {
        [self.mode_x, self.mode_y, self.mode_z]
    }
}

/// A point with its mode and final crown id.
///
/// `crown_id` 0 means the point was not absorbed by any crown ("noise").
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub mode_x: f64,
    pub mode_y: f64,
    pub mode_z: f64,
    /// Crown id (1-based, 0 = unclustered).
    pub crown_id: u32,
}

/// XY bounding box of a cloud: (x_min, y_min, x_max, y_max).
///
/// Points with non-finite X or Y are ignored. Returns `None` when no point
/// has finite planar coordinates.
pub fn xy_bounds(points: &[Point3D]) -> Option<(f64, f64, f64, f64)> {
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for p in points {
        if !p[0].is_finite() || !p[1].is_finite() {
            continue;
        }
        bounds = Some(match bounds {
            None => (p[0], p[1], p[0], p[1]),
            Some((x0, y0, x1, y1)) => (x0.min(p[0]), y0.min(p[1]), x1.max(p[0]), y1.max(p[1])),
        });
    }
    bounds
}

/// Highest finite Z in the cloud, or `None` for an empty cloud.
pub fn max_z(points: &[Point3D]) -> Option<f64> {
    points
        .iter()
        .map(|p| p[2])
        .filter(|z| z.is_finite())
        .fold(None, |acc, z| Some(acc.map_or(z, |m: f64| m.max(z))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xy_bounds() {
        let pts: Vec<Point3D> = vec![[1.0, 2.0, 5.0], [-3.0, 7.0, 1.0], [0.0, 0.0, 2.0]];
        assert_eq!(xy_bounds(&pts), Some((-3.0, 0.0, 1.0, 7.0)));
    }

    #[test]
    fn test_xy_bounds_skips_non_finite() {
        let pts: Vec<Point3D> = vec![[f64::NAN, 2.0, 5.0], [1.0, 1.0, 1.0]];
        assert_eq!(xy_bounds(&pts), Some((1.0, 1.0, 1.0, 1.0)));
        assert_eq!(xy_bounds(&[[f64::NAN, f64::NAN, 0.0]]), None);
    }

    #[test]
    fn test_max_z() {
        assert_eq!(max_z(&[[0.0, 0.0, 3.0], [0.0, 0.0, 9.5]]), Some(9.5));
        assert_eq!(max_z(&[]), None);
    }
}
