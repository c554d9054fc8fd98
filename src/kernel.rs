//! Kernel functions for the adaptive mean shift: cylinder membership test,
//! Epanechnikov vertical weighting, and Gaussian horizontal weighting.
//!
//! Two kernel shapes exist behind the same interface. `Classic` reproduces
//! the published AMS3D weighting (Ferraz et al. 2012): a cylinder centered on
//! the centroid whose Epanechnikov mask selects the upper three quarters.
//! `Improved` replaces the mask with a symmetric cylinder shifted upward by
//! a sixth of its height, which yields the same upward bias without the
//! branching of the mask.

/// Extra height factor of the `Improved` cylinder. It has no counterpart in
/// `Classic`; the two constants are deliberately kept separate.
pub const IMPROVED_CYLINDER_HEIGHT_FACTOR: f64 = 0.75;

/// Decay rate of the Gaussian horizontal weight, equation (11) in
/// Ferraz et al. 2012.
const GAUSS_GAMMA: f64 = 5.0;

/// Which kernel shape the mean-shift iteration uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelVariant {
    /// Published AMS3D kernel: symmetric cylinder, upper-three-quarter mask.
    #[default]
    Classic,
    /// Shifted symmetric cylinder with a plain `1 - x²` Epanechnikov.
    Improved,
}

/// Dimensions of the adaptive kernel cylinder for one iteration.
///
/// `middle_z` is the vertical center of the cylinder, which for `Improved`
/// sits above the centroid.
#[derive(Debug, Clone, Copy)]
pub struct Cylinder {
    pub radius: f64,
    pub height: f64,
    pub middle_z: f64,
}

impl KernelVariant {
    /// Cylinder dimensions for a centroid at height `centroid_z`.
    ///
    /// Radius is half the crown diameter predicted from the centroid height;
    /// height is the predicted crown height.
    #[inline]
    pub fn cylinder(self, cd2th: f64, ch2th: f64, centroid_z: f64) -> Cylinder {
        let radius = cd2th * centroid_z * 0.5;
        match self {
            KernelVariant::Classic => Cylinder {
                radius,
                height: ch2th * centroid_z,
                middle_z: centroid_z,
            },
            KernelVariant::Improved => {
                let height = ch2th * centroid_z * IMPROVED_CYLINDER_HEIGHT_FACTOR;
                Cylinder {
                    radius,
                    height,
                    middle_z: centroid_z + height / 6.0,
                }
            }
        }
    }

    /// Vertical (Epanechnikov) weight of a point at height `point_z`.
    #[inline]
    pub fn vertical_weight(self, cylinder: &Cylinder, point_z: f64) -> f64 {
        match self {
            KernelVariant::Classic => {
                epanechnikov_function(cylinder.height, cylinder.middle_z, point_z)
            }
            KernelVariant::Improved => {
                let norm_distance =
                    (cylinder.middle_z - point_z).abs() / (cylinder.height * 0.5);
                epanechnikov(norm_distance)
            }
        }
    }
}

/// Does point (x, y, z) lie within the vertical cylinder of the given radius
/// and height centered at (center_x, center_y, center_z)?
#[inline]
pub fn in_cylinder(
    x: f64,
    y: f64,
    z: f64,
    radius: f64,
    height: f64,
    center_x: f64,
    center_y: f64,
    center_z: f64,
) -> bool {
    (x - center_x).powi(2) + (y - center_y).powi(2) <= radius * radius
        && z >= center_z - 0.5 * height
        && z <= center_z + 0.5 * height
}

/// Relative vertical distance of `point_z` to the nearer boundary of the
/// upper three quarters of a cylinder with height `height` and vertical
/// center `center_z`, normalized by half of the three-quarter band.
fn vertical_distance(height: f64, center_z: f64, point_z: f64) -> f64 {
    let bottom_distance = ((center_z - height / 4.0 - point_z) / (height * 3.0 / 8.0)).abs();
    let top_distance = ((center_z + height / 2.0 - point_z) / (height * 3.0 / 8.0)).abs();
    bottom_distance.min(top_distance)
}

/// 1-0 mask for the upper three quarters of the cylinder.
fn vertical_mask(height: f64, center_z: f64, point_z: f64) -> f64 {
    if point_z >= center_z - height / 4.0 && point_z <= center_z + height / 2.0 {
        1.0
    } else {
        0.0
    }
}

/// Epanechnikov weighting of a point's vertical position in the upper three
/// quarters of the cylinder. Zero outside the band.
pub fn epanechnikov_function(height: f64, center_z: f64, point_z: f64) -> f64 {
    vertical_mask(height, center_z, point_z)
        * (1.0 - (1.0 - vertical_distance(height, center_z, point_z)).powi(2))
}

/// The Epanechnikov profile `1 - x²`, equation (14) in Ferraz et al. 2012.
#[inline]
pub fn epanechnikov(x: f64) -> f64 {
    1.0 - x * x
}

/// Gauss weighting of a point's horizontal position in the cylinder.
pub fn gauss_function(
    radius: f64,
    center_x: f64,
    center_y: f64,
    point_x: f64,
    point_y: f64,
) -> f64 {
    let norm_distance = (point_x - center_x).hypot(point_y - center_y) / radius;
    gauss(norm_distance)
}

/// The Gaussian profile `exp(-5 x²)`.
#[inline]
pub fn gauss(x: f64) -> f64 {
    (-GAUSS_GAMMA * x * x).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_cylinder_membership() {
        // Radius 2, height 4, centered at origin height 10.
        assert!(in_cylinder(1.0, 1.0, 10.0, 2.0, 4.0, 0.0, 0.0, 10.0));
        // On the lateral boundary (distance == radius) counts as inside.
        assert!(in_cylinder(2.0, 0.0, 10.0, 2.0, 4.0, 0.0, 0.0, 10.0));
        assert!(!in_cylinder(2.1, 0.0, 10.0, 2.0, 4.0, 0.0, 0.0, 10.0));
        // Vertical extent is [8, 12].
        assert!(in_cylinder(0.0, 0.0, 8.0, 2.0, 4.0, 0.0, 0.0, 10.0));
        assert!(in_cylinder(0.0, 0.0, 12.0, 2.0, 4.0, 0.0, 0.0, 10.0));
        assert!(!in_cylinder(0.0, 0.0, 12.5, 2.0, 4.0, 0.0, 0.0, 10.0));
    }

    #[test]
    fn test_classic_mask_zeroes_lower_quarter() {
        // Height 8, center 10: the mask covers [8, 14] while the full
        // cylinder extends down to 6.
        assert_eq!(epanechnikov_function(8.0, 10.0, 7.0), 0.0);
        assert!(epanechnikov_function(8.0, 10.0, 9.0) > 0.0);
    }

    #[test]
    fn test_classic_weight_vanishes_on_band_edges() {
        let h = 8.0;
        let cz = 10.0;
        // Band edges: cz - h/4 = 8 and cz + h/2 = 14.
        assert!(epanechnikov_function(h, cz, 8.0).abs() < 1e-12);
        assert!(epanechnikov_function(h, cz, 14.0).abs() < 1e-12);
        // Band midpoint cz + h/8 = 11 has the maximal weight 1.
        assert!((epanechnikov_function(h, cz, 11.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_improved_cylinder_is_shifted_and_shorter() {
        let cyl = KernelVariant::Improved.cylinder(0.5, 1.0, 12.0);
        let classic = KernelVariant::Classic.cylinder(0.5, 1.0, 12.0);
        assert_eq!(cyl.radius, classic.radius);
        assert!((cyl.height - 12.0 * IMPROVED_CYLINDER_HEIGHT_FACTOR).abs() < 1e-12);
        assert!((cyl.middle_z - (12.0 + cyl.height / 6.0)).abs() < 1e-12);
    }

    #[test]
    fn test_improved_weight_symmetric_about_middle() {
        let cyl = KernelVariant::Improved.cylinder(0.5, 1.0, 12.0);
        let up = KernelVariant::Improved.vertical_weight(&cyl, cyl.middle_z + 1.0);
        let down = KernelVariant::Improved.vertical_weight(&cyl, cyl.middle_z - 1.0);
        assert!((up - down).abs() < 1e-12);
        let center = KernelVariant::Improved.vertical_weight(&cyl, cyl.middle_z);
        assert!((center - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gauss_profile() {
        assert!((gauss(0.0) - 1.0).abs() < 1e-12);
        assert!((gauss(1.0) - (-5.0f64).exp()).abs() < 1e-15);
        assert!((gauss_function(2.0, 0.0, 0.0, 2.0, 0.0) - (-5.0f64).exp()).abs() < 1e-15);
    }

    #[test]
    fn test_kernel_radius_scales_with_height() {
        let a = KernelVariant::Classic.cylinder(0.6, 0.8, 10.0);
        let b = KernelVariant::Classic.cylinder(0.6, 0.8, 20.0);
        assert!((b.radius - 2.0 * a.radius).abs() < 1e-12);
        assert!((b.height - 2.0 * a.height).abs() < 1e-12);
    }
}
