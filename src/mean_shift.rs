//! Adaptive mean-shift engine.
//!
//! For each point, the kernel cylinder starts on the point and is repeatedly
//! moved to the weighted centroid of the points it contains until it stops
//! moving (or the iteration cap is hit). The cylinder dimensions are
//! recomputed from the centroid height on every step, which is what makes
//! the kernel adaptive.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::SegmentationParams;
use crate::kernel::{gauss_function, in_cylinder, Cylinder, KernelVariant};
use crate::point_cloud::{max_z, xy_bounds, ModedPoint, Point3D};

// ---------------------------------------------------------------------------
// Planar uniform grid
// ---------------------------------------------------------------------------

/// Uniform XY grid over the cloud, keyed on the largest possible kernel
/// radius. Mode heights are convex combinations of point heights, so the
/// centroid never climbs above the cloud's maximum Z and the kernel radius
/// never exceeds the cell size; all candidates of any query are therefore
/// inside the 3×3 cell neighborhood.
struct PlanarGrid {
    cell: f64,
    x0: f64,
    y0: f64,
    nx: usize,
    ny: usize,
    cells: Vec<Vec<u32>>,
}

impl PlanarGrid {
    /// Build the grid, or `None` when the cell size is degenerate (empty
    /// cloud or all heights at zero) and a full scan must be used instead.
    fn build(points: &[Point3D], cell: f64) -> Option<Self> {
        if !(cell > 0.0) {
            return None;
        }
        let (x_min, y_min, x_max, y_max) = xy_bounds(points)?;
        let nx = (((x_max - x_min) / cell).floor() as usize) + 1;
        let ny = (((y_max - y_min) / cell).floor() as usize) + 1;
        // A sparse cloud with a tiny kernel would ask for far more cells
        // than points; the full scan is the better tool there.
        let n_cells = nx.checked_mul(ny)?;
        if n_cells > 16 * points.len().max(4096) {
            return None;
        }
        let mut cells = vec![Vec::new(); n_cells];
        for (i, p) in points.iter().enumerate() {
            let (gx, gy) = Self::cell_of(x_min, y_min, cell, nx, ny, p[0], p[1]);
            cells[gy * nx + gx].push(i as u32);
        }
        Some(Self {
            cell,
            x0: x_min,
            y0: y_min,
            nx,
            ny,
            cells,
        })
    }

    #[inline]
    fn cell_of(
        x0: f64,
        y0: f64,
        cell: f64,
        nx: usize,
        ny: usize,
        x: f64,
        y: f64,
    ) -> (usize, usize) {
        let gx = (((x - x0) / cell).floor() as isize).clamp(0, nx as isize - 1) as usize;
        let gy = (((y - y0) / cell).floor() as isize).clamp(0, ny as isize - 1) as usize;
        (gx, gy)
    }

    /// Collect every candidate index in the 3×3 neighborhood of (x, y),
    /// sorted ascending so that accumulation visits points in input order
    /// and matches a full scan bit for bit.
    fn gather(&self, x: f64, y: f64, out: &mut Vec<u32>) {
        out.clear();
        let (gx, gy) = Self::cell_of(self.x0, self.y0, self.cell, self.nx, self.ny, x, y);
        let gx = gx as isize;
        let gy = gy as isize;
        for cy in (gy - 1).max(0)..=(gy + 1).min(self.ny as isize - 1) {
            for cx in (gx - 1).max(0)..=(gx + 1).min(self.nx as isize - 1) {
                out.extend_from_slice(&self.cells[cy as usize * self.nx + cx as usize]);
            }
        }
        out.sort_unstable();
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compute the density mode of every point in the cloud.
///
/// Points are processed independently and in parallel; the result order
/// matches the input order. Non-convergence within `max_iterations` is not
/// an error: the last centroid is emitted as the mode.
pub fn mean_shift(points: &[Point3D], params: &SegmentationParams) -> Vec<ModedPoint> {
    let never = AtomicBool::new(false);
    // The flag is never raised, so the engine cannot return None here.
    mean_shift_cancellable(points, params, &never).unwrap_or_default()
}

/// Like [`mean_shift`] but checks a cooperative cancellation flag between
/// points. Returns `None` when cancelled; the partial result is discarded.
pub(crate) fn mean_shift_cancellable(
    points: &[Point3D],
    params: &SegmentationParams,
    cancel: &AtomicBool,
) -> Option<Vec<ModedPoint>> {
    mean_shift_impl(points, params, cancel, true)
}

fn mean_shift_impl(
    points: &[Point3D],
    params: &SegmentationParams,
    cancel: &AtomicBool,
    use_grid: bool,
) -> Option<Vec<ModedPoint>> {
    if points.is_empty() {
        return Some(Vec::new());
    }
    let grid = if use_grid {
        let r_max = max_z(points)
            .map(|z| params.crown_diameter_to_height * z * 0.5)
            .unwrap_or(0.0);
        PlanarGrid::build(points, r_max)
    } else {
        None
    };

    points
        .par_iter()
        .map(|p| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            Some(shift_point(points, grid.as_ref(), p, params))
        })
        .collect()
}

/// Weight of a candidate point under the current cylinder, or `None` when
/// the point is outside.
#[inline]
fn point_weight(
    variant: KernelVariant,
    uniform: bool,
    cylinder: &Cylinder,
    cx: f64,
    cy: f64,
    p: &Point3D,
) -> Option<f64> {
    if !in_cylinder(
        p[0],
        p[1],
        p[2],
        cylinder.radius,
        cylinder.height,
        cx,
        cy,
        cylinder.middle_z,
    ) {
        return None;
    }
    if uniform {
        return Some(1.0);
    }
    let vertical = variant.vertical_weight(cylinder, p[2]);
    let horizontal = gauss_function(cylinder.radius, cx, cy, p[0], p[1]);
    Some(vertical * horizontal)
}

/// Iterate the kernel of a single point to its mode.
fn shift_point(
    points: &[Point3D],
    grid: Option<&PlanarGrid>,
    start: &Point3D,
    params: &SegmentationParams,
) -> ModedPoint {
    let variant = params.kernel_variant;
    let mut cx = start[0];
    let mut cy = start[1];
    let mut cz = start[2];
    let mut candidates: Vec<u32> = Vec::new();

    for _ in 0..params.max_iterations {
        let old_x = cx;
        let old_y = cy;
        let old_z = cz;

        let cylinder = variant.cylinder(
            params.crown_diameter_to_height,
            params.crown_height_to_height,
            cz,
        );
        // Degenerate kernel (centroid at or below the ground): stop here.
        if !(cylinder.radius > 0.0) {
            break;
        }

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_z = 0.0;
        let mut sum_w = 0.0;
        match grid {
            Some(g) => {
                g.gather(cx, cy, &mut candidates);
                for &j in &candidates {
                    let p = &points[j as usize];
                    if let Some(w) = point_weight(variant, params.uniform_kernel, &cylinder, cx, cy, p)
                    {
                        sum_x += w * p[0];
                        sum_y += w * p[1];
                        sum_z += w * p[2];
                        sum_w += w;
                    }
                }
            }
            None => {
                for p in points {
                    if let Some(w) = point_weight(variant, params.uniform_kernel, &cylinder, cx, cy, p)
                    {
                        sum_x += w * p[0];
                        sum_y += w * p[1];
                        sum_z += w * p[2];
                        sum_w += w;
                    }
                }
            }
        }

        // Empty kernel: keep the previous centroid and stop.
        if sum_w == 0.0 {
            break;
        }

        cx = sum_x / sum_w;
        cy = sum_y / sum_w;
        cz = sum_z / sum_w;

        let step = ((cx - old_x).powi(2) + (cy - old_y).powi(2) + (cz - old_z).powi(2)).sqrt();
        if step <= params.convergence_epsilon {
            break;
        }
    }

    ModedPoint {
        x: start[0],
        y: start[1],
        z: start[2],
        mode_x: cx,
        mode_y: cy,
        mode_z: cz,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SegmentationParams {
        SegmentationParams {
            crown_diameter_to_height: 0.5,
            crown_height_to_height: 1.0,
            min_height: 0.0,
            ..SegmentationParams::default()
        }
    }

    /// Deterministic scattered cloud built from integer arithmetic.
    fn scattered_cloud(n: usize) -> Vec<Point3D> {
        (0..n)
            .map(|i| {
                let x = ((i * 37 + 11) % 100) as f64 * 0.37;
                let y = ((i * 53 + 7) % 100) as f64 * 0.41;
                let z = 5.0 + ((i * 29 + 3) % 80) as f64 * 0.2;
                [x, y, z]
            })
            .collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(mean_shift(&[], &params()).is_empty());
    }

    #[test]
    fn test_single_tower_converges() {
        let pts: Vec<Point3D> = vec![[0.0, 0.0, 10.0], [0.0, 0.0, 11.0], [0.0, 0.0, 12.0]];
        let modes = mean_shift(&pts, &params());
        assert_eq!(modes.len(), 3);
        for a in &modes {
            for b in &modes {
                let d = ((a.mode_x - b.mode_x).powi(2)
                    + (a.mode_y - b.mode_y).powi(2)
                    + (a.mode_z - b.mode_z).powi(2))
                .sqrt();
                assert!(d < 0.1, "modes should coincide, distance {}", d);
            }
        }
    }

    #[test]
    fn test_two_far_towers_keep_distinct_modes() {
        let pts: Vec<Point3D> = vec![[0.0, 0.0, 10.0], [100.0, 0.0, 10.0]];
        let modes = mean_shift(&pts, &params());
        let d = (modes[0].mode_x - modes[1].mode_x).abs();
        assert!(d > 50.0, "well separated towers must not merge, d = {}", d);
    }

    #[test]
    fn test_iteration_cap_is_honored() {
        // A lone point is its own kernel content: one iteration moves the
        // centroid nowhere, and the cap of 1 must not error.
        let p = SegmentationParams {
            max_iterations: 1,
            ..params()
        };
        let modes = mean_shift(&[[0.0, 0.0, 1000.0]], &p);
        assert_eq!(modes.len(), 1);
        assert!((modes[0].mode_x - 0.0).abs() < 1e-12);
        assert!((modes[0].mode_y - 0.0).abs() < 1e-12);
        assert!((modes[0].mode_z - 1000.0).abs() < 1e-12);
    }

    #[test]
    fn test_grid_matches_full_scan_bitwise() {
        let pts = scattered_cloud(120);
        let p = params();
        let never = AtomicBool::new(false);
        let with_grid = mean_shift_impl(&pts, &p, &never, true).unwrap();
        let full_scan = mean_shift_impl(&pts, &p, &never, false).unwrap();
        for (a, b) in with_grid.iter().zip(&full_scan) {
            assert_eq!(a.mode_x.to_bits(), b.mode_x.to_bits());
            assert_eq!(a.mode_y.to_bits(), b.mode_y.to_bits());
            assert_eq!(a.mode_z.to_bits(), b.mode_z.to_bits());
        }
    }

    #[test]
    fn test_grid_matches_full_scan_improved_kernel() {
        let pts = scattered_cloud(80);
        let p = SegmentationParams {
            kernel_variant: KernelVariant::Improved,
            ..params()
        };
        let never = AtomicBool::new(false);
        let with_grid = mean_shift_impl(&pts, &p, &never, true).unwrap();
        let full_scan = mean_shift_impl(&pts, &p, &never, false).unwrap();
        for (a, b) in with_grid.iter().zip(&full_scan) {
            assert_eq!(a.mode_z.to_bits(), b.mode_z.to_bits());
        }
    }

    #[test]
    fn test_translation_invariance() {
        let pts = scattered_cloud(60);
        let shifted: Vec<Point3D> = pts.iter().map(|p| [p[0] + 250.0, p[1] - 80.0, p[2]]).collect();
        // A tight epsilon makes both runs walk the same number of steps, so
        // the comparison is not at the mercy of a razor-edge halting test.
        let p = SegmentationParams {
            convergence_epsilon: 1e-9,
            ..params()
        };
        let base = mean_shift(&pts, &p);
        let moved = mean_shift(&shifted, &p);
        for (a, b) in base.iter().zip(&moved) {
            assert!((b.mode_x - a.mode_x - 250.0).abs() < 1e-6);
            assert!((b.mode_y - a.mode_y + 80.0).abs() < 1e-6);
            assert!((b.mode_z - a.mode_z).abs() < 1e-6);
        }
    }

    #[test]
    fn test_modes_scale_with_the_cloud() {
        // Scaling the whole cloud by 2 scales the kernel (radius and height
        // are proportional to z) and therefore the modes.
        let pts = scattered_cloud(60);
        let doubled: Vec<Point3D> = pts.iter().map(|p| [p[0] * 2.0, p[1] * 2.0, p[2] * 2.0]).collect();
        let p = params();
        let base = mean_shift(&pts, &p);
        let scaled = mean_shift(&doubled, &p);
        for (a, b) in base.iter().zip(&scaled) {
            assert!((b.mode_x - 2.0 * a.mode_x).abs() < 0.05);
            assert!((b.mode_y - 2.0 * a.mode_y).abs() < 0.05);
            assert!((b.mode_z - 2.0 * a.mode_z).abs() < 0.05);
        }
    }

    #[test]
    fn test_uniform_kernel_averages_members() {
        let p = SegmentationParams {
            uniform_kernel: true,
            ..params()
        };
        let pts: Vec<Point3D> = vec![[0.0, 0.0, 10.0], [0.0, 0.0, 11.0]];
        let modes = mean_shift(&pts, &p);
        // Both points always see each other, so both modes settle on the
        // unweighted average height.
        assert!((modes[0].mode_z - 10.5).abs() < 0.05);
        assert!((modes[1].mode_z - 10.5).abs() < 0.05);
    }
}
