//! Density-based clustering of mode positions into crown labels.
//!
//! Standard DBSCAN over the 3D mode cloud. Two points end up in the same
//! crown iff their modes are transitively eps-connected through core modes.
//! A core mode has at least `min_pts` *other* modes within `eps`; modes not
//! reachable from any core mode are labeled 0 ("noise"). With `min_pts` 0
//! every mode is a core mode and singleton crowns are possible.

use std::collections::{HashMap, VecDeque};

use crate::point_cloud::Point3D;

/// Label of points that belong to no crown.
pub const NOISE: u32 = 0;

const UNCLASSIFIED: u32 = u32::MAX;

/// Uniform voxel grid with cell size eps: all eps-neighbors of a point lie
/// in the 27-cell neighborhood of its voxel.
struct VoxelGrid {
    eps: f64,
    cells: HashMap<(i64, i64, i64), Vec<u32>>,
}

impl VoxelGrid {
    fn build(points: &[Point3D], eps: f64) -> Self {
        let mut cells: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            cells.entry(Self::voxel_of(p, eps)).or_default().push(i as u32);
        }
        Self { eps, cells }
    }

    #[inline]
    fn voxel_of(p: &Point3D, eps: f64) -> (i64, i64, i64) {
        (
            (p[0] / eps).floor() as i64,
            (p[1] / eps).floor() as i64,
            (p[2] / eps).floor() as i64,
        )
    }

    /// Indices of all points within eps of point `i`, excluding `i` itself,
    /// sorted ascending for deterministic expansion order.
    fn neighbors_of(&self, points: &[Point3D], i: u32, out: &mut Vec<u32>) {
        out.clear();
        let p = &points[i as usize];
        let (vx, vy, vz) = Self::voxel_of(p, self.eps);
        let eps_sq = self.eps * self.eps;
        for dz in -1..=1_i64 {
            for dy in -1..=1_i64 {
                for dx in -1..=1_i64 {
                    let Some(cell) = self.cells.get(&(vx + dx, vy + dy, vz + dz)) else {
                        continue;
                    };
                    for &j in cell {
                        if j == i {
                            continue;
                        }
                        let q = &points[j as usize];
                        let d_sq = (q[0] - p[0]).powi(2)
                            + (q[1] - p[1]).powi(2)
                            + (q[2] - p[2]).powi(2);
                        if d_sq <= eps_sq {
                            out.push(j);
                        }
                    }
                }
            }
        }
        out.sort_unstable();
    }
}

/// Assign a crown label to every mode position.
///
/// Returns one label per input mode, 1-based per cluster in discovery order,
/// 0 for noise. Only the partition is contractual; the assembler renumbers
/// labels across tiles.
pub fn label_modes(modes: &[Point3D], eps: f64, min_pts: usize) -> Vec<u32> {
    let n = modes.len();
    if n == 0 {
        return Vec::new();
    }
    let grid = VoxelGrid::build(modes, eps);
    let mut labels = vec![UNCLASSIFIED; n];
    let mut next_id: u32 = 1;
    let mut neighbors: Vec<u32> = Vec::new();
    let mut frontier: VecDeque<u32> = VecDeque::new();

    for i in 0..n as u32 {
        if labels[i as usize] != UNCLASSIFIED {
            continue;
        }
        grid.neighbors_of(modes, i, &mut neighbors);
        if neighbors.len() < min_pts {
            labels[i as usize] = NOISE;
            continue;
        }

        labels[i as usize] = next_id;
        frontier.clear();
        frontier.extend(neighbors.iter().copied());
        while let Some(j) = frontier.pop_front() {
            let j_us = j as usize;
            if labels[j_us] == NOISE {
                // Border point previously dismissed: absorb, do not expand.
                labels[j_us] = next_id;
                continue;
            }
            if labels[j_us] != UNCLASSIFIED {
                continue;
            }
            labels[j_us] = next_id;
            grid.neighbors_of(modes, j, &mut neighbors);
            if neighbors.len() >= min_pts {
                frontier.extend(neighbors.iter().copied());
            }
        }
        next_id += 1;
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(label_modes(&[], 1.0, 1).is_empty());
    }

    #[test]
    fn test_two_clusters() {
        let modes: Vec<Point3D> = vec![
            [0.0, 0.0, 10.0],
            [0.2, 0.0, 10.0],
            [0.4, 0.0, 10.0],
            [50.0, 0.0, 10.0],
            [50.3, 0.0, 10.0],
        ];
        let labels = label_modes(&modes, 1.0, 1);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
        assert!(labels.iter().all(|&l| l != NOISE));
    }

    #[test]
    fn test_isolated_point_is_noise() {
        let modes: Vec<Point3D> = vec![[0.0, 0.0, 10.0], [0.1, 0.0, 10.0], [500.0, 500.0, 10.0]];
        let labels = label_modes(&modes, 1.0, 1);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], NOISE);
        assert_eq!(labels[2], NOISE);
    }

    #[test]
    fn test_min_pts_zero_allows_singleton_clusters() {
        let modes: Vec<Point3D> = vec![[0.0, 0.0, 10.0], [100.0, 0.0, 10.0]];
        let labels = label_modes(&modes, 1.0, 0);
        assert_ne!(labels[0], NOISE);
        assert_ne!(labels[1], NOISE);
        assert_ne!(labels[0], labels[1]);
    }

    #[test]
    fn test_chain_is_transitively_connected() {
        // Consecutive points 0.9 apart: eps-connected as a chain.
        let modes: Vec<Point3D> = (0..6).map(|i| [i as f64 * 0.9, 0.0, 10.0]).collect();
        let labels = label_modes(&modes, 1.0, 1);
        assert!(labels.iter().all(|&l| l == labels[0] && l != NOISE));
    }

    #[test]
    fn test_distance_is_3d() {
        // Same XY, 5 m apart vertically: not neighbors at eps 1.
        let modes: Vec<Point3D> = vec![[0.0, 0.0, 10.0], [0.0, 0.0, 15.0]];
        let labels = label_modes(&modes, 1.0, 1);
        assert_eq!(labels[0], NOISE);
        assert_eq!(labels[1], NOISE);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let modes: Vec<Point3D> = (0..40)
            .map(|i| {
                let x = ((i * 31 + 5) % 17) as f64 * 0.3;
                let y = ((i * 13 + 2) % 19) as f64 * 0.3;
                [x, y, 10.0]
            })
            .collect();
        let a = label_modes(&modes, 0.5, 2);
        let b = label_modes(&modes, 0.5, 2);
        assert_eq!(a, b);
    }
}
