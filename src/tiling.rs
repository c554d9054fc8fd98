//! Buffered tiling of a point cloud.
//!
//! The XY extent is cut into disjoint square core tiles aligned to a grid
//! whose origin is the cloud minimum snapped down to a multiple of the core
//! width. Each tile additionally receives copies of the points of its 8
//! neighbors that lie within the buffer strip around its core, so kernels
//! near a core edge still see their full neighborhood.

use std::collections::HashMap;

use crate::point_cloud::{xy_bounds, Point3D};

/// One core tile plus its buffered point set.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Column index of the core in the tile grid.
    pub ix: i64,
    /// Row index of the core in the tile grid.
    pub iy: i64,
    /// Core region edges: `[x_lo, x_hi) × [y_lo, y_hi)`.
    pub core_x_lo: f64,
    pub core_x_hi: f64,
    pub core_y_lo: f64,
    pub core_y_hi: f64,
    /// Core points first (input order), then buffer points (input order).
    pub points: Vec<Point3D>,
    /// Per-point flag, true iff the point lies outside the core region.
    pub in_buffer: Vec<bool>,
}

impl Tile {
    /// Is (x, y) inside the core region?
    #[inline]
    pub fn core_contains(&self, x: f64, y: f64) -> bool {
        x >= self.core_x_lo && x < self.core_x_hi && y >= self.core_y_lo && y < self.core_y_hi
    }

    /// Number of core (non-buffer) points.
    pub fn n_core(&self) -> usize {
        self.in_buffer.iter().filter(|b| !**b).count()
    }
}

/// Split a cloud into core tiles with buffer halos.
///
/// A tile exists iff at least one point falls in its core; buffer points are
/// only copied into existing tiles. Points with non-finite X or Y have no
/// tile coordinate and are dropped. Tiles are returned sorted by (row,
/// column) index.
pub fn split_cloud_buffered(
    points: &[Point3D],
    core_width: f64,
    buffer_width: f64,
) -> Vec<Tile> {
    let Some((x_min, y_min, _, _)) = xy_bounds(points) else {
        return Vec::new();
    };
    if buffer_width > core_width {
        log::warn!(
            "buffer_width {} exceeds core_width {}; buffers only reach the 8 direct neighbors",
            buffer_width,
            core_width
        );
    }
    let x0 = (x_min / core_width).floor() * core_width;
    let y0 = (y_min / core_width).floor() * core_width;

    let key_of = |p: &Point3D| -> Option<(i64, i64)> {
        if !p[0].is_finite() || !p[1].is_finite() {
            return None;
        }
        Some((
            ((p[0] - x0) / core_width).floor() as i64,
            ((p[1] - y0) / core_width).floor() as i64,
        ))
    };

    // First pass: create a tile per occupied core cell and fill the cores.
    let mut index: HashMap<(i64, i64), usize> = HashMap::new();
    let mut tiles: Vec<Tile> = Vec::new();
    for p in points {
        let Some((ix, iy)) = key_of(p) else { continue };
        let slot = *index.entry((ix, iy)).or_insert_with(|| {
            tiles.push(Tile {
                ix,
                iy,
                core_x_lo: x0 + ix as f64 * core_width,
                core_x_hi: x0 + (ix + 1) as f64 * core_width,
                core_y_lo: y0 + iy as f64 * core_width,
                core_y_hi: y0 + (iy + 1) as f64 * core_width,
                points: Vec::new(),
                in_buffer: Vec::new(),
            });
            tiles.len() - 1
        });
        tiles[slot].points.push(*p);
        tiles[slot].in_buffer.push(false);
    }

    // Second pass: copy each point into the buffer of every existing
    // neighbor tile whose buffered region contains it.
    for p in points {
        let Some((ix, iy)) = key_of(p) else { continue };
        for dy in -1..=1_i64 {
            for dx in -1..=1_i64 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let Some(&slot) = index.get(&(ix + dx, iy + dy)) else {
                    continue;
                };
                let tile = &mut tiles[slot];
                if p[0] >= tile.core_x_lo - buffer_width
                    && p[0] < tile.core_x_hi + buffer_width
                    && p[1] >= tile.core_y_lo - buffer_width
                    && p[1] < tile.core_y_hi + buffer_width
                {
                    tile.points.push(*p);
                    tile.in_buffer.push(true);
                }
            }
        }
    }

    tiles.sort_by_key(|t| (t.iy, t.ix));
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cloud_yields_no_tiles() {
        assert!(split_cloud_buffered(&[], 10.0, 2.0).is_empty());
        assert!(split_cloud_buffered(&[[f64::NAN, 0.0, 1.0]], 10.0, 2.0).is_empty());
    }

    #[test]
    fn test_cores_are_disjoint_and_complete() {
        let pts: Vec<Point3D> = (0..50)
            .map(|i| {
                let x = ((i * 17) % 45) as f64;
                let y = ((i * 23) % 45) as f64;
                [x, y, 10.0]
            })
            .collect();
        let tiles = split_cloud_buffered(&pts, 15.0, 5.0);
        let total_core: usize = tiles.iter().map(|t| t.n_core()).sum();
        assert_eq!(total_core, pts.len(), "every point in exactly one core");
        for t in &tiles {
            for (p, &buf) in t.points.iter().zip(&t.in_buffer) {
                assert_eq!(
                    !buf,
                    t.core_contains(p[0], p[1]),
                    "in_buffer must mirror core membership"
                );
            }
        }
    }

    #[test]
    fn test_buffer_points_are_copied_from_neighbors() {
        // Two points in adjacent tiles, 4 m apart across the x = 10 edge.
        let pts: Vec<Point3D> = vec![[8.0, 5.0, 10.0], [12.0, 5.0, 10.0]];
        let tiles = split_cloud_buffered(&pts, 10.0, 5.0);
        assert_eq!(tiles.len(), 2);
        for t in &tiles {
            assert_eq!(t.points.len(), 2, "each tile sees both points");
            assert_eq!(t.n_core(), 1);
        }
    }

    #[test]
    fn test_buffer_respects_width() {
        // 12 m apart: outside a 5 m buffer.
        let pts: Vec<Point3D> = vec![[4.0, 5.0, 10.0], [16.0, 5.0, 10.0]];
        let tiles = split_cloud_buffered(&pts, 10.0, 5.0);
        assert_eq!(tiles.len(), 2);
        for t in &tiles {
            assert_eq!(t.points.len(), 1);
        }
    }

    #[test]
    fn test_corner_point_reaches_diagonal_neighbor() {
        let pts: Vec<Point3D> = vec![[9.5, 9.5, 10.0], [10.5, 10.5, 10.0]];
        let tiles = split_cloud_buffered(&pts, 10.0, 2.0);
        assert_eq!(tiles.len(), 2);
        // Each point falls in the diagonal neighbor's buffer.
        for t in &tiles {
            assert_eq!(t.points.len(), 2);
        }
    }

    #[test]
    fn test_grid_origin_is_snapped() {
        let pts: Vec<Point3D> = vec![[23.0, 7.0, 10.0]];
        let tiles = split_cloud_buffered(&pts, 10.0, 0.0);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].core_x_lo, 20.0);
        assert_eq!(tiles[0].core_x_hi, 30.0);
        assert_eq!(tiles[0].core_y_lo, 0.0);
    }

    #[test]
    fn test_colinear_strip_tiling() {
        // Three trees at x = 5, 20, 35 land in three different core tiles
        // and see their neighbors through 10 m buffers.
        let pts: Vec<Point3D> = vec![[5.0, 0.5, 10.0], [20.0, 0.5, 10.0], [35.0, 0.5, 10.0]];
        let tiles = split_cloud_buffered(&pts, 15.0, 10.0);
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles[0].n_core(), 1);
        assert_eq!(tiles[1].n_core(), 1);
        assert_eq!(tiles[2].n_core(), 1);
        // The middle tile sees all three, the outer tiles see two.
        assert_eq!(tiles[1].points.len(), 3);
        assert_eq!(tiles[0].points.len(), 2);
        assert_eq!(tiles[2].points.len(), 2);
    }
}
