//! Tiled parallel crown segmentation.
//!
//! Pipeline: split_cloud_buffered → per tile (height filter → mean shift →
//! mode labeling → core retention) on a worker pool → cross-tile id
//! renumbering. The top-level function [`segment_tree_crowns`] orchestrates
//! the full pipeline.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::clustering::{label_modes, NOISE};
use crate::config::{SegmentationParams, StitchStrategy};
use crate::error::SegmentationError;
use crate::mean_shift::mean_shift_cancellable;
use crate::point_cloud::{LabeledPoint, ModedPoint, Point3D};
use crate::tiling::{split_cloud_buffered, Tile};

/// Optional progress sink, invoked with (tiles_done, tiles_total).
pub type ProgressSink<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Labeled points a single tile claims for the final cloud.
#[derive(Debug, Clone)]
pub struct TileResult {
    pub ix: i64,
    pub iy: i64,
    /// Crown ids are 1-based and local to this tile; 0 is noise.
    pub points: Vec<LabeledPoint>,
}

// ---------------------------------------------------------------------------
// Top-level entry points
// ---------------------------------------------------------------------------

/// Segment a point cloud into tree crowns.
///
/// Returns one [`LabeledPoint`] per input point with `z >= min_height`,
/// carrying the point, its density mode, and a globally unique crown id
/// (0 = noise). Empty input yields an empty result.
pub fn segment_tree_crowns(
    points: &[Point3D],
    params: &SegmentationParams,
) -> Result<Vec<LabeledPoint>, SegmentationError> {
    segment_tree_crowns_with_progress(points, params, None)
}

/// Like [`segment_tree_crowns`], reporting tile completion to an optional
/// progress sink.
pub fn segment_tree_crowns_with_progress(
    points: &[Point3D],
    params: &SegmentationParams,
    progress: Option<ProgressSink<'_>>,
) -> Result<Vec<LabeledPoint>, SegmentationError> {
    params.validate()?;
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let tiles = split_cloud_buffered(points, params.core_width, params.buffer_width);
    let total = tiles.len();
    log::info!("segmenting {} points across {} tiles", points.len(), total);

    let workers = worker_count(params.worker_fraction);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| SegmentationError::ThreadPool(e.to_string()))?;

    let cancel = AtomicBool::new(false);
    let done = AtomicUsize::new(0);

    // The pool is joined when it goes out of scope, on every return path.
    let outcomes: Vec<Result<TileResult, SegmentationError>> = pool.install(|| {
        tiles
            .par_iter()
            .map(|tile| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(SegmentationError::Cancelled);
                }
                let result = match catch_unwind(AssertUnwindSafe(|| {
                    process_tile(tile, params, &cancel)
                })) {
                    Ok(r) => r,
                    Err(_) => Err(SegmentationError::WorkerPanic),
                };
                match result {
                    Ok(r) => {
                        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                        if let Some(sink) = progress {
                            sink(n, total);
                        }
                        Ok(r)
                    }
                    Err(e) => {
                        cancel.store(true, Ordering::Relaxed);
                        Err(e)
                    }
                }
            })
            .collect()
    });

    let mut results = Vec::with_capacity(outcomes.len());
    let mut first_error: Option<SegmentationError> = None;
    for outcome in outcomes {
        match outcome {
            Ok(r) => results.push(r),
            // Cancelled tasks are casualties of the first failure, not the
            // failure itself.
            Err(SegmentationError::Cancelled) => {}
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(assemble(results, params.compact_crown_ids))
}

fn worker_count(fraction: f64) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((fraction * cpus as f64).floor() as usize).max(1)
}

// ---------------------------------------------------------------------------
// Per-tile pipeline
// ---------------------------------------------------------------------------

fn process_tile(
    tile: &Tile,
    params: &SegmentationParams,
    cancel: &AtomicBool,
) -> Result<TileResult, SegmentationError> {
    // Height filter over core and buffer points alike.
    let kept: Vec<Point3D> = tile
        .points
        .iter()
        .filter(|p| p[2] >= params.min_height)
        .copied()
        .collect();
    if kept.is_empty() {
        log::debug!(
            "tile ({}, {}) has no points above min_height {}",
            tile.ix,
            tile.iy,
            params.min_height
        );
        return Ok(TileResult {
            ix: tile.ix,
            iy: tile.iy,
            points: Vec::new(),
        });
    }

    // Shift XY so the buffered region's min corner sits at the origin.
    // Kernel weights involve differences of coordinates; working near the
    // origin keeps them away from the precision loss of full UTM offsets.
    let offset_x = tile.core_x_lo - params.buffer_width;
    let offset_y = tile.core_y_lo - params.buffer_width;
    let shifted: Vec<Point3D> = kept
        .iter()
        .map(|p| [p[0] - offset_x, p[1] - offset_y, p[2]])
        .collect();

    let moded = mean_shift_cancellable(&shifted, params, cancel)
        .ok_or(SegmentationError::Cancelled)?;

    let points = match params.stitch_strategy {
        StitchStrategy::ClusterCenter => {
            stitch_cluster_center(tile, &moded, offset_x, offset_y, params)
        }
        StitchStrategy::RoundedMode => {
            stitch_rounded_mode(tile, &moded, offset_x, offset_y, params)
        }
    };

    Ok(TileResult {
        ix: tile.ix,
        iy: tile.iy,
        points,
    })
}

/// Un-shift a moded point back into world coordinates and attach its label.
fn into_labeled(m: &ModedPoint, offset_x: f64, offset_y: f64, crown_id: u32) -> LabeledPoint {
    LabeledPoint {
        x: m.x + offset_x,
        y: m.y + offset_y,
        z: m.z,
        mode_x: m.mode_x + offset_x,
        mode_y: m.mode_y + offset_y,
        mode_z: m.mode_z,
        crown_id,
    }
}

/// Default stitching: a crown belongs to the tile that contains the mean of
/// its mode positions; a noise point to the tile containing its own mode.
fn stitch_cluster_center(
    tile: &Tile,
    moded: &[ModedPoint],
    offset_x: f64,
    offset_y: f64,
    params: &SegmentationParams,
) -> Vec<LabeledPoint> {
    let modes: Vec<Point3D> = moded.iter().map(|m| m.mode()).collect();
    let labels = label_modes(&modes, params.cluster_eps, params.cluster_min_pts);

    let n_clusters = labels.iter().max().copied().unwrap_or(0) as usize;
    let mut center_x = vec![0.0_f64; n_clusters + 1];
    let mut center_y = vec![0.0_f64; n_clusters + 1];
    let mut count = vec![0_usize; n_clusters + 1];
    for (mode, &label) in modes.iter().zip(&labels) {
        if label != NOISE {
            center_x[label as usize] += mode[0];
            center_y[label as usize] += mode[1];
            count[label as usize] += 1;
        }
    }
    for c in 1..=n_clusters {
        center_x[c] /= count[c] as f64;
        center_y[c] /= count[c] as f64;
    }

    let mut out = Vec::new();
    for (m, &label) in moded.iter().zip(&labels) {
        let keep = if label == NOISE {
            tile.core_contains(m.mode_x + offset_x, m.mode_y + offset_y)
        } else {
            tile.core_contains(
                center_x[label as usize] + offset_x,
                center_y[label as usize] + offset_y,
            )
        };
        if keep {
            out.push(into_labeled(m, offset_x, offset_y, label));
        }
    }
    out
}

/// Alternative stitching: crown ids come from grouping modes by their XY
/// position rounded to the whole meter, and a point belongs to the tile
/// containing that rounded position.
fn stitch_rounded_mode(
    tile: &Tile,
    moded: &[ModedPoint],
    offset_x: f64,
    offset_y: f64,
    params: &SegmentationParams,
) -> Vec<LabeledPoint> {
    let keys: Vec<(i64, i64)> = moded
        .iter()
        .map(|m| {
            (
                (m.mode_x + offset_x).round() as i64,
                (m.mode_y + offset_y).round() as i64,
            )
        })
        .collect();

    let mut group_sizes: HashMap<(i64, i64), usize> = HashMap::new();
    for key in &keys {
        *group_sizes.entry(*key).or_insert(0) += 1;
    }

    // Ids in order of first appearance; groups too small to have
    // `cluster_min_pts` other members are noise.
    let mut ids: HashMap<(i64, i64), u32> = HashMap::new();
    let mut next_id: u32 = 1;
    let mut out = Vec::new();
    for (m, key) in moded.iter().zip(&keys) {
        if !tile.core_contains(key.0 as f64, key.1 as f64) {
            continue;
        }
        let label = if group_sizes[key] >= params.cluster_min_pts + 1 {
            *ids.entry(*key).or_insert_with(|| {
                let id = next_id;
                next_id += 1;
                id
            })
        } else {
            NOISE
        };
        out.push(into_labeled(m, offset_x, offset_y, label));
    }
    out
}

// ---------------------------------------------------------------------------
// Result assembly
// ---------------------------------------------------------------------------

/// Concatenate tile results into one cloud with globally unique crown ids.
///
/// Tiles are visited in (row, column) order; each tile's non-zero ids are
/// shifted past the previous maximum, so equal inputs always produce equal
/// outputs. Noise points keep id 0 and are appended after all crowns.
fn assemble(mut results: Vec<TileResult>, compact: bool) -> Vec<LabeledPoint> {
    results.sort_by_key(|r| (r.iy, r.ix));

    let mut out: Vec<LabeledPoint> = Vec::new();
    let mut noise: Vec<LabeledPoint> = Vec::new();
    let mut offset: u32 = 0;
    for result in results {
        let mut tile_max: u32 = 0;
        for mut p in result.points {
            if p.crown_id == NOISE {
                noise.push(p);
            } else {
                p.crown_id += offset;
                tile_max = tile_max.max(p.crown_id);
                out.push(p);
            }
        }
        if tile_max > 0 {
            offset = tile_max + 1;
        }
    }
    out.extend(noise);

    if compact {
        compact_ids(&mut out);
    }
    out
}

/// Renumber crown ids densely from 1, preserving first-appearance order.
fn compact_ids(points: &mut [LabeledPoint]) {
    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut next: u32 = 1;
    for p in points.iter_mut() {
        if p.crown_id == NOISE {
            continue;
        }
        p.crown_id = *remap.entry(p.crown_id).or_insert_with(|| {
            let id = next;
            next += 1;
            id
        });
    }
}
