//! Segmentation parameters and their validation.

use crate::error::SegmentationError;
use crate::kernel::KernelVariant;

/// How per-tile crowns are reconciled across tile boundaries.
///
/// A crown that straddles a core boundary is computed by every tile that
/// sees it through a buffer; exactly one tile must claim it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StitchStrategy {
    /// Keep a clustered point iff the mean position of its cluster's modes
    /// falls in the tile core; keep a noise point iff its own mode does.
    #[default]
    ClusterCenter,
    /// Coarse label merging: crown ids are assigned by grouping modes whose
    /// XY coordinates round to the same whole meter, and a point is kept iff
    /// that rounded coordinate falls in the tile core.
    RoundedMode,
}

/// Parameters for the full crown segmentation pipeline.
///
/// The kernel ratios follow the AMS3D convention: the kernel cylinder of a
/// centroid at height `z` has diameter `crown_diameter_to_height * z` and
/// height `crown_height_to_height * z` (times an extra factor for the
/// `Improved` variant, see [`crate::kernel::IMPROVED_CYLINDER_HEIGHT_FACTOR`]).
#[derive(Debug, Clone)]
pub struct SegmentationParams {
    /// Ratio of crown diameter to tree height.
    pub crown_diameter_to_height: f64,
    /// Ratio of crown height to tree height.
    pub crown_height_to_height: f64,
    /// Maximum number of kernel steps per point.
    pub max_iterations: usize,
    /// Euclidean step length below which the kernel is considered converged.
    pub convergence_epsilon: f64,
    /// Kernel shape.
    pub kernel_variant: KernelVariant,
    /// Turn off distance weighting within the kernel: every point inside the
    /// cylinder contributes with weight 1.
    pub uniform_kernel: bool,
    /// Points below this height are dropped before mean shift.
    pub min_height: f64,
    /// Edge length of the square core tiles (m).
    pub core_width: f64,
    /// Width of the buffer strip copied from the 8 neighboring tiles (m).
    pub buffer_width: f64,
    /// Neighborhood radius of the mode clustering.
    pub cluster_eps: f64,
    /// Minimum number of *other* modes within `cluster_eps` for a mode to be
    /// a cluster core. With 0, every mode founds a cluster and no point is
    /// ever noise.
    pub cluster_min_pts: usize,
    /// Cross-tile reconciliation strategy.
    pub stitch_strategy: StitchStrategy,
    /// Fraction of available CPUs used as workers (at least one worker).
    pub worker_fraction: f64,
    /// Renumber crown ids densely from 1 after assembly.
    pub compact_crown_ids: bool,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            crown_diameter_to_height: 0.6,
            crown_height_to_height: 0.8,
            max_iterations: 200,
            convergence_epsilon: 0.01,
            kernel_variant: KernelVariant::Classic,
            uniform_kernel: false,
            min_height: 2.0,
            core_width: 30.0,
            buffer_width: 10.0,
            cluster_eps: 1.0,
            cluster_min_pts: 1,
            stitch_strategy: StitchStrategy::ClusterCenter,
            worker_fraction: 1.0,
            compact_crown_ids: false,
        }
    }
}

impl SegmentationParams {
    /// Check every parameter range. Called once before any work is
    /// dispatched; comparisons are written so that NaN fails them.
    pub fn validate(&self) -> Result<(), SegmentationError> {
        if !(self.crown_diameter_to_height > 0.0) {
            return Err(invalid(
                "crown_diameter_to_height must be positive",
                self.crown_diameter_to_height,
            ));
        }
        if !(self.crown_height_to_height > 0.0) {
            return Err(invalid(
                "crown_height_to_height must be positive",
                self.crown_height_to_height,
            ));
        }
        if self.max_iterations < 1 {
            return Err(SegmentationError::InvalidConfig(format!(
                "max_iterations must be at least 1, got {}",
                self.max_iterations
            )));
        }
        if !(self.min_height >= 0.0) {
            return Err(invalid("min_height must not be negative", self.min_height));
        }
        if !(self.core_width > 0.0) {
            return Err(invalid("core_width must be positive", self.core_width));
        }
        if !(self.buffer_width >= 0.0) {
            return Err(invalid(
                "buffer_width must not be negative",
                self.buffer_width,
            ));
        }
        if !(self.cluster_eps > 0.0) {
            return Err(invalid("cluster_eps must be positive", self.cluster_eps));
        }
        if !(self.worker_fraction > 0.0 && self.worker_fraction <= 1.0) {
            return Err(invalid(
                "worker_fraction must be in (0, 1]",
                self.worker_fraction,
            ));
        }
        Ok(())
    }
}

fn invalid(what: &str, value: f64) -> SegmentationError {
    SegmentationError::InvalidConfig(format!("{}, got {}", what, value))
}
