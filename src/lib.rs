//! # meanshiftr — tree crown delineation by adaptive mean shift (AMS3D)
//!
//! Individual tree crown delineation from airborne LiDAR point clouds.
//! Rust port of the R package MeanShiftR; the algorithm is Adaptive Mean
//! Shift 3D after Ferraz et al. 2012.
//!
//! This crate provides:
//! - **Mean-shift engine**: [`mean_shift`] moves an adaptive cylindrical
//!   kernel from every point to its local density mode.
//! - **Tiled parallel pipeline**: [`segment_tree_crowns`] splits a large
//!   cloud into buffered tiles, runs the engine on a worker pool, clusters
//!   modes into crowns and stitches a globally consistent labeling.
//! - **Building blocks**: [`split_cloud_buffered`], [`label_modes`].
//!
//! Reference: Ferraz, A. et al. 2012. *3-D mapping of a multi-layered
//! Mediterranean forest using ALS data*. Remote Sensing of Environment 121.

pub mod clustering;
pub mod config;
pub mod crown_segmentation;
pub mod error;
pub mod kernel;
pub mod mean_shift;
pub mod point_cloud;
pub mod tiling;

pub use clustering::{label_modes, NOISE};
pub use config::{SegmentationParams, StitchStrategy};
pub use crown_segmentation::{
    segment_tree_crowns, segment_tree_crowns_with_progress, TileResult,
};
pub use error::SegmentationError;
pub use kernel::KernelVariant;
pub use mean_shift::mean_shift;
pub use point_cloud::{LabeledPoint, ModedPoint, Point3D};
pub use tiling::{split_cloud_buffered, Tile};
