//! Loader and geometric transforms for normalized worm data.
//!
//! This crate provides tools for:
//! - Decoding MATLAB Level 5 MAT-files (including compressed variables)
//! - Loading the normalized worm record and its eigenworm basis
//! - Slicing named skeleton partitions (head, neck, midbody, ...)
//! - Per-frame centroids, orientation, centering and rotation
//!
//! # Example
//!
//! ```no_run
//! use normalized_worm::{NormalizedWorm, WormConfig};
//!
//! let worm = NormalizedWorm::load("norm_obj.mat", "masterEigenWorms_N2.mat", &WormConfig::default()).unwrap();
//! let head = worm.get_skeleton_partition("head", false).unwrap();
//! let centres = worm.centre();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod processors;
pub mod visualization;

pub use config::{PlotConfig, WormConfig};
pub use error::{Result, WormError};
pub use processors::normalized_worm::NormalizedWorm;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
