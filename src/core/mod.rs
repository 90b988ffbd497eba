//! Core data types and I/O operations.

pub mod dataset;
pub mod loaders;
pub mod matfile;
pub mod transforms;
pub mod writers;

#[cfg(test)]
pub(crate) mod fixtures;

pub use dataset::{FieldData, FieldRef, FieldShape, SegmentationStatus, WormDataset, WormField};
pub use loaders::{load_eigen_worms, load_normalized_data, EigenWorms, FrameCodeTable};
pub use matfile::{read_mat, MatArray, MatError, MatFile};
pub use transforms::SpatialAxis;
pub use writers::{write_mat, write_points_csv, WriteError};
