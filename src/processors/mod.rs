//! Data processing modules.

pub mod normalized_worm;
pub mod partitions;

// Re-export key types for convenience
pub use normalized_worm::NormalizedWorm;
pub use partitions::{
    slice_partition, PartitionData, PartitionLayout, PartitionMap, PartitionRange,
    PARTITION_SUBSETS,
};
