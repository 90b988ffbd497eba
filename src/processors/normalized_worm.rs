//! The normalized worm: dataset, eigenworm basis and partitions together.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};

use crate::config::WormConfig;
use crate::core::dataset::{FieldRef, WormDataset, WormField};
use crate::core::loaders::{
    bundled_frame_code_descriptions, load_eigen_worms, load_frame_code_descriptions,
    load_normalized_data, EigenWorms, FrameCodeTable,
};
use crate::core::transforms::{self, SpatialAxis};
use crate::error::Result;
use crate::processors::partitions::{slice_partition, PartitionData, PartitionLayout, PartitionMap};

/// A loaded normalized worm. Read-only once constructed.
#[derive(Debug, Clone)]
pub struct NormalizedWorm {
    data: WormDataset,
    eigen_worms: EigenWorms,
    partitions: PartitionMap,
    frame_codes: FrameCodeTable,
}

impl NormalizedWorm {
    /// Load the dataset and eigenworm basis from their files.
    ///
    /// `config` selects the record and basis variable names, the partition
    /// layout and the frame-code table.
    pub fn load<P, Q>(data_path: P, eigen_path: Q, config: &WormConfig) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let data = load_normalized_data(data_path.as_ref(), &config.record_name)?;
        let eigen_worms = load_eigen_worms(eigen_path.as_ref(), &config.eigenworm_variable)?;
        let frame_codes = match &config.frame_codes_path {
            Some(path) => load_frame_code_descriptions(path)?,
            None => bundled_frame_code_descriptions()?,
        };
        let layout = PartitionLayout::from_mimic_flag(config.mimic_old_behaviour);
        debug!("Using {:?} partition layout", layout);

        info!(
            "Normalized worm ready: {} frames, {} frame code descriptions",
            data.num_frames(),
            frame_codes.len()
        );
        Ok(Self::from_parts(
            data,
            eigen_worms,
            PartitionMap::new(layout),
            frame_codes,
        ))
    }

    /// Assemble a worm from already loaded parts.
    pub fn from_parts(
        data: WormDataset,
        eigen_worms: EigenWorms,
        partitions: PartitionMap,
        frame_codes: FrameCodeTable,
    ) -> Self {
        Self {
            data,
            eigen_worms,
            partitions,
            frame_codes,
        }
    }

    #[inline]
    pub fn data(&self) -> &WormDataset {
        &self.data
    }

    #[inline]
    pub fn eigen_worms(&self) -> &EigenWorms {
        &self.eigen_worms
    }

    #[inline]
    pub fn partitions(&self) -> &PartitionMap {
        &self.partitions
    }

    #[inline]
    pub fn frame_code_table(&self) -> &FrameCodeTable {
        &self.frame_codes
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.data.num_frames()
    }

    /// Borrow a field by name.
    pub fn field(&self, name: &str) -> Result<FieldRef<'_>> {
        self.data.field_by_name(name)
    }

    /// Points of partition `partition` in field `field`, for every frame.
    ///
    /// # Errors
    ///
    /// * [`WormError::UnknownPartition`](crate::error::WormError::UnknownPartition)
    ///   or [`WormError::UnknownField`](crate::error::WormError::UnknownField)
    ///   for names that do not exist.
    /// * [`WormError::ShapeMismatch`](crate::error::WormError::ShapeMismatch)
    ///   if the field has no point axis.
    pub fn get_partition(&self, partition: &str, field: &str, split: bool) -> Result<PartitionData> {
        let range = self.partitions.get(partition)?;
        let value = self.data.field_by_name(field)?;
        slice_partition(field, value, range, split)
    }

    /// [`get_partition`](Self::get_partition) on `skeletons`.
    pub fn get_skeleton_partition(&self, partition: &str, split: bool) -> Result<PartitionData> {
        self.get_partition(partition, WormField::Skeletons.as_str(), split)
    }

    /// The partitions grouped under subset `subset`.
    pub fn get_partition_subset(&self, subset: &str) -> Result<PartitionMap> {
        self.partitions.subset(subset)
    }

    /// Per-frame skeleton centroid, shape `(2, frames)`.
    pub fn centre(&self) -> Array2<f64> {
        transforms::centre(self.data.skeletons())
    }

    /// Per-frame skeleton orientation in degrees.
    pub fn angle(&self) -> Array1<f64> {
        transforms::angle(self.data.skeletons())
    }

    pub fn translate_to_centre(&self) -> Array3<f64> {
        transforms::translate_to_centre(self.data.skeletons())
    }

    pub fn rotate_and_translate(&self) -> Array3<f64> {
        transforms::rotate_and_translate(self.data.skeletons())
    }

    /// Skeletons with frame `f` rotated by `-angles_deg[f]` about the origin.
    pub fn rotate(&self, angles_deg: ArrayView1<'_, f64>) -> Result<Array3<f64>> {
        transforms::rotate_frames(self.data.skeletons(), angles_deg)
    }

    /// `(min, max)` of axis `axis` (0 = x, 1 = y) over a `(49, 2, n)` field.
    ///
    /// # Errors
    ///
    /// * [`WormError::InvalidAxis`](crate::error::WormError::InvalidAxis) for
    ///   an axis other than 0 or 1.
    /// * [`WormError::ShapeMismatch`](crate::error::WormError::ShapeMismatch)
    ///   if the field is not `(49, 2, n)`.
    pub fn position_limits(&self, axis: usize, field: &str) -> Result<(f64, f64)> {
        let axis = SpatialAxis::try_from(axis)?;
        let points = self.data.points_xy(field.parse()?)?;
        transforms::position_limits(points, axis)
    }

    /// Closed contour x coordinates, shape `(96, frames)`.
    pub fn contour_x(&self) -> Result<Array2<f64>> {
        self.contour(SpatialAxis::X)
    }

    /// Closed contour y coordinates, shape `(96, frames)`.
    pub fn contour_y(&self) -> Result<Array2<f64>> {
        self.contour(SpatialAxis::Y)
    }

    fn contour(&self, axis: SpatialAxis) -> Result<Array2<f64>> {
        transforms::contour(
            self.data.vulva_contours(),
            self.data.non_vulva_contours(),
            axis,
        )
    }

    pub fn skeleton_x(&self) -> ArrayView2<'_, f64> {
        transforms::axis_slice(self.data.skeletons(), SpatialAxis::X)
    }

    pub fn skeleton_y(&self) -> ArrayView2<'_, f64> {
        transforms::axis_slice(self.data.skeletons(), SpatialAxis::Y)
    }

    /// Human-readable description of a frame code.
    pub fn describe_frame_code(&self, code: i32) -> Option<&str> {
        self.frame_codes.describe(code)
    }

    /// Number of frames carrying each frame code.
    pub fn frame_code_counts(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for &code in self.data.frame_codes().iter() {
            *counts.entry(code).or_insert(0) += 1;
        }
        counts
    }
}
