//! Named partitions of the 49-point skeleton.
//!
//! A partition is a half-open range of point indices (`head` is points
//! 0..8, `tail` is 41..49, ...). Subsets group partitions into coarser
//! regions such as `first_third`.

use std::fmt;
use std::ops::Range;

use ndarray::{s, Array2, Array3};

use crate::core::dataset::{FieldRef, FieldShape, NUM_SKELETON_POINTS};
use crate::error::{Result, WormError};

/// Half-open range `[start, end)` of skeleton point indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    pub start: usize,
    pub end: usize,
}

impl PartitionRange {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Which midbody range the partition map uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionLayout {
    /// `midbody` is [16, 33).
    #[default]
    Standard,
    /// `midbody` is [20, 29), as older analyses used.
    Legacy,
}

impl PartitionLayout {
    pub fn from_mimic_flag(mimic_old_behaviour: bool) -> Self {
        if mimic_old_behaviour {
            PartitionLayout::Legacy
        } else {
            PartitionLayout::Standard
        }
    }

    fn midbody(self) -> PartitionRange {
        match self {
            PartitionLayout::Standard => PartitionRange::new(16, 33),
            PartitionLayout::Legacy => PartitionRange::new(20, 29),
        }
    }
}

/// Subset name to the partitions it groups.
pub static PARTITION_SUBSETS: [(&str, &[&str]); 5] = [
    ("normal", &["head", "neck", "midbody", "hips", "tail"]),
    ("first_third", &["head", "neck"]),
    ("second_third", &["midbody"]),
    ("last_third", &["hips", "tail"]),
    ("all", &["all"]),
];

/// Partition name to point range, in a fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMap {
    layout: PartitionLayout,
    ranges: Vec<(&'static str, PartitionRange)>,
}

impl PartitionMap {
    /// The named skeleton partitions for `layout`.
    ///
    /// `neck` is points `[8, 16)`. Earlier partition tables listed `neck` a
    /// second time as `(7, -1)` and that later entry took precedence, so
    /// analyses built on them saw `neck` as points `[7, 48)`. Callers that
    /// need the wide neck should use `PartitionRange::new(7, 48)` directly.
    pub fn new(layout: PartitionLayout) -> Self {
        let ranges = vec![
            ("head", PartitionRange::new(0, 8)),
            ("neck", PartitionRange::new(8, 16)),
            ("midbody", layout.midbody()),
            ("hips", PartitionRange::new(33, 41)),
            ("tail", PartitionRange::new(41, 49)),
            ("head_tip", PartitionRange::new(0, 4)),
            ("head_base", PartitionRange::new(4, 8)),
            ("tail_base", PartitionRange::new(40, 45)),
            ("tail_tip", PartitionRange::new(45, 49)),
            ("nose", PartitionRange::new(3, NUM_SKELETON_POINTS - 1)),
            ("all", PartitionRange::new(0, NUM_SKELETON_POINTS)),
            ("body", PartitionRange::new(8, 41)),
        ];
        Self { layout, ranges }
    }

    #[inline]
    pub fn layout(&self) -> PartitionLayout {
        self.layout
    }

    /// Range of partition `name`.
    ///
    /// # Errors
    ///
    /// [`WormError::UnknownPartition`] if the map has no such partition.
    pub fn get(&self, name: &str) -> Result<PartitionRange> {
        self.ranges
            .iter()
            .find(|(key, _)| *key == name)
            .map(|&(_, range)| range)
            .ok_or_else(|| WormError::UnknownPartition(name.to_string()))
    }

    /// The map restricted to the partitions of subset `name`.
    ///
    /// # Errors
    ///
    /// [`WormError::UnknownSubset`] if no subset has that name.
    pub fn subset(&self, name: &str) -> Result<PartitionMap> {
        let members = PARTITION_SUBSETS
            .iter()
            .find(|(key, _)| *key == name)
            .map(|&(_, members)| members)
            .ok_or_else(|| WormError::UnknownSubset(name.to_string()))?;

        let ranges = members
            .iter()
            .map(|&member| self.get(member).map(|range| (member, range)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PartitionMap {
            layout: self.layout,
            ranges,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, PartitionRange)> + '_ {
        self.ranges.iter().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ranges.iter().map(|&(name, _)| name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl Default for PartitionMap {
    fn default() -> Self {
        Self::new(PartitionLayout::default())
    }
}

/// Names of every partition subset.
pub fn subset_names() -> impl Iterator<Item = &'static str> {
    PARTITION_SUBSETS.iter().map(|&(name, _)| name)
}

/// Points of one partition, for every frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionData {
    /// `(len, 2, frames)` slice of an x/y field.
    PointsXy(Array3<f64>),
    /// `(len, frames)` slice of a per-point field.
    Points(Array2<f64>),
    /// x and y of an x/y field, each `(len, frames)`.
    Split { x: Array2<f64>, y: Array2<f64> },
}

impl PartitionData {
    /// Length of the point axis.
    pub fn num_points(&self) -> usize {
        match self {
            PartitionData::PointsXy(values) => values.dim().0,
            PartitionData::Points(values) => values.dim().0,
            PartitionData::Split { x, .. } => x.dim().0,
        }
    }

    pub fn num_frames(&self) -> usize {
        match self {
            PartitionData::PointsXy(values) => values.dim().2,
            PartitionData::Points(values) => values.dim().1,
            PartitionData::Split { x, .. } => x.dim().1,
        }
    }
}

/// Slice `range` out of the point axis of `value`.
///
/// With `split` set, an x/y field is returned as separate x and y arrays.
///
/// # Errors
///
/// [`WormError::ShapeMismatch`] if the field has no point axis, or if
/// `split` is requested for a field without an x/y axis.
pub fn slice_partition(
    field_name: &str,
    value: FieldRef<'_>,
    range: PartitionRange,
    split: bool,
) -> Result<PartitionData> {
    let points = range.as_range();
    match value {
        FieldRef::PointsXy(values) if split => Ok(PartitionData::Split {
            x: values.slice(s![points.clone(), 0, ..]).to_owned(),
            y: values.slice(s![points, 1, ..]).to_owned(),
        }),
        FieldRef::PointsXy(values) => Ok(PartitionData::PointsXy(
            values.slice(s![points, .., ..]).to_owned(),
        )),
        FieldRef::Points(values) if !split => {
            Ok(PartitionData::Points(values.slice(s![points, ..]).to_owned()))
        }
        other => {
            let expected = if split {
                FieldShape::PointsXy.describe().to_string()
            } else {
                format!(
                    "{} or {}",
                    FieldShape::Points.describe(),
                    FieldShape::PointsXy.describe()
                )
            };
            Err(WormError::ShapeMismatch {
                field: field_name.to_string(),
                expected,
                found: format!("{:?}", other.shape()),
            })
        }
    }
}
