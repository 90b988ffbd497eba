//! Per-frame geometric queries and transforms on skeleton data.
//!
//! Every function takes a `(points, 2, frames)` view and treats frames
//! independently, so work is spread across frames with Rayon. NaN marks a
//! frame (or point) the upstream segmentation could not measure; means and
//! extents skip NaN values instead of failing.

use std::fmt;

use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::error::{Result, WormError};

/// Spatial axis of a `(points, 2, frames)` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialAxis {
    X,
    Y,
}

impl SpatialAxis {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            SpatialAxis::X => 0,
            SpatialAxis::Y => 1,
        }
    }
}

impl TryFrom<usize> for SpatialAxis {
    type Error = WormError;

    fn try_from(value: usize) -> Result<Self> {
        match value {
            0 => Ok(SpatialAxis::X),
            1 => Ok(SpatialAxis::Y),
            other => Err(WormError::InvalidAxis(other)),
        }
    }
}

impl fmt::Display for SpatialAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialAxis::X => f.write_str("x"),
            SpatialAxis::Y => f.write_str("y"),
        }
    }
}

/// Mean of the non-NaN values, NaN if there are none.
pub fn nan_mean(values: ArrayView1<'_, f64>) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Apply `transform` to every `(points, 2)` frame and reassemble the result.
fn map_frames<F>(points: ArrayView3<'_, f64>, transform: F) -> Array3<f64>
where
    F: Fn(usize, ArrayView2<'_, f64>) -> Array2<f64> + Sync,
{
    let num_frames = points.dim().2;
    let frames: Vec<Array2<f64>> = (0..num_frames)
        .into_par_iter()
        .map(|f| transform(f, points.index_axis(Axis(2), f)))
        .collect();

    let mut output = Array3::zeros(points.raw_dim());
    for (f, frame) in frames.iter().enumerate() {
        output.index_axis_mut(Axis(2), f).assign(frame);
    }
    output
}

/// Per-frame centroid, shape `(2, frames)`.
///
/// NaN points are ignored; a frame with no finite point yields NaN.
pub fn centre(points: ArrayView3<'_, f64>) -> Array2<f64> {
    let num_frames = points.dim().2;
    let means: Vec<(f64, f64)> = (0..num_frames)
        .into_par_iter()
        .map(|f| {
            let frame = points.index_axis(Axis(2), f);
            (nan_mean(frame.column(0)), nan_mean(frame.column(1)))
        })
        .collect();

    let mut centres = Array2::zeros((2, num_frames));
    for (f, (x, y)) in means.into_iter().enumerate() {
        centres[[0, f]] = x;
        centres[[1, f]] = y;
    }
    centres
}

/// Per-frame orientation in degrees, from the first point to the last.
///
/// Uses the half-range arctangent `atan(dy / dx)`, so headings that differ
/// by 180 degrees share an angle. A vertical worm gives +/-90, and a frame
/// whose end points coincide gives NaN.
pub fn angle(points: ArrayView3<'_, f64>) -> Array1<f64> {
    let (num_points, _, num_frames) = points.dim();
    if num_points == 0 {
        return Array1::from_elem(num_frames, f64::NAN);
    }
    let last = num_points - 1;

    let angles: Vec<f64> = (0..num_frames)
        .into_par_iter()
        .map(|f| {
            let dx = points[[last, 0, f]] - points[[0, 0, f]];
            let dy = points[[last, 1, f]] - points[[0, 1, f]];
            (dy / dx).atan().to_degrees()
        })
        .collect();
    Array1::from(angles)
}

/// Subtract each frame's centroid from its points.
pub fn translate_to_centre(points: ArrayView3<'_, f64>) -> Array3<f64> {
    let centres = centre(points);
    map_frames(points, |f, frame| {
        let mut shifted = frame.to_owned();
        shifted.column_mut(0).mapv_inplace(|x| x - centres[[0, f]]);
        shifted.column_mut(1).mapv_inplace(|y| y - centres[[1, f]]);
        shifted
    })
}

fn rotate_each(points: ArrayView3<'_, f64>, angles_deg: ArrayView1<'_, f64>) -> Array3<f64> {
    map_frames(points, |f, frame| {
        let theta = -angles_deg[f].to_radians();
        let (sin_t, cos_t) = theta.sin_cos();
        let mut rotated = Array2::zeros(frame.raw_dim());
        for (p, point) in frame.outer_iter().enumerate() {
            let (x, y) = (point[0], point[1]);
            rotated[[p, 0]] = cos_t * x - sin_t * y;
            rotated[[p, 1]] = sin_t * x + cos_t * y;
        }
        rotated
    })
}

/// Rotate every frame about the origin by the negative of its angle.
///
/// `angles_deg` holds one angle in degrees per frame; each frame gets its
/// own rotation matrix.
///
/// # Errors
///
/// [`WormError::FrameCountMismatch`] if there is not one angle per frame.
pub fn rotate_frames(
    points: ArrayView3<'_, f64>,
    angles_deg: ArrayView1<'_, f64>,
) -> Result<Array3<f64>> {
    let num_frames = points.dim().2;
    if angles_deg.len() != num_frames {
        return Err(WormError::FrameCountMismatch {
            field: "rotation angles".to_string(),
            expected: num_frames,
            found: angles_deg.len(),
        });
    }
    Ok(rotate_each(points, angles_deg))
}

/// Centre every frame, then rotate it by the negative of its orientation.
///
/// For a finite frame the line from the first to the last point ends up
/// parallel to the x axis.
pub fn rotate_and_translate(points: ArrayView3<'_, f64>) -> Array3<f64> {
    let angles = angle(points);
    let centred = translate_to_centre(points);
    rotate_each(centred.view(), angles.view())
}

/// `(min, max)` of one spatial axis over all points and frames.
///
/// NaN values are skipped; if every value is NaN the result is `(NaN, NaN)`.
///
/// # Errors
///
/// [`WormError::ShapeMismatch`] if the second axis is not of length 2.
pub fn position_limits(points: ArrayView3<'_, f64>, axis: SpatialAxis) -> Result<(f64, f64)> {
    let (num_points, num_axes, num_frames) = points.dim();
    if num_axes != 2 {
        return Err(WormError::ShapeMismatch {
            field: "points".to_string(),
            expected: "(points, 2, frames)".to_string(),
            found: format!("({}, {}, {})", num_points, num_axes, num_frames),
        });
    }

    let values = points.index_axis(Axis(1), axis.index());
    let (min, max) = (0..num_frames)
        .into_par_iter()
        .map(|f| {
            values
                .column(f)
                .iter()
                .filter(|v| !v.is_nan())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
        })
        .reduce(
            || (f64::INFINITY, f64::NEG_INFINITY),
            |a, b| (a.0.min(b.0), a.1.max(b.1)),
        );

    if min > max {
        Ok((f64::NAN, f64::NAN))
    } else {
        Ok((min, max))
    }
}

/// One axis of a `(points, 2, frames)` array, shape `(points, frames)`.
pub fn axis_slice(points: ArrayView3<'_, f64>, axis: SpatialAxis) -> ArrayView2<'_, f64> {
    points.index_axis_move(Axis(1), axis.index())
}

/// Closed outline per frame: the vulva side followed by the non-vulva side
/// walked backwards without its two end points, shape `(96, frames)` for
/// 49-point contours.
///
/// # Errors
///
/// [`WormError::ShapeMismatch`] if the two sides differ in shape, have
/// fewer than two points, or lack an x/y axis.
pub fn contour(
    vulva: ArrayView3<'_, f64>,
    non_vulva: ArrayView3<'_, f64>,
    axis: SpatialAxis,
) -> Result<Array2<f64>> {
    let (num_points, num_axes, _) = vulva.dim();
    if vulva.dim() != non_vulva.dim() || num_points < 2 || num_axes != 2 {
        return Err(WormError::ShapeMismatch {
            field: "non_vulva_contours".to_string(),
            expected: format!("{:?}", vulva.shape()),
            found: format!("{:?}", non_vulva.shape()),
        });
    }

    let outward = vulva.index_axis(Axis(1), axis.index());
    let back = non_vulva.slice(s![1..-1;-1, axis.index(), ..]);
    concatenate(Axis(0), &[outward, back]).map_err(|e| WormError::ShapeMismatch {
        field: "contour".to_string(),
        expected: format!("{:?}", vulva.shape()),
        found: e.to_string(),
    })
}
