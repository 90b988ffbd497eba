//! Visualization tools for normalized worm data.
//!
//! This module writes PNG images with the plotters library: the skeleton
//! and contours of a single frame, and a bar chart of frame-code counts.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{ArrayView2, Axis};
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::config::PlotConfig;
use crate::core::dataset::WormDataset;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Frame {frame} out of range, dataset has {num_frames} frames")]
    FrameOutOfRange { frame: usize, num_frames: usize },

    #[error("Frame {0} has no finite skeleton or contour points")]
    EmptyFrame(usize),

    #[error("No frame codes to plot")]
    NoFrameCodes,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

fn rgb(color: [u8; 3]) -> RGBColor {
    RGBColor(color[0], color[1], color[2])
}

/// Finite `(x, y)` points of a `(points, 2)` frame.
fn finite_points(frame: ArrayView2<'_, f64>) -> Vec<(f64, f64)> {
    frame
        .outer_iter()
        .map(|p| (p[0], p[1]))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect()
}

/// Plot the skeleton and both contours of one frame and save as PNG.
///
/// Skeleton points are drawn as circles, contours as lines. NaN points are
/// left out.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `data` - The loaded dataset
/// * `frame` - Frame index
/// * `config` - Image size and colors
pub fn plot_frame(
    output_path: &Path,
    data: &WormDataset,
    frame: usize,
    config: &PlotConfig,
) -> Result<()> {
    let num_frames = data.num_frames();
    if frame >= num_frames {
        return Err(VisualizationError::FrameOutOfRange { frame, num_frames });
    }

    let skeleton = finite_points(data.skeletons().index_axis(Axis(2), frame));
    let vulva = finite_points(data.vulva_contours().index_axis(Axis(2), frame));
    let non_vulva = finite_points(data.non_vulva_contours().index_axis(Axis(2), frame));

    let all_points: Vec<(f64, f64)> = skeleton
        .iter()
        .chain(vulva.iter())
        .chain(non_vulva.iter())
        .copied()
        .collect();
    if all_points.is_empty() {
        return Err(VisualizationError::EmptyFrame(frame));
    }

    // Compute bounds with padding
    let (x_min, x_max, y_min, y_max) = compute_bounds(&all_points);
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let root = BitMapBackend::new(output_path, (config.width, config.height)).into_drawing_area();

    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .draw_series(LineSeries::new(vulva, &rgb(config.vulva_color)))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .draw_series(LineSeries::new(non_vulva, &rgb(config.non_vulva_color)))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let skeleton_color = rgb(config.skeleton_color);
    chart
        .draw_series(
            skeleton
                .iter()
                .map(|&(x, y)| Circle::new((x, y), config.point_radius, skeleton_color.filled())),
        )
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

/// Plot a bar per frame code, bar height being the number of frames.
///
/// Bars are drawn in ascending code order.
pub fn plot_frame_codes(
    output_path: &Path,
    counts: &BTreeMap<i32, usize>,
    config: &PlotConfig,
) -> Result<()> {
    if counts.is_empty() {
        return Err(VisualizationError::NoFrameCodes);
    }

    let num_bars = counts.len();
    let max_count = counts.values().copied().max().unwrap_or(1).max(1);

    let root = BitMapBackend::new(output_path, (config.width, config.height)).into_drawing_area();

    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(0.0..num_bars as f64, 0.0..max_count as f64 * 1.05)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let bar_color = rgb(config.skeleton_color);
    chart
        .draw_series(counts.values().enumerate().map(|(i, &count)| {
            let left = i as f64 + 0.1;
            let right = i as f64 + 0.9;
            Rectangle::new([(left, 0.0), (right, count as f64)], bar_color.filled())
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

/// Compute the bounds (min/max) for x and y coordinates.
fn compute_bounds(points: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;

    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    if (x_max - x_min).abs() < f64::EPSILON {
        x_min -= 1.0;
        x_max += 1.0;
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    (x_min, x_max, y_min, y_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{synthetic_dataset, SyntheticWorm};
    use tempfile::tempdir;

    #[test]
    fn test_plot_frame_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let data = synthetic_dataset(&SyntheticWorm::new(2));

        plot_frame(&path, &data, 1, &PlotConfig::default()).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_plot_frame_out_of_range() {
        let dir = tempdir().unwrap();
        let data = synthetic_dataset(&SyntheticWorm::new(2));

        let result = plot_frame(&dir.path().join("frame.png"), &data, 2, &PlotConfig::default());
        assert!(matches!(
            result,
            Err(VisualizationError::FrameOutOfRange { frame: 2, num_frames: 2 })
        ));
    }

    #[test]
    fn test_plot_frame_all_nan() {
        let dir = tempdir().unwrap();
        let data = synthetic_dataset(&SyntheticWorm::new(2).with_nan_frames(&[0]));

        let result = plot_frame(&dir.path().join("frame.png"), &data, 0, &PlotConfig::default());
        assert!(matches!(result, Err(VisualizationError::EmptyFrame(0))));
    }

    #[test]
    fn test_plot_frame_codes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codes.png");
        let counts = BTreeMap::from([(1, 10), (2, 3), (105, 1)]);

        plot_frame_codes(&path, &counts, &PlotConfig::default()).unwrap();
        assert!(path.exists());

        assert!(matches!(
            plot_frame_codes(&path, &BTreeMap::new(), &PlotConfig::default()),
            Err(VisualizationError::NoFrameCodes)
        ));
    }

    #[test]
    fn test_compute_bounds_degenerate() {
        let (x_min, x_max, y_min, y_max) = compute_bounds(&[(2.0, 3.0)]);
        assert_eq!((x_min, x_max), (1.0, 3.0));
        assert_eq!((y_min, y_max), (2.0, 4.0));
    }
}
