//! The frame-indexed normalized worm dataset.
//!
//! Every field's trailing axis is the frame index, and all fields share one
//! frame count `n` (taken from `skeletons`). [`WormDataset::from_fields`]
//! enforces this when the dataset is assembled, so every accessor can hand
//! out arrays without further checks.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3};

use crate::error::{Result, WormError};

/// Number of sample points along the worm's skeleton and contours.
pub const NUM_SKELETON_POINTS: usize = 49;

/// Named fields of the normalized worm record, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WormField {
    EigenwormPath,
    SegmentationStatus,
    FrameCodes,
    VulvaContours,
    NonVulvaContours,
    Skeletons,
    Angles,
    InOutTouches,
    Lengths,
    Widths,
    HeadAreas,
    TailAreas,
    VulvaAreas,
    NonVulvaAreas,
    X,
    Y,
}

impl WormField {
    /// Every field, in the order the upstream record stores them.
    pub const ALL: [WormField; 16] = [
        WormField::EigenwormPath,
        WormField::SegmentationStatus,
        WormField::FrameCodes,
        WormField::VulvaContours,
        WormField::NonVulvaContours,
        WormField::Skeletons,
        WormField::Angles,
        WormField::InOutTouches,
        WormField::Lengths,
        WormField::Widths,
        WormField::HeadAreas,
        WormField::TailAreas,
        WormField::VulvaAreas,
        WormField::NonVulvaAreas,
        WormField::X,
        WormField::Y,
    ];

    /// Field name as stored in the MAT record.
    pub fn as_str(self) -> &'static str {
        match self {
            WormField::EigenwormPath => "EIGENWORM_PATH",
            WormField::SegmentationStatus => "segmentation_status",
            WormField::FrameCodes => "frame_codes",
            WormField::VulvaContours => "vulva_contours",
            WormField::NonVulvaContours => "non_vulva_contours",
            WormField::Skeletons => "skeletons",
            WormField::Angles => "angles",
            WormField::InOutTouches => "in_out_touches",
            WormField::Lengths => "lengths",
            WormField::Widths => "widths",
            WormField::HeadAreas => "head_areas",
            WormField::TailAreas => "tail_areas",
            WormField::VulvaAreas => "vulva_areas",
            WormField::NonVulvaAreas => "non_vulva_areas",
            WormField::X => "x",
            WormField::Y => "y",
        }
    }

    /// Expected layout of the field.
    pub fn shape(self) -> FieldShape {
        match self {
            WormField::EigenwormPath => FieldShape::Text,
            WormField::SegmentationStatus => FieldShape::Status,
            WormField::FrameCodes => FieldShape::Codes,
            WormField::VulvaContours
            | WormField::NonVulvaContours
            | WormField::Skeletons
            | WormField::Angles => FieldShape::PointsXy,
            WormField::InOutTouches | WormField::Widths | WormField::X | WormField::Y => {
                FieldShape::Points
            }
            WormField::Lengths
            | WormField::HeadAreas
            | WormField::TailAreas
            | WormField::VulvaAreas
            | WormField::NonVulvaAreas => FieldShape::Frames,
        }
    }
}

impl fmt::Display for WormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WormField {
    type Err = WormError;

    fn from_str(s: &str) -> Result<Self> {
        WormField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| WormError::UnknownField(s.to_string()))
    }
}

/// Layout of a field, `n` being the frame count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Free text, no frame axis.
    Text,
    /// `(n,)` single-character status codes.
    Status,
    /// `(n,)` integer codes.
    Codes,
    /// `(n,)` scalar per frame.
    Frames,
    /// `(49, n)` value per skeleton point per frame.
    Points,
    /// `(49, 2, n)` x/y per skeleton point per frame.
    PointsXy,
}

impl FieldShape {
    pub fn describe(self) -> &'static str {
        match self {
            FieldShape::Text => "text",
            FieldShape::Status | FieldShape::Codes | FieldShape::Frames => "(n,)",
            FieldShape::Points => "(49, n)",
            FieldShape::PointsXy => "(49, 2, n)",
        }
    }
}

/// Per-frame outcome of the upstream segmentation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentationStatus {
    /// `s`: the worm was segmented.
    Segmented,
    /// `f`: segmentation failed.
    Failed,
    /// `m`: the stage was moving.
    StageMovement,
    /// `d`: the frame was dropped.
    Dropped,
    /// Any other status character.
    Other(char),
}

impl SegmentationStatus {
    pub fn from_char(c: char) -> Self {
        match c {
            's' => SegmentationStatus::Segmented,
            'f' => SegmentationStatus::Failed,
            'm' => SegmentationStatus::StageMovement,
            'd' => SegmentationStatus::Dropped,
            other => SegmentationStatus::Other(other),
        }
    }

    pub fn as_char(self) -> char {
        match self {
            SegmentationStatus::Segmented => 's',
            SegmentationStatus::Failed => 'f',
            SegmentationStatus::StageMovement => 'm',
            SegmentationStatus::Dropped => 'd',
            SegmentationStatus::Other(c) => c,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SegmentationStatus::Segmented => "segmented",
            SegmentationStatus::Failed => "segmentation failed",
            SegmentationStatus::StageMovement => "stage movement",
            SegmentationStatus::Dropped => "dropped",
            SegmentationStatus::Other(_) => "other",
        }
    }
}

impl fmt::Display for SegmentationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Owned field values, produced by the loader for one schema entry.
#[derive(Debug, Clone)]
pub enum FieldData {
    Text(String),
    Status(Vec<SegmentationStatus>),
    Codes(Array1<i32>),
    Frames(Array1<f64>),
    Points(Array2<f64>),
    PointsXy(Array3<f64>),
}

impl FieldData {
    pub fn shape_kind(&self) -> FieldShape {
        match self {
            FieldData::Text(_) => FieldShape::Text,
            FieldData::Status(_) => FieldShape::Status,
            FieldData::Codes(_) => FieldShape::Codes,
            FieldData::Frames(_) => FieldShape::Frames,
            FieldData::Points(_) => FieldShape::Points,
            FieldData::PointsXy(_) => FieldShape::PointsXy,
        }
    }
}

/// Borrowed view of one field, returned by name-based lookups.
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    Text(&'a str),
    Status(&'a [SegmentationStatus]),
    Codes(ArrayView1<'a, i32>),
    Frames(ArrayView1<'a, f64>),
    Points(ArrayView2<'a, f64>),
    PointsXy(ArrayView3<'a, f64>),
}

impl<'a> FieldRef<'a> {
    /// Array shape; text fields report their character count.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            FieldRef::Text(text) => vec![text.chars().count()],
            FieldRef::Status(status) => vec![status.len()],
            FieldRef::Codes(codes) => codes.shape().to_vec(),
            FieldRef::Frames(values) => values.shape().to_vec(),
            FieldRef::Points(values) => values.shape().to_vec(),
            FieldRef::PointsXy(values) => values.shape().to_vec(),
        }
    }

    pub fn shape_kind(&self) -> FieldShape {
        match self {
            FieldRef::Text(_) => FieldShape::Text,
            FieldRef::Status(_) => FieldShape::Status,
            FieldRef::Codes(_) => FieldShape::Codes,
            FieldRef::Frames(_) => FieldShape::Frames,
            FieldRef::Points(_) => FieldShape::Points,
            FieldRef::PointsXy(_) => FieldShape::PointsXy,
        }
    }

    /// Frame count along the trailing axis, `None` for text.
    pub fn frame_count(&self) -> Option<usize> {
        match self {
            FieldRef::Text(_) => None,
            FieldRef::Status(status) => Some(status.len()),
            FieldRef::Codes(codes) => Some(codes.len()),
            FieldRef::Frames(values) => Some(values.len()),
            FieldRef::Points(values) => Some(values.dim().1),
            FieldRef::PointsXy(values) => Some(values.dim().2),
        }
    }
}

/// The loaded normalized worm measurements.
#[derive(Debug, Clone)]
pub struct WormDataset {
    eigenworm_path: String,
    segmentation_status: Vec<SegmentationStatus>,
    frame_codes: Array1<i32>,
    vulva_contours: Array3<f64>,
    non_vulva_contours: Array3<f64>,
    skeletons: Array3<f64>,
    angles: Array3<f64>,
    in_out_touches: Array2<f64>,
    lengths: Array1<f64>,
    widths: Array2<f64>,
    head_areas: Array1<f64>,
    tail_areas: Array1<f64>,
    vulva_areas: Array1<f64>,
    non_vulva_areas: Array1<f64>,
    x: Array2<f64>,
    y: Array2<f64>,
}

impl WormDataset {
    /// Assemble a dataset from one value per schema field.
    ///
    /// # Errors
    ///
    /// * [`WormError::MissingField`] if a schema field has no value.
    /// * [`WormError::InvalidField`] if a value has the wrong layout or its
    ///   point axis is not 49 long.
    /// * [`WormError::FrameCountMismatch`] if a field's frame count differs
    ///   from the skeletons'.
    pub fn from_fields(mut fields: BTreeMap<WormField, FieldData>) -> Result<Self> {
        let fields = &mut fields;
        let dataset = WormDataset {
            eigenworm_path: take_text(fields, WormField::EigenwormPath)?,
            segmentation_status: take_status(fields, WormField::SegmentationStatus)?,
            frame_codes: take_codes(fields, WormField::FrameCodes)?,
            vulva_contours: take_points_xy(fields, WormField::VulvaContours)?,
            non_vulva_contours: take_points_xy(fields, WormField::NonVulvaContours)?,
            skeletons: take_points_xy(fields, WormField::Skeletons)?,
            angles: take_points_xy(fields, WormField::Angles)?,
            in_out_touches: take_points(fields, WormField::InOutTouches)?,
            lengths: take_frames(fields, WormField::Lengths)?,
            widths: take_points(fields, WormField::Widths)?,
            head_areas: take_frames(fields, WormField::HeadAreas)?,
            tail_areas: take_frames(fields, WormField::TailAreas)?,
            vulva_areas: take_frames(fields, WormField::VulvaAreas)?,
            non_vulva_areas: take_frames(fields, WormField::NonVulvaAreas)?,
            x: take_points(fields, WormField::X)?,
            y: take_points(fields, WormField::Y)?,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    fn validate(&self) -> Result<()> {
        let n = self.num_frames();
        for field in WormField::ALL {
            let value = self.field(field);
            match value {
                FieldRef::Points(points) if points.dim().0 != NUM_SKELETON_POINTS => {
                    return Err(point_axis_error(field, points.dim().0));
                }
                FieldRef::PointsXy(points) => {
                    let (num_points, num_axes, _) = points.dim();
                    if num_points != NUM_SKELETON_POINTS {
                        return Err(point_axis_error(field, num_points));
                    }
                    if num_axes != 2 {
                        return Err(WormError::invalid_field(
                            field.as_str(),
                            format!("expected 2 spatial axes, found {}", num_axes),
                        ));
                    }
                }
                _ => {}
            }
            if let Some(found) = value.frame_count() {
                if found != n {
                    return Err(WormError::FrameCountMismatch {
                        field: field.as_str().to_string(),
                        expected: n,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    /// Number of frames, derived from `skeletons`.
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.skeletons.dim().2
    }

    /// Borrow a field by its schema entry.
    pub fn field(&self, field: WormField) -> FieldRef<'_> {
        match field {
            WormField::EigenwormPath => FieldRef::Text(&self.eigenworm_path),
            WormField::SegmentationStatus => FieldRef::Status(&self.segmentation_status),
            WormField::FrameCodes => FieldRef::Codes(self.frame_codes.view()),
            WormField::VulvaContours => FieldRef::PointsXy(self.vulva_contours.view()),
            WormField::NonVulvaContours => FieldRef::PointsXy(self.non_vulva_contours.view()),
            WormField::Skeletons => FieldRef::PointsXy(self.skeletons.view()),
            WormField::Angles => FieldRef::PointsXy(self.angles.view()),
            WormField::InOutTouches => FieldRef::Points(self.in_out_touches.view()),
            WormField::Lengths => FieldRef::Frames(self.lengths.view()),
            WormField::Widths => FieldRef::Points(self.widths.view()),
            WormField::HeadAreas => FieldRef::Frames(self.head_areas.view()),
            WormField::TailAreas => FieldRef::Frames(self.tail_areas.view()),
            WormField::VulvaAreas => FieldRef::Frames(self.vulva_areas.view()),
            WormField::NonVulvaAreas => FieldRef::Frames(self.non_vulva_areas.view()),
            WormField::X => FieldRef::Points(self.x.view()),
            WormField::Y => FieldRef::Points(self.y.view()),
        }
    }

    /// Borrow a field by name.
    ///
    /// # Errors
    ///
    /// [`WormError::UnknownField`] if `name` is not a schema field.
    pub fn field_by_name(&self, name: &str) -> Result<FieldRef<'_>> {
        Ok(self.field(name.parse()?))
    }

    /// Borrow a `(49, 2, n)` field.
    ///
    /// # Errors
    ///
    /// [`WormError::ShapeMismatch`] if the field has another layout.
    pub fn points_xy(&self, field: WormField) -> Result<ArrayView3<'_, f64>> {
        match self.field(field) {
            FieldRef::PointsXy(points) => Ok(points),
            other => Err(WormError::ShapeMismatch {
                field: field.as_str().to_string(),
                expected: FieldShape::PointsXy.describe().to_string(),
                found: format!("{:?}", other.shape()),
            }),
        }
    }

    /// Iterate over every field in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (WormField, FieldRef<'_>)> + '_ {
        WormField::ALL.iter().map(move |&field| (field, self.field(field)))
    }

    pub fn eigenworm_path(&self) -> &str {
        &self.eigenworm_path
    }

    pub fn segmentation_status(&self) -> &[SegmentationStatus] {
        &self.segmentation_status
    }

    pub fn frame_codes(&self) -> ArrayView1<'_, i32> {
        self.frame_codes.view()
    }

    pub fn skeletons(&self) -> ArrayView3<'_, f64> {
        self.skeletons.view()
    }

    pub fn vulva_contours(&self) -> ArrayView3<'_, f64> {
        self.vulva_contours.view()
    }

    pub fn non_vulva_contours(&self) -> ArrayView3<'_, f64> {
        self.non_vulva_contours.view()
    }

    pub fn widths(&self) -> ArrayView2<'_, f64> {
        self.widths.view()
    }

    pub fn lengths(&self) -> ArrayView1<'_, f64> {
        self.lengths.view()
    }

    /// Count of frames per segmentation status.
    pub fn status_counts(&self) -> BTreeMap<SegmentationStatus, usize> {
        let mut counts = BTreeMap::new();
        for &status in &self.segmentation_status {
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }
}

fn point_axis_error(field: WormField, found: usize) -> WormError {
    WormError::invalid_field(
        field.as_str(),
        format!(
            "expected {} skeleton points, found {}",
            NUM_SKELETON_POINTS, found
        ),
    )
}

type Fields = BTreeMap<WormField, FieldData>;

fn take(fields: &mut Fields, field: WormField) -> Result<FieldData> {
    fields
        .remove(&field)
        .ok_or_else(|| WormError::MissingField(field.as_str().to_string()))
}

fn layout_error(field: WormField, found: &FieldData) -> WormError {
    WormError::invalid_field(
        field.as_str(),
        format!(
            "expected {} data, found {}",
            field.shape().describe(),
            found.shape_kind().describe()
        ),
    )
}

fn take_text(fields: &mut Fields, field: WormField) -> Result<String> {
    match take(fields, field)? {
        FieldData::Text(text) => Ok(text),
        other => Err(layout_error(field, &other)),
    }
}

fn take_status(fields: &mut Fields, field: WormField) -> Result<Vec<SegmentationStatus>> {
    match take(fields, field)? {
        FieldData::Status(status) => Ok(status),
        other => Err(layout_error(field, &other)),
    }
}

fn take_codes(fields: &mut Fields, field: WormField) -> Result<Array1<i32>> {
    match take(fields, field)? {
        FieldData::Codes(codes) => Ok(codes),
        other => Err(layout_error(field, &other)),
    }
}

fn take_frames(fields: &mut Fields, field: WormField) -> Result<Array1<f64>> {
    match take(fields, field)? {
        FieldData::Frames(values) => Ok(values),
        other => Err(layout_error(field, &other)),
    }
}

fn take_points(fields: &mut Fields, field: WormField) -> Result<Array2<f64>> {
    match take(fields, field)? {
        FieldData::Points(values) => Ok(values),
        other => Err(layout_error(field, &other)),
    }
}

fn take_points_xy(fields: &mut Fields, field: WormField) -> Result<Array3<f64>> {
    match take(fields, field)? {
        FieldData::PointsXy(values) => Ok(values),
        other => Err(layout_error(field, &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{synthetic_fields, SyntheticWorm};

    #[test]
    fn test_field_names_round_trip() {
        for field in WormField::ALL {
            assert_eq!(field.as_str().parse::<WormField>().unwrap(), field);
        }
        assert!(matches!(
            "nonexistent".parse::<WormField>(),
            Err(WormError::UnknownField(_))
        ));
    }

    #[test]
    fn test_from_fields_consistent_frames() {
        let dataset = WormDataset::from_fields(synthetic_fields(&SyntheticWorm::new(5))).unwrap();
        assert_eq!(dataset.num_frames(), 5);
        for (field, value) in dataset.iter() {
            if let Some(frames) = value.frame_count() {
                assert_eq!(frames, 5, "{} has a different frame count", field);
            }
        }
    }

    #[test]
    fn test_from_fields_rejects_frame_mismatch() {
        let mut fields = synthetic_fields(&SyntheticWorm::new(4));
        fields.insert(WormField::Lengths, FieldData::Frames(Array1::zeros(3)));

        let err = WormDataset::from_fields(fields).unwrap_err();
        match err {
            WormError::FrameCountMismatch {
                field,
                expected,
                found,
            } => {
                assert_eq!(field, "lengths");
                assert_eq!(expected, 4);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_fields_rejects_missing_field() {
        let mut fields = synthetic_fields(&SyntheticWorm::new(2));
        fields.remove(&WormField::Widths);
        assert!(matches!(
            WormDataset::from_fields(fields),
            Err(WormError::MissingField(name)) if name == "widths"
        ));
    }

    #[test]
    fn test_from_fields_rejects_wrong_layout() {
        let mut fields = synthetic_fields(&SyntheticWorm::new(2));
        fields.insert(
            WormField::Skeletons,
            FieldData::Points(Array2::zeros((NUM_SKELETON_POINTS, 2))),
        );
        match WormDataset::from_fields(fields) {
            Err(WormError::InvalidField { field, reason }) => {
                assert_eq!(field, "skeletons");
                assert!(reason.contains(FieldShape::PointsXy.describe()));
                assert!(reason.contains(FieldShape::Points.describe()));
            }
            other => panic!("expected InvalidField, got {other:?}"),
        }
    }

    #[test]
    fn test_from_fields_rejects_wrong_layout_for_each_kind() {
        let layouts = [
            (WormField::EigenwormPath, FieldData::Frames(Array1::zeros(2))),
            (WormField::SegmentationStatus, FieldData::Text("ss".to_string())),
            (WormField::FrameCodes, FieldData::Frames(Array1::zeros(2))),
            (WormField::Lengths, FieldData::Codes(Array1::zeros(2))),
            (WormField::Widths, FieldData::Status(Vec::new())),
        ];
        for (field, value) in layouts {
            let mut fields = synthetic_fields(&SyntheticWorm::new(2));
            fields.insert(field, value);
            assert!(
                matches!(
                    WormDataset::from_fields(fields),
                    Err(WormError::InvalidField { field: ref name, .. }) if name == field.as_str()
                ),
                "{} accepted the wrong layout",
                field
            );
        }
    }

    #[test]
    fn test_from_fields_rejects_short_point_axis() {
        let mut fields = synthetic_fields(&SyntheticWorm::new(2));
        fields.insert(WormField::Widths, FieldData::Points(Array2::zeros((48, 2))));
        assert!(matches!(
            WormDataset::from_fields(fields),
            Err(WormError::InvalidField { field, .. }) if field == "widths"
        ));
    }

    #[test]
    fn test_points_xy_rejects_other_layouts() {
        let dataset = WormDataset::from_fields(synthetic_fields(&SyntheticWorm::new(2))).unwrap();
        assert!(dataset.points_xy(WormField::Angles).is_ok());
        assert!(matches!(
            dataset.points_xy(WormField::Widths),
            Err(WormError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_status_counts() {
        let mut worm = SyntheticWorm::new(4);
        worm.status = "ssfd".to_string();
        let dataset = WormDataset::from_fields(synthetic_fields(&worm)).unwrap();
        let counts = dataset.status_counts();
        assert_eq!(counts[&SegmentationStatus::Segmented], 2);
        assert_eq!(counts[&SegmentationStatus::Failed], 1);
        assert_eq!(counts[&SegmentationStatus::Dropped], 1);
        assert_eq!(SegmentationStatus::from_char('x'), SegmentationStatus::Other('x'));
    }
}
