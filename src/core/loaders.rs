//! Loaders for normalized worm MAT-files and their companion tables.
//!
//! This module provides:
//! - The primary dataset loader (`norm_obj.mat`, one struct record)
//! - The eigenworm basis loader (a single (7, 48) matrix)
//! - The `;`-delimited frame-code description table

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::ReaderBuilder;
use log::{debug, info};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ShapeBuilder};

use super::dataset::{FieldData, FieldShape, SegmentationStatus, WormDataset, WormField};
use super::matfile::{format_dims, read_mat, MatArray, MatClass, MatData};
use crate::error::{Result, WormError};

/// Number of eigenworm basis vectors.
pub const EIGENWORM_COMPONENTS: usize = 7;

/// Length of each eigenworm (one value per skeleton segment angle).
pub const EIGENWORM_LENGTH: usize = 48;

static BUNDLED_FRAME_CODES: &str = include_str!("../../data/frame_codes.csv");

/// The eigenworm basis used for shape decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenWorms {
    basis: Array2<f64>,
}

impl EigenWorms {
    /// Wraps a basis matrix, checking it is (7, 48).
    pub fn new(basis: Array2<f64>) -> Result<Self> {
        if basis.dim() != (EIGENWORM_COMPONENTS, EIGENWORM_LENGTH) {
            return Err(WormError::ShapeMismatch {
                field: "eigenworms".to_string(),
                expected: format!("({}, {})", EIGENWORM_COMPONENTS, EIGENWORM_LENGTH),
                found: format!("{:?}", basis.shape()),
            });
        }
        Ok(Self { basis })
    }

    #[inline]
    pub fn basis(&self) -> ArrayView2<'_, f64> {
        self.basis.view()
    }

    /// Basis vector `index`, or `None` past the last component.
    pub fn component(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.num_components()).then(|| self.basis.row(index))
    }

    #[inline]
    pub fn num_components(&self) -> usize {
        self.basis.nrows()
    }
}

/// Load the normalized worm dataset stored under `record_name`.
///
/// Every schema field is extracted from the struct record and normalized
/// to its documented shape. MATLAB drops trailing singleton dimensions, so
/// single-frame files and row or column vectors are accepted.
///
/// # Errors
///
/// * [`WormError::FileNotFound`] if `path` does not exist.
/// * [`WormError::Mat`] if the file is not a readable Level 5 MAT-file.
/// * [`WormError::MissingRecord`] if no variable is named `record_name`.
/// * [`WormError::MissingField`], [`WormError::InvalidField`] or
///   [`WormError::FrameCountMismatch`] if the record breaks the schema.
pub fn load_normalized_data<P: AsRef<Path>>(path: P, record_name: &str) -> Result<WormDataset> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(WormError::FileNotFound(path.to_path_buf()));
    }

    let file = read_mat(path).map_err(|source| WormError::Mat {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(
        "{}: variables {:?}",
        path.display(),
        file.variable_names()
    );

    let record = file
        .get(record_name)
        .ok_or_else(|| WormError::MissingRecord(record_name.to_string()))?;
    if !matches!(record.class(), MatClass::Struct | MatClass::Object) {
        return Err(WormError::invalid_field(
            record_name,
            format!("expected a struct, found a {} array", record.class().name()),
        ));
    }

    let mut fields = BTreeMap::new();
    for field in WormField::ALL {
        let value = record
            .field(field.as_str())
            .ok_or_else(|| WormError::MissingField(field.as_str().to_string()))?;
        fields.insert(field, extract_field(field, value)?);
    }

    let dataset = WormDataset::from_fields(fields)?;
    info!(
        "Loaded {} frames from {}",
        dataset.num_frames(),
        path.display()
    );
    Ok(dataset)
}

/// Convert one record field to its schema layout.
fn extract_field(field: WormField, value: &MatArray) -> Result<FieldData> {
    let name = field.as_str();
    match field.shape() {
        FieldShape::Text => Ok(FieldData::Text(text_of(name, value)?.to_string())),
        FieldShape::Status => Ok(FieldData::Status(
            text_of(name, value)?
                .chars()
                .map(SegmentationStatus::from_char)
                .collect(),
        )),
        FieldShape::Codes => {
            let values = vector_of(name, value)?;
            let codes = values
                .iter()
                .map(|&v| {
                    if v.fract() == 0.0 && v >= i32::MIN as f64 && v <= i32::MAX as f64 {
                        Ok(v as i32)
                    } else {
                        Err(WormError::invalid_field(
                            name,
                            format!("frame code {} is not an integer", v),
                        ))
                    }
                })
                .collect::<Result<Vec<i32>>>()?;
            Ok(FieldData::Codes(Array1::from(codes)))
        }
        FieldShape::Frames => Ok(FieldData::Frames(vector_of(name, value)?)),
        FieldShape::Points => {
            let dims = normalized_dims(name, value, 2)?;
            let real = numeric_of(name, value)?;
            Array2::from_shape_vec((dims[0], dims[1]).f(), real.to_vec())
                .map(FieldData::Points)
                .map_err(|e| WormError::invalid_field(name, e.to_string()))
        }
        FieldShape::PointsXy => {
            let dims = normalized_dims(name, value, 3)?;
            let real = numeric_of(name, value)?;
            Array3::from_shape_vec((dims[0], dims[1], dims[2]).f(), real.to_vec())
                .map(FieldData::PointsXy)
                .map_err(|e| WormError::invalid_field(name, e.to_string()))
        }
    }
}

fn text_of<'a>(name: &str, value: &'a MatArray) -> Result<&'a str> {
    match &value.data {
        MatData::Char(text) => Ok(text),
        // MATLAB stores '' as an empty double in some older files
        MatData::Numeric { .. } if value.is_empty() => Ok(""),
        _ => Err(WormError::invalid_field(
            name,
            format!("expected a char array, found {}", value.class().name()),
        )),
    }
}

fn numeric_of<'a>(name: &str, value: &'a MatArray) -> Result<&'a [f64]> {
    if value.is_complex() {
        return Err(WormError::invalid_field(name, "complex values are not supported"));
    }
    value.real().ok_or_else(|| {
        WormError::invalid_field(
            name,
            format!("expected numeric data, found {}", value.class().name()),
        )
    })
}

/// A vector stored as 1xN, Nx1 or any shape with one non-singleton axis.
fn vector_of(name: &str, value: &MatArray) -> Result<Array1<f64>> {
    let real = numeric_of(name, value)?;
    let non_singleton = value.dims.iter().filter(|&&d| d != 1).count();
    if non_singleton > 1 && !value.is_empty() {
        return Err(WormError::invalid_field(
            name,
            format!("expected a vector, found {}", value.dims_string()),
        ));
    }
    Ok(Array1::from(real.to_vec()))
}

/// Restore dimensions MATLAB squeezed away, up to `rank`.
fn normalized_dims(name: &str, value: &MatArray, rank: usize) -> Result<Vec<usize>> {
    let mut dims = value.dims.clone();
    while dims.len() > rank && dims.last() == Some(&1) {
        dims.pop();
    }
    if dims.len() == rank - 1 {
        dims.push(1);
    }
    if dims.len() != rank {
        return Err(WormError::invalid_field(
            name,
            format!(
                "expected {} dimensions, found {}",
                rank,
                format_dims(&value.dims)
            ),
        ));
    }
    Ok(dims)
}

/// Load the eigenworm basis stored under `variable`.
///
/// The path is independent of the dataset's `EIGENWORM_PATH` hint.
///
/// # Errors
///
/// * [`WormError::FileNotFound`] if `path` does not exist.
/// * [`WormError::MissingVariable`] if `variable` is absent.
/// * [`WormError::InvalidField`] if it is not a real (7, 48) matrix.
pub fn load_eigen_worms<P: AsRef<Path>>(path: P, variable: &str) -> Result<EigenWorms> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(WormError::FileNotFound(path.to_path_buf()));
    }

    let file = read_mat(path).map_err(|source| WormError::Mat {
        path: path.to_path_buf(),
        source,
    })?;
    let value = file
        .get(variable)
        .ok_or_else(|| WormError::MissingVariable {
            name: variable.to_string(),
            path: path.to_path_buf(),
        })?;

    let dims = normalized_dims(variable, value, 2)?;
    if dims != [EIGENWORM_COMPONENTS, EIGENWORM_LENGTH] {
        return Err(WormError::invalid_field(
            variable,
            format!(
                "expected {}x{}, found {}",
                EIGENWORM_COMPONENTS,
                EIGENWORM_LENGTH,
                value.dims_string()
            ),
        ));
    }
    let real = numeric_of(variable, value)?;
    let basis = Array2::from_shape_vec((dims[0], dims[1]).f(), real.to_vec())
        .map_err(|e| WormError::invalid_field(variable, e.to_string()))?;

    debug!("Loaded eigenworm basis from {}", path.display());
    EigenWorms::new(basis)
}

/// One row of the frame-code table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCodeDescription {
    pub code: i32,
    pub description: String,
}

/// Frame code to human-readable description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameCodeTable {
    entries: Vec<FrameCodeDescription>,
}

impl FrameCodeTable {
    /// Description of `code`, if the table lists it.
    pub fn describe(&self, code: i32) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.description.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameCodeDescription> {
        self.entries.iter()
    }
}

/// Load a frame-code table from a `;`-delimited file.
///
/// Each line is `<code>;<description>`. Single quotes are stripped, blank
/// lines and `#` comments are skipped, and any further columns are kept in
/// the description.
pub fn load_frame_code_descriptions<P: AsRef<Path>>(path: P) -> Result<FrameCodeTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(WormError::FileNotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let table = parse_frame_codes(BufReader::new(file))?;
    debug!(
        "Loaded {} frame code descriptions from {}",
        table.len(),
        path.display()
    );
    Ok(table)
}

/// The frame-code table shipped with the crate.
pub fn bundled_frame_code_descriptions() -> Result<FrameCodeTable> {
    parse_frame_codes(BUNDLED_FRAME_CODES.as_bytes())
}

fn parse_frame_codes<R: Read>(reader: R) -> Result<FrameCodeTable> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut entries = Vec::new();
    for result in reader.records() {
        let record = result?;
        let raw_code = record.get(0).unwrap_or("").replace('\'', "");
        let raw_code = raw_code.trim();
        if raw_code.is_empty() && record.len() <= 1 {
            continue;
        }

        let line = record.position().map_or(0, |p| p.line());
        let code = raw_code
            .parse::<i32>()
            .map_err(|_| WormError::InvalidFrameCode {
                line,
                value: raw_code.to_string(),
            })?;
        let description = record
            .iter()
            .skip(1)
            .map(|column| column.replace('\'', ""))
            .collect::<Vec<_>>()
            .join(";");

        entries.push(FrameCodeDescription {
            code,
            description: description.trim().to_string(),
        });
    }

    Ok(FrameCodeTable { entries })
}
