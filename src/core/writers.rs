//! Data writers for MAT and CSV formats.
//!
//! This module provides functions for writing worm data back out:
//! - MATLAB Level 5 MAT-files (little-endian, optionally zlib-compressed)
//! - CSV with one row per frame and skeleton point

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::ArrayView3;
use thiserror::Error;

use super::dataset::{FieldRef, WormDataset};
use super::matfile::{
    MatArray, MatClass, MatData, FLAG_COMPLEX, FLAG_LOGICAL, HEADER_TEXT_LEN, MAT_VERSION_5,
    MI_COMPRESSED, MI_DOUBLE, MI_INT16, MI_INT32, MI_INT64, MI_INT8, MI_MATRIX, MI_SINGLE,
    MI_UINT16, MI_UINT32, MI_UINT64, MI_UINT8,
};

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// An array whose contents do not match its dimensions.
    #[error("cannot encode array '{name}': {reason}")]
    InvalidArray { name: String, reason: String },

    /// zlib compression of a variable failed.
    #[error("failed to compress variable '{name}': {source}")]
    Compress {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Write variables to a Level 5 MAT-file.
///
/// Every variable becomes one top-level `miMATRIX` element, wrapped in an
/// `miCOMPRESSED` element when `compress` is set.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `variables` - Named arrays to store, in order
/// * `compress` - Whether to zlib-compress each variable
///
/// # Errors
///
/// Returns an error if an array's contents disagree with its dimensions, or
/// if the file cannot be created or written.
pub fn write_mat(path: &Path, variables: &[MatArray], compress: bool) -> Result<()> {
    let bytes = encode_mat(variables, compress)?;

    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    writer.write_all(&bytes).map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Encode variables as a complete little-endian MAT-file.
pub fn encode_mat(variables: &[MatArray], compress: bool) -> Result<Vec<u8>> {
    let mut bytes = encode_header();
    for variable in variables {
        let element = encode_matrix(variable, &variable.name)?;
        if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            let compressed = encoder
                .write_all(&element)
                .and_then(|_| encoder.finish())
                .map_err(|e| WriteError::Compress {
                    name: variable.name.clone(),
                    source: e,
                })?;
            bytes.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
            bytes.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&compressed);
        } else {
            bytes.extend_from_slice(&element);
        }
    }
    Ok(bytes)
}

fn encode_header() -> Vec<u8> {
    let text = format!(
        "MATLAB 5.0 MAT-file, Platform: {}, Created by: normalized-worm {}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    );
    let mut header: Vec<u8> = text.into_bytes();
    header.resize(HEADER_TEXT_LEN, b' ');
    header.extend_from_slice(&[0u8; 8]);
    header.extend_from_slice(&MAT_VERSION_5.to_le_bytes());
    header.extend_from_slice(b"IM");
    header
}

/// Append a tagged element, padded to an 8-byte boundary.
fn put_element(buf: &mut Vec<u8>, data_type: u32, payload: &[u8]) {
    buf.extend_from_slice(&data_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let padding = (8 - payload.len() % 8) % 8;
    buf.resize(buf.len() + padding, 0);
}

fn invalid(array_name: &str, reason: String) -> WriteError {
    WriteError::InvalidArray {
        name: array_name.to_string(),
        reason,
    }
}

/// Encode one array as a full `miMATRIX` element stored under `name`.
fn encode_matrix(array: &MatArray, name: &str) -> Result<Vec<u8>> {
    let numel = array.numel();
    let mut body = Vec::new();

    let mut flags = array.class().code() as u32;
    if let MatData::Numeric { imag, logical, .. } = &array.data {
        if imag.is_some() {
            flags |= FLAG_COMPLEX;
        }
        if *logical {
            flags |= FLAG_LOGICAL;
        }
    }
    let mut flag_bytes = flags.to_le_bytes().to_vec();
    flag_bytes.extend_from_slice(&0u32.to_le_bytes());
    put_element(&mut body, MI_UINT32, &flag_bytes);

    let mut dims = Vec::with_capacity(array.dims.len() * 4);
    for &d in &array.dims {
        let d = i32::try_from(d)
            .map_err(|_| invalid(name, format!("dimension {} does not fit in int32", d)))?;
        dims.extend_from_slice(&d.to_le_bytes());
    }
    put_element(&mut body, MI_INT32, &dims);
    put_element(&mut body, MI_INT8, name.as_bytes());

    match &array.data {
        MatData::Numeric {
            class, real, imag, ..
        } => {
            if real.len() != numel {
                return Err(invalid(
                    name,
                    format!("{} values for {} elements", real.len(), numel),
                ));
            }
            let storage = class.storage_type().unwrap_or(MI_DOUBLE);
            put_element(&mut body, storage, &encode_values(storage, real));
            if let Some(imag) = imag {
                if imag.len() != numel {
                    return Err(invalid(
                        name,
                        format!("{} imaginary values for {} elements", imag.len(), numel),
                    ));
                }
                put_element(&mut body, storage, &encode_values(storage, imag));
            }
        }
        MatData::Char(text) => {
            let units: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
            put_element(&mut body, MI_UINT16, &units);
        }
        MatData::Cell(cells) => {
            if cells.len() != numel {
                return Err(invalid(
                    name,
                    format!("{} cells for {} elements", cells.len(), numel),
                ));
            }
            for cell in cells {
                body.extend(encode_matrix(cell, "")?);
            }
        }
        MatData::Struct {
            class_name,
            field_names,
            elements,
        } => {
            let fieldless = field_names.is_empty() && elements.is_empty();
            if elements.len() != numel && !fieldless {
                return Err(invalid(
                    name,
                    format!("{} struct elements for {} elements", elements.len(), numel),
                ));
            }
            if array.class() == MatClass::Object {
                if let Some(class_name) = class_name {
                    put_element(&mut body, MI_INT8, class_name.as_bytes());
                }
            }

            let name_length = field_names.iter().map(|f| f.len()).max().unwrap_or(0) + 1;
            put_element(&mut body, MI_INT32, &(name_length as i32).to_le_bytes());
            let mut names = Vec::with_capacity(name_length * field_names.len());
            for field in field_names {
                let start = names.len();
                names.extend_from_slice(field.as_bytes());
                names.resize(start + name_length, 0);
            }
            put_element(&mut body, MI_INT8, &names);

            for values in elements {
                if values.len() != field_names.len() {
                    return Err(invalid(
                        name,
                        format!(
                            "element has {} values for {} fields",
                            values.len(),
                            field_names.len()
                        ),
                    ));
                }
                for value in values {
                    body.extend(encode_matrix(value, "")?);
                }
            }
        }
    }

    let mut element = Vec::with_capacity(body.len() + 8);
    put_element(&mut element, MI_MATRIX, &body);
    Ok(element)
}

fn encode_values(data_type: u32, values: &[f64]) -> Vec<u8> {
    match data_type {
        MI_INT8 => values.iter().map(|&v| v as i8 as u8).collect(),
        MI_UINT8 => values.iter().map(|&v| v as u8).collect(),
        MI_INT16 => values.iter().flat_map(|&v| (v as i16).to_le_bytes()).collect(),
        MI_UINT16 => values.iter().flat_map(|&v| (v as u16).to_le_bytes()).collect(),
        MI_INT32 => values.iter().flat_map(|&v| (v as i32).to_le_bytes()).collect(),
        MI_UINT32 => values.iter().flat_map(|&v| (v as u32).to_le_bytes()).collect(),
        MI_INT64 => values.iter().flat_map(|&v| (v as i64).to_le_bytes()).collect(),
        MI_UINT64 => values.iter().flat_map(|&v| (v as u64).to_le_bytes()).collect(),
        MI_SINGLE => values.iter().flat_map(|&v| (v as f32).to_le_bytes()).collect(),
        _ => values.iter().flat_map(|&v| v.to_le_bytes()).collect(),
    }
}

/// Build the struct record a dataset was loaded from.
///
/// Fields are written in schema order; vectors become 1xN row vectors and
/// the segmentation status becomes a packed char row.
pub fn dataset_to_record(name: &str, dataset: &WormDataset) -> MatArray {
    let fields = dataset
        .iter()
        .map(|(field, value)| {
            let field_name = field.as_str();
            match value {
                FieldRef::Text(text) => MatArray::char_array(field_name, text),
                FieldRef::Status(status) => {
                    let packed: String = status.iter().map(|s| s.as_char()).collect();
                    MatArray::char_array(field_name, &packed)
                }
                FieldRef::Codes(codes) => {
                    MatArray::from_ndarray(field_name, codes.mapv(f64::from).view())
                }
                FieldRef::Frames(values) => MatArray::from_ndarray(field_name, values),
                FieldRef::Points(values) => MatArray::from_ndarray(field_name, values),
                FieldRef::PointsXy(values) => MatArray::from_ndarray(field_name, values),
            }
        })
        .collect();
    MatArray::structure(name, fields)
}

/// Write `(points, 2, frames)` coordinates to CSV.
///
/// Creates a CSV file with headers "frame,point,x,y" and one row per point
/// per frame, frames outermost. NaN coordinates are written as `NaN`.
///
/// # Errors
///
/// Returns an error if:
/// - The second axis is not of length 2
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_points_csv(path: &Path, points: ArrayView3<'_, f64>) -> Result<()> {
    let (num_points, num_axes, num_frames) = points.dim();
    if num_axes != 2 {
        return Err(invalid(
            &path.display().to_string(),
            format!("expected 2 spatial axes, found {}", num_axes),
        ));
    }

    ensure_parent_dirs(path)?;
    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);

    let path_str = path.display().to_string();

    csv_writer
        .write_record(["frame", "point", "x", "y"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for frame in 0..num_frames {
        for point in 0..num_points {
            csv_writer
                .write_record(&[
                    frame.to_string(),
                    point.to_string(),
                    format!("{:.6}", points[[point, 0, frame]]),
                    format!("{:.6}", points[[point, 1, frame]]),
                ])
                .map_err(|e| WriteError::CsvError {
                    path: path_str.clone(),
                    source: e,
                })?;
        }
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
