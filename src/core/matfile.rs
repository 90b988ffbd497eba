//! MATLAB Level 5 MAT-file decoding.
//!
//! A Level 5 MAT-file starts with a fixed 128-byte header followed by a
//! sequence of tagged data elements:
//!
//! * **Header**: 116 bytes of descriptive text, an 8-byte subsystem data
//!   offset, a 2-byte version (`0x0100`) and a 2-byte endian indicator. The
//!   indicator reads `IM` when the file was written little-endian and `MI`
//!   when written big-endian.
//! * **Data elements**: an 8-byte tag (`u32` data type, `u32` byte count)
//!   followed by the payload, padded to an 8-byte boundary. Payloads of at
//!   most 4 bytes may use the "small data element" format, where type and
//!   byte count share the first tag word and the payload fills the second.
//! * **Top-level variables** are `miMATRIX` elements, or `miCOMPRESSED`
//!   elements whose zlib stream inflates to a single `miMATRIX`.
//!
//! Supported array classes are numeric (double, single and every integer
//! width, real or complex, logical flag preserved), char, cell, struct and
//! old-style objects. Numeric payloads of any storage type are widened to
//! `f64` and kept in MATLAB's column-major order. Sparse arrays and v7.3
//! (HDF5-based) files are rejected.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use log::debug;
use ndarray::{ArrayD, ArrayView, Dimension, IxDyn, ShapeBuilder};
use nom::bytes::complete::take;
use nom::combinator::map;
use nom::multi::many0;
use nom::number::complete as number;
use nom::number::Endianness;
use nom::{IResult, Parser};
use thiserror::Error;

/// Size of the fixed file header in bytes.
pub const HEADER_LEN: usize = 128;

/// Length of the descriptive text at the start of the header.
pub const HEADER_TEXT_LEN: usize = 116;

/// The only supported Level 5 version word.
pub const MAT_VERSION_5: u16 = 0x0100;

/// Version word written by MATLAB for v7.3 (HDF5) files.
pub const MAT_VERSION_73: u16 = 0x0200;

pub const MI_INT8: u32 = 1;
pub const MI_UINT8: u32 = 2;
pub const MI_INT16: u32 = 3;
pub const MI_UINT16: u32 = 4;
pub const MI_INT32: u32 = 5;
pub const MI_UINT32: u32 = 6;
pub const MI_SINGLE: u32 = 7;
pub const MI_DOUBLE: u32 = 9;
pub const MI_INT64: u32 = 12;
pub const MI_UINT64: u32 = 13;
pub const MI_MATRIX: u32 = 14;
pub const MI_COMPRESSED: u32 = 15;
pub const MI_UTF8: u32 = 16;
pub const MI_UTF16: u32 = 17;
pub const MI_UTF32: u32 = 18;

/// Deepest cell or struct nesting the decoder follows.
pub const MAX_NESTING: usize = 64;

/// Array flag bit marking complex data.
pub const FLAG_COMPLEX: u32 = 0x0800;
/// Array flag bit marking logical data.
pub const FLAG_LOGICAL: u32 = 0x0200;

/// Errors that can occur while decoding a MAT-file.
#[derive(Error, Debug)]
pub enum MatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid MAT-file header: {0}")]
    InvalidHeader(String),

    #[error("unsupported MAT-file version 0x{0:04x} (only Level 5 files are supported)")]
    UnsupportedVersion(u16),

    #[error("truncated data: {0}")]
    Truncated(String),

    #[error("unexpected data element type {found} for {context}")]
    UnexpectedElement { context: String, found: u32 },

    #[error("unsupported array class {0}")]
    UnsupportedClass(u8),

    #[error("failed to inflate compressed element: {0}")]
    Decompress(std::io::Error),

    #[error("invalid array '{name}': {reason}")]
    InvalidArray { name: String, reason: String },
}

/// Result type for MAT-file decoding.
pub type Result<T> = std::result::Result<T, MatError>;

/// MATLAB array class, as stored in the low byte of the array flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatClass {
    Cell = 1,
    Struct = 2,
    Object = 3,
    Char = 4,
    Sparse = 5,
    Double = 6,
    Single = 7,
    Int8 = 8,
    UInt8 = 9,
    Int16 = 10,
    UInt16 = 11,
    Int32 = 12,
    UInt32 = 13,
    Int64 = 14,
    UInt64 = 15,
}

impl MatClass {
    pub fn from_code(code: u8) -> Option<Self> {
        let class = match code {
            1 => MatClass::Cell,
            2 => MatClass::Struct,
            3 => MatClass::Object,
            4 => MatClass::Char,
            5 => MatClass::Sparse,
            6 => MatClass::Double,
            7 => MatClass::Single,
            8 => MatClass::Int8,
            9 => MatClass::UInt8,
            10 => MatClass::Int16,
            11 => MatClass::UInt16,
            12 => MatClass::Int32,
            13 => MatClass::UInt32,
            14 => MatClass::Int64,
            15 => MatClass::UInt64,
            _ => return None,
        };
        Some(class)
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// MATLAB's name for the class, as printed by `class(x)`.
    pub fn name(self) -> &'static str {
        match self {
            MatClass::Cell => "cell",
            MatClass::Struct => "struct",
            MatClass::Object => "object",
            MatClass::Char => "char",
            MatClass::Sparse => "sparse",
            MatClass::Double => "double",
            MatClass::Single => "single",
            MatClass::Int8 => "int8",
            MatClass::UInt8 => "uint8",
            MatClass::Int16 => "int16",
            MatClass::UInt16 => "uint16",
            MatClass::Int32 => "int32",
            MatClass::UInt32 => "uint32",
            MatClass::Int64 => "int64",
            MatClass::UInt64 => "uint64",
        }
    }

    /// Storage type used for this class's numeric payload.
    pub fn storage_type(self) -> Option<u32> {
        let data_type = match self {
            MatClass::Double => MI_DOUBLE,
            MatClass::Single => MI_SINGLE,
            MatClass::Int8 => MI_INT8,
            MatClass::UInt8 => MI_UINT8,
            MatClass::Int16 => MI_INT16,
            MatClass::UInt16 => MI_UINT16,
            MatClass::Int32 => MI_INT32,
            MatClass::UInt32 => MI_UINT32,
            MatClass::Int64 => MI_INT64,
            MatClass::UInt64 => MI_UINT64,
            _ => return None,
        };
        Some(data_type)
    }
}

/// Decoded contents of a MATLAB array.
#[derive(Debug, Clone, PartialEq)]
pub enum MatData {
    /// Numeric or logical array. Values are column-major.
    Numeric {
        class: MatClass,
        real: Vec<f64>,
        imag: Option<Vec<f64>>,
        logical: bool,
    },
    /// Character array, characters in column-major order.
    Char(String),
    /// Cell array, cells in column-major order.
    Cell(Vec<MatArray>),
    /// Struct or object array. `elements[i]` holds one value per field name;
    /// `elements` is empty when there are no field names.
    Struct {
        class_name: Option<String>,
        field_names: Vec<String>,
        elements: Vec<Vec<MatArray>>,
    },
}

/// A named MATLAB array with its dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct MatArray {
    /// Variable or field name (empty for cell contents).
    pub name: String,
    /// Dimensions as stored in the file (at least two for MATLAB-written data).
    pub dims: Vec<usize>,
    pub data: MatData,
}

impl MatArray {
    /// A 0x0 double array.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::numeric(name, vec![0, 0], Vec::new())
    }

    /// A real double array from column-major values.
    pub fn numeric(name: impl Into<String>, dims: Vec<usize>, real: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            dims,
            data: MatData::Numeric {
                class: MatClass::Double,
                real,
                imag: None,
                logical: false,
            },
        }
    }

    /// A real double array from an ndarray view of any dimensionality.
    ///
    /// One-dimensional views become 1xN row vectors, matching how MATLAB
    /// stores vectors.
    pub fn from_ndarray<D: Dimension>(name: impl Into<String>, view: ArrayView<'_, f64, D>) -> Self {
        let dims = match view.ndim() {
            0 => vec![1, 1],
            1 => vec![1, view.len()],
            _ => view.shape().to_vec(),
        };
        // C-order iteration over the reversed axes visits the array in
        // column-major order.
        let real = view.t().iter().copied().collect();
        Self::numeric(name, dims, real)
    }

    /// A 1xN char array, N counted in UTF-16 code units as MATLAB stores them.
    pub fn char_array(name: impl Into<String>, text: &str) -> Self {
        let len = text.encode_utf16().count();
        let dims = if len == 0 { vec![0, 0] } else { vec![1, len] };
        Self {
            name: name.into(),
            dims,
            data: MatData::Char(text.to_string()),
        }
    }

    /// A 1x1 struct whose fields are the given arrays, keyed by their names.
    pub fn structure(name: impl Into<String>, fields: Vec<MatArray>) -> Self {
        let field_names = fields.iter().map(|f| f.name.clone()).collect();
        Self {
            name: name.into(),
            dims: vec![1, 1],
            data: MatData::Struct {
                class_name: None,
                field_names,
                elements: vec![fields],
            },
        }
    }

    /// A cell array with the given dimensions and column-major contents.
    pub fn cell(name: impl Into<String>, dims: Vec<usize>, cells: Vec<MatArray>) -> Self {
        Self {
            name: name.into(),
            dims,
            data: MatData::Cell(cells),
        }
    }

    /// Replaces the class of a numeric array (values are kept as-is).
    pub fn with_class(mut self, new_class: MatClass) -> Self {
        if let MatData::Numeric { ref mut class, .. } = self.data {
            *class = new_class;
        }
        self
    }

    pub fn class(&self) -> MatClass {
        match &self.data {
            MatData::Numeric { class, .. } => *class,
            MatData::Char(_) => MatClass::Char,
            MatData::Cell(_) => MatClass::Cell,
            MatData::Struct { class_name, .. } => {
                if class_name.is_some() {
                    MatClass::Object
                } else {
                    MatClass::Struct
                }
            }
        }
    }

    /// Number of elements (product of dimensions).
    #[inline]
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Real part of a numeric array.
    pub fn real(&self) -> Option<&[f64]> {
        match &self.data {
            MatData::Numeric { real, .. } => Some(real),
            _ => None,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(&self.data, MatData::Numeric { imag: Some(_), .. })
    }

    /// Text of a char array.
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            MatData::Char(text) => Some(text),
            _ => None,
        }
    }

    /// Field names of a struct or object array.
    pub fn field_names(&self) -> &[String] {
        match &self.data {
            MatData::Struct { field_names, .. } => field_names,
            _ => &[],
        }
    }

    /// Looks up a field of the first element of a struct or object array.
    pub fn field(&self, name: &str) -> Option<&MatArray> {
        match &self.data {
            MatData::Struct {
                field_names,
                elements,
                ..
            } => {
                let index = field_names.iter().position(|f| f == name)?;
                elements.first().and_then(|values| values.get(index))
            }
            _ => None,
        }
    }

    /// The real part as an n-dimensional array with the stored dimensions.
    pub fn to_ndarray(&self) -> Option<ArrayD<f64>> {
        let real = self.real()?;
        ArrayD::from_shape_vec(IxDyn(&self.dims).f(), real.to_vec()).ok()
    }

    /// Dimensions formatted like `49x2x3`.
    pub fn dims_string(&self) -> String {
        format_dims(&self.dims)
    }
}

/// Formats dimensions the way MATLAB prints them, e.g. `49x2x3`.
pub fn format_dims(dims: &[usize]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

/// Decoded MAT-file header.
#[derive(Debug, Clone, PartialEq)]
pub struct MatHeader {
    /// Descriptive text with trailing padding removed.
    pub text: String,
    /// Raw subsystem data offset.
    pub subsystem_offset: [u8; 8],
    pub version: u16,
    /// Byte order of every numeric value in the file.
    pub endianness: Endianness,
}

impl MatHeader {
    /// Parse the 128-byte header at the start of a MAT-file.
    ///
    /// Returns the remaining input (the first data element) and the header.
    pub fn parse(input: &[u8]) -> Result<(&[u8], Self)> {
        let (rest, (text, subsystem, version, indicator)) =
            header_fields(input).map_err(|_| {
                MatError::InvalidHeader(format!(
                    "expected {} header bytes, found {}",
                    HEADER_LEN,
                    input.len()
                ))
            })?;

        let endianness = match indicator {
            b"IM" => Endianness::Little,
            b"MI" => Endianness::Big,
            other => {
                return Err(MatError::InvalidHeader(format!(
                    "unrecognised endian indicator {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        };

        let version_bytes = [version[0], version[1]];
        let version = match endianness {
            Endianness::Big => u16::from_be_bytes(version_bytes),
            _ => u16::from_le_bytes(version_bytes),
        };
        if version != MAT_VERSION_5 {
            if version == MAT_VERSION_73 {
                debug!("rejecting v7.3 (HDF5) MAT-file");
            }
            return Err(MatError::UnsupportedVersion(version));
        }

        let mut subsystem_offset = [0u8; 8];
        subsystem_offset.copy_from_slice(subsystem);

        Ok((
            rest,
            MatHeader {
                text: String::from_utf8_lossy(text)
                    .trim_end_matches(|c: char| c == ' ' || c == '\0')
                    .to_string(),
                subsystem_offset,
                version,
                endianness,
            },
        ))
    }
}

fn header_fields(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8], &[u8], &[u8])> {
    let (input, text) = take(HEADER_TEXT_LEN)(input)?;
    let (input, subsystem) = take(8usize)(input)?;
    let (input, version) = take(2usize)(input)?;
    let (input, indicator) = take(2usize)(input)?;
    Ok((input, (text, subsystem, version, indicator)))
}

/// A MAT-file: header plus top-level variables in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatFile {
    pub header: MatHeader,
    pub variables: Vec<MatArray>,
}

impl MatFile {
    /// Looks up a top-level variable by name.
    pub fn get(&self, name: &str) -> Option<&MatArray> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }
}

/// Read and decode a MAT-file from disk.
///
/// The file is read in full and the handle closed before decoding starts.
pub fn read_mat<P: AsRef<Path>>(path: P) -> Result<MatFile> {
    let bytes = {
        let mut file = File::open(path.as_ref())?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        bytes
    };
    debug!(
        "decoding {} ({} bytes)",
        path.as_ref().display(),
        bytes.len()
    );
    parse_mat(&bytes)
}

/// Decode a complete MAT-file held in memory.
pub fn parse_mat(bytes: &[u8]) -> Result<MatFile> {
    let (mut rest, header) = MatHeader::parse(bytes)?;
    let endian = header.endianness;
    let mut variables = Vec::new();

    while !rest.is_empty() {
        // Some writers pad the end of the file with zeros.
        if rest.len() < 8 && rest.iter().all(|&b| b == 0) {
            break;
        }

        let (next, element) = next_element(rest, endian)?;
        rest = next;

        match element.data_type {
            MI_MATRIX => variables.push(parse_matrix(element.data, endian, 0)?),
            MI_COMPRESSED => {
                let inflated = inflate(element.data)?;
                let (_, inner) = next_element(&inflated, endian)?;
                if inner.data_type != MI_MATRIX {
                    return Err(MatError::UnexpectedElement {
                        context: "compressed variable".to_string(),
                        found: inner.data_type,
                    });
                }
                variables.push(parse_matrix(inner.data, endian, 0)?);
            }
            other => debug!("skipping top-level element of type {}", other),
        }
    }

    Ok(MatFile { header, variables })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(MatError::Decompress)?;
    Ok(inflated)
}

/// One tagged data element; `data` excludes the tag and any padding.
#[derive(Debug, Clone, Copy)]
struct Element<'a> {
    data_type: u32,
    data: &'a [u8],
}

/// Decodes a tag, returning `(data_type, byte_count, is_small)`.
fn element_tag(input: &[u8], endian: Endianness) -> IResult<&[u8], (u32, usize, bool)> {
    let (rest, word) = number::u32(endian)(input)?;
    if word >> 16 != 0 {
        // small data element: type and byte count packed in one word
        Ok((rest, (word & 0xFFFF, (word >> 16) as usize, true)))
    } else {
        let (rest, byte_count) = number::u32(endian)(rest)?;
        Ok((rest, (word, byte_count as usize, false)))
    }
}

fn next_element(input: &[u8], endian: Endianness) -> Result<(&[u8], Element<'_>)> {
    let (rest, (data_type, byte_count, small)) = element_tag(input, endian).map_err(|_| {
        MatError::Truncated(format!(
            "element tag needs 8 bytes, {} remain",
            input.len()
        ))
    })?;

    if small {
        if byte_count > 4 || rest.len() < 4 {
            return Err(MatError::Truncated(format!(
                "small element of type {} declares {} bytes",
                data_type, byte_count
            )));
        }
        let (payload, rest) = rest.split_at(4);
        return Ok((
            rest,
            Element {
                data_type,
                data: &payload[..byte_count],
            },
        ));
    }

    if rest.len() < byte_count {
        return Err(MatError::Truncated(format!(
            "element of type {} declares {} bytes, {} remain",
            data_type,
            byte_count,
            rest.len()
        )));
    }
    let (data, rest) = rest.split_at(byte_count);

    // compressed elements are not padded
    let padding = if data_type == MI_COMPRESSED {
        0
    } else {
        (8 - byte_count % 8) % 8
    };
    let rest = &rest[padding.min(rest.len())..];

    Ok((rest, Element { data_type, data }))
}

fn parse_matrix(data: &[u8], endian: Endianness, depth: usize) -> Result<MatArray> {
    // MATLAB writes empty cell contents and empty fields as zero-length matrices.
    if data.is_empty() {
        return Ok(MatArray::empty(""));
    }
    if depth > MAX_NESTING {
        return Err(MatError::InvalidArray {
            name: String::new(),
            reason: format!("cells and structs nested deeper than {}", MAX_NESTING),
        });
    }

    let (rest, flags) = next_element(data, endian)?;
    let flag_word = decode_numeric(flags, endian)?
        .first()
        .copied()
        .ok_or_else(|| MatError::Truncated("array flags are empty".to_string()))?
        as u32;
    let class_code = (flag_word & 0xFF) as u8;
    let complex = flag_word & FLAG_COMPLEX != 0;
    let logical = flag_word & FLAG_LOGICAL != 0;

    let (rest, dims_element) = next_element(rest, endian)?;
    let (rest, name_element) = next_element(rest, endian)?;
    let name = decode_name(name_element);
    let dims = decode_dims(dims_element, endian, &name)?;

    let class = MatClass::from_code(class_code).ok_or(MatError::UnsupportedClass(class_code))?;
    let numel = element_count(&dims, &name)?;

    let data = match class {
        MatClass::Sparse => return Err(MatError::UnsupportedClass(class_code)),
        MatClass::Cell => {
            ensure_room(rest, Some(numel), &name)?;
            let mut cells = Vec::with_capacity(numel);
            let mut rest = rest;
            for _ in 0..numel {
                let (next, element) = next_element(rest, endian)?;
                expect_matrix(&element, || format!("cell of '{}'", name))?;
                cells.push(parse_matrix(element.data, endian, depth + 1)?);
                rest = next;
            }
            MatData::Cell(cells)
        }
        MatClass::Struct | MatClass::Object => {
            parse_struct(rest, endian, class, numel, &name, depth)?
        }
        MatClass::Char => {
            if rest.is_empty() {
                MatData::Char(String::new())
            } else {
                let (_, element) = next_element(rest, endian)?;
                MatData::Char(decode_chars(element, endian)?)
            }
        }
        numeric => {
            let (rest, real) = if rest.is_empty() && numel == 0 {
                (rest, Vec::new())
            } else {
                let (rest, real_element) = next_element(rest, endian)?;
                (rest, decode_numeric(real_element, endian)?)
            };
            let imag = if complex {
                let (_, imag_element) = next_element(rest, endian)?;
                Some(decode_numeric(imag_element, endian)?)
            } else {
                None
            };
            let found = imag.as_ref().map_or(real.len(), |imag| real.len().min(imag.len()));
            if real.len() != numel || found != numel {
                return Err(invalid_array(
                    &name,
                    format!(
                        "dimensions {} need {} values, found {}",
                        format_dims(&dims),
                        numel,
                        found
                    ),
                ));
            }
            MatData::Numeric {
                class: numeric,
                real,
                imag,
                logical,
            }
        }
    };

    Ok(MatArray { name, dims, data })
}

fn parse_struct(
    input: &[u8],
    endian: Endianness,
    class: MatClass,
    numel: usize,
    name: &str,
    depth: usize,
) -> Result<MatData> {
    let mut rest = input;

    let class_name = if class == MatClass::Object {
        let (next, element) = next_element(rest, endian)?;
        rest = next;
        Some(decode_name(element))
    } else {
        None
    };

    let (next, length_element) = next_element(rest, endian)?;
    let name_length = decode_numeric(length_element, endian)?
        .first()
        .copied()
        .unwrap_or(0.0) as usize;

    let (next, names_element) = next_element(next, endian)?;
    rest = next;

    let field_names: Vec<String> = if name_length == 0 {
        Vec::new()
    } else {
        names_element
            .data
            .chunks(name_length)
            .map(|chunk| {
                let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
                String::from_utf8_lossy(&chunk[..end]).into_owned()
            })
            .collect()
    };

    if field_names.is_empty() {
        return Ok(MatData::Struct {
            class_name,
            field_names,
            elements: Vec::new(),
        });
    }

    ensure_room(rest, numel.checked_mul(field_names.len()), name)?;
    let mut elements = Vec::with_capacity(numel);
    for _ in 0..numel {
        let mut values = Vec::with_capacity(field_names.len());
        for field in &field_names {
            let (next, element) = next_element(rest, endian)?;
            expect_matrix(&element, || format!("field '{}' of '{}'", field, name))?;
            let mut value = parse_matrix(element.data, endian, depth + 1)?;
            value.name = field.clone();
            values.push(value);
            rest = next;
        }
        elements.push(values);
    }

    Ok(MatData::Struct {
        class_name,
        field_names,
        elements,
    })
}

fn invalid_array(name: &str, reason: String) -> MatError {
    MatError::InvalidArray {
        name: name.to_string(),
        reason,
    }
}

/// Dimensions are stored as integers and must be non-negative.
fn decode_dims(element: Element<'_>, endian: Endianness, name: &str) -> Result<Vec<usize>> {
    decode_numeric(element, endian)?
        .into_iter()
        .map(|d| {
            if d >= 0.0 && d.fract() == 0.0 && d <= u32::MAX as f64 {
                Ok(d as usize)
            } else {
                Err(invalid_array(name, format!("invalid dimension {}", d)))
            }
        })
        .collect()
}

fn element_count(dims: &[usize], name: &str) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |count, &d| count.checked_mul(d))
        .ok_or_else(|| {
            invalid_array(
                name,
                format!("dimensions {} overflow the element count", format_dims(dims)),
            )
        })
}

/// Every cell or field value needs at least its 8-byte tag.
fn ensure_room(input: &[u8], values: Option<usize>, name: &str) -> Result<()> {
    match values.and_then(|v| v.checked_mul(8)) {
        Some(needed) if needed <= input.len() => Ok(()),
        _ => Err(MatError::Truncated(format!(
            "'{}' declares {} values, {} bytes remain",
            name,
            values.map_or_else(|| "too many".to_string(), |v| v.to_string()),
            input.len()
        ))),
    }
}

fn expect_matrix(element: &Element<'_>, context: impl FnOnce() -> String) -> Result<()> {
    if element.data_type == MI_MATRIX {
        Ok(())
    } else {
        Err(MatError::UnexpectedElement {
            context: context(),
            found: element.data_type,
        })
    }
}

/// Names are NUL-padded ASCII.
fn decode_name(element: Element<'_>) -> String {
    let end = element
        .data
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(element.data.len());
    String::from_utf8_lossy(&element.data[..end]).into_owned()
}

fn decode_chars(element: Element<'_>, endian: Endianness) -> Result<String> {
    let text = match element.data_type {
        MI_UTF8 | MI_INT8 => String::from_utf8_lossy(element.data).into_owned(),
        MI_UINT8 => element.data.iter().map(|&b| b as char).collect(),
        MI_UINT16 | MI_UTF16 | MI_INT16 => {
            let units: Vec<u16> = decode_numeric(element, endian)?
                .into_iter()
                .map(|v| v as u16)
                .collect();
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        MI_UINT32 | MI_UTF32 | MI_INT32 => decode_numeric(element, endian)?
            .into_iter()
            .map(|v| char::from_u32(v as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
        other => {
            return Err(MatError::UnexpectedElement {
                context: "char data".to_string(),
                found: other,
            })
        }
    };
    Ok(text)
}

fn element_width(data_type: u32) -> Option<usize> {
    let width = match data_type {
        MI_INT8 | MI_UINT8 | MI_UTF8 => 1,
        MI_INT16 | MI_UINT16 | MI_UTF16 => 2,
        MI_INT32 | MI_UINT32 | MI_SINGLE | MI_UTF32 => 4,
        MI_DOUBLE | MI_INT64 | MI_UINT64 => 8,
        _ => return None,
    };
    Some(width)
}

/// Widens a numeric payload of any storage type to `f64`.
fn decode_numeric(element: Element<'_>, endian: Endianness) -> Result<Vec<f64>> {
    let bytes = element.data;
    let width = element_width(element.data_type).ok_or_else(|| MatError::UnexpectedElement {
        context: "numeric data".to_string(),
        found: element.data_type,
    })?;
    if bytes.len() % width != 0 {
        return Err(MatError::Truncated(format!(
            "{} bytes is not a whole number of {}-byte values",
            bytes.len(),
            width
        )));
    }

    match element.data_type {
        MI_INT8 => widen(bytes, map(number::i8, f64::from)),
        MI_UINT8 | MI_UTF8 => widen(bytes, map(number::u8, f64::from)),
        MI_INT16 => widen(bytes, map(number::i16(endian), f64::from)),
        MI_UINT16 | MI_UTF16 => widen(bytes, map(number::u16(endian), f64::from)),
        MI_INT32 => widen(bytes, map(number::i32(endian), f64::from)),
        MI_UINT32 | MI_UTF32 => widen(bytes, map(number::u32(endian), f64::from)),
        MI_SINGLE => widen(bytes, map(number::f32(endian), f64::from)),
        MI_DOUBLE => widen(bytes, number::f64(endian)),
        MI_INT64 => widen(bytes, map(number::i64(endian), |v| v as f64)),
        _ => widen(bytes, map(number::u64(endian), |v| v as f64)),
    }
}

fn widen<'a, P>(bytes: &'a [u8], parser: P) -> Result<Vec<f64>>
where
    P: Parser<&'a [u8], f64, nom::error::Error<&'a [u8]>>,
{
    let (rest, values) = many0(parser)(bytes)
        .map_err(|_| MatError::Truncated("numeric payload".to_string()))?;
    if !rest.is_empty() {
        return Err(MatError::Truncated(format!(
            "{} trailing bytes in numeric payload",
            rest.len()
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::matlab;

    fn be_tag(data_type: u32, byte_count: u32) -> Vec<u8> {
        let mut tag = data_type.to_be_bytes().to_vec();
        tag.extend_from_slice(&byte_count.to_be_bytes());
        tag
    }

    fn header(version: [u8; 2], indicator: &[u8; 2]) -> Vec<u8> {
        let mut bytes = vec![b' '; HEADER_TEXT_LEN];
        bytes[..10].copy_from_slice(b"MATLAB 5.0");
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&version);
        bytes.extend_from_slice(indicator);
        bytes
    }

    #[test]
    fn test_small_data_element() {
        let word: u32 = (4 << 16) | MI_INT32;
        let mut bytes = word.to_le_bytes().to_vec();
        bytes.extend_from_slice(&7i32.to_le_bytes());
        bytes.extend_from_slice(&[0xAA; 8]);

        let (rest, element) = next_element(&bytes, Endianness::Little).unwrap();
        assert_eq!(element.data_type, MI_INT32);
        assert_eq!(element.data, &7i32.to_le_bytes());
        assert_eq!(rest.len(), 8);
        assert_eq!(decode_numeric(element, Endianness::Little).unwrap(), vec![7.0]);
    }

    #[test]
    fn test_regular_element_skips_padding() {
        let mut bytes = MI_INT8.to_le_bytes().to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"abc\0\0\0\0\0");
        bytes.extend_from_slice(&[1, 2]);

        let (rest, element) = next_element(&bytes, Endianness::Little).unwrap();
        assert_eq!(decode_name(element), "abc");
        assert_eq!(rest, &[1, 2]);
    }

    #[test]
    fn test_truncated_element() {
        let mut bytes = MI_DOUBLE.to_le_bytes().to_vec();
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());

        let err = next_element(&bytes, Endianness::Little).unwrap_err();
        assert!(matches!(err, MatError::Truncated(_)));
    }

    #[test]
    fn test_header_little_endian() {
        let bytes = header([0x00, 0x01], b"IM");
        let (rest, header) = MatHeader::parse(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.version, MAT_VERSION_5);
        assert_eq!(header.endianness, Endianness::Little);
        assert_eq!(header.text, "MATLAB 5.0");
    }

    #[test]
    fn test_header_rejects_hdf5_version() {
        let bytes = header([0x00, 0x02], b"IM");
        let err = MatHeader::parse(&bytes).unwrap_err();
        assert!(matches!(err, MatError::UnsupportedVersion(MAT_VERSION_73)));
    }

    #[test]
    fn test_header_rejects_bad_indicator() {
        let bytes = header([0x00, 0x01], b"XX");
        assert!(matches!(
            MatHeader::parse(&bytes),
            Err(MatError::InvalidHeader(_))
        ));
        assert!(matches!(
            MatHeader::parse(&bytes[..40]),
            Err(MatError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_big_endian_double_matrix() {
        let mut inner = be_tag(MI_UINT32, 8);
        inner.extend_from_slice(&(MatClass::Double.code() as u32).to_be_bytes());
        inner.extend_from_slice(&[0u8; 4]);
        inner.extend(be_tag(MI_INT32, 8));
        inner.extend_from_slice(&1i32.to_be_bytes());
        inner.extend_from_slice(&2i32.to_be_bytes());
        // array name as a small data element
        inner.extend_from_slice(&((1u32 << 16) | MI_INT8).to_be_bytes());
        inner.extend_from_slice(b"a\0\0\0");
        inner.extend(be_tag(MI_DOUBLE, 16));
        inner.extend_from_slice(&1.5f64.to_be_bytes());
        inner.extend_from_slice(&(-2.0f64).to_be_bytes());

        let mut bytes = header([0x01, 0x00], b"MI");
        bytes.extend(be_tag(MI_MATRIX, inner.len() as u32));
        bytes.extend(inner);

        let file = parse_mat(&bytes).unwrap();
        assert_eq!(file.header.endianness, Endianness::Big);
        let a = file.get("a").unwrap();
        assert_eq!(a.dims, vec![1, 2]);
        assert_eq!(a.class(), MatClass::Double);
        assert_eq!(a.real().unwrap(), &[1.5, -2.0]);
    }

    #[test]
    fn test_decode_chars_utf16() {
        let units: Vec<u8> = "sfmd"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let element = Element {
            data_type: MI_UINT16,
            data: &units,
        };
        assert_eq!(decode_chars(element, Endianness::Little).unwrap(), "sfmd");
    }

    #[test]
    fn test_to_ndarray_is_column_major() {
        // [[1, 3, 5], [2, 4, 6]] stored column-major
        let array = MatArray::numeric("m", vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let nd = array.to_ndarray().unwrap();
        assert_eq!(nd.shape(), &[2, 3]);
        assert_eq!(nd[[0, 1]], 3.0);
        assert_eq!(nd[[1, 2]], 6.0);

        let back = MatArray::from_ndarray("m", nd.view());
        assert_eq!(back, array);
    }

    #[test]
    fn test_struct_field_lookup() {
        let s = MatArray::structure(
            "s",
            vec![
                MatArray::char_array("label", "worm"),
                MatArray::numeric("value", vec![1, 1], vec![4.0]),
            ],
        );
        assert_eq!(s.class(), MatClass::Struct);
        assert_eq!(s.field_names(), &["label".to_string(), "value".to_string()]);
        assert_eq!(s.field("label").and_then(|f| f.as_text()), Some("worm"));
        assert_eq!(s.field("value").and_then(|f| f.real()), Some(&[4.0][..]));
        assert!(s.field("missing").is_none());
    }

    #[test]
    fn test_rejects_overflowing_dimensions() {
        let bytes = matlab::file(&[matlab::doubles("big", &[i32::MAX; 4], &[1.0])]);
        assert!(matches!(
            parse_mat(&bytes),
            Err(MatError::InvalidArray { name, .. }) if name == "big"
        ));
    }

    #[test]
    fn test_rejects_negative_dimension() {
        let bytes = matlab::file(&[matlab::doubles("neg", &[-1, 2], &[])]);
        assert!(matches!(
            parse_mat(&bytes),
            Err(MatError::InvalidArray { name, .. }) if name == "neg"
        ));
    }

    #[test]
    fn test_rejects_cell_larger_than_input() {
        let bytes = matlab::file(&[matlab::array(MatClass::Cell, 0, &[1, 1 << 28], "c", &[])]);
        assert!(matches!(parse_mat(&bytes), Err(MatError::Truncated(_))));
    }

    #[test]
    fn test_rejects_struct_larger_than_input() {
        let body = matlab::field_header(&["a", "b"]);
        let bytes = matlab::file(&[matlab::array(
            MatClass::Struct,
            0,
            &[1 << 20, 1 << 20],
            "s",
            &body,
        )]);
        assert!(matches!(parse_mat(&bytes), Err(MatError::Truncated(_))));
    }

    #[test]
    fn test_rejects_deep_nesting() {
        let mut value = matlab::doubles("", &[1, 1], &[1.0]);
        for _ in 0..=MAX_NESTING {
            value = matlab::array(MatClass::Cell, 0, &[1, 1], "", &value);
        }
        let bytes = matlab::file(&[matlab::array(MatClass::Cell, 0, &[1, 1], "deep", &value)]);
        assert!(matches!(parse_mat(&bytes), Err(MatError::InvalidArray { .. })));
    }

    #[test]
    fn test_rejects_sparse_array() {
        let bytes = matlab::file(&[matlab::array(MatClass::Sparse, 0, &[3, 3], "sp", &[])]);
        assert!(matches!(parse_mat(&bytes), Err(MatError::UnsupportedClass(5))));
    }

    #[test]
    fn test_old_style_object() {
        let mut body = matlab::element(MI_INT8, b"NormalizedWorm");
        body.extend(matlab::field_header(&["lengths"]));
        body.extend(matlab::doubles("", &[1, 2], &[980.5, 1001.25]));
        let bytes = matlab::file(&[matlab::array(MatClass::Object, 0, &[1, 1], "s", &body)]);

        let file = parse_mat(&bytes).unwrap();
        let s = file.get("s").unwrap();
        assert_eq!(s.class(), MatClass::Object);
        match &s.data {
            MatData::Struct { class_name, .. } => {
                assert_eq!(class_name.as_deref(), Some("NormalizedWorm"))
            }
            other => panic!("expected an object, got {other:?}"),
        }
        assert_eq!(
            s.field("lengths").and_then(|f| f.real()),
            Some(&[980.5, 1001.25][..])
        );
    }

    #[test]
    fn test_logical_array() {
        let payload = matlab::element(MI_UINT8, &[1, 0, 1]);
        let bytes = matlab::file(&[matlab::array(
            MatClass::UInt8,
            FLAG_LOGICAL,
            &[1, 3],
            "mask",
            &payload,
        )]);

        let file = parse_mat(&bytes).unwrap();
        match &file.get("mask").unwrap().data {
            MatData::Numeric {
                class,
                real,
                logical,
                imag,
            } => {
                assert!(*logical);
                assert_eq!(*class, MatClass::UInt8);
                assert_eq!(real, &[1.0, 0.0, 1.0]);
                assert!(imag.is_none());
            }
            other => panic!("expected numeric data, got {other:?}"),
        }
    }

    #[test]
    fn test_doubles_stored_in_narrow_types() {
        let bytes = matlab::file(&[
            matlab::doubles("codes", &[1, 3], &[1.0, 2.0, 101.0]),
            matlab::doubles("offsets", &[1, 2], &[-300.0, 7.0]),
        ]);
        // matrix tag, flags, dims and name come before the payload tag
        assert_eq!(&bytes[128 + 56..128 + 60], &MI_UINT8.to_le_bytes());

        let file = parse_mat(&bytes).unwrap();
        let codes = file.get("codes").unwrap();
        assert_eq!(codes.class(), MatClass::Double);
        assert_eq!(codes.real().unwrap(), &[1.0, 2.0, 101.0]);
        assert_eq!(file.get("offsets").unwrap().real().unwrap(), &[-300.0, 7.0]);
    }

    #[test]
    fn test_compressed_utf8_char_array() {
        let bytes = matlab::file(&[matlab::compressed(&matlab::utf8_chars("path", "w\u{f6}rm"))]);
        let file = parse_mat(&bytes).unwrap();
        let path = file.get("path").unwrap();
        assert_eq!(path.class(), MatClass::Char);
        assert_eq!(path.as_text(), Some("w\u{f6}rm"));
    }

    #[test]
    fn test_struct_with_small_name_length_element() {
        let record = matlab::structure(
            "s",
            &[1, 1],
            &[
                ("frame_codes", matlab::doubles("", &[1, 2], &[1.0, 3.0])),
                ("x", matlab::doubles("", &[1, 1], &[0.25])),
            ],
        );
        let file = parse_mat(&matlab::file(&[record])).unwrap();
        let s = file.get("s").unwrap();
        assert_eq!(s.field_names(), &["frame_codes".to_string(), "x".to_string()]);
        assert_eq!(s.field("frame_codes").unwrap().name, "frame_codes");
        assert_eq!(s.field("x").and_then(|f| f.real()), Some(&[0.25][..]));
    }
}
