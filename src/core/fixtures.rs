//! Synthetic normalized worms for tests.
//!
//! Frame `f` of a synthetic worm is a straight line of 49 points, one unit
//! apart, starting at `origin(f)` and heading at `heading_deg(f)`. Centroid
//! and orientation are therefore known in closed form.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};

use crate::core::dataset::{FieldData, SegmentationStatus, WormDataset, WormField, NUM_SKELETON_POINTS};
use crate::core::writers::{dataset_to_record, write_mat};
use crate::core::matfile::MatArray;
use crate::core::loaders::{EIGENWORM_COMPONENTS, EIGENWORM_LENGTH};

pub struct SyntheticWorm {
    pub num_frames: usize,
    pub status: String,
    /// Frames whose skeleton and contour points are all NaN.
    pub nan_frames: Vec<usize>,
    pub eigenworm_path: String,
}

impl SyntheticWorm {
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            status: "s".repeat(num_frames),
            nan_frames: Vec::new(),
            eigenworm_path: "masterEigenWorms_N2.mat".to_string(),
        }
    }

    pub fn with_nan_frames(mut self, frames: &[usize]) -> Self {
        self.nan_frames = frames.to_vec();
        self
    }

    pub fn origin(frame: usize) -> (f64, f64) {
        (100.0 + 10.0 * frame as f64, -50.0 + 3.0 * frame as f64)
    }

    /// Heading stays inside (-90, 90) degrees so the half-range arctangent
    /// recovers it exactly.
    pub fn heading_deg(frame: usize) -> f64 {
        -40.0 + 25.0 * frame as f64 % 80.0
    }

    /// Exact centroid of a finite frame.
    pub fn centroid(frame: usize) -> (f64, f64) {
        let (ox, oy) = Self::origin(frame);
        let theta = Self::heading_deg(frame).to_radians();
        let mid = (NUM_SKELETON_POINTS - 1) as f64 / 2.0;
        (ox + mid * theta.cos(), oy + mid * theta.sin())
    }

    pub fn skeletons(&self) -> Array3<f64> {
        Array3::from_shape_fn((NUM_SKELETON_POINTS, 2, self.num_frames), |(p, axis, f)| {
            if self.nan_frames.contains(&f) {
                return f64::NAN;
            }
            let (ox, oy) = Self::origin(f);
            let theta = Self::heading_deg(f).to_radians();
            if axis == 0 {
                ox + p as f64 * theta.cos()
            } else {
                oy + p as f64 * theta.sin()
            }
        })
    }

    fn contour(&self, offset: f64) -> Array3<f64> {
        let mut contour = self.skeletons();
        contour
            .index_axis_mut(ndarray::Axis(1), 1)
            .mapv_inplace(|y| y + offset);
        contour
    }
}

/// One value per schema field describing `worm`.
pub fn synthetic_fields(worm: &SyntheticWorm) -> BTreeMap<WormField, FieldData> {
    let n = worm.num_frames;
    let skeletons = worm.skeletons();
    let skeleton_x = skeletons.index_axis(ndarray::Axis(1), 0).to_owned();
    let skeleton_y = skeletons.index_axis(ndarray::Axis(1), 1).to_owned();

    let status: Vec<SegmentationStatus> = worm.status.chars().map(SegmentationStatus::from_char).collect();
    let codes = Array1::from_iter(status.iter().map(|s| match s {
        SegmentationStatus::Segmented => 1,
        SegmentationStatus::StageMovement => 2,
        SegmentationStatus::Dropped => 3,
        _ => 101,
    }));

    let mut fields = BTreeMap::new();
    fields.insert(WormField::EigenwormPath, FieldData::Text(worm.eigenworm_path.clone()));
    fields.insert(WormField::SegmentationStatus, FieldData::Status(status));
    fields.insert(WormField::FrameCodes, FieldData::Codes(codes));
    fields.insert(WormField::VulvaContours, FieldData::PointsXy(worm.contour(1.0)));
    fields.insert(WormField::NonVulvaContours, FieldData::PointsXy(worm.contour(-1.0)));
    fields.insert(
        WormField::Angles,
        FieldData::PointsXy(Array3::from_shape_fn((NUM_SKELETON_POINTS, 2, n), |(p, a, f)| {
            (p + a + f) as f64 * 0.5
        })),
    );
    fields.insert(WormField::Skeletons, FieldData::PointsXy(skeletons));
    fields.insert(WormField::InOutTouches, FieldData::Points(Array2::zeros((NUM_SKELETON_POINTS, n))));
    fields.insert(WormField::Lengths, FieldData::Frames(Array1::from_elem(n, 48.0)));
    fields.insert(
        WormField::Widths,
        FieldData::Points(Array2::from_shape_fn((NUM_SKELETON_POINTS, n), |(p, _)| {
            2.0 + (p as f64 / 10.0)
        })),
    );
    for field in [
        WormField::HeadAreas,
        WormField::TailAreas,
        WormField::VulvaAreas,
        WormField::NonVulvaAreas,
    ] {
        fields.insert(field, FieldData::Frames(Array1::from_shape_fn(n, |f| 10.0 + f as f64)));
    }
    fields.insert(WormField::X, FieldData::Points(skeleton_x));
    fields.insert(WormField::Y, FieldData::Points(skeleton_y));
    fields
}

pub fn synthetic_dataset(worm: &SyntheticWorm) -> WormDataset {
    WormDataset::from_fields(synthetic_fields(worm)).expect("synthetic dataset is valid")
}

/// Write `worm` as a `norm_obj.mat`-style file with record `s`.
pub fn write_data_file(dir: &Path, worm: &SyntheticWorm, compress: bool) -> PathBuf {
    let path = dir.join("norm_obj.mat");
    let record = dataset_to_record("s", &synthetic_dataset(worm));
    write_mat(&path, &[record], compress).expect("write synthetic data file");
    path
}

/// A deterministic (7, 48) basis.
pub fn eigen_basis() -> Array2<f64> {
    Array2::from_shape_fn((EIGENWORM_COMPONENTS, EIGENWORM_LENGTH), |(c, i)| {
        ((c + 1) as f64 * (i as f64 / 8.0)).sin()
    })
}

pub fn write_eigen_file(dir: &Path, variable: &str) -> PathBuf {
    let path = dir.join("masterEigenWorms_N2.mat");
    let basis = eigen_basis();
    write_mat(&path, &[MatArray::from_ndarray(variable, basis.view())], false)
        .expect("write synthetic eigenworm file");
    path
}

/// MAT elements assembled by hand in the little-endian layout MATLAB
/// writes, without going through the crate's writer.
pub mod matlab {
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use crate::core::matfile::{
        MatClass, FLAG_COMPLEX, MI_COMPRESSED, MI_DOUBLE, MI_INT16, MI_INT32, MI_INT8, MI_MATRIX,
        MI_UINT32, MI_UINT8, MI_UTF8,
    };

    /// Field-name length MATLAB uses for struct records.
    pub const FIELD_NAME_LENGTH: usize = 32;

    pub fn element(data_type: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = data_type.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes.resize(bytes.len() + (8 - payload.len() % 8) % 8, 0);
        bytes
    }

    /// A small data element: up to 4 payload bytes share the tag.
    pub fn small_element(data_type: u32, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 4);
        let word = ((payload.len() as u32) << 16) | data_type;
        let mut bytes = word.to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes.resize(8, 0);
        bytes
    }

    fn name_element(name: &str) -> Vec<u8> {
        if (1..=4).contains(&name.len()) {
            small_element(MI_INT8, name.as_bytes())
        } else {
            element(MI_INT8, name.as_bytes())
        }
    }

    /// A complete `miMATRIX` element.
    pub fn array(class: MatClass, flags: u32, dims: &[i32], name: &str, body: &[u8]) -> Vec<u8> {
        let flag_word = (class.code() as u32 | flags).to_le_bytes();
        let mut inner = element(MI_UINT32, &[flag_word, [0; 4]].concat());
        let dims: Vec<u8> = dims.iter().flat_map(|d| d.to_le_bytes()).collect();
        inner.extend(element(MI_INT32, &dims));
        inner.extend(name_element(name));
        inner.extend_from_slice(body);
        element(MI_MATRIX, &inner)
    }

    fn double_payload(values: &[f64]) -> Vec<u8> {
        // integer-valued doubles are stored in the narrowest type that holds them
        if values.iter().all(|v| v.fract() == 0.0 && (0.0..=255.0).contains(v)) {
            element(MI_UINT8, &values.iter().map(|&v| v as u8).collect::<Vec<_>>())
        } else if values
            .iter()
            .all(|v| v.fract() == 0.0 && (i16::MIN as f64..=i16::MAX as f64).contains(v))
        {
            element(
                MI_INT16,
                &values.iter().flat_map(|&v| (v as i16).to_le_bytes()).collect::<Vec<_>>(),
            )
        } else {
            element(
                MI_DOUBLE,
                &values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>(),
            )
        }
    }

    /// A real double array; `values` are column-major.
    pub fn doubles(name: &str, dims: &[i32], values: &[f64]) -> Vec<u8> {
        array(MatClass::Double, 0, dims, name, &double_payload(values))
    }

    pub fn complex_doubles(name: &str, dims: &[i32], real: &[f64], imag: &[f64]) -> Vec<u8> {
        let mut body = double_payload(real);
        body.extend(double_payload(imag));
        array(MatClass::Double, FLAG_COMPLEX, dims, name, &body)
    }

    /// A 1xN char array stored as `miUTF8`.
    pub fn utf8_chars(name: &str, text: &str) -> Vec<u8> {
        let dims = [1, text.chars().count() as i32];
        array(MatClass::Char, 0, &dims, name, &element(MI_UTF8, text.as_bytes()))
    }

    /// A struct array of `dims` with one value per field per element;
    /// values are `miMATRIX` elements with empty names.
    pub fn structure(name: &str, dims: &[i32], fields: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let field_names: Vec<&str> = fields.iter().map(|(field, _)| *field).collect();
        let mut body = field_header(&field_names);
        for (_, value) in fields {
            body.extend_from_slice(value);
        }
        array(MatClass::Struct, 0, dims, name, &body)
    }

    /// Field-name length as a small element, then the padded names.
    pub fn field_header(field_names: &[&str]) -> Vec<u8> {
        let mut body = small_element(MI_INT32, &(FIELD_NAME_LENGTH as i32).to_le_bytes());
        let mut names = Vec::new();
        for field in field_names {
            let start = names.len();
            names.extend_from_slice(field.as_bytes());
            names.resize(start + FIELD_NAME_LENGTH, 0);
        }
        body.extend(element(MI_INT8, &names));
        body
    }

    /// Wraps a `miMATRIX` element in `miCOMPRESSED`.
    pub fn compressed(matrix: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(matrix).expect("compress element");
        let data = encoder.finish().expect("finish compression");
        let mut bytes = MI_COMPRESSED.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend(data);
        bytes
    }

    /// Header plus the given top-level elements.
    pub fn file(elements: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = b"MATLAB 5.0 MAT-file, Platform: GLNXA64".to_vec();
        bytes.resize(116, b' ');
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&0x0100u16.to_le_bytes());
        bytes.extend_from_slice(b"IM");
        for element in elements {
            bytes.extend_from_slice(element);
        }
        bytes
    }
}

/// Schema fields of `worm` as hand-assembled MAT values, in record order.
pub fn matlab_fields(worm: &SyntheticWorm) -> Vec<(&'static str, Vec<u8>)> {
    let mut fields = synthetic_fields(worm);
    let n = worm.num_frames as i32;
    let points = NUM_SKELETON_POINTS as i32;

    WormField::ALL
        .iter()
        .map(|field| {
            let name = field.as_str();
            let value = match fields.remove(field) {
                Some(FieldData::Text(text)) => matlab::utf8_chars("", &text),
                Some(FieldData::Status(status)) => {
                    let packed: String = status.iter().map(|s| s.as_char()).collect();
                    matlab::utf8_chars("", &packed)
                }
                Some(FieldData::Codes(codes)) => {
                    let values: Vec<f64> = codes.iter().map(|&c| f64::from(c)).collect();
                    matlab::doubles("", &[1, n], &values)
                }
                Some(FieldData::Frames(values)) => matlab::doubles("", &[1, n], &values.to_vec()),
                Some(FieldData::Points(values)) => {
                    let column_major: Vec<f64> = values.t().iter().copied().collect();
                    matlab::doubles("", &[points, n], &column_major)
                }
                Some(FieldData::PointsXy(values)) => {
                    let column_major: Vec<f64> = values.t().iter().copied().collect();
                    matlab::doubles("", &[points, 2, n], &column_major)
                }
                None => panic!("synthetic worm has no {}", name),
            };
            (name, value)
        })
        .collect()
}
