//! JSON and tensor entries stored inside a project archive.

use std::collections::BTreeMap;
use std::io::Cursor;

use ndarray::{Array2, ArrayD};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use serde::{Deserialize, Serialize};

use super::ProjectError;
use crate::filter::FilterConfig;
use crate::model::{Annotation, Labels};

/// Image description at the top of an annotation file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Image entry name without the `images/` prefix
    pub filename: String,
    #[serde(default, alias = "id")]
    pub image_id: u64,
}

/// Contents of `annotations/<stem>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationFile {
    pub image: ImageInfo,

    #[serde(default)]
    pub annotations: Vec<Annotation>,

    /// Overlap matrix of `annotations`, stored so reloads can skip computing it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iou_matrix: Option<Vec<Vec<f64>>>,
}

impl AnnotationFile {
    pub fn new(image: ImageInfo, annotations: Vec<Annotation>) -> Self {
        Self {
            image,
            annotations,
            iou_matrix: None,
        }
    }

    /// Stored matrix, if it is square and matches the annotation count.
    pub fn matrix(&self) -> Option<Array2<f64>> {
        let rows = self.iou_matrix.as_ref()?;
        let n = self.annotations.len();
        if rows.len() != n || rows.iter().any(|row| row.len() != n) {
            return None;
        }
        Array2::from_shape_vec((n, n), rows.concat()).ok()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ProjectError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Nested rows of a matrix, as stored in [`AnnotationFile::iou_matrix`].
pub fn matrix_rows(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.rows().into_iter().map(|row| row.to_vec()).collect()
}

/// Contents of `project.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectInfo {
    /// Where the archive lived when it was last saved
    pub project_path: String,

    pub labels: Labels,

    /// Filter thresholds last used on each image, keyed by image index
    pub filter_config: BTreeMap<usize, FilterConfig>,

    pub last_image_idx: usize,
}

impl ProjectInfo {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ProjectError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Image embedding, kept as the verbatim `.npy` bytes.
///
/// The tensor is only interpreted by the mask editor; the container passes it
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Embedding {
    bytes: Vec<u8>,
}

impl Embedding {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Serialize a tensor to `.npy` bytes.
    pub fn from_array(array: &ArrayD<f32>) -> Result<Self, ProjectError> {
        let mut bytes = Vec::new();
        array.write_npy(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Decode the tensor as `f32`, widening from `f64` files when needed.
    pub fn to_array(&self) -> Result<ArrayD<f32>, ProjectError> {
        match ArrayD::<f32>::read_npy(Cursor::new(&self.bytes)) {
            Ok(array) => Ok(array),
            Err(f32_err) => match ArrayD::<f64>::read_npy(Cursor::new(&self.bytes)) {
                Ok(array) => Ok(array.mapv(|v| v as f32)),
                Err(_) => Err(f32_err.into()),
            },
        }
    }
}
