//! Error types for annotation filtering.

use reefmask_rle::CodecError;
use thiserror::Error;

use crate::model::AnnotationId;

/// Errors that can occur while filtering an image's annotations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Mask metadata cannot be used to normalize areas
    #[error("Annotation {id} has an unusable mask size {size:?}")]
    InvalidMaskSize {
        /// Annotation carrying the bad size
        id: AnnotationId,
        /// The recorded `[height, width]`
        size: [u32; 2],
    },

    /// Cached overlap matrix does not match the annotation list
    #[error("IoU matrix is {found}x{found} but there are {expected} annotations")]
    MatrixMismatch {
        /// Number of annotations
        expected: usize,
        /// Matrix side length
        found: usize,
    },

    /// A threshold lies outside its allowed range
    #[error("Invalid filter setting {field} = {value}")]
    InvalidConfig {
        /// Wire name of the setting
        field: &'static str,
        /// Rejected value
        value: f64,
    },

    /// A segmentation could not be decoded
    #[error("Mask codec error: {0}")]
    Codec(#[from] CodecError),
}

impl FilterError {
    /// Create an invalid configuration error.
    pub fn invalid_config(field: &'static str, value: f64) -> Self {
        Self::InvalidConfig { field, value }
    }
}
