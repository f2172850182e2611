//! Error types for project container operations.

use reefmask_rle::CodecError;
use thiserror::Error;

use crate::filter::FilterError;

/// Errors that can occur while loading, saving, exporting or creating a project.
#[derive(Error, Debug)]
pub enum ProjectError {
    /// A required directory or file is absent from the archive
    #[error("Project is missing {path}")]
    MissingEntry {
        /// Archive path that was expected
        path: String,
    },

    /// An annotation file describes a different image than the one it is paired with
    #[error("Annotation file {annotation} describes '{found}' instead of '{expected}'")]
    StemMismatch {
        /// The annotation entry
        annotation: String,
        /// Image filename derived from the archive
        expected: String,
        /// Image filename recorded in the annotation file
        found: String,
    },

    /// Two images share a filename stem
    #[error("Images {first} and {second} share the stem '{stem}'")]
    DuplicateStem {
        /// The shared stem
        stem: String,
        /// First image entry
        first: String,
        /// Second image entry
        second: String,
    },

    /// The three per-image artifact sets differ in size
    #[error(
        "Project holds {images} images, {embeddings} embeddings and {annotations} annotation files"
    )]
    CountMismatch {
        /// Number of image entries
        images: usize,
        /// Number of embedding entries
        embeddings: usize,
        /// Number of annotation entries
        annotations: usize,
    },

    /// Image index out of range
    #[error("Image index {index} is out of range for {len} images")]
    InvalidIndex {
        /// Requested index
        index: usize,
        /// Number of images in the project
        len: usize,
    },

    /// Operation requires an opened project
    #[error("No project is open")]
    NotOpened,

    /// Project creation was cancelled
    #[error("Project creation was cancelled")]
    Cancelled,

    /// No free project name in the output directory
    #[error("No free project name left in {dir}")]
    NoFreeName {
        /// Output directory that was searched
        dir: String,
    },

    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Archive structure error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Embedding tensor could not be read
    #[error("Embedding read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// Embedding tensor could not be written
    #[error("Embedding write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// Mask codec error
    #[error("Mask error: {0}")]
    Codec(#[from] CodecError),

    /// Filter error
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Mask or embedding generator failure
    #[error("Generator error: {0}")]
    Generator(String),
}

impl ProjectError {
    /// Create a missing entry error.
    pub fn missing_entry(path: impl Into<String>) -> Self {
        Self::MissingEntry { path: path.into() }
    }

    /// Create a generator error.
    pub fn generator(message: impl Into<String>) -> Self {
        Self::Generator(message.into())
    }
}
