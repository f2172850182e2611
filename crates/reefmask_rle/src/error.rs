use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("mask pixel at row {row}, column {col} is not binary")]
    NonBinaryPixel { row: usize, col: usize },

    #[error("run lengths sum to {actual} but the mask has {expected} pixels")]
    CountSumMismatch { expected: u64, actual: u64 },

    #[error("malformed compressed counts at byte {position}")]
    MalformedCounts { position: usize },

    #[error("run {index} decodes outside the valid run-length range")]
    RunOutOfRange { index: usize },

    #[error("mask shape {found:?} does not match expected shape {expected:?}")]
    ShapeMismatch { expected: [usize; 2], found: [usize; 2] },

    #[error("mask of {height}x{width} pixels is too large to run-length encode")]
    DimensionOverflow { height: usize, width: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;
