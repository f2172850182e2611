//! Binary mask codec and overlap engine for reefmask.
//!
//! Masks are `ndarray::Array2<bool>` grids of shape `(height, width)`. They are
//! persisted as COCO-compatible run-length encodings and compared through a
//! pairwise IoU matrix.

pub mod error;
pub mod iou;
pub mod mask;
pub mod rle;

pub use error::{CodecError, Result};
pub use iou::{compute_iou_matrix, compute_iou_matrix_from_rle};
pub use mask::{
    BBox, Mask, MaskPixel, bbox_and_area, binarize, decode, encode_compressed, encode_plain,
    encode_plain_rle,
};
pub use rle::{RunLengthMask, RunSpec, decode_counts, encode_counts};
