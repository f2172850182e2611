//! Annotation filtering by area, model confidence and overlap.
//!
//! Each pass produces the set of annotation ids it keeps; an annotation
//! survives when all three passes keep it. The overlap pass is a greedy
//! non-maximum suppression in which larger masks win.

mod config;
mod error;
mod passes;

pub use config::{FilterConfig, FilterHandle};
pub use error::FilterError;
pub use passes::{
    filter_annotations, filter_by_area, filter_by_confidence, filter_by_overlap,
    suppress_overlaps,
};
