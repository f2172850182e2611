//! Data models for reefmask annotations.

mod annotation;
mod category;

pub use annotation::{Annotation, AnnotationId, AnnotationView, SegmentationView};
pub use category::{CategoryId, Labels, default_labels, name_index};
