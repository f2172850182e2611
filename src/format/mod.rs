//! Project archive format and COCO export.
//!
//! ## Layout
//!
//! A project is one ZIP archive holding `images/`, `embeddings/`,
//! `annotations/` and `project.json`. See [`container`] for the pairing rules
//! and [`creator`] for building a new archive from raw images.

mod coco;
pub mod container;
pub mod creator;
mod error;
mod files;

#[cfg(test)]
pub(crate) mod tests;

pub use coco::{CocoAnnotation, CocoCategory, CocoDocument, CocoImage, process_json_to_coco_json};
pub use container::{
    ImageEntries, ImageRecord, ProjectContents, ProjectSummary, annotation_entry, create_archive,
    embedding_entry, extract_images, plan_layout, read_project, read_project_from,
    replace_entries, validate_project, write_archive,
};
pub use creator::{
    CancelToken, EmbeddingGenerator, GeneratedMask, MaskGenerator, ProjectCreator, Progress,
    SourceImage, find_available_project_name,
};
pub use error::ProjectError;
pub use files::{AnnotationFile, Embedding, ImageInfo, ProjectInfo, matrix_rows};
