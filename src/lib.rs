//! reefmask - coral reef mask annotation core
//!
//! Stores model-generated mask proposals per image, filters them by area,
//! confidence and overlap, and keeps a whole project in a single ZIP archive
//! that can be saved one image at a time and exported as COCO JSON.
//!
//! The run-length codec and the IoU engine live in the `reefmask_rle` crate.

pub mod config;
pub mod constants;
pub mod filter;
pub mod format;
pub mod model;
pub mod state;

pub use config::{AppConfig, ConfigError, LogLevel};
pub use filter::{FilterConfig, FilterError, FilterHandle, filter_annotations};
pub use format::{CocoDocument, ProjectCreator, ProjectError};
pub use model::{Annotation, AnnotationId, CategoryId, Labels};
pub use reefmask_rle as rle;
pub use state::{Data, DataView, Dataset};
