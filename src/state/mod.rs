//! In-memory project state.

mod cached;
mod data;
mod dataset;

pub use cached::Cached;
pub use data::{Data, DataView};
pub use dataset::Dataset;
