//! Global constants for reefmask

/// Default minimum mask area, as a fraction of the image
pub const DEFAULT_AREA_LIMIT: f64 = 0.001;

/// Default overlap above which a smaller mask is suppressed
pub const DEFAULT_IOU_LIMIT: f64 = 0.5;

/// Default minimum model confidence
pub const DEFAULT_PREDICTED_IOU_LIMIT: f64 = 0.5;

/// Archive directory holding the source images
pub const IMAGES_DIR: &str = "images/";

/// Archive directory holding one embedding tensor per image
pub const EMBEDDINGS_DIR: &str = "embeddings/";

/// Archive directory holding one annotation file per image
pub const ANNOTATIONS_DIR: &str = "annotations/";

/// Project metadata entry at the archive root
pub const PROJECT_FILE: &str = "project.json";

/// Extension of embedding entries
pub const EMBEDDING_EXTENSION: &str = "npy";

/// Extension of annotation entries
pub const ANNOTATION_EXTENSION: &str = "json";

/// Extension given to new project archives
pub const PROJECT_EXTENSION: &str = "sat";

/// Base name tried first for new project archives
pub const PROJECT_BASE_NAME: &str = "project";

/// Numbered names tried after the base name before giving up
pub const MAX_PROJECT_NAME_ATTEMPTS: usize = 1000;

/// Image extensions accepted when creating a project
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];
