//! Building a new project archive from raw images.
//!
//! Mask proposals and embeddings come from external models behind the
//! [`MaskGenerator`] and [`EmbeddingGenerator`] traits. The archive is written
//! to a temporary file and only renamed into place once every image is done;
//! a cancelled or failed run leaves nothing behind.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{DynamicImage, GenericImageView};
use reefmask_rle::{CodecError, Mask, compute_iou_matrix};
use tempfile::NamedTempFile;
use web_time::Instant;
use zip::ZipWriter;

use super::container::{ImageEntries, entry_options};
use super::{AnnotationFile, Embedding, ImageInfo, ProjectError, ProjectInfo, matrix_rows};
use crate::constants::{
    ANNOTATIONS_DIR, EMBEDDINGS_DIR, IMAGE_EXTENSIONS, IMAGES_DIR, MAX_PROJECT_NAME_ATTEMPTS,
    PROJECT_BASE_NAME, PROJECT_EXTENSION, PROJECT_FILE,
};
use crate::filter::FilterConfig;
use crate::model::{Annotation, AnnotationId, Labels, default_labels};

/// One mask proposal from the segmentation model.
#[derive(Debug, Clone)]
pub struct GeneratedMask {
    /// Binary mask with the image's `(height, width)`
    pub mask: Mask,
    /// Model confidence; proposals without one are dropped
    pub predicted_iou: Option<f64>,
}

/// Segmentation model producing candidate masks for an image.
pub trait MaskGenerator {
    fn generate(&mut self, image: &DynamicImage) -> Result<Vec<GeneratedMask>, ProjectError>;
}

/// Encoder producing the embedding consumed by the mask editor.
pub trait EmbeddingGenerator {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, ProjectError>;
}

/// Cooperative cancellation flag, checked between pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ProjectError> {
        if self.is_cancelled() {
            log::info!("Project creation cancelled");
            return Err(ProjectError::Cancelled);
        }
        Ok(())
    }
}

/// Progress after each finished image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    /// Whole-number percentage, `100` for an empty batch.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.done * 100 / self.total) as u8
    }
}

/// An input image as an encoded file.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl SourceImage {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Read an image file from disk.
    pub fn from_path(path: &Path) -> Result<Self, ProjectError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ProjectError::missing_entry(path.display().to_string()))?;
        Ok(Self::new(filename, std::fs::read(path)?))
    }

    /// Read every image file directly inside `dir`, sorted by filename.
    pub fn collect_dir(dir: &Path) -> Result<Vec<Self>, ProjectError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_image_filename(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        log::debug!("Found {} images in {:?}", paths.len(), dir);
        paths.iter().map(|path| Self::from_path(path)).collect()
    }
}

fn is_image_filename(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// First unused `project.sat`, `project_1.sat`, ... in `dir`.
pub fn find_available_project_name(dir: &Path) -> Result<PathBuf, ProjectError> {
    let base = dir.join(format!("{PROJECT_BASE_NAME}.{PROJECT_EXTENSION}"));
    if !base.exists() {
        return Ok(base);
    }
    (1..=MAX_PROJECT_NAME_ATTEMPTS)
        .map(|i| dir.join(format!("{PROJECT_BASE_NAME}_{i}.{PROJECT_EXTENSION}")))
        .find(|path| !path.exists())
        .ok_or_else(|| ProjectError::NoFreeName {
            dir: dir.display().to_string(),
        })
}

/// Runs the generators over a batch of images and writes a project archive.
pub struct ProjectCreator<M, E> {
    masks: M,
    embeddings: E,
    cancel: CancelToken,
    labels: Labels,
    filter: FilterConfig,
}

impl<M: MaskGenerator, E: EmbeddingGenerator> ProjectCreator<M, E> {
    pub fn new(masks: M, embeddings: E) -> Self {
        Self {
            masks,
            embeddings,
            cancel: CancelToken::new(),
            labels: default_labels(),
            filter: FilterConfig::default(),
        }
    }

    /// Labels stored in the new project.
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Filter configuration stored for the first image.
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    /// Share an existing token instead of the creator's own.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels a running [`create`](Self::create) from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Create a project in `output_dir` and return its path.
    ///
    /// Images are processed in filename order. Cancellation is checked before
    /// and after each model call.
    pub fn create(
        &mut self,
        mut inputs: Vec<SourceImage>,
        output_dir: &Path,
        mut progress: impl FnMut(Progress),
    ) -> Result<PathBuf, ProjectError> {
        let start = Instant::now();
        inputs.sort_by(|a, b| a.filename.cmp(&b.filename));
        check_unique_stems(&inputs)?;

        let total = inputs.len();
        let project_path = find_available_project_name(output_dir)?;
        let mut temp = NamedTempFile::new_in(output_dir)?;
        log::info!("Creating project {:?} from {} images", project_path, total);

        {
            let mut zip = ZipWriter::new(temp.as_file_mut());
            for dir in [IMAGES_DIR, EMBEDDINGS_DIR, ANNOTATIONS_DIR] {
                zip.add_directory(dir, entry_options())?;
            }

            progress(Progress { done: 0, total });
            for (idx, input) in inputs.iter().enumerate() {
                self.cancel.check()?;
                let entries = ImageEntries::for_image(&input.filename);
                let (embedding, file) = self.process_image(idx, input)?;

                zip.start_file(entries.image.as_str(), entry_options())?;
                zip.write_all(&input.bytes)?;
                zip.start_file(entries.embedding.as_str(), entry_options())?;
                zip.write_all(embedding.as_bytes())?;
                zip.start_file(entries.annotation.as_str(), entry_options())?;
                zip.write_all(&file.to_json_bytes()?)?;

                progress(Progress {
                    done: idx + 1,
                    total,
                });
            }

            let info = ProjectInfo {
                project_path: project_path.display().to_string(),
                labels: self.labels.clone(),
                filter_config: BTreeMap::from([(0, self.filter)]),
                last_image_idx: 0,
            };
            zip.start_file(PROJECT_FILE, entry_options())?;
            zip.write_all(&info.to_json_bytes()?)?;
            zip.finish()?;
        }

        self.cancel.check()?;
        temp.persist_noclobber(&project_path).map_err(|e| e.error)?;
        log::info!(
            "Created project {:?} in {:?}",
            project_path,
            start.elapsed()
        );
        Ok(project_path)
    }

    fn process_image(
        &mut self,
        idx: usize,
        input: &SourceImage,
    ) -> Result<(Embedding, AnnotationFile), ProjectError> {
        log::info!("Processing image {} ({})", idx + 1, input.filename);
        let image = image::load_from_memory(&input.bytes)?;
        let (width, height) = image.dimensions();

        let embedding = self.embeddings.embed(&image)?;
        self.cancel.check()?;
        let proposals = self.masks.generate(&image)?;
        self.cancel.check()?;

        let proposed = proposals.len();
        let mut masks = Vec::with_capacity(proposed);
        let mut annotations = Vec::with_capacity(proposed);
        for (id, proposal) in proposals.into_iter().enumerate() {
            let Some(predicted_iou) = proposal.predicted_iou else {
                continue;
            };
            let found = proposal.mask.dim();
            if found != (height as usize, width as usize) {
                return Err(CodecError::ShapeMismatch {
                    expected: [height as usize, width as usize],
                    found: [found.0, found.1],
                }
                .into());
            }
            annotations.push(Annotation::from_mask(
                id as AnnotationId,
                &proposal.mask,
                predicted_iou,
            )?);
            masks.push(proposal.mask);
        }
        if annotations.len() < proposed {
            log::warn!(
                "Dropped {} masks without a confidence for {}",
                proposed - annotations.len(),
                input.filename
            );
        }

        let matrix = compute_iou_matrix(&masks)?;
        let info = ImageInfo {
            width,
            height,
            filename: input.filename.clone(),
            image_id: idx as u64,
        };
        let mut file = AnnotationFile::new(info, annotations);
        file.iou_matrix = Some(matrix_rows(&matrix));
        Ok((embedding, file))
    }
}

fn check_unique_stems(inputs: &[SourceImage]) -> Result<(), ProjectError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for input in inputs {
        let entries = ImageEntries::for_image(&input.filename);
        if let Some(first) = seen.insert(entries.stem.clone(), &input.filename) {
            return Err(ProjectError::DuplicateStem {
                stem: entries.stem,
                first: format!("{IMAGES_DIR}{first}"),
                second: entries.image,
            });
        }
    }
    Ok(())
}
