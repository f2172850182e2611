//! Project archive layout, reading and in-place entry replacement.
//!
//! A project is a single ZIP archive:
//!
//! ```text
//! images/<stem>.<ext>
//! embeddings/<stem>.npy
//! annotations/<stem>.json
//! project.json
//! ```
//!
//! The three per-image sets must match stem for stem. Reading is
//! all-or-nothing; saving rewrites the archive through a temporary file next
//! to it, copying untouched entries without recompressing them. New archives
//! are also built in a temporary file and never replace an existing one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsStr;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use web_time::Instant;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{AnnotationFile, Embedding, ProjectError, ProjectInfo};
use crate::constants::{
    ANNOTATION_EXTENSION, ANNOTATIONS_DIR, EMBEDDING_EXTENSION, EMBEDDINGS_DIR, IMAGES_DIR,
    PROJECT_FILE,
};

/// Archive entry names belonging to one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntries {
    pub stem: String,
    pub image: String,
    pub embedding: String,
    pub annotation: String,
}

impl ImageEntries {
    pub fn for_image(filename: &str) -> Self {
        let stem = file_stem(filename).to_string();
        Self {
            image: format!("{IMAGES_DIR}{filename}"),
            embedding: embedding_entry(&stem),
            annotation: annotation_entry(&stem),
            stem,
        }
    }

    /// Image filename without the directory prefix.
    pub fn filename(&self) -> &str {
        self.image.strip_prefix(IMAGES_DIR).unwrap_or(&self.image)
    }
}

/// Entry name of the embedding for `stem`.
pub fn embedding_entry(stem: &str) -> String {
    format!("{EMBEDDINGS_DIR}{stem}.{EMBEDDING_EXTENSION}")
}

/// Entry name of the annotation file for `stem`.
pub fn annotation_entry(stem: &str) -> String {
    format!("{ANNOTATIONS_DIR}{stem}.{ANNOTATION_EXTENSION}")
}

fn file_stem(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => &filename[..dot],
        _ => filename,
    }
}

/// Files directly inside `dir`, skipping directories and hidden files.
fn files_in<'a>(names: &'a [&'a str], dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    names.iter().copied().filter_map(move |name| {
        let rest = name.strip_prefix(dir)?;
        (!rest.is_empty() && !rest.contains('/') && !rest.starts_with('.')).then_some(rest)
    })
}

/// Check the archive layout and pair up the per-image entries.
///
/// Images are returned sorted by filename. The first missing piece is
/// reported by its exact entry name.
pub fn plan_layout(names: &[&str]) -> Result<Vec<ImageEntries>, ProjectError> {
    for dir in [IMAGES_DIR, EMBEDDINGS_DIR, ANNOTATIONS_DIR] {
        if !names.iter().any(|name| name.starts_with(dir)) {
            return Err(ProjectError::missing_entry(dir));
        }
    }
    if !names.contains(&PROJECT_FILE) {
        return Err(ProjectError::missing_entry(PROJECT_FILE));
    }

    let mut image_files: Vec<&str> = files_in(names, IMAGES_DIR).collect();
    image_files.sort_unstable();

    let present: HashSet<&str> = names.iter().copied().collect();
    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut layout = Vec::with_capacity(image_files.len());

    for filename in image_files {
        let entries = ImageEntries::for_image(filename);
        if let Some(first) = seen.insert(file_stem(filename), filename) {
            return Err(ProjectError::DuplicateStem {
                stem: entries.stem,
                first: format!("{IMAGES_DIR}{first}"),
                second: entries.image,
            });
        }
        for required in [&entries.embedding, &entries.annotation] {
            if !present.contains(required.as_str()) {
                return Err(ProjectError::missing_entry(required.clone()));
            }
        }
        layout.push(entries);
    }

    let embeddings = files_in(names, EMBEDDINGS_DIR).count();
    let annotations = files_in(names, ANNOTATIONS_DIR).count();
    if embeddings != layout.len() || annotations != layout.len() {
        return Err(ProjectError::CountMismatch {
            images: layout.len(),
            embeddings,
            annotations,
        });
    }

    Ok(layout)
}

/// One image's entries, read into memory.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub entries: ImageEntries,
    pub image_bytes: Vec<u8>,
    pub embedding: Embedding,
    pub annotation: AnnotationFile,
}

/// Everything stored in a project archive.
#[derive(Debug, Clone)]
pub struct ProjectContents {
    pub info: ProjectInfo,
    pub images: Vec<ImageRecord>,
}

/// Counts gathered by [`validate_project`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub images: usize,
    pub annotations: usize,
    pub categorized: usize,
    pub labels: usize,
    pub last_image_idx: usize,
}

fn entry_names<R: Read + Seek>(archive: &ZipArchive<R>) -> Vec<String> {
    archive.file_names().map(str::to_owned).collect()
}

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// The declared size comes from the archive header and is not trusted.
fn preallocation(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOCATION)).unwrap_or(0)
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, ProjectError> {
    let mut file = archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => ProjectError::missing_entry(name),
        other => other.into(),
    })?;
    let mut bytes = Vec::with_capacity(preallocation(file.size()));
    file.read_to_end(&mut bytes)?;
    log::trace!("Read '{}' ({} bytes)", name, bytes.len());
    Ok(bytes)
}

fn read_annotation_file<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    entries: &ImageEntries,
) -> Result<AnnotationFile, ProjectError> {
    let file: AnnotationFile = serde_json::from_slice(&read_entry(archive, &entries.annotation)?)?;
    if file.image.filename != entries.filename() {
        return Err(ProjectError::StemMismatch {
            annotation: entries.annotation.clone(),
            expected: entries.filename().to_string(),
            found: file.image.filename,
        });
    }
    Ok(file)
}

/// Read a whole project from any seekable source.
pub fn read_project_from<R: Read + Seek>(reader: R) -> Result<ProjectContents, ProjectError> {
    let start = Instant::now();
    let mut archive = ZipArchive::new(reader)?;
    let names = entry_names(&archive);
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let layout = plan_layout(&name_refs)?;

    let info: ProjectInfo = serde_json::from_slice(&read_entry(&mut archive, PROJECT_FILE)?)?;

    let mut images = Vec::with_capacity(layout.len());
    for entries in layout {
        let annotation = read_annotation_file(&mut archive, &entries)?;
        let image_bytes = read_entry(&mut archive, &entries.image)?;
        let embedding = Embedding::from_bytes(read_entry(&mut archive, &entries.embedding)?);
        log::debug!(
            "Loaded '{}' with {} annotations",
            entries.stem,
            annotation.annotations.len()
        );
        images.push(ImageRecord {
            entries,
            image_bytes,
            embedding,
            annotation,
        });
    }

    log::info!(
        "Read project with {} images in {:?}",
        images.len(),
        start.elapsed()
    );
    Ok(ProjectContents { info, images })
}

/// Read a whole project archive from disk.
pub fn read_project(path: &Path) -> Result<ProjectContents, ProjectError> {
    log::info!("Opening project: {:?}", path);
    read_project_from(File::open(path)?)
}

/// Check a project archive without reading image or embedding data.
pub fn validate_project(path: &Path) -> Result<ProjectSummary, ProjectError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let names = entry_names(&archive);
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let layout = plan_layout(&name_refs)?;
    let info: ProjectInfo = serde_json::from_slice(&read_entry(&mut archive, PROJECT_FILE)?)?;

    let mut annotations = 0;
    let mut categorized = 0;
    for entries in &layout {
        let file = read_annotation_file(&mut archive, entries)?;
        annotations += file.annotations.len();
        categorized += file.annotations.iter().filter(|a| a.is_categorized()).count();
    }

    log::info!("Validated project {:?}: {} images", path, layout.len());
    Ok(ProjectSummary {
        images: layout.len(),
        annotations,
        categorized,
        labels: info.labels.len(),
        last_image_idx: info.last_image_idx,
    })
}

/// Copy every image of the archive at `path` into `output_dir`.
///
/// Entries are streamed one at a time. Existing files with the same name are
/// overwritten. Returns the written paths in filename order.
pub fn extract_images(path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ProjectError> {
    let start = Instant::now();
    let mut archive = ZipArchive::new(File::open(path)?)?;
    std::fs::create_dir_all(output_dir)?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.is_file() {
            continue;
        }
        let Some(filename) = entry.name().strip_prefix(IMAGES_DIR).map(str::to_owned) else {
            continue;
        };
        // Nested or relative names could escape `output_dir`.
        if Path::new(&filename).file_name() != Some(OsStr::new(&filename)) {
            log::warn!("Skipping image entry '{}'", entry.name());
            continue;
        }
        let target = output_dir.join(&filename);
        std::io::copy(&mut entry, &mut File::create(&target)?)?;
        log::trace!("Extracted '{}'", filename);
        written.push(target);
    }
    written.sort();

    log::info!(
        "Exported {} images from {:?} to {:?} in {:?}",
        written.len(),
        path,
        output_dir,
        start.elapsed()
    );
    Ok(written)
}

/// Options used for every entry this crate writes.
pub(crate) fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Write `entries` as a fresh archive.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    entries: &BTreeMap<String, Vec<u8>>,
) -> Result<(), ProjectError> {
    let mut zip = ZipWriter::new(writer);
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), entry_options())?;
        zip.write_all(bytes)?;
    }
    zip.finish()?;
    Ok(())
}

/// Write `entries` as a new project archive at `path`.
///
/// The archive is built in a temporary file next to `path` and only moved
/// into place when complete. Fails if `path` already exists.
pub fn create_archive(path: &Path, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), ProjectError> {
    let mut temp = NamedTempFile::new_in(parent_dir(path))?;
    {
        let mut zip = ZipWriter::new(temp.as_file_mut());
        for dir in [IMAGES_DIR, EMBEDDINGS_DIR, ANNOTATIONS_DIR] {
            zip.add_directory(dir, entry_options())?;
        }
        for (name, bytes) in entries {
            zip.start_file(name.as_str(), entry_options())?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
    }
    temp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Replace a few entries of an archive on disk.
///
/// Every other entry is copied raw, so its bytes and checksum are unchanged.
/// Entries not yet present are appended. The result is written to a
/// temporary file in the same directory and renamed over `path`.
pub fn replace_entries(
    path: &Path,
    replacements: &BTreeMap<String, Vec<u8>>,
) -> Result<(), ProjectError> {
    let start = Instant::now();
    let dir = parent_dir(path);

    let mut source = ZipArchive::new(File::open(path)?)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    let mut pending: BTreeMap<&str, &Vec<u8>> = replacements
        .iter()
        .map(|(name, bytes)| (name.as_str(), bytes))
        .collect();

    {
        let mut zip = ZipWriter::new(temp.as_file_mut());
        for i in 0..source.len() {
            let entry = source.by_index_raw(i)?;
            match pending.remove(entry.name()) {
                Some(bytes) => {
                    let name = entry.name().to_owned();
                    drop(entry);
                    log::trace!("Replacing '{}'", name);
                    zip.start_file(name, entry_options())?;
                    zip.write_all(bytes)?;
                }
                None => zip.raw_copy_file(entry)?,
            }
        }
        for (name, bytes) in pending {
            log::trace!("Adding '{}'", name);
            zip.start_file(name, entry_options())?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
    }
    drop(source);

    std::fs::set_permissions(temp.path(), std::fs::metadata(path)?.permissions())?;
    temp.persist(path).map_err(|e| e.error)?;

    log::debug!(
        "Rewrote {} entries of {:?} in {:?}",
        replacements.len(),
        path,
        start.elapsed()
    );
    Ok(())
}
