//! The ordered set of images making up an opened project.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use web_time::Instant;

use super::Data;
use crate::constants::PROJECT_FILE;
use crate::filter::FilterConfig;
use crate::format::{
    CocoDocument, ImageEntries, ProjectContents, ProjectError, ProjectInfo, annotation_entry,
    create_archive, extract_images, find_available_project_name, process_json_to_coco_json,
    read_project, replace_entries,
};
use crate::model::{Annotation, CategoryId, Labels, name_index};

/// An opened project: one [`Data`] per image in filename order, plus the
/// project-wide labels and per-image filter settings.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    data: Vec<Data>,
    current_index: usize,
    project_info: ProjectInfo,
    path: Option<PathBuf>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a project archive, replacing whatever was open.
    ///
    /// On error the dataset is left exactly as it was.
    pub fn load_project(&mut self, path: &Path) -> Result<(), ProjectError> {
        let contents = read_project(path)?;
        *self = Self::from_contents(contents, Some(path.to_path_buf()));
        log::info!(
            "Opened {:?}: {} images, starting at image {}",
            path,
            self.data.len(),
            self.current_index
        );
        Ok(())
    }

    /// Build a dataset from already-read archive contents.
    pub fn from_contents(contents: ProjectContents, path: Option<PathBuf>) -> Self {
        let data: Vec<Data> = contents
            .images
            .into_iter()
            .map(|record| {
                Data::new(
                    record.entries.stem,
                    record.image_bytes,
                    record.embedding,
                    record.annotation,
                )
            })
            .collect();
        let last = contents.info.last_image_idx;
        let current_index = if last < data.len() {
            last
        } else {
            if last > 0 {
                log::warn!(
                    "Stored image index {} is out of range for {} images",
                    last,
                    data.len()
                );
            }
            0
        };

        Self {
            data,
            current_index,
            project_info: contents.info,
            path,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn project_info(&self) -> &ProjectInfo {
        &self.project_info
    }

    pub fn labels(&self) -> &Labels {
        &self.project_info.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &Data> {
        self.data.iter()
    }

    fn check_index(&self, index: usize) -> Result<(), ProjectError> {
        if index < self.data.len() {
            Ok(())
        } else {
            Err(ProjectError::InvalidIndex {
                index,
                len: self.data.len(),
            })
        }
    }

    pub fn get(&self, index: usize) -> Result<&Data, ProjectError> {
        self.check_index(index)?;
        Ok(&self.data[index])
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Data, ProjectError> {
        self.check_index(index)?;
        Ok(&mut self.data[index])
    }

    /// Make `index` the current image.
    pub fn select(&mut self, index: usize) -> Result<&mut Data, ProjectError> {
        self.check_index(index)?;
        if index != self.current_index {
            // Only the current image keeps decoded pixels around.
            self.data[self.current_index].release_image();
            self.current_index = index;
        }
        Ok(&mut self.data[index])
    }

    /// Filter settings last stored for `index`, or `default` if none were.
    pub fn filter_config_for(&self, index: usize, default: &FilterConfig) -> FilterConfig {
        self.project_info
            .filter_config
            .get(&index)
            .copied()
            .unwrap_or(*default)
    }

    /// Remember the filter settings for `index`. Persisted on the next save.
    pub fn update_filter_config(
        &mut self,
        index: usize,
        config: FilterConfig,
    ) -> Result<(), ProjectError> {
        self.check_index(index)?;
        config.validate()?;
        self.project_info.filter_config.insert(index, config);
        Ok(())
    }

    /// Store edited annotations for one image and write them to the archive.
    ///
    /// Only `annotations/<stem>.json` and `project.json` are rewritten; every
    /// other entry is copied unchanged.
    pub fn save_annotation(
        &mut self,
        index: usize,
        annotations: Vec<Annotation>,
        labels: Labels,
        config: &FilterConfig,
    ) -> Result<(), ProjectError> {
        let start = Instant::now();
        let path = self.path.clone().ok_or(ProjectError::NotOpened)?;
        self.check_index(index)?;
        config.validate()?;

        let data = &mut self.data[index];
        data.replace_annotations(annotations)?;
        let entry = annotation_entry(data.stem());
        let annotation_bytes = data.to_annotation_file().to_json_bytes()?;

        self.project_info.labels = labels;
        self.project_info.filter_config.insert(index, *config);
        self.project_info.last_image_idx = index;
        self.project_info.project_path = path.display().to_string();

        let replacements = BTreeMap::from([
            (entry, annotation_bytes),
            (PROJECT_FILE.to_string(), self.project_info.to_json_bytes()?),
        ]);
        replace_entries(&path, &replacements)?;

        log::info!(
            "Saved annotations of image {} ('{}') in {:?}",
            index,
            self.data[index].stem(),
            start.elapsed()
        );
        Ok(())
    }

    /// Write the whole project as a new archive in `dir` and continue from it.
    ///
    /// The archive gets the first free `project.sat`, `project_1.sat`, ...
    /// name. In-memory edits, labels and filter settings are all written;
    /// the previous archive is left as it is.
    pub fn save_as(&mut self, dir: &Path) -> Result<PathBuf, ProjectError> {
        let start = Instant::now();
        if !self.is_opened() {
            return Err(ProjectError::NotOpened);
        }
        let target = find_available_project_name(dir)?;

        let mut info = self.project_info.clone();
        info.project_path = target.display().to_string();
        info.last_image_idx = self.current_index;

        let mut entries = BTreeMap::new();
        for data in &self.data {
            let names = ImageEntries::for_image(data.filename());
            entries.insert(names.image, data.image_bytes().to_vec());
            entries.insert(names.embedding, data.embedding().as_bytes().to_vec());
            entries.insert(names.annotation, data.to_annotation_file().to_json_bytes()?);
        }
        entries.insert(PROJECT_FILE.to_string(), info.to_json_bytes()?);
        create_archive(&target, &entries)?;

        self.project_info = info;
        self.path = Some(target.clone());
        log::info!(
            "Saved {} images as {:?} in {:?}",
            self.data.len(),
            target,
            start.elapsed()
        );
        Ok(target)
    }

    /// Copy the original image files out of the opened archive into `dir`.
    pub fn export_images(&self, dir: &Path) -> Result<Vec<PathBuf>, ProjectError> {
        let path = self.path.as_deref().ok_or(ProjectError::NotOpened)?;
        extract_images(path, dir)
    }

    /// First image other than the current one using `category_id`.
    pub fn find_category_usage(&self, category_id: CategoryId) -> Option<usize> {
        self.data
            .iter()
            .enumerate()
            .find(|(idx, data)| *idx != self.current_index && data.has_category(category_id))
            .map(|(idx, _)| idx)
    }

    /// Adopt `labels` and rewrite every annotation's category id from its name.
    ///
    /// Returns the number of annotations that changed.
    pub fn remap_category_ids(&mut self, labels: &Labels) -> usize {
        let index = name_index(labels);
        let changed: usize = self
            .data
            .iter_mut()
            .map(|data| data.remap_category_ids(&index))
            .sum();
        self.project_info.labels = labels.clone();
        log::debug!("Remapped {} annotations to {} labels", changed, labels.len());
        changed
    }

    /// Combined COCO document over every image.
    ///
    /// Each image is filtered with its stored settings, falling back to
    /// `default`. Images with nothing to export are skipped.
    pub fn export_coco(&mut self, default: &FilterConfig) -> Result<CocoDocument, ProjectError> {
        let start = Instant::now();
        let mut combined = CocoDocument::default();
        for (idx, data) in self.data.iter_mut().enumerate() {
            let config = self
                .project_info
                .filter_config
                .get(&idx)
                .copied()
                .unwrap_or(*default);
            if let Some(doc) = process_json_to_coco_json(data, &config, &self.project_info.labels)? {
                combined.append(doc, idx as u64);
            }
        }
        log::info!(
            "Exported {} annotations from {} of {} images in {:?}",
            combined.annotations.len(),
            combined.images.len(),
            self.data.len(),
            start.elapsed()
        );
        Ok(combined)
    }

    /// Compute every missing overlap matrix, in parallel across images.
    pub fn precompute_iou_matrices(&mut self) -> Result<(), ProjectError> {
        let start = Instant::now();
        self.data
            .par_iter_mut()
            .try_for_each(|data| data.get_iou_matrix().map(|_| ()))?;
        log::info!(
            "Computed IoU matrices for {} images in {:?}",
            self.data.len(),
            start.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tests::{square, write_project};

    fn opened(stems: &[&str]) -> (tempfile::TempDir, Dataset) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), "reef.sat", stems);
        let mut dataset = Dataset::new();
        dataset.load_project(&path).unwrap();
        (dir, dataset)
    }

    #[test]
    fn test_select_bounds() {
        let (_dir, mut dataset) = opened(&["a", "b"]);
        assert_eq!(dataset.select(1).unwrap().stem(), "b");
        assert_eq!(dataset.current_index(), 1);
        assert!(matches!(
            dataset.select(2),
            Err(ProjectError::InvalidIndex { index: 2, len: 2 })
        ));
        assert_eq!(dataset.current_index(), 1);
    }

    #[test]
    fn test_category_usage_skips_current_image() {
        let (_dir, mut dataset) = opened(&["a", "b", "c"]);
        let data = dataset.get_mut(2).unwrap();
        let mut annotations = data.annotations().to_vec();
        annotations.push(square(9, 15, 3).with_category(6, "Favia"));
        data.replace_annotations(annotations).unwrap();

        assert_eq!(dataset.find_category_usage(0), Some(1));
        assert_eq!(dataset.find_category_usage(6), Some(2));
        dataset.select(2).unwrap();
        assert_eq!(dataset.find_category_usage(6), None);
        assert_eq!(dataset.find_category_usage(0), Some(0));
    }

    #[test]
    fn test_remap_whole_project() {
        let (_dir, mut dataset) = opened(&["a", "b"]);
        let labels = Labels::from([(3, "Dead Coral".to_string()), (4, "Porites".to_string())]);
        assert_eq!(dataset.remap_category_ids(&labels), 4);
        assert_eq!(dataset.labels(), &labels);
        assert_eq!(dataset.find_category_usage(3), Some(1));
        assert_eq!(dataset.find_category_usage(0), None);
    }

    #[test]
    fn test_filter_config_memory() {
        let (_dir, mut dataset) = opened(&["a", "b"]);
        let fallback = FilterConfig::new(0.2, 0.2, 0.2);
        assert_eq!(dataset.filter_config_for(1, &fallback), fallback);
        assert_eq!(dataset.filter_config_for(0, &fallback), FilterConfig::default());

        let config = FilterConfig::new(0.05, 0.4, 0.8);
        dataset.update_filter_config(1, config).unwrap();
        assert_eq!(dataset.filter_config_for(1, &fallback), config);

        let invalid = FilterConfig::new(1.5, 0.4, 0.8);
        assert!(matches!(
            dataset.update_filter_config(1, invalid),
            Err(ProjectError::Filter(_))
        ));
        assert_eq!(dataset.filter_config_for(1, &fallback), config);
    }
}
