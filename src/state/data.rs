//! Per-image annotation store.

use std::collections::{BTreeSet, HashMap};

use image::DynamicImage;
use ndarray::Array2;
use rayon::prelude::*;
use reefmask_rle::{CodecError, Mask, compute_iou_matrix, encode_compressed};
use serde::Serialize;
use web_time::Instant;

use super::Cached;
use crate::filter::{FilterConfig, FilterError, filter_annotations};
use crate::format::{AnnotationFile, Embedding, ImageInfo, ProjectError, matrix_rows};
use crate::model::{Annotation, AnnotationId, AnnotationView, CategoryId};

/// One image of a project with its embedding and annotations.
///
/// The overlap matrix is cached and always matches the current annotation
/// list: every replacement of the list recomputes it before returning.
#[derive(Debug, Clone)]
pub struct Data {
    stem: String,
    info: ImageInfo,
    image_bytes: Vec<u8>,
    image: Cached<DynamicImage>,
    embedding: Embedding,
    annotations: Vec<Annotation>,
    iou_matrix: Cached<Array2<f64>>,
}

impl Data {
    /// Build the store for one image from its archive entries.
    ///
    /// A matrix stored in the annotation file seeds the cache when its size
    /// matches the annotation list and is discarded otherwise.
    pub fn new(
        stem: impl Into<String>,
        image_bytes: Vec<u8>,
        embedding: Embedding,
        file: AnnotationFile,
    ) -> Self {
        let stem = stem.into();
        let iou_matrix = match file.matrix() {
            Some(matrix) => Cached::filled(matrix),
            None => {
                if file.iou_matrix.is_some() {
                    log::warn!(
                        "Discarding stored IoU matrix for '{}': it does not match {} annotations",
                        stem,
                        file.annotations.len()
                    );
                }
                Cached::new()
            }
        };

        Self {
            stem,
            info: file.image,
            image_bytes,
            image: Cached::new(),
            embedding,
            annotations: file.annotations,
            iou_matrix,
        }
    }

    /// Filename stem shared by the image, embedding and annotation entries.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn filename(&self) -> &str {
        &self.info.filename
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Encoded image file as stored in the archive.
    pub fn image_bytes(&self) -> &[u8] {
        &self.image_bytes
    }

    /// Decoded pixels, decoded on first access.
    pub fn image(&mut self) -> Result<&DynamicImage, ProjectError> {
        let bytes = &self.image_bytes;
        Ok(self.image.get_or_try_init(|| image::load_from_memory(bytes))?)
    }

    /// Drop the decoded pixels; the encoded bytes are kept.
    pub fn release_image(&mut self) {
        self.image.invalidate();
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn has_iou_matrix(&self) -> bool {
        self.iou_matrix.is_cached()
    }

    /// Overlap matrix of the current annotations, computed on first use.
    pub fn get_iou_matrix(&mut self) -> Result<&Array2<f64>, CodecError> {
        let (stem, annotations) = (&self.stem, &self.annotations);
        self.iou_matrix
            .get_or_try_init(|| compute_matrix(stem, annotations))
    }

    /// Swap in a new annotation list and recompute the overlap matrix.
    ///
    /// Plain segmentations are re-encoded in the compressed form. If a mask
    /// fails to decode the store is left unchanged.
    pub fn replace_annotations(
        &mut self,
        mut annotations: Vec<Annotation>,
    ) -> Result<(), CodecError> {
        let start = Instant::now();
        let masks = decode_masks(&annotations)?;
        for (annotation, mask) in annotations.iter_mut().zip(&masks) {
            if !annotation.segmentation.is_compressed() {
                annotation.segmentation = encode_compressed(mask)?;
            }
        }
        let matrix = compute_iou_matrix(&masks)?;

        self.iou_matrix.invalidate();
        self.annotations = annotations;
        self.iou_matrix.set(matrix);
        log::debug!(
            "Replaced annotations of '{}' with {} entries in {:?}",
            self.stem,
            self.annotations.len(),
            start.elapsed()
        );
        Ok(())
    }

    /// Ids of the annotations passing `config`.
    pub fn filter(&mut self, config: &FilterConfig) -> Result<BTreeSet<AnnotationId>, FilterError> {
        let (stem, annotations) = (&self.stem, &self.annotations);
        let matrix = self
            .iou_matrix
            .get_or_try_init(|| compute_matrix(stem, annotations))?;
        filter_annotations(annotations, matrix, config)
    }

    /// Rewrite category ids from category names.
    ///
    /// Annotations whose name is missing from `name_to_id` keep their id.
    /// Returns the number of annotations that changed.
    pub fn remap_category_ids(&mut self, name_to_id: &HashMap<String, CategoryId>) -> usize {
        let mut changed = 0;
        for annotation in &mut self.annotations {
            let Some(new_id) = annotation
                .category_name
                .as_ref()
                .and_then(|name| name_to_id.get(name))
            else {
                continue;
            };
            if annotation.category_id != Some(*new_id) {
                annotation.category_id = Some(*new_id);
                changed += 1;
            }
        }
        changed
    }

    /// Whether any annotation carries `category_id`.
    pub fn has_category(&self, category_id: CategoryId) -> bool {
        self.annotations
            .iter()
            .any(|a| a.category_id == Some(category_id))
    }

    /// Everything the presentation layer shows for this image.
    pub fn view(&mut self, config: &FilterConfig) -> Result<DataView, ProjectError> {
        let filtered_ids = self.filter(config)?;
        let annotations = self
            .annotations
            .iter()
            .map(Annotation::to_view)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DataView {
            filename: self.info.filename.clone(),
            width: self.info.width,
            height: self.info.height,
            annotations,
            filtered_ids,
            filter_config: *config,
        })
    }

    /// Annotation file for this image, including the cached matrix if present.
    pub fn to_annotation_file(&self) -> AnnotationFile {
        AnnotationFile {
            image: self.info.clone(),
            annotations: self.annotations.clone(),
            iou_matrix: self.iou_matrix.get().map(matrix_rows),
        }
    }
}

fn decode_masks(annotations: &[Annotation]) -> Result<Vec<Mask>, CodecError> {
    annotations
        .par_iter()
        .map(|a| a.segmentation.decode())
        .collect()
}

fn compute_matrix(stem: &str, annotations: &[Annotation]) -> Result<Array2<f64>, CodecError> {
    let start = Instant::now();
    let matrix = compute_iou_matrix(&decode_masks(annotations)?)?;
    log::debug!(
        "Computed IoU matrix for '{}' ({} masks) in {:?}",
        stem,
        annotations.len(),
        start.elapsed()
    );
    Ok(matrix)
}

/// Presentation form of one image.
#[derive(Debug, Clone, Serialize)]
pub struct DataView {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub annotations: Vec<AnnotationView>,
    pub filtered_ids: BTreeSet<AnnotationId>,
    pub filter_config: FilterConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::name_index;

    fn square(id: AnnotationId, offset: usize, side: usize) -> Annotation {
        let mask = Mask::from_shape_fn((20, 20), |(r, c)| {
            (offset..offset + side).contains(&r) && (offset..offset + side).contains(&c)
        });
        Annotation::from_mask(id, &mask, 0.9).unwrap()
    }

    fn data_with(annotations: Vec<Annotation>) -> Data {
        let info = ImageInfo {
            width: 20,
            height: 20,
            filename: "reef_01.png".into(),
            image_id: 0,
        };
        Data::new(
            "reef_01",
            Vec::new(),
            Embedding::default(),
            AnnotationFile::new(info, annotations),
        )
    }

    #[test]
    fn test_matrix_cached_lazily() {
        let mut data = data_with(vec![square(1, 0, 10), square(2, 0, 10)]);
        assert!(!data.has_iou_matrix());
        assert_eq!(data.get_iou_matrix().unwrap()[[0, 1]], 1.0);
        assert!(data.has_iou_matrix());
    }

    #[test]
    fn test_replace_recomputes_matrix() {
        let mut data = data_with(vec![square(1, 0, 10), square(2, 0, 10)]);
        let config = FilterConfig::new(0.01, 0.5, 0.5);
        assert_eq!(data.filter(&config).unwrap(), BTreeSet::from([1]));

        data.replace_annotations(vec![square(1, 0, 10), square(2, 10, 10)])
            .unwrap();
        assert!(data.has_iou_matrix());
        assert_eq!(data.get_iou_matrix().unwrap()[[0, 1]], 0.0);
        assert_eq!(data.filter(&config).unwrap(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_failed_replace_keeps_previous_state() {
        let mut data = data_with(vec![square(1, 0, 10)]);
        let mut broken = square(2, 0, 4);
        broken.segmentation.size = [3, 3];
        assert!(data.replace_annotations(vec![square(1, 0, 10), broken]).is_err());
        assert_eq!(data.annotations().len(), 1);
    }

    #[test]
    fn test_replace_stores_plain_masks_compressed() {
        let mask = Mask::from_shape_fn((20, 20), |(r, c)| r < 2 && c < 15);
        let mut annotation = Annotation::from_mask(1, &mask, 0.9).unwrap();
        annotation.segmentation = reefmask_rle::encode_plain_rle(&mask).unwrap();

        let mut data = data_with(Vec::new());
        data.replace_annotations(vec![annotation, square(2, 10, 5)])
            .unwrap();
        let stored = &data.annotations()[0].segmentation;
        assert!(stored.is_compressed());
        assert_eq!(stored.decode().unwrap(), mask);
        assert_eq!(data.get_iou_matrix().unwrap()[[0, 1]], 0.0);
    }

    #[test]
    fn test_stored_matrix_seeds_cache() {
        let annotations = vec![square(1, 0, 10), square(2, 5, 10)];
        let mut data = data_with(annotations);
        let file = {
            data.get_iou_matrix().unwrap();
            data.to_annotation_file()
        };
        assert!(file.iou_matrix.is_some());

        let reloaded = Data::new("reef_01", Vec::new(), Embedding::default(), file.clone());
        assert!(reloaded.has_iou_matrix());

        let mut stale = file;
        stale.annotations.pop();
        let reloaded = Data::new("reef_01", Vec::new(), Embedding::default(), stale);
        assert!(!reloaded.has_iou_matrix());
    }

    #[test]
    fn test_remap_keeps_unknown_names() {
        let mut data = data_with(vec![
            square(1, 0, 4).with_category(0, "Porites"),
            square(2, 5, 4).with_category(1, "Acropora"),
            square(3, 10, 4),
        ]);
        let labels = crate::model::Labels::from([(7, "Porites".to_string())]);
        assert_eq!(data.remap_category_ids(&name_index(&labels)), 1);

        let ids: Vec<_> = data.annotations().iter().map(|a| a.category_id).collect();
        assert_eq!(ids, vec![Some(7), Some(1), None]);
        assert!(data.has_category(7));
        assert!(!data.has_category(0));
    }

    #[test]
    fn test_view() {
        let mut data = data_with(vec![square(1, 0, 10), square(2, 0, 9)]);
        let config = FilterConfig::default();
        let view = data.view(&config).unwrap();
        assert_eq!(view.filename, "reef_01.png");
        assert_eq!(view.annotations.len(), 2);
        assert_eq!(view.filtered_ids, BTreeSet::from([1]));
        assert_eq!(view.filter_config, config);
    }

    #[test]
    fn test_image_decoded_on_demand() {
        let mut png = Vec::new();
        image::RgbImage::new(4, 3)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let mut data = data_with(Vec::new());
        data.image_bytes = png;
        assert_eq!(data.image().unwrap().width(), 4);
        data.release_image();
        assert!(!data.image.is_cached());
    }
}
