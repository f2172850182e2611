//! COCO-style export of filtered, categorized annotations.

use std::collections::BTreeMap;
use std::path::Path;

use reefmask_rle::{BBox, CodecError, RunLengthMask};
use serde::{Deserialize, Serialize};

use super::ProjectError;
use crate::filter::FilterConfig;
use crate::model::{Annotation, AnnotationId, CategoryId, Labels};
use crate::state::Data;

/// A COCO document: `{ images, annotations, categories }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoDocument {
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: AnnotationId,
    pub image_id: u64,
    pub category_id: CategoryId,
    pub segmentation: RunLengthMask,
    pub bbox: BBox,
    pub area: u64,
    pub iscrowd: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_iou: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: CategoryId,
    pub name: String,
}

impl CocoAnnotation {
    /// COCO readers expect column-major counts, so plain segmentations are
    /// re-encoded.
    fn from_annotation(
        annotation: &Annotation,
        category_id: CategoryId,
        image_id: u64,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            id: annotation.id,
            image_id,
            category_id,
            segmentation: annotation.segmentation.to_compressed()?,
            bbox: annotation.bbox,
            area: annotation.area,
            iscrowd: annotation.iscrowd,
            predicted_iou: annotation.predicted_iou,
        })
    }
}

impl CocoDocument {
    /// Append another document, renumbering it into this one.
    ///
    /// The appended image gets `image_id`, its annotations get consecutive
    /// ids after the ones already present, and categories are merged by id
    /// (first name seen wins).
    pub fn append(&mut self, other: CocoDocument, image_id: u64) {
        let mut next_id = self.annotations.len() as AnnotationId + 1;
        for mut image in other.images {
            image.id = image_id;
            self.images.push(image);
        }
        for mut annotation in other.annotations {
            annotation.id = next_id;
            annotation.image_id = image_id;
            next_id += 1;
            self.annotations.push(annotation);
        }
        let mut categories: BTreeMap<CategoryId, String> = self
            .categories
            .drain(..)
            .map(|c| (c.id, c.name))
            .collect();
        for category in other.categories {
            categories.entry(category.id).or_insert(category.name);
        }
        self.categories = categories
            .into_iter()
            .map(|(id, name)| CocoCategory { id, name })
            .collect();
    }

    pub fn to_json(&self) -> Result<String, ProjectError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the document as pretty JSON.
    pub fn write_coco(&self, path: &Path) -> Result<(), ProjectError> {
        std::fs::write(path, self.to_json()?)?;
        log::info!(
            "Exported {} annotations over {} images to {:?}",
            self.annotations.len(),
            self.images.len(),
            path
        );
        Ok(())
    }
}

/// Project one image's surviving, categorized annotations into a COCO document.
///
/// Annotations are kept when they pass `config` and carry a category id.
/// Category names come from the annotations, falling back to `labels`.
/// Returns `None` when no annotation qualifies.
pub fn process_json_to_coco_json(
    data: &mut Data,
    config: &FilterConfig,
    labels: &Labels,
) -> Result<Option<CocoDocument>, ProjectError> {
    let kept = data.filter(config)?;
    let image_id = data.info().image_id;

    let mut categories: BTreeMap<CategoryId, String> = BTreeMap::new();
    let mut annotations = Vec::new();
    for annotation in data.annotations() {
        let Some(category_id) = annotation.category_id else {
            continue;
        };
        if !kept.contains(&annotation.id) {
            continue;
        }
        if let Some(name) = annotation
            .category_name
            .as_ref()
            .or_else(|| labels.get(&category_id))
        {
            categories.entry(category_id).or_insert_with(|| name.clone());
        }
        annotations.push(CocoAnnotation::from_annotation(
            annotation,
            category_id,
            image_id,
        )?);
    }

    if annotations.is_empty() {
        log::debug!("Nothing to export for '{}'", data.filename());
        return Ok(None);
    }

    let info = data.info();
    Ok(Some(CocoDocument {
        images: vec![CocoImage {
            id: image_id,
            file_name: info.filename.clone(),
            width: info.width,
            height: info.height,
        }],
        annotations,
        categories: categories
            .into_iter()
            .map(|(id, name)| CocoCategory { id, name })
            .collect(),
    }))
}
