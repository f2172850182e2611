//! Mask annotation records as stored in per-image annotation files.

use reefmask_rle::{
    BBox, CodecError, Mask, RunLengthMask, RunSpec, bbox_and_area, encode_compressed, encode_plain,
};
use serde::{Deserialize, Deserializer, Serialize};

use super::CategoryId;

/// Unique identifier for an annotation within one image.
pub type AnnotationId = u32;

/// One candidate or accepted mask region.
///
/// Unknown keys are rejected so that malformed annotation files fail at load
/// time instead of when a field is first read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Annotation {
    /// Stable id, used to join filter results back to annotations
    pub id: AnnotationId,

    /// Compressed run-length mask; plain counts are converted on load
    #[serde(deserialize_with = "compressed_segmentation")]
    pub segmentation: RunLengthMask,

    /// `[x, y, width, height]` of the mask extent
    pub bbox: BBox,

    /// Foreground pixel count
    pub area: u64,

    /// Model confidence for generated masks
    #[serde(default)]
    pub predicted_iou: Option<f64>,

    #[serde(default)]
    pub category_id: Option<CategoryId>,

    /// Label name at the time the category was assigned
    #[serde(default)]
    pub category_name: Option<String>,

    #[serde(default)]
    pub iscrowd: u8,

    /// Owning image, set on exported records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<u64>,
}

fn compressed_segmentation<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<RunLengthMask, D::Error> {
    RunLengthMask::deserialize(deserializer)?
        .to_compressed()
        .map_err(serde::de::Error::custom)
}

impl Annotation {
    /// Build a record from a raw generator mask.
    ///
    /// The mask is stored compressed; bbox and area are derived from it.
    pub fn from_mask(id: AnnotationId, mask: &Mask, predicted_iou: f64) -> Result<Self, CodecError> {
        let segmentation = encode_compressed(mask)?;
        let (bbox, area) = bbox_and_area(mask);
        Ok(Self {
            id,
            segmentation,
            bbox: bbox.unwrap_or_default(),
            area,
            predicted_iou: Some(predicted_iou),
            category_id: None,
            category_name: None,
            iscrowd: 0,
            image_id: None,
        })
    }

    /// Set the category id and name.
    pub fn with_category(mut self, id: CategoryId, name: impl Into<String>) -> Self {
        self.category_id = Some(id);
        self.category_name = Some(name.into());
        self
    }

    pub fn is_categorized(&self) -> bool {
        self.category_id.is_some()
    }

    /// Presentation form carrying both run-length encodings.
    pub fn to_view(&self) -> Result<AnnotationView, CodecError> {
        let counts_number = encode_plain(&self.segmentation.decode()?)?;
        Ok(AnnotationView {
            id: self.id,
            segmentation: SegmentationView {
                size: self.segmentation.size,
                counts: self.segmentation.counts.clone(),
                counts_number,
            },
            bbox: self.bbox,
            area: self.area,
            predicted_iou: self.predicted_iou,
            category_id: self.category_id,
            category_name: self.category_name.clone(),
            iscrowd: self.iscrowd,
        })
    }
}

/// Segmentation as sent to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationView {
    pub size: [u32; 2],
    /// Stored counts, unchanged
    pub counts: RunSpec,
    /// Row-major integer runs of the same mask
    pub counts_number: Vec<u32>,
}

/// Annotation as sent to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationView {
    pub id: AnnotationId,
    pub segmentation: SegmentationView,
    pub bbox: BBox,
    pub area: u64,
    pub predicted_iou: Option<f64>,
    pub category_id: Option<CategoryId>,
    pub category_name: Option<String>,
    pub iscrowd: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_from_mask() {
        let mask = array![[false, false, false], [false, true, true], [false, true, false]];
        let annotation = Annotation::from_mask(5, &mask, 0.87).unwrap();
        assert_eq!(annotation.id, 5);
        assert_eq!(annotation.bbox, [1, 1, 2, 2]);
        assert_eq!(annotation.area, 3);
        assert_eq!(annotation.iscrowd, 0);
        assert!(annotation.segmentation.is_compressed());
        assert_eq!(annotation.segmentation.decode().unwrap(), mask);
        assert!(!annotation.is_categorized());
    }

    #[test]
    fn test_from_empty_mask() {
        let annotation = Annotation::from_mask(0, &Mask::from_elem((4, 4), false), 0.5).unwrap();
        assert_eq!(annotation.bbox, [0, 0, 0, 0]);
        assert_eq!(annotation.area, 0);
    }

    #[test]
    fn test_view_carries_plain_counts() {
        let mask = array![[true, false], [true, false], [false, true]];
        let annotation = Annotation::from_mask(1, &mask, 0.9)
            .unwrap()
            .with_category(2, "Acropora");
        let view = annotation.to_view().unwrap();
        assert_eq!(view.segmentation.counts_number, vec![0, 1, 1, 1, 2, 1]);
        assert_eq!(view.segmentation.counts, annotation.segmentation.counts);
        assert_eq!(view.category_name.as_deref(), Some("Acropora"));

        let json = serde_json::to_value(&view).unwrap();
        assert!(json["segmentation"]["counts"].is_string());
        assert!(json["segmentation"]["counts_number"].is_array());
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let json = r#"{
            "id": 3,
            "segmentation": {"size": [10, 10], "counts": "53l2"},
            "bbox": [0, 5, 1, 3],
            "area": 3,
            "predicted_iou": 0.91,
            "category_id": null
        }"#;
        let annotation: Annotation = serde_json::from_str(json).unwrap();
        assert_eq!(annotation.predicted_iou, Some(0.91));
        assert_eq!(annotation.category_name, None);
        assert_eq!(annotation.iscrowd, 0);
    }

    #[test]
    fn test_plain_counts_stored_compressed() {
        let json = r#"{
            "id": 4,
            "segmentation": {"size": [2, 3], "counts": [0, 3, 3]},
            "bbox": [0, 0, 3, 1],
            "area": 3
        }"#;
        let annotation: Annotation = serde_json::from_str(json).unwrap();
        assert!(annotation.segmentation.is_compressed());
        assert_eq!(
            annotation.segmentation.decode().unwrap(),
            array![[true, true, true], [false, false, false]]
        );
    }

    #[test]
    fn test_bad_counts_rejected_on_load() {
        let json = r#"{
            "id": 4,
            "segmentation": {"size": [2, 3], "counts": [0, 3, 2]},
            "bbox": [0, 0, 3, 1],
            "area": 3
        }"#;
        assert!(serde_json::from_str::<Annotation>(json).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{
            "id": 3,
            "segmentation": {"size": [10, 10], "counts": "53l2"},
            "bbox": [0, 5, 1, 3],
            "area": 3,
            "stability_score": 0.5
        }"#;
        assert!(serde_json::from_str::<Annotation>(json).is_err());
    }
}
