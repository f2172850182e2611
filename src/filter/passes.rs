//! The three selection passes and their combination.

use std::collections::BTreeSet;

use ndarray::Array2;
use rayon::prelude::*;
use web_time::Instant;

use super::{FilterConfig, FilterError};
use crate::model::{Annotation, AnnotationId};

/// Foreground pixel counts taken from the run lengths, in input order.
fn run_areas(annotations: &[Annotation]) -> Result<Vec<u64>, FilterError> {
    Ok(annotations
        .par_iter()
        .map(|annotation| annotation.segmentation.area())
        .collect::<Result<Vec<u64>, _>>()?)
}

/// Ids whose mask covers at least `area_limit` of the image.
///
/// The image size is taken from the first annotation's mask.
pub fn filter_by_area(
    annotations: &[Annotation],
    area_limit: f64,
) -> Result<BTreeSet<AnnotationId>, FilterError> {
    let min_area = min_area(annotations, area_limit)?;
    let areas = run_areas(annotations)?;
    Ok(keep_by_area(annotations, &areas, min_area))
}

/// Smallest passing pixel count for the image the annotations belong to.
fn min_area(annotations: &[Annotation], area_limit: f64) -> Result<f64, FilterError> {
    let Some(first) = annotations.first() else {
        return Ok(0.0);
    };
    let [height, width] = first.segmentation.size;
    if height == 0 || width == 0 {
        return Err(FilterError::InvalidMaskSize {
            id: first.id,
            size: first.segmentation.size,
        });
    }
    Ok(f64::from(height) * f64::from(width) * area_limit)
}

fn keep_by_area(annotations: &[Annotation], areas: &[u64], min_area: f64) -> BTreeSet<AnnotationId> {
    annotations
        .iter()
        .zip(areas)
        .filter(|(_, area)| **area as f64 >= min_area)
        .map(|(annotation, _)| annotation.id)
        .collect()
}

/// Ids whose model confidence reaches `predicted_iou_limit`.
///
/// Annotations without a confidence never pass.
pub fn filter_by_confidence(
    annotations: &[Annotation],
    predicted_iou_limit: f64,
) -> BTreeSet<AnnotationId> {
    annotations
        .iter()
        .filter(|a| a.predicted_iou.is_some_and(|p| p >= predicted_iou_limit))
        .map(|a| a.id)
        .collect()
}

/// Greedy suppression over an overlap matrix.
///
/// Indices are visited by area, largest first; equal areas keep their input
/// order. Each index not yet suppressed is kept and suppresses every other
/// index it overlaps by more than `iou_limit`. Returns kept indices in visit
/// order.
pub fn suppress_overlaps(
    iou: &Array2<f64>,
    areas: &[u64],
    iou_limit: f64,
) -> Result<Vec<usize>, FilterError> {
    let n = areas.len();
    if iou.dim() != (n, n) {
        return Err(FilterError::MatrixMismatch {
            expected: n,
            found: iou.nrows(),
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| areas[b].cmp(&areas[a]));

    let mut suppressed = vec![false; n];
    let mut kept = Vec::new();
    for i in order {
        if suppressed[i] {
            continue;
        }
        kept.push(i);
        for (j, &overlap) in iou.row(i).iter().enumerate() {
            if j != i && overlap > iou_limit {
                suppressed[j] = true;
            }
        }
    }
    Ok(kept)
}

/// Ids surviving overlap suppression, visiting masks by their run-length area.
pub fn filter_by_overlap(
    annotations: &[Annotation],
    iou: &Array2<f64>,
    iou_limit: f64,
) -> Result<BTreeSet<AnnotationId>, FilterError> {
    let areas = run_areas(annotations)?;
    keep_by_overlap(annotations, &areas, iou, iou_limit)
}

fn keep_by_overlap(
    annotations: &[Annotation],
    areas: &[u64],
    iou: &Array2<f64>,
    iou_limit: f64,
) -> Result<BTreeSet<AnnotationId>, FilterError> {
    Ok(suppress_overlaps(iou, areas, iou_limit)?
        .into_iter()
        .map(|i| annotations[i].id)
        .collect())
}

/// Ids passing all three passes under `config`.
///
/// `iou` must be the overlap matrix of `annotations`, in the same order.
pub fn filter_annotations(
    annotations: &[Annotation],
    iou: &Array2<f64>,
    config: &FilterConfig,
) -> Result<BTreeSet<AnnotationId>, FilterError> {
    if annotations.is_empty() {
        return Ok(BTreeSet::new());
    }

    let start = Instant::now();
    let min_area = min_area(annotations, config.area_limit)?;
    let areas = run_areas(annotations)?;
    let by_area = keep_by_area(annotations, &areas, min_area);
    let by_confidence = filter_by_confidence(annotations, config.predicted_iou_limit);
    let by_overlap = keep_by_overlap(annotations, &areas, iou, config.iou_limit)?;

    let survivors: BTreeSet<AnnotationId> = by_area
        .iter()
        .filter(|id| by_confidence.contains(*id) && by_overlap.contains(*id))
        .copied()
        .collect();

    log::debug!(
        "Filtered {} annotations to {} (area {}, confidence {}, overlap {}) in {:?}",
        annotations.len(),
        survivors.len(),
        by_area.len(),
        by_confidence.len(),
        by_overlap.len(),
        start.elapsed()
    );
    Ok(survivors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use reefmask_rle::{Mask, compute_iou_matrix};

    fn square(id: AnnotationId, size: usize, side: usize, predicted_iou: f64) -> Annotation {
        let mask = Mask::from_shape_fn((size, size), |(r, c)| r < side && c < side);
        Annotation::from_mask(id, &mask, predicted_iou).unwrap()
    }

    #[test]
    fn test_identical_masks_keep_first() {
        let annotations = vec![square(7, 10, 10, 0.9), square(3, 10, 10, 0.9)];
        let iou = compute_iou_matrix(&[
            annotations[0].segmentation.decode().unwrap(),
            annotations[1].segmentation.decode().unwrap(),
        ])
        .unwrap();

        let kept = filter_by_overlap(&annotations, &iou, 0.3).unwrap();
        assert_eq!(kept, BTreeSet::from([7]));
    }

    #[test]
    fn test_stale_stored_area_does_not_pick_winner() {
        // 1 covers 100 pixels and 2 covers 81, but 2 claims to be larger.
        let mut annotations = vec![square(1, 10, 10, 0.9), square(2, 10, 9, 0.9)];
        annotations[1].area = 500;
        let masks: Vec<Mask> = annotations
            .iter()
            .map(|a| a.segmentation.decode().unwrap())
            .collect();
        let iou = compute_iou_matrix(&masks).unwrap();

        assert_eq!(
            filter_by_overlap(&annotations, &iou, 0.5).unwrap(),
            BTreeSet::from([1])
        );
        let config = FilterConfig::new(0.01, 0.5, 0.5);
        assert_eq!(
            filter_annotations(&annotations, &iou, &config).unwrap(),
            BTreeSet::from([1])
        );
    }

    #[test]
    fn test_suppression_chain() {
        let iou = array![[1.0, 0.6, 0.2], [0.6, 1.0, 0.7], [0.2, 0.7, 1.0]];
        let kept = suppress_overlaps(&iou, &[15, 25, 35], 0.5).unwrap();
        assert_eq!(kept, vec![2, 0]);
    }

    #[test]
    fn test_kept_index_never_suppresses_itself() {
        // Every mask overlaps every other one heavily; only the largest survives.
        let iou = array![[1.0, 0.9, 0.9], [0.9, 1.0, 0.9], [0.9, 0.9, 1.0]];
        let kept = suppress_overlaps(&iou, &[10, 30, 20], 0.0).unwrap();
        assert_eq!(kept, vec![1]);
    }

    #[test]
    fn test_limit_is_strict() {
        let iou = array![[1.0, 0.5], [0.5, 1.0]];
        assert_eq!(suppress_overlaps(&iou, &[2, 1], 0.5).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_matrix_mismatch() {
        let iou = array![[1.0]];
        assert_eq!(
            suppress_overlaps(&iou, &[1, 2], 0.5).unwrap_err(),
            FilterError::MatrixMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_area_threshold_inclusive() {
        // 1000x1000 image with limit 0.001: 1000 pixels pass, 999 do not.
        let mut small = Mask::from_elem((1000, 1000), false);
        small.row_mut(0).fill(true);
        let mut exact = small.clone();
        small[[0, 999]] = false;
        exact[[0, 999]] = true;

        let annotations = vec![
            Annotation::from_mask(1, &small, 0.9).unwrap(),
            Annotation::from_mask(2, &exact, 0.9).unwrap(),
        ];
        assert_eq!(annotations[0].area, 999);
        let kept = filter_by_area(&annotations, 0.001).unwrap();
        assert_eq!(kept, BTreeSet::from([2]));
    }

    #[test]
    fn test_area_threshold_scales_with_resolution() {
        // 25 pixels are 1% of a 50x50 image but only 0.25% of a 100x100 one.
        let small_image = vec![square(1, 50, 5, 0.9)];
        let large_image = vec![square(1, 100, 5, 0.9)];
        assert_eq!(filter_by_area(&small_image, 0.005).unwrap().len(), 1);
        assert!(filter_by_area(&large_image, 0.005).unwrap().is_empty());
    }

    #[test]
    fn test_zero_sized_mask_rejected() {
        let mut annotation = square(4, 4, 2, 0.9);
        annotation.segmentation.size = [0, 4];
        assert!(matches!(
            filter_by_area(&[annotation], 0.1),
            Err(FilterError::InvalidMaskSize { id: 4, .. })
        ));
    }

    #[test]
    fn test_confidence_pass() {
        let mut annotations = vec![square(1, 8, 4, 0.4), square(2, 8, 4, 0.5), square(3, 8, 4, 0.8)];
        annotations[2].predicted_iou = None;
        assert_eq!(filter_by_confidence(&annotations, 0.5), BTreeSet::from([2]));
    }

    #[test]
    fn test_empty_list() {
        let iou = Array2::zeros((0, 0));
        let kept = filter_annotations(&[], &iou, &FilterConfig::default()).unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn test_combined_passes_and_idempotence() {
        let annotations = vec![
            square(1, 20, 20, 0.9),
            square(2, 20, 19, 0.95),
            square(3, 20, 1, 0.9),
            square(4, 20, 6, 0.2),
        ];
        let masks: Vec<Mask> = annotations
            .iter()
            .map(|a| a.segmentation.decode().unwrap())
            .collect();
        let iou = compute_iou_matrix(&masks).unwrap();
        let config = FilterConfig::new(0.01, 0.5, 0.5);

        let first = filter_annotations(&annotations, &iou, &config).unwrap();
        // 2 is swallowed by 1, 3 is too small, 4 is not confident enough.
        assert_eq!(first, BTreeSet::from([1]));
        assert_eq!(filter_annotations(&annotations, &iou, &config).unwrap(), first);
    }
}
