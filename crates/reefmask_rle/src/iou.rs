//! Pairwise intersection-over-union between all masks of one image.
//!
//! Masks are packed into 64-pixel words, so every intersection is a
//! popcount over `H * W / 64` words instead of a pixel loop. Taken over all
//! pairs this is the integer product `M * M^T` of the flattened masks.

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{CodecError, Result};
use crate::mask::Mask;
use crate::rle::RunLengthMask;

/// A mask flattened row-major into bit words.
struct PackedMask {
    words: Vec<u64>,
    area: u64,
}

impl PackedMask {
    fn pack(mask: &Mask) -> Self {
        let mut words = vec![0u64; mask.len().div_ceil(64)];
        for (i, _) in mask.iter().enumerate().filter(|(_, set)| **set) {
            words[i / 64] |= 1 << (i % 64);
        }
        let area = words.iter().map(|w| u64::from(w.count_ones())).sum();
        Self { words, area }
    }

    fn intersection(&self, other: &PackedMask) -> u64 {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| u64::from((a & b).count_ones()))
            .sum()
    }

    fn iou(&self, other: &PackedMask) -> f64 {
        let inter = self.intersection(other);
        let union = self.area + other.area - inter;
        if union == 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }
}

/// `N x N` overlap matrix for `N` masks of one shape.
///
/// `iou[[i, j]]` is `|m_i & m_j| / |m_i | m_j|`, or `0.0` when both masks are
/// empty. The matrix is symmetric with `1.0` on the diagonal of every
/// non-empty mask. Rows are computed in parallel.
pub fn compute_iou_matrix(masks: &[Mask]) -> Result<Array2<f64>> {
    let n = masks.len();
    if n == 0 {
        return Ok(Array2::zeros((0, 0)));
    }

    let (height, width) = masks[0].dim();
    if let Some(other) = masks.iter().find(|m| m.dim() != (height, width)) {
        let (h, w) = other.dim();
        return Err(CodecError::ShapeMismatch {
            expected: [height, width],
            found: [h, w],
        });
    }

    let packed: Vec<PackedMask> = masks.par_iter().map(PackedMask::pack).collect();

    // Upper triangle only; row i holds columns i..n.
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| (i..n).map(|j| packed[i].iou(&packed[j])).collect())
        .collect();

    let mut matrix = Array2::zeros((n, n));
    for (i, row) in rows.into_iter().enumerate() {
        for (offset, value) in row.into_iter().enumerate() {
            let j = i + offset;
            matrix[[i, j]] = value;
            matrix[[j, i]] = value;
        }
    }
    log::trace!("Computed {n}x{n} IoU matrix over {height}x{width} masks");
    Ok(matrix)
}

/// Decode every mask (in parallel) and compute their overlap matrix.
pub fn compute_iou_matrix_from_rle(masks: &[RunLengthMask]) -> Result<Array2<f64>> {
    let decoded = masks
        .par_iter()
        .map(RunLengthMask::decode)
        .collect::<Result<Vec<Mask>>>()?;
    compute_iou_matrix(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::encode_compressed;

    fn rect(height: usize, width: usize, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Mask {
        Mask::from_shape_fn((height, width), |(r, c)| rows.contains(&r) && cols.contains(&c))
    }

    #[test]
    fn test_identical_masks() {
        let masks = vec![Mask::from_elem((10, 10), true), Mask::from_elem((10, 10), true)];
        let iou = compute_iou_matrix(&masks).unwrap();
        assert_eq!(iou, ndarray::array![[1.0, 1.0], [1.0, 1.0]]);
    }

    #[test]
    fn test_partial_overlap() {
        // 4x4 and 4x2 sharing a 4x2 strip: 8 / 16.
        let masks = vec![rect(8, 8, 0..4, 0..4), rect(8, 8, 0..4, 2..4)];
        let iou = compute_iou_matrix(&masks).unwrap();
        assert_eq!(iou[[0, 1]], 0.5);
        assert_eq!(iou[[1, 0]], 0.5);
    }

    #[test]
    fn test_symmetry_and_bounds() {
        let masks: Vec<Mask> = (0..9)
            .map(|k| rect(13, 11, k..k + 4, (k % 5)..(k % 5) + 6))
            .collect();
        let iou = compute_iou_matrix(&masks).unwrap();
        for i in 0..masks.len() {
            assert_eq!(iou[[i, i]], 1.0);
            for j in 0..masks.len() {
                assert_eq!(iou[[i, j]], iou[[j, i]]);
                assert!((0.0..=1.0).contains(&iou[[i, j]]));
            }
        }
    }

    #[test]
    fn test_empty_masks_have_zero_iou() {
        let masks = vec![Mask::from_elem((3, 3), false), Mask::from_elem((3, 3), false)];
        let iou = compute_iou_matrix(&masks).unwrap();
        assert!(iou.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_no_masks() {
        assert_eq!(compute_iou_matrix(&[]).unwrap().dim(), (0, 0));
    }

    #[test]
    fn test_shape_mismatch() {
        let masks = vec![Mask::from_elem((3, 3), true), Mask::from_elem((3, 4), true)];
        assert_eq!(
            compute_iou_matrix(&masks).unwrap_err(),
            CodecError::ShapeMismatch {
                expected: [3, 3],
                found: [3, 4]
            }
        );
    }

    #[test]
    fn test_from_rle_matches_dense() {
        let masks = vec![rect(70, 9, 0..40, 0..5), rect(70, 9, 20..70, 3..9)];
        let rles: Vec<RunLengthMask> = masks.iter().map(|m| encode_compressed(m).unwrap()).collect();
        assert_eq!(
            compute_iou_matrix_from_rle(&rles).unwrap(),
            compute_iou_matrix(&masks).unwrap()
        );
    }
}
