//! Conversions between dense binary masks and their run-length forms.

use ndarray::{Array2, ArrayBase, Data, Ix2, ShapeBuilder};

use crate::error::{CodecError, Result};
use crate::rle::{RunLengthMask, RunSpec, encode_counts};

/// Dense binary mask of shape `(height, width)`.
pub type Mask = Array2<bool>;

/// Axis-aligned box `[x, y, width, height]` in pixels.
pub type BBox = [u32; 4];

/// Pixel types that can be read as a binary mask value.
pub trait MaskPixel: Copy {
    /// `None` when the value is neither background nor foreground.
    fn to_bit(self) -> Option<bool>;
}

impl MaskPixel for bool {
    fn to_bit(self) -> Option<bool> {
        Some(self)
    }
}

impl MaskPixel for u8 {
    fn to_bit(self) -> Option<bool> {
        match self {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }
}

/// Convert a `0`/`1` grid into a boolean mask.
pub fn binarize<S, P>(pixels: &ArrayBase<S, Ix2>) -> Result<Mask>
where
    S: Data<Elem = P>,
    P: MaskPixel,
{
    let mut mask = Mask::from_elem(pixels.dim(), false);
    for ((row, col), pixel) in pixels.indexed_iter() {
        mask[[row, col]] = pixel
            .to_bit()
            .ok_or(CodecError::NonBinaryPixel { row, col })?;
    }
    Ok(mask)
}

/// Encode a mask into the compressed, column-major form.
pub fn encode_compressed<S, P>(mask: &ArrayBase<S, Ix2>) -> Result<RunLengthMask>
where
    S: Data<Elem = P>,
    P: MaskPixel,
{
    let size = checked_size(mask.dim())?;
    // Iterating the transpose visits rows fastest within each column.
    let transposed = mask.t();
    let pixels = transposed
        .indexed_iter()
        .map(|((col, row), pixel)| (row, col, *pixel));
    let counts = collect_runs(pixels)?;
    Ok(RunLengthMask {
        size,
        counts: RunSpec::Compressed(encode_counts(&counts)),
    })
}

/// Row-major run lengths, always starting with a background run.
pub fn encode_plain<S, P>(mask: &ArrayBase<S, Ix2>) -> Result<Vec<u32>>
where
    S: Data<Elem = P>,
    P: MaskPixel,
{
    checked_size(mask.dim())?;
    collect_runs(
        mask.indexed_iter()
            .map(|((row, col), pixel)| (row, col, *pixel)),
    )
}

/// [`encode_plain`] wrapped with the mask size.
pub fn encode_plain_rle<S, P>(mask: &ArrayBase<S, Ix2>) -> Result<RunLengthMask>
where
    S: Data<Elem = P>,
    P: MaskPixel,
{
    let size = checked_size(mask.dim())?;
    Ok(RunLengthMask {
        size,
        counts: RunSpec::Plain(encode_plain(mask)?),
    })
}

/// Expand a run-length mask back into a dense mask.
///
/// Compressed counts are laid out column-major and plain counts row-major;
/// the returned array is indexed `[row, col]` either way.
pub fn decode(rle: &RunLengthMask) -> Result<Mask> {
    let runs = rle.runs()?;
    let height = rle.height() as usize;
    let width = rle.width() as usize;

    let mut bits = Vec::with_capacity(height * width);
    let mut value = false;
    for run in runs {
        bits.extend(std::iter::repeat_n(value, run as usize));
        value = !value;
    }

    let shaped = match rle.counts {
        RunSpec::Compressed(_) => Array2::from_shape_vec((height, width).f(), bits),
        RunSpec::Plain(_) => Array2::from_shape_vec((height, width), bits),
    };
    shaped.map_err(|_| CodecError::DimensionOverflow { height, width })
}

/// Tight bounding box of the foreground and its pixel count.
///
/// The box is `None` for a mask without foreground pixels.
pub fn bbox_and_area<S>(mask: &ArrayBase<S, Ix2>) -> (Option<BBox>, u64)
where
    S: Data<Elem = bool>,
{
    let mut area = 0u64;
    let mut extent: Option<[usize; 4]> = None;

    for ((row, col), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        area += 1;
        extent = Some(match extent {
            None => [col, row, col, row],
            Some([x0, y0, x1, y1]) => [x0.min(col), y0.min(row), x1.max(col), y1.max(row)],
        });
    }

    let bbox = extent.map(|[x0, y0, x1, y1]| {
        [
            x0 as u32,
            y0 as u32,
            (x1 - x0 + 1) as u32,
            (y1 - y0 + 1) as u32,
        ]
    });
    (bbox, area)
}

impl RunLengthMask {
    pub fn decode(&self) -> Result<Mask> {
        decode(self)
    }

    /// Re-encode in the plain row-major form. Plain input is returned as is.
    pub fn to_plain(&self) -> Result<RunLengthMask> {
        match self.counts {
            RunSpec::Plain(_) => {
                self.runs()?;
                Ok(self.clone())
            }
            RunSpec::Compressed(_) => encode_plain_rle(&self.decode()?),
        }
    }

    /// Re-encode in the compressed column-major form. Compressed input is
    /// validated and returned as is.
    pub fn to_compressed(&self) -> Result<RunLengthMask> {
        match self.counts {
            RunSpec::Compressed(_) => {
                self.runs()?;
                Ok(self.clone())
            }
            RunSpec::Plain(_) => encode_compressed(&self.decode()?),
        }
    }
}

/// `[height, width]` as stored in a [`RunLengthMask`]. Every run must fit in a `u32`.
fn checked_size((height, width): (usize, usize)) -> Result<[u32; 2]> {
    let overflow = CodecError::DimensionOverflow { height, width };
    let total = height.checked_mul(width).ok_or(overflow.clone())?;
    u32::try_from(total).map_err(|_| overflow.clone())?;
    Ok([
        u32::try_from(height).map_err(|_| overflow.clone())?,
        u32::try_from(width).map_err(|_| overflow)?,
    ])
}

fn collect_runs<P: MaskPixel>(pixels: impl Iterator<Item = (usize, usize, P)>) -> Result<Vec<u32>> {
    let mut counts = Vec::new();
    let mut current = false;
    let mut run = 0u32;

    for (row, col, pixel) in pixels {
        let bit = pixel
            .to_bit()
            .ok_or(CodecError::NonBinaryPixel { row, col })?;
        if bit != current {
            counts.push(run);
            run = 0;
            current = bit;
        }
        run += 1;
    }
    counts.push(run);

    Ok(counts)
}
