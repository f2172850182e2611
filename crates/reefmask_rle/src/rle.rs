//! Run-length representations of binary masks.
//!
//! Two encodings of the same alternating background/foreground runs are
//! supported. Both always start with a (possibly empty) background run.
//!
//! - **Compressed**: the COCO byte-packed string used by pycocotools. Runs are
//!   counted in column-major order (rows vary fastest). Each run is written in
//!   5-bit groups offset by 48, and runs after the third are stored as the
//!   difference to the run two positions earlier.
//! - **Plain**: a list of integers counted over the row-major flattened mask.
//!   Integers survive any wire format, so this form is what the presentation
//!   layer receives.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Run lengths in one of the two supported encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunSpec {
    /// COCO byte-packed string of column-major runs.
    Compressed(String),
    /// Integer runs over the row-major flattened mask.
    Plain(Vec<u32>),
}

/// Persisted form of a mask: `{ "size": [height, width], "counts": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunLengthMask {
    /// `[height, width]` of the mask.
    pub size: [u32; 2],
    pub counts: RunSpec,
}

impl RunLengthMask {
    pub fn height(&self) -> u32 {
        self.size[0]
    }

    pub fn width(&self) -> u32 {
        self.size[1]
    }

    /// Total number of pixels covered by the runs.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.height()) * u64::from(self.width())
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.counts, RunSpec::Compressed(_))
    }

    /// Decode the run list and check that it covers exactly `height * width` pixels.
    pub fn runs(&self) -> Result<Vec<u32>> {
        let runs = match &self.counts {
            RunSpec::Compressed(packed) => decode_counts(packed)?,
            RunSpec::Plain(runs) => runs.clone(),
        };

        let actual: u64 = runs.iter().map(|&r| u64::from(r)).sum();
        let expected = self.pixel_count();
        if actual != expected {
            return Err(CodecError::CountSumMismatch { expected, actual });
        }
        Ok(runs)
    }

    /// Foreground pixel count, computed from the runs without decoding the mask.
    pub fn area(&self) -> Result<u64> {
        Ok(self
            .runs()?
            .iter()
            .skip(1)
            .step_by(2)
            .map(|&r| u64::from(r))
            .sum())
    }
}

/// Pack column-major run lengths into the COCO string form.
///
/// Matches `rleToString` from the COCO mask API byte for byte.
pub fn encode_counts(counts: &[u32]) -> String {
    let mut packed = String::with_capacity(counts.len() * 2);
    for (i, &count) in counts.iter().enumerate() {
        let mut x = i64::from(count);
        if i > 2 {
            x -= i64::from(counts[i - 2]);
        }
        loop {
            let mut c = (x & 0x1f) as u8;
            x >>= 5;
            let more = if c & 0x10 != 0 { x != -1 } else { x != 0 };
            if more {
                c |= 0x20;
            }
            packed.push(char::from(c + 48));
            if !more {
                break;
            }
        }
    }
    packed
}

/// Unpack a COCO counts string into run lengths.
///
/// Inverse of [`encode_counts`]; matches `rleFrString` from the COCO mask API.
pub fn decode_counts(packed: &str) -> Result<Vec<u32>> {
    // 12 groups of 5 bits already exceed any u32 run.
    const MAX_GROUPS: u32 = 12;

    let bytes = packed.as_bytes();
    let mut counts: Vec<u32> = Vec::with_capacity(bytes.len());
    let mut position = 0;

    while position < bytes.len() {
        let mut x: i64 = 0;
        let mut groups = 0u32;
        loop {
            if groups == MAX_GROUPS {
                return Err(CodecError::MalformedCounts { position });
            }
            let c = bytes
                .get(position)
                .and_then(|b| b.checked_sub(48))
                .filter(|c| *c < 64)
                .map(i64::from)
                .ok_or(CodecError::MalformedCounts { position })?;
            x |= (c & 0x1f) << (5 * groups);
            position += 1;
            groups += 1;
            if c & 0x20 == 0 {
                if c & 0x10 != 0 {
                    x |= -1i64 << (5 * groups);
                }
                break;
            }
        }

        let index = counts.len();
        if index > 2 {
            x += i64::from(counts[index - 2]);
        }
        let run = u32::try_from(x).map_err(|_| CodecError::RunOutOfRange { index })?;
        counts.push(run);
    }

    Ok(counts)
}
