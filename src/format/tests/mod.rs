//! Archive-level tests over small generated projects.
//!
//! These tests write real project archives to scratch directories and load,
//! save, export and create them end to end.


use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use reefmask_rle::Mask;

use super::{
    AnnotationFile, Embedding, ImageEntries, ImageInfo, ProjectInfo, write_archive,
};
use crate::constants::PROJECT_FILE;
use crate::filter::FilterConfig;
use crate::model::{Annotation, AnnotationId, default_labels};

/// Side length of every fixture image.
pub(crate) const SIDE: u32 = 20;

/// A square mask of `side` pixels starting at `(offset, offset)`.
pub(crate) fn square_mask(offset: usize, side: usize) -> Mask {
    Mask::from_shape_fn((SIDE as usize, SIDE as usize), |(r, c)| {
        (offset..offset + side).contains(&r) && (offset..offset + side).contains(&c)
    })
}

pub(crate) fn square(id: AnnotationId, offset: usize, side: usize) -> Annotation {
    Annotation::from_mask(id, &square_mask(offset, side), 0.9).unwrap()
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::from_pixel(width, height, image::Rgb([20, 90, 160]))
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub(crate) fn embedding() -> Embedding {
    Embedding::from_array(&ArrayD::<f32>::zeros(IxDyn(&[1, 4, 4]))).unwrap()
}

/// Annotations of fixture image `idx`: a large categorized square, a nearly
/// identical smaller one, and an uncategorized square elsewhere.
pub(crate) fn fixture_annotations(idx: usize) -> Vec<Annotation> {
    vec![
        square(1, 0, 10).with_category(0, "Dead Coral"),
        square(2, 0, 9).with_category(0, "Dead Coral"),
        square(3, 12, 4 + idx % 3),
    ]
}

/// Archive entries of a project with one PNG image per stem.
pub(crate) fn project_entries(stems: &[&str]) -> BTreeMap<String, Vec<u8>> {
    let mut entries = BTreeMap::new();
    for (idx, stem) in stems.iter().enumerate() {
        let names = ImageEntries::for_image(&format!("{stem}.png"));
        let info = ImageInfo {
            width: SIDE,
            height: SIDE,
            filename: names.filename().to_string(),
            image_id: idx as u64,
        };
        let file = AnnotationFile::new(info, fixture_annotations(idx));
        entries.insert(names.image.clone(), png_bytes(SIDE, SIDE));
        entries.insert(names.embedding.clone(), embedding().as_bytes().to_vec());
        entries.insert(names.annotation.clone(), file.to_json_bytes().unwrap());
    }
    let info = ProjectInfo {
        project_path: String::new(),
        labels: default_labels(),
        filter_config: BTreeMap::from([(0, FilterConfig::default())]),
        last_image_idx: 0,
    };
    entries.insert(PROJECT_FILE.to_string(), info.to_json_bytes().unwrap());
    entries
}

pub(crate) fn write_entries(path: &Path, entries: &BTreeMap<String, Vec<u8>>) {
    let file = std::fs::File::create(path).unwrap();
    write_archive(file, entries).unwrap();
}

/// Write a project with the given image stems to `dir/name`.
pub(crate) fn write_project(dir: &Path, name: &str, stems: &[&str]) -> PathBuf {
    let path = dir.join(name);
    write_entries(&path, &project_entries(stems));
    path
}
