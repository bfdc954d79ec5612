//! Image decoding: file → RGB → square resize → normalized CHW tensor.

use std::path::Path;
use std::time::Instant;

use image::imageops::FilterType;
use indicatif::ParallelProgressIterator;
use log::info;
use rayon::prelude::*;

use crate::data::model::{ImageTensor, Record};
use crate::error::{PrepError, PrepResult};
use crate::progress;

/// Decode one image, resize it to `size`×`size` (bicubic) and normalize.
pub fn load_image(path: &Path, size: u32) -> PrepResult<ImageTensor> {
    let img = image::open(path).map_err(|source| PrepError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let rgb = img.to_rgb8();
    let resized = if rgb.dimensions() == (size, size) {
        rgb
    } else {
        image::imageops::resize(&rgb, size, size, FilterType::CatmullRom)
    };
    Ok(ImageTensor::from_rgb(&resized))
}

/// Load every record's image. Decoding runs in parallel; the result is in
/// record order. Records must already have a resolved path.
pub fn materialize(records: &[Record], size: u32) -> PrepResult<Vec<ImageTensor>> {
    let t0 = Instant::now();
    let pb = progress::bar(records.len() as u64, "decode");
    let tensors = records
        .par_iter()
        .progress_with(pb.clone())
        .map(|r| {
            let path = r.path.as_deref().ok_or_else(|| PrepError::MissingImagePath {
                image_id: r.image_id.clone(),
            })?;
            load_image(path, size)
        })
        .collect::<PrepResult<Vec<_>>>();
    pb.finish_and_clear();
    let tensors = tensors?;
    info!(
        "decoded {} image(s) at {size}x{size} in {} ms",
        tensors.len(),
        t0.elapsed().as_millis()
    );
    Ok(tensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::LesionClass;
    use image::{Rgb, RgbImage};
    use std::collections::BTreeMap;

    #[test]
    fn resizes_and_normalizes_solid_image() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("solid.png");
        let img = RgbImage::from_pixel(10, 6, Rgb([255, 0, 51]));
        img.save(&path).unwrap();

        let t = load_image(&path, 4).unwrap();
        assert_eq!(t.shape(), (3, 4, 4));
        for y in 0..4 {
            for x in 0..4 {
                assert!((t.get(0, y, x) - 1.0).abs() < 1e-6);
                assert!(t.get(1, y, x).abs() < 1e-6);
                assert!((t.get(2, y, x) - 0.2).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn corrupt_file_names_its_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        let err = load_image(&path, 4).unwrap_err();
        assert!(err.to_string().contains("broken.jpg"));
    }

    #[test]
    fn unresolved_record_is_reported_by_id() {
        let records = vec![Record {
            image_id: "ISIC_missing".into(),
            class: LesionClass::Mel,
            path: None,
            age: None,
            metadata: BTreeMap::new(),
        }];
        match materialize(&records, 4).unwrap_err() {
            PrepError::MissingImagePath { image_id } => assert_eq!(image_id, "ISIC_missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn materialize_keeps_record_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut records = Vec::new();
        for (i, shade) in [10u8, 200, 90].into_iter().enumerate() {
            let path = tmp.path().join(format!("img_{i}.png"));
            RgbImage::from_pixel(3, 3, Rgb([shade, shade, shade]))
                .save(&path)
                .unwrap();
            records.push(Record {
                image_id: format!("img_{i}"),
                class: LesionClass::Nv,
                path: Some(path),
                age: None,
                metadata: BTreeMap::new(),
            });
        }
        let tensors = materialize(&records, 3).unwrap();
        let firsts: Vec<f32> = tensors.iter().map(|t| t.get(0, 0, 0)).collect();
        assert_eq!(firsts, vec![10.0 / 255.0, 200.0 / 255.0, 90.0 / 255.0]);
    }
}
