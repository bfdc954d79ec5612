//! Minority-class top-up: randomized transforms on CHW tensors, per-class
//! sample synthesis and the final shuffle.

use indicatif::{MultiProgress, ProgressBar};
use log::{debug, info};
use palette::{Hsv, IntoColor, ShiftHue, Srgb};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::AugmentConfig;
use crate::data::model::{ImageTensor, LabeledDataset, LesionClass, NUM_CLASSES};
use crate::error::PrepResult;
use crate::progress;

/// Random flip, rotation and color jitter, applied in that order.
#[derive(Debug, Clone)]
pub struct AugmentPipeline {
    pub flip_prob: f32,
    pub rotation_degrees: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
}

impl AugmentPipeline {
    pub fn from_config(cfg: &AugmentConfig) -> Self {
        Self {
            flip_prob: cfg.flip_prob,
            rotation_degrees: cfg.rotation_degrees,
            brightness: cfg.brightness,
            contrast: cfg.contrast,
            saturation: cfg.saturation,
            hue: cfg.hue,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "flip_p={:.2} rotation=±{:.1}° brightness={:.2} contrast={:.2} saturation={:.2} hue={:.3}",
            self.flip_prob,
            self.rotation_degrees,
            self.brightness,
            self.contrast,
            self.saturation,
            self.hue
        )
    }

    /// Produce a transformed copy of `src`. Shape is preserved and every
    /// value stays in `[0, 1]`.
    pub fn apply(&self, src: &ImageTensor, rng: &mut dyn RngCore) -> ImageTensor {
        let mut img = src.clone();
        maybe_hflip(&mut img, self.flip_prob, rng);
        if self.rotation_degrees > 0.0 {
            let angle = uniform(rng, -self.rotation_degrees, self.rotation_degrees);
            img = rotate(&img, angle);
        }
        self.color_jitter(&mut img, rng);
        img
    }

    /// Brightness, contrast, saturation and hue adjustments in random order.
    fn color_jitter(&self, img: &mut ImageTensor, rng: &mut dyn RngCore) {
        if img.channels() != 3 {
            return;
        }
        let mut order = [0u8, 1, 2, 3];
        order.shuffle(rng);
        for op in order {
            match op {
                0 if self.brightness > 0.0 => {
                    let f = jitter_factor(rng, self.brightness);
                    adjust_brightness(img, f);
                }
                1 if self.contrast > 0.0 => {
                    let f = jitter_factor(rng, self.contrast);
                    adjust_contrast(img, f);
                }
                2 if self.saturation > 0.0 => {
                    let f = jitter_factor(rng, self.saturation);
                    adjust_saturation(img, f);
                }
                3 if self.hue > 0.0 => {
                    let shift = uniform(rng, -self.hue, self.hue);
                    adjust_hue(img, shift);
                }
                _ => {}
            }
        }
    }
}

/// Uniform sample from `[lo, hi)`; `lo` when the range is empty.
fn uniform(rng: &mut dyn RngCore, lo: f32, hi: f32) -> f32 {
    if hi > lo {
        rng.random_range(lo..hi)
    } else {
        lo
    }
}

fn jitter_factor(rng: &mut dyn RngCore, strength: f32) -> f32 {
    uniform(rng, (1.0 - strength).max(0.0), 1.0 + strength)
}

pub(crate) fn maybe_hflip(img: &mut ImageTensor, prob: f32, rng: &mut dyn RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        hflip(img);
    }
}

fn hflip(img: &mut ImageTensor) {
    let (c, h, w) = img.shape();
    if w == 0 {
        return;
    }
    let data = img.data_mut();
    for row in data.chunks_mut(w).take(c * h) {
        row.reverse();
    }
}

/// Rotate counter-clockwise by `degrees` about the image centre. Nearest
/// neighbour sampling; pixels mapped from outside the source are zero.
pub(crate) fn rotate(src: &ImageTensor, degrees: f32) -> ImageTensor {
    let (c, h, w) = src.shape();
    let mut out = ImageTensor::zeros(c, h, w);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (cx, cy) = (w as f32 * 0.5, h as f32 * 0.5);
    for y in 0..h {
        let dy = y as f32 + 0.5 - cy;
        for x in 0..w {
            let dx = x as f32 + 0.5 - cx;
            let sx = (cos * dx - sin * dy + cx).floor();
            let sy = (sin * dx + cos * dy + cy).floor();
            if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
                continue;
            }
            let (sx, sy) = (sx as usize, sy as usize);
            for ch in 0..c {
                out.set(ch, y, x, src.get(ch, sy, sx));
            }
        }
    }
    out
}

fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

fn adjust_brightness(img: &mut ImageTensor, factor: f32) {
    for v in img.data_mut() {
        *v = (*v * factor).clamp(0.0, 1.0);
    }
}

/// Blend towards the mean grayscale level of the whole image.
fn adjust_contrast(img: &mut ImageTensor, factor: f32) {
    let plane = img.height() * img.width();
    if plane == 0 {
        return;
    }
    let data = img.data_mut();
    let (r, rest) = data.split_at(plane);
    let (g, b) = rest.split_at(plane);
    let mean = (0..plane).map(|i| luma(r[i], g[i], b[i])).sum::<f32>() / plane as f32;
    for v in data.iter_mut() {
        *v = (factor * *v + (1.0 - factor) * mean).clamp(0.0, 1.0);
    }
}

/// Blend each pixel towards its own grayscale value.
fn adjust_saturation(img: &mut ImageTensor, factor: f32) {
    let plane = img.height() * img.width();
    let data = img.data_mut();
    for i in 0..plane {
        let gray = luma(data[i], data[plane + i], data[2 * plane + i]);
        for ch in 0..3 {
            let v = &mut data[ch * plane + i];
            *v = (factor * *v + (1.0 - factor) * gray).clamp(0.0, 1.0);
        }
    }
}

/// Rotate hue by `shift` turns (`shift` in `[-0.5, 0.5]`).
fn adjust_hue(img: &mut ImageTensor, shift: f32) {
    let plane = img.height() * img.width();
    let degrees = shift * 360.0;
    let data = img.data_mut();
    for i in 0..plane {
        let hsv: Hsv = Srgb::new(data[i], data[plane + i], data[2 * plane + i]).into_color();
        let rgb: Srgb = hsv.shift_hue(degrees).into_color();
        data[i] = rgb.red.clamp(0.0, 1.0);
        data[plane + i] = rgb.green.clamp(0.0, 1.0);
        data[2 * plane + i] = rgb.blue.clamp(0.0, 1.0);
    }
}

// ---------------------------------------------------------------------------
// Class balancing
// ---------------------------------------------------------------------------

/// Per-class outcome of the top-up step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassTopUp {
    pub class: &'static str,
    pub index: usize,
    pub before: usize,
    pub generated: usize,
    pub after: usize,
}

const MINORITY: [LesionClass; NUM_CLASSES - 1] = [
    LesionClass::Mel,
    LesionClass::Bkl,
    LesionClass::Bcc,
    LesionClass::Akiec,
    LesionClass::Vasc,
    LesionClass::Df,
];

/// Classes eligible for top-up. `Nv` is the majority class and never grows.
pub fn minority_classes() -> &'static [LesionClass] {
    &MINORITY
}

/// Synthesize samples of `class` until the training set holds `target` of
/// them. Returns only the new samples. A class with no samples, or already at
/// or above `target`, yields an empty buffer. `progress` advances once per
/// synthesized sample.
pub fn top_up_class(
    train: &LabeledDataset,
    class: LesionClass,
    target: usize,
    pipeline: &AugmentPipeline,
    rng: &mut dyn RngCore,
    progress: &ProgressBar,
) -> LabeledDataset {
    let sources = train.indices_of(class);
    if sources.is_empty() {
        debug!("class {} ({class}): no samples, nothing to augment", class.index());
        return LabeledDataset::default();
    }
    let deficit = target.saturating_sub(sources.len());
    progress.set_length(deficit as u64);
    let mut buffer = LabeledDataset::with_capacity(deficit);
    for _ in 0..deficit {
        let pick = sources[rng.random_range(0..sources.len())];
        let image = pipeline.apply(&train.images()[pick], rng);
        buffer.push(image, class);
        progress.inc(1);
    }
    buffer
}

/// Top every minority class up to `target`, then shuffle the whole set.
///
/// Each class draws from its own ChaCha stream of `seed` and fills its own
/// buffer, so classes are processed in parallel yet the result depends only
/// on the inputs. Buffers are appended in class order before the shuffle.
pub fn balance_minority_classes(
    train: LabeledDataset,
    target: usize,
    pipeline: &AugmentPipeline,
    seed: u64,
) -> PrepResult<(LabeledDataset, Vec<ClassTopUp>)> {
    let before = train.class_counts();
    info!("augmentation: {}", pipeline.describe());

    let bars = MultiProgress::new();
    let buffers: Vec<(LesionClass, LabeledDataset)> = minority_classes()
        .par_iter()
        .map(|&class| {
            let pb = bars.add(progress::bar(0, class.code()));
            let mut rng = class_rng(seed, class.index() as u64);
            let buffer = top_up_class(&train, class, target, pipeline, &mut rng, &pb);
            pb.finish_and_clear();
            (class, buffer)
        })
        .collect();

    let mut report = Vec::with_capacity(buffers.len());
    let mut balanced = train;
    for (class, buffer) in buffers {
        let idx = class.index();
        let generated = buffer.len();
        if generated > 0 {
            info!(
                "class {idx} ({class}): {} -> {} (+{generated})",
                before[idx],
                before[idx] + generated
            );
        }
        report.push(ClassTopUp {
            class: class.code(),
            index: idx,
            before: before[idx],
            generated,
            after: before[idx] + generated,
        });
        balanced.extend(buffer);
    }

    let shuffled = shuffle(balanced, &mut class_rng(seed, NUM_CLASSES as u64))?;
    Ok((shuffled, report))
}

/// Apply one random permutation to images and labels alike.
pub fn shuffle(ds: LabeledDataset, rng: &mut dyn RngCore) -> PrepResult<LabeledDataset> {
    let mut order: Vec<usize> = (0..ds.len()).collect();
    order.shuffle(rng);
    ds.permute(&order)
}

fn class_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}
