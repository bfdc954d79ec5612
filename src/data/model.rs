use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PrepError, PrepResult};

// ---------------------------------------------------------------------------
// LesionClass – the seven HAM10000 diagnosis categories
// ---------------------------------------------------------------------------

pub const NUM_CLASSES: usize = 7;

/// Diagnosis category. Discriminants are the contiguous class indices used as
/// training labels; `Nv` (index 0) is the majority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LesionClass {
    Nv = 0,
    Mel = 1,
    Bkl = 2,
    Bcc = 3,
    Akiec = 4,
    Vasc = 5,
    Df = 6,
}

impl LesionClass {
    pub const ALL: [LesionClass; NUM_CLASSES] = [
        LesionClass::Nv,
        LesionClass::Mel,
        LesionClass::Bkl,
        LesionClass::Bcc,
        LesionClass::Akiec,
        LesionClass::Vasc,
        LesionClass::Df,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short diagnosis code as it appears in the `dx` column.
    pub fn code(self) -> &'static str {
        match self {
            LesionClass::Nv => "nv",
            LesionClass::Mel => "mel",
            LesionClass::Bkl => "bkl",
            LesionClass::Bcc => "bcc",
            LesionClass::Akiec => "akiec",
            LesionClass::Vasc => "vasc",
            LesionClass::Df => "df",
        }
    }

    /// Human-readable lesion type.
    pub fn name(self) -> &'static str {
        match self {
            LesionClass::Nv => "Melanocytic nevi",
            LesionClass::Mel => "Melanoma",
            LesionClass::Bkl => "Benign keratosis-like lesions",
            LesionClass::Bcc => "Basal cell carcinoma",
            LesionClass::Akiec => "Actinic keratoses",
            LesionClass::Vasc => "Vascular lesions",
            LesionClass::Df => "Dermatofibroma",
        }
    }
}

impl FromStr for LesionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == s.trim())
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for LesionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// MetadataValue – a passthrough cell in a metadata column
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value for columns the pipeline does not
/// interpret itself (lesion_id, dx_type, sex, localization, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl MetadataValue {
    /// Guess the cell type the way a dataframe reader would.
    pub fn guess(s: &str) -> Self {
        if s.is_empty() {
            return MetadataValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return MetadataValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return MetadataValue::Float(f);
        }
        if s == "true" || s == "false" {
            return MetadataValue::Bool(s == "true");
        }
        MetadataValue::String(s.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Record – one row of the merged metadata table
// ---------------------------------------------------------------------------

/// A single lesion case after the metadata/path merge.
#[derive(Debug, Clone)]
pub struct Record {
    pub image_id: String,
    pub class: LesionClass,
    /// Resolved image file; `None` when no file matched `image_id`.
    pub path: Option<PathBuf>,
    /// Age in years. Missing cells are imputed with the table mean, so this is
    /// only `None` when the whole column is empty.
    pub age: Option<f64>,
    /// Remaining columns, untouched.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Record {
    pub fn lesion_type(&self) -> &'static str {
        self.class.name()
    }
}

// ---------------------------------------------------------------------------
// ImageTensor – normalized CHW pixels
// ---------------------------------------------------------------------------

/// Image in CHW layout with every value in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> PrepResult<Self> {
        if data.len() != channels * height * width {
            return Err(PrepError::Shape(format!(
                "tensor data has {} values, shape {channels}x{height}x{width} needs {}",
                data.len(),
                channels * height * width
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    /// Divide by 255 and move channels first.
    pub fn from_rgb(img: &image::RgbImage) -> Self {
        let (w, h) = img.dimensions();
        let (width, height) = (w as usize, h as usize);
        let plane = width * height;
        let mut data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in img.enumerate_pixels() {
            let base = y as usize * width + x as usize;
            data[base] = pixel[0] as f32 / 255.0;
            data[plane + base] = pixel[1] as f32 / 255.0;
            data[2 * plane + base] = pixel[2] as f32 / 255.0;
        }
        Self {
            channels: 3,
            height,
            width,
            data,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, c: usize, y: usize, x: usize, v: f32) {
        self.data[(c * self.height + y) * self.width + x] = v;
    }
}

// ---------------------------------------------------------------------------
// LabeledDataset – index-aligned images and labels
// ---------------------------------------------------------------------------

/// Parallel image / label sequences. The two always have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledDataset {
    images: Vec<ImageTensor>,
    labels: Vec<LesionClass>,
}

impl LabeledDataset {
    pub fn new(images: Vec<ImageTensor>, labels: Vec<LesionClass>) -> PrepResult<Self> {
        if images.len() != labels.len() {
            return Err(PrepError::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        Ok(Self { images, labels })
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            images: Vec::with_capacity(n),
            labels: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, image: ImageTensor, label: LesionClass) {
        self.images.push(image);
        self.labels.push(label);
    }

    pub fn extend(&mut self, other: LabeledDataset) {
        self.images.extend(other.images);
        self.labels.extend(other.labels);
    }

    pub fn images(&self) -> &[ImageTensor] {
        &self.images
    }

    pub fn labels(&self) -> &[LesionClass] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Indices of samples carrying `class`.
    pub fn indices_of(&self, class: LesionClass) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect()
    }

    /// Histogram over the seven class indices.
    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0usize; NUM_CLASSES];
        for label in &self.labels {
            counts[label.index()] += 1;
        }
        counts
    }

    /// Reorder images and labels by the same permutation: position `i` of
    /// the result holds the sample previously at `order[i]`.
    pub fn permute(self, order: &[usize]) -> PrepResult<Self> {
        if order.len() != self.len() {
            return Err(PrepError::LengthMismatch {
                images: order.len(),
                labels: self.len(),
            });
        }
        let mut slots: Vec<Option<(ImageTensor, LesionClass)>> = self
            .images
            .into_iter()
            .zip(self.labels)
            .map(Some)
            .collect();
        let mut out = LabeledDataset::with_capacity(order.len());
        for &i in order {
            let (image, label) = slots
                .get_mut(i)
                .and_then(Option::take)
                .ok_or_else(|| {
                    PrepError::Permutation(format!("index {i} is out of range or repeated"))
                })?;
            out.push(image, label);
        }
        Ok(out)
    }
}
