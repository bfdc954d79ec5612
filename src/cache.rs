//! Tensor cache: the on-disk train/test bundles and the load-or-recompute
//! gate in front of the pipeline.
//!
//! Bundle layout (little-endian):
//! ```text
//! magic  b"LPT1"
//! u32    format version
//! u32    entry count
//! per entry:
//!   u32 key length, key bytes (UTF-8)
//!   u8  dtype (0 = f32, 1 = i64)
//!   u32 rank, rank × u64 dims
//!   payload (product(dims) elements)
//! ```
//! A bundle holds exactly the keys `X` (f32 `[N, C, H, W]`) and `y`
//! (i64 `[N]`).

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};

use crate::config::PipelineConfig;
use crate::data::model::{ImageTensor, LabeledDataset, LesionClass};
use crate::error::{PrepError, PrepResult};

const MAGIC: &[u8; 4] = b"LPT1";
pub const FORMAT_VERSION: u32 = 1;
pub const IMAGES_KEY: &str = "X";
pub const LABELS_KEY: &str = "y";

const DTYPE_F32: u8 = 0;
const DTYPE_I64: u8 = 1;

/// The two cached datasets.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedData {
    pub train: LabeledDataset,
    pub test: LabeledDataset,
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write `ds` to `path`, replacing any existing file. Data goes to a sibling
/// temp file first and is renamed into place once complete.
pub fn save_bundle(path: &Path, ds: &LabeledDataset) -> PrepResult<()> {
    let (c, h, w) = ds.images().first().map(ImageTensor::shape).unwrap_or((0, 0, 0));
    if let Some(odd) = ds.images().iter().find(|t| t.shape() != (c, h, w)) {
        return Err(PrepError::Shape(format!(
            "cannot cache mixed image shapes {:?} and {:?}",
            (c, h, w),
            odd.shape()
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PrepError::io(parent, e))?;
    }
    let tmp = temp_path(path);
    write_bundle(&tmp, ds, [c, h, w]).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PrepError::io(&tmp, e)
    })?;
    fs::rename(&tmp, path).map_err(|e| PrepError::io(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_bundle(path: &Path, ds: &LabeledDataset, chw: [usize; 3]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let n = ds.len() as u64;

    out.write_all(MAGIC)?;
    out.write_all(&FORMAT_VERSION.to_le_bytes())?;
    out.write_all(&2u32.to_le_bytes())?;

    write_entry_header(
        &mut out,
        IMAGES_KEY,
        DTYPE_F32,
        &[n, chw[0] as u64, chw[1] as u64, chw[2] as u64],
    )?;
    for image in ds.images() {
        for v in image.data() {
            out.write_all(&v.to_le_bytes())?;
        }
    }

    write_entry_header(&mut out, LABELS_KEY, DTYPE_I64, &[n])?;
    for label in ds.labels() {
        out.write_all(&(label.index() as i64).to_le_bytes())?;
    }

    out.flush()?;
    out.into_inner().map_err(|e| e.into_error())?.sync_all()
}

fn write_entry_header(out: &mut impl Write, key: &str, dtype: u8, dims: &[u64]) -> std::io::Result<()> {
    out.write_all(&(key.len() as u32).to_le_bytes())?;
    out.write_all(key.as_bytes())?;
    out.write_all(&[dtype])?;
    out.write_all(&(dims.len() as u32).to_le_bytes())?;
    for d in dims {
        out.write_all(&d.to_le_bytes())?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Sequential reader over a bundle file. Tracks the byte offset so every
/// error can say where the file went wrong.
struct BundleReader<'a> {
    inner: BufReader<File>,
    path: &'a Path,
    pos: u64,
    len: u64,
}

impl<'a> BundleReader<'a> {
    fn open(path: &'a Path) -> PrepResult<Self> {
        let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
        let len = file.metadata().map_err(|e| PrepError::io(path, e))?.len();
        Ok(Self {
            inner: BufReader::new(file),
            path,
            pos: 0,
            len,
        })
    }

    fn bad(&self, msg: impl Into<String>) -> PrepError {
        PrepError::cache(self.path, msg)
    }

    /// Fail before allocating for a payload the file cannot hold.
    fn expect_remaining(&self, bytes: u64) -> PrepResult<()> {
        if bytes > self.len.saturating_sub(self.pos) {
            return Err(self.bad(format!(
                "truncated at byte {}: {bytes} more byte(s) declared, file has {}",
                self.pos, self.len
            )));
        }
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8]) -> PrepResult<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => self.bad(format!("truncated at byte {}", self.pos)),
            _ => PrepError::io(self.path, e),
        })?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn array<const N: usize>(&mut self) -> PrepResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn u8(&mut self) -> PrepResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> PrepResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> PrepResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn at_end(&mut self) -> PrepResult<bool> {
        let rest = self.inner.fill_buf().map_err(|e| PrepError::io(self.path, e))?;
        Ok(rest.is_empty())
    }
}

struct EntryHeader {
    key: String,
    dtype: u8,
    dims: Vec<u64>,
}

fn read_entry_header(r: &mut BundleReader<'_>) -> PrepResult<EntryHeader> {
    let key_len = u64::from(r.u32()?);
    r.expect_remaining(key_len)?;
    let mut key = vec![0u8; key_len as usize];
    r.fill(&mut key)?;
    let key = String::from_utf8(key).map_err(|_| r.bad("entry key is not UTF-8"))?;
    let dtype = r.u8()?;
    let rank = u64::from(r.u32()?);
    r.expect_remaining(rank.saturating_mul(8))?;
    let dims = (0..rank).map(|_| r.u64()).collect::<PrepResult<Vec<_>>>()?;
    Ok(EntryHeader { key, dtype, dims })
}

/// Byte size of a payload, or an error if it cannot fit in the file.
fn payload_len(r: &BundleReader<'_>, header: &EntryHeader, elem_size: u64) -> PrepResult<u64> {
    let bytes = header
        .dims
        .iter()
        .try_fold(elem_size, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            r.bad(format!("entry {}: shape {:?} overflows", header.key, header.dims))
        })?;
    r.expect_remaining(bytes)?;
    Ok(bytes)
}

fn read_images(r: &mut BundleReader<'_>, header: &EntryHeader) -> PrepResult<Vec<ImageTensor>> {
    if header.dtype != DTYPE_F32 || header.dims.len() != 4 {
        return Err(r.bad(format!("{IMAGES_KEY} must be f32 [N, C, H, W]")));
    }
    payload_len(r, header, 4)?;
    let n = header.dims[0] as usize;
    let (c, h, w) = (
        header.dims[1] as usize,
        header.dims[2] as usize,
        header.dims[3] as usize,
    );
    let per_image = c * h * w;
    if per_image == 0 && n > 0 {
        return Err(r.bad(format!("{n} image(s) of zero size")));
    }

    // one image of raw bytes at a time; each tensor owns its own values
    let mut scratch = vec![0u8; per_image * 4];
    let mut tensors = Vec::with_capacity(n);
    for _ in 0..n {
        r.fill(&mut scratch)?;
        let values = scratch
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        tensors.push(ImageTensor::new(c, h, w, values)?);
    }
    Ok(tensors)
}

fn read_labels(r: &mut BundleReader<'_>, header: &EntryHeader) -> PrepResult<Vec<LesionClass>> {
    if header.dtype != DTYPE_I64 || header.dims.len() != 1 {
        return Err(r.bad(format!("{LABELS_KEY} must be i64 [N]")));
    }
    payload_len(r, header, 8)?;
    let n = header.dims[0] as usize;
    let mut classes = Vec::with_capacity(n);
    for i in 0..n {
        let v = i64::from_le_bytes(r.array()?);
        let class = usize::try_from(v)
            .ok()
            .and_then(LesionClass::from_index)
            .ok_or_else(|| r.bad(format!("label {i} is {v}, outside 0..=6")))?;
        classes.push(class);
    }
    Ok(classes)
}

/// Read a bundle written by [`save_bundle`]. The file is streamed, so peak
/// memory is the decoded dataset plus one image. Any structural problem is a
/// [`PrepError::Cache`] naming `path`.
pub fn load_bundle(path: &Path) -> PrepResult<LabeledDataset> {
    let mut r = BundleReader::open(path)?;

    if &r.array::<4>()? != MAGIC {
        return Err(r.bad("bad magic"));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(r.bad(format!(
            "format version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let count = r.u32()?;
    let mut images = None;
    let mut labels = None;
    for _ in 0..count {
        let header = read_entry_header(&mut r)?;
        match header.key.as_str() {
            IMAGES_KEY if images.is_none() => images = Some(read_images(&mut r, &header)?),
            LABELS_KEY if labels.is_none() => labels = Some(read_labels(&mut r, &header)?),
            IMAGES_KEY | LABELS_KEY => {
                return Err(r.bad(format!("duplicate entry {}", header.key)));
            }
            other => return Err(r.bad(format!("unexpected entry {other:?}"))),
        }
    }
    if !r.at_end()? {
        return Err(r.bad(format!("trailing bytes after byte {}", r.pos)));
    }

    let (Some(images), Some(labels)) = (images, labels) else {
        return Err(r.bad(format!(
            "expected entries {IMAGES_KEY} and {LABELS_KEY}"
        )));
    };
    LabeledDataset::new(images, labels).map_err(|e| r.bad(e.to_string()))
}

// ---------------------------------------------------------------------------
// Cache gate
// ---------------------------------------------------------------------------

/// Load both artifacts if both exist. `Ok(None)` means the pipeline has to
/// run. An unreadable artifact is an error naming its path, unless
/// `recompute_on_corrupt_cache` is set, in which case it counts as a miss.
pub fn check_cache(cfg: &PipelineConfig) -> PrepResult<Option<ProcessedData>> {
    let train_path = cfg.train_artifact();
    let test_path = cfg.test_artifact();
    if !(train_path.is_file() && test_path.is_file()) {
        info!("no cached tensors under {}", cfg.processed_dir.display());
        return Ok(None);
    }

    let t0 = Instant::now();
    let loaded = load_bundle(&train_path).and_then(|train| {
        let test = load_bundle(&test_path)?;
        Ok(ProcessedData { train, test })
    });
    match loaded {
        Ok(data) => {
            info!(
                "loaded cached tensors in {} ms: train={} test={}",
                t0.elapsed().as_millis(),
                data.train.len(),
                data.test.len()
            );
            Ok(Some(data))
        }
        Err(e) if cfg.recompute_on_corrupt_cache => {
            warn!("{e}; recomputing");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Persist both bundles. The old train bundle is removed up front and
/// written last, so the gate only ever sees both files from the same run.
pub fn store(cfg: &PipelineConfig, data: &ProcessedData) -> PrepResult<()> {
    let train_path = cfg.train_artifact();
    match fs::remove_file(&train_path) {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(PrepError::io(&train_path, e)),
        _ => {}
    }
    save_bundle(&cfg.test_artifact(), &data.test)?;
    save_bundle(&train_path, &data.train)?;
    info!(
        "wrote {} and {}",
        train_path.display(),
        cfg.test_artifact().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> LabeledDataset {
        let mut ds = LabeledDataset::default();
        let classes = [LesionClass::Nv, LesionClass::Df, LesionClass::Mel];
        for (i, class) in classes.into_iter().enumerate() {
            let values = (0..12).map(|j| (i * 12 + j) as f32 / 37.0).collect();
            ds.push(ImageTensor::new(3, 2, 2, values).unwrap(), class);
        }
        ds
    }

    #[test]
    fn round_trip_is_exact() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/train_tensors.bin");
        let ds = sample_dataset();
        save_bundle(&path, &ds).unwrap();
        assert!(!temp_path(&path).exists());
        assert_eq!(load_bundle(&path).unwrap(), ds);
    }

    #[test]
    fn empty_dataset_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.bin");
        save_bundle(&path, &LabeledDataset::default()).unwrap();
        assert!(load_bundle(&path).unwrap().is_empty());
    }

    #[test]
    fn truncated_file_is_rejected_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("train_tensors.bin");
        save_bundle(&path, &sample_dataset()).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        let err = load_bundle(&path).unwrap_err();
        assert!(matches!(err, PrepError::Cache { .. }));
        assert!(err.to_string().contains("train_tensors.bin"));
    }

    #[test]
    fn bad_magic_and_bad_label_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.bin");
        fs::write(&path, b"NOPE\x01\x00\x00\x00").unwrap();
        assert!(load_bundle(&path).unwrap_err().to_string().contains("bad magic"));

        save_bundle(&path, &sample_dataset()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 8..].copy_from_slice(&9i64.to_le_bytes());
        fs::write(&path, bytes).unwrap();
        assert!(load_bundle(&path).unwrap_err().to_string().contains("outside 0..=6"));
    }

    fn bundle_header(entries: u32) -> Vec<u8> {
        let mut buf = MAGIC.to_vec();
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());
        buf
    }

    #[test]
    fn entries_load_in_either_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("reordered.bin");
        let mut buf = bundle_header(2);
        write_entry_header(&mut buf, LABELS_KEY, DTYPE_I64, &[2]).unwrap();
        buf.extend_from_slice(&5i64.to_le_bytes());
        buf.extend_from_slice(&0i64.to_le_bytes());
        write_entry_header(&mut buf, IMAGES_KEY, DTYPE_F32, &[2, 1, 1, 2]).unwrap();
        for v in [0.25f32, 0.5, 0.75, 1.0] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        fs::write(&path, buf).unwrap();

        let ds = load_bundle(&path).unwrap();
        assert_eq!(ds.labels(), &[LesionClass::Vasc, LesionClass::Nv]);
        assert_eq!(ds.images()[0].data(), &[0.25, 0.5]);
        assert_eq!(ds.images()[1].data(), &[0.75, 1.0]);
    }

    #[test]
    fn oversized_shape_is_rejected_before_reading() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("huge.bin");
        let mut buf = bundle_header(2);
        write_entry_header(&mut buf, IMAGES_KEY, DTYPE_F32, &[1 << 20, 3, 224, 224]).unwrap();
        buf.extend_from_slice(&[0u8; 16]);
        fs::write(&path, buf).unwrap();

        let err = load_bundle(&path).unwrap_err();
        assert!(matches!(err, PrepError::Cache { .. }));
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("train_tensors.bin");
        save_bundle(&path, &sample_dataset()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.push(0);
        fs::write(&path, bytes).unwrap();
        assert!(load_bundle(&path).unwrap_err().to_string().contains("trailing"));
    }

    #[test]
    fn many_images_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("many.bin");
        let mut ds = LabeledDataset::default();
        for i in 0..40 {
            let values = (0..3 * 8 * 8).map(|j| ((i * 7 + j) % 256) as f32 / 255.0).collect();
            let class = LesionClass::from_index(i % 7).unwrap();
            ds.push(ImageTensor::new(3, 8, 8, values).unwrap(), class);
        }
        save_bundle(&path, &ds).unwrap();
        assert_eq!(load_bundle(&path).unwrap(), ds);
    }

    #[test]
    fn mixed_shapes_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ds = sample_dataset();
        ds.push(ImageTensor::zeros(3, 1, 1), LesionClass::Nv);
        let path = tmp.path().join("x.bin");
        assert!(matches!(save_bundle(&path, &ds), Err(PrepError::Shape(_))));
        assert!(!path.exists());
    }

    #[test]
    fn gate_misses_until_both_files_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig {
            processed_dir: tmp.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        assert!(check_cache(&cfg).unwrap().is_none());

        save_bundle(&cfg.train_artifact(), &sample_dataset()).unwrap();
        assert!(check_cache(&cfg).unwrap().is_none());

        let data = ProcessedData {
            train: sample_dataset(),
            test: LabeledDataset::default(),
        };
        store(&cfg, &data).unwrap();
        assert_eq!(check_cache(&cfg).unwrap(), Some(data));
    }

    #[test]
    fn store_stops_when_old_train_bundle_cannot_be_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig {
            processed_dir: tmp.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        // a directory squatting on the artifact path cannot be unlinked
        fs::create_dir_all(cfg.train_artifact().join("inner")).unwrap();
        let data = ProcessedData {
            train: sample_dataset(),
            test: sample_dataset(),
        };
        match store(&cfg, &data).unwrap_err() {
            PrepError::Io { path, .. } => assert_eq!(path, cfg.train_artifact()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!cfg.test_artifact().exists());
    }

    #[test]
    fn corrupt_cache_is_fatal_unless_recompute_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = PipelineConfig {
            processed_dir: tmp.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        fs::write(cfg.train_artifact(), b"garbage").unwrap();
        fs::write(cfg.test_artifact(), b"garbage").unwrap();
        let err = check_cache(&cfg).unwrap_err();
        assert!(err.to_string().contains("train_tensors.bin"));

        cfg.recompute_on_corrupt_cache = true;
        assert!(check_cache(&cfg).unwrap().is_none());
    }
}
