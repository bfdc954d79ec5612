//! Seeded stratified train/test split.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::data::model::{ImageTensor, LabeledDataset, LesionClass, NUM_CLASSES};
use crate::error::{PrepError, PrepResult};

/// Slack for products like `n * 0.2` landing a hair off an integer.
const EPS: f64 = 1e-9;

/// Positions into the full sample list assigned to each partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partition `labels` so that each class keeps roughly its share in both
/// halves.
///
/// The test half holds `ceil(n * test_fraction)` samples. Every class first
/// receives `floor(n_c * test_fraction)` test slots; leftover slots go to the
/// classes with the largest fractional remainder (lower class index on ties).
/// Same seed and labels give the same assignment.
pub fn stratified_split(labels: &[LesionClass], test_fraction: f64, seed: u64) -> SplitIndices {
    let n = labels.len();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); NUM_CLASSES];
    for (i, label) in labels.iter().enumerate() {
        by_class[label.index()].push(i);
    }

    let n_test = ((n as f64 * test_fraction - EPS).ceil().max(0.0) as usize).min(n);
    let exact: Vec<f64> = by_class
        .iter()
        .map(|idx| idx.len() as f64 * test_fraction)
        .collect();
    let mut quota: Vec<usize> = exact.iter().map(|e| (e + EPS).floor() as usize).collect();

    let mut order: Vec<usize> = (0..NUM_CLASSES).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - quota[a] as f64;
        let rb = exact[b] - quota[b] as f64;
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    let mut remaining = n_test.saturating_sub(quota.iter().sum());
    for &c in order.iter().cycle().take(NUM_CLASSES * 2) {
        if remaining == 0 {
            break;
        }
        if quota[c] < by_class[c].len() {
            quota[c] += 1;
            remaining -= 1;
        }
    }

    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (c, mut idx) in by_class.into_iter().enumerate() {
        idx.shuffle(&mut rng);
        let (t, rest) = idx.split_at(quota[c]);
        test.extend_from_slice(t);
        train.extend_from_slice(rest);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    SplitIndices { train, test }
}

impl SplitIndices {
    /// Move `images` / `labels` into the two partitions.
    pub fn apply(
        &self,
        images: Vec<ImageTensor>,
        labels: Vec<LesionClass>,
    ) -> PrepResult<(LabeledDataset, LabeledDataset)> {
        if images.len() != labels.len() {
            return Err(PrepError::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        let mut slots: Vec<Option<ImageTensor>> = images.into_iter().map(Some).collect();
        let mut take = |indices: &[usize]| -> PrepResult<LabeledDataset> {
            let mut out = LabeledDataset::with_capacity(indices.len());
            for &i in indices {
                let image = slots
                    .get_mut(i)
                    .and_then(Option::take)
                    .ok_or_else(|| {
                        PrepError::Permutation(format!("split index {i} out of range or reused"))
                    })?;
                out.push(image, labels[i]);
            }
            Ok(out)
        };
        let train = take(&self.train)?;
        let test = take(&self.test)?;
        Ok((train, test))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(counts: &[(LesionClass, usize)]) -> Vec<LesionClass> {
        counts
            .iter()
            .flat_map(|&(c, n)| std::iter::repeat(c).take(n))
            .collect()
    }

    #[test]
    fn same_seed_same_assignment() {
        let y = labels(&[(LesionClass::Nv, 70), (LesionClass::Mel, 20), (LesionClass::Df, 10)]);
        let a = stratified_split(&y, 0.2, 42);
        let b = stratified_split(&y, 0.2, 42);
        assert_eq!(a, b);
        let c = stratified_split(&y, 0.2, 7);
        assert_ne!(a, c);
    }

    #[test]
    fn partitions_cover_every_index_once() {
        let y = labels(&[(LesionClass::Nv, 33), (LesionClass::Bkl, 9), (LesionClass::Vasc, 4)]);
        let s = stratified_split(&y, 0.2, 42);
        let mut all: Vec<usize> = s.train.iter().chain(&s.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..y.len()).collect::<Vec<_>>());
        assert_eq!(s.test.len(), 10); // ceil(46 * 0.2)
    }

    #[test]
    fn class_proportions_preserved() {
        let y = labels(&[(LesionClass::Nv, 80), (LesionClass::Mel, 15), (LesionClass::Akiec, 5)]);
        let s = stratified_split(&y, 0.2, 42);
        fn count(y: &[LesionClass], idx: &[usize], c: LesionClass) -> usize {
            idx.iter().filter(|&&i| y[i] == c).count()
        }
        assert_eq!(count(&y, &s.test, LesionClass::Nv), 16);
        assert_eq!(count(&y, &s.test, LesionClass::Mel), 3);
        assert_eq!(count(&y, &s.test, LesionClass::Akiec), 1);
        assert_eq!(count(&y, &s.train, LesionClass::Mel), 12);
    }

    #[test]
    fn apply_keeps_labels_with_images() {
        let y = labels(&[(LesionClass::Nv, 6), (LesionClass::Mel, 4)]);
        let images: Vec<ImageTensor> = (0..y.len())
            .map(|i| ImageTensor::new(1, 1, 1, vec![i as f32]).unwrap())
            .collect();
        let s = stratified_split(&y, 0.2, 42);
        let (train, test) = s.apply(images, y.clone()).unwrap();
        assert_eq!(train.len() + test.len(), 10);
        for ds in [&train, &test] {
            for (img, label) in ds.images().iter().zip(ds.labels()) {
                let original = img.data()[0] as usize;
                assert_eq!(y[original], *label);
            }
        }
    }
}
