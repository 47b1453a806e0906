use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;

/// Relative sizes of the train/val/test partitions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatio {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatio {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.2,
            test: 0.0,
        }
    }
}

impl SplitRatio {
    pub fn new(train: f64, val: f64, test: f64) -> Self {
        Self { train, val, test }
    }

    pub fn sum(&self) -> f64 {
        self.train.max(0.0) + self.val.max(0.0) + self.test.max(0.0)
    }

    /// Ratios scaled to sum to one. Logs a warning when scaling was needed.
    pub fn normalized(&self) -> Self {
        let clamped = Self::new(self.train.max(0.0), self.val.max(0.0), self.test.max(0.0));
        let total = clamped.sum();
        if total <= 0.0 || (total - 1.0).abs() <= 0.001 {
            return clamped;
        }
        warn!("Split ratios sum to {total:.3}, not 1.0; normalizing");
        Self::new(
            clamped.train / total,
            clamped.val / total,
            clamped.test / total,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subset {
    Train,
    Val,
    Test,
}

impl Subset {
    pub fn name(&self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Val => "val",
            Subset::Test => "test",
        }
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Shuffle `items` and slice them into contiguous train/val/test partitions.
///
/// Partition sizes are floored; the remainder goes to the test partition when its ratio is
/// positive, otherwise to the last partition with a positive ratio. Empty partitions are
/// omitted from the result, which is ordered train, val, test.
pub fn partition<T>(mut items: Vec<T>, ratio: SplitRatio, seed: Option<u64>) -> Vec<(Subset, Vec<T>)> {
    let ratio = ratio.normalized();
    if ratio.sum() <= 0.0 {
        warn!("All split ratios are zero; keeping every item in the train partition");
        return if items.is_empty() {
            Vec::new()
        } else {
            vec![(Subset::Train, items)]
        };
    }

    let mut rng = make_rng(seed);
    items.shuffle(&mut rng);

    let total = items.len();
    let mut train_len = (total as f64 * ratio.train).floor() as usize;
    let mut val_len = (total as f64 * ratio.val).floor() as usize;
    let remainder = total - (train_len + val_len).min(total);
    if ratio.test <= 0.0 {
        if ratio.val > 0.0 {
            val_len += remainder;
        } else {
            train_len += remainder;
        }
    }
    let train_len = train_len.min(total);
    let val_len = val_len.min(total - train_len);

    let test: Vec<T> = items.split_off(train_len + val_len);
    let val: Vec<T> = items.split_off(train_len);
    let train = items;

    let subsets: Vec<(Subset, Vec<T>)> = [(Subset::Train, train), (Subset::Val, val), (Subset::Test, test)]
        .into_iter()
        .filter(|(_, part)| !part.is_empty())
        .collect();

    info!(
        "Split {} items into {}",
        total,
        subsets
            .iter()
            .map(|(subset, part)| format!("{}:{}", subset.name(), part.len()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    subsets
}

/// Partition a dataset's images, yielding one sub-dataset per non-empty subset.
pub fn split_dataset(dataset: &Dataset, ratio: SplitRatio, seed: Option<u64>) -> Vec<(Subset, Dataset)> {
    partition(dataset.images.clone(), ratio, seed)
        .into_iter()
        .map(|(subset, images)| {
            let name = format!("{}_{}", dataset.name, subset.name());
            (subset, dataset.with_images(name, images))
        })
        .collect()
}
