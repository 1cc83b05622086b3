//! Dataset scheduling: splits, conformation strategies and batch plans.
//!
//! The scheduler fixes the train/val/test partition at construction and
//! emits a deterministic batch plan per epoch. Determinism is by seeding:
//! given the same datasets, configuration and epoch index, two schedulers
//! produce identical plans. Datasets listed as pure are assigned wholesale
//! to their split; everything else is ratio-split independently per dataset
//! so small datasets stay represented in every split.

use std::sync::mpsc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use graff_core::config::{ConfStrategy, DataConfig};
use graff_core::error::{GraffError, Result};

use crate::dataset::Dataset;

/// Which partition an epoch plan draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    Train,
    Val,
    Test,
}

/// One molecule's slot in a batch: dataset index, record index and the
/// conformations to use.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub dataset: usize,
    pub record: usize,
    pub conformations: Vec<usize>,
}

/// A batch of molecules.
#[derive(Debug, Clone)]
pub struct Batch {
    pub items: Vec<BatchItem>,
}

/// The fixed three-way partition, as `(dataset, record)` pairs.
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub train: Vec<(usize, usize)>,
    pub val: Vec<(usize, usize)>,
    pub test: Vec<(usize, usize)>,
}

/// Owns the datasets and the partition, and plans epochs.
#[derive(Debug)]
pub struct DatasetScheduler {
    datasets: Vec<Dataset>,
    split: Split,
    config: DataConfig,
}

impl DatasetScheduler {
    /// Partition `datasets` according to `config`. Every dataset must be
    /// named in exactly one of the configuration's lists.
    pub fn new(datasets: Vec<Dataset>, config: DataConfig) -> Result<Self> {
        let mut split = Split::default();
        for (d, dataset) in datasets.iter().enumerate() {
            let name = dataset.name();
            let pure_train = config.pure_train_datasets.iter().any(|n| n == name);
            let pure_val = config.pure_val_datasets.iter().any(|n| n == name);
            let pure_test = config.pure_test_datasets.iter().any(|n| n == name);
            let ratio = config.datasets.iter().any(|n| n == name);
            let assignments =
                [pure_train, pure_val, pure_test, ratio].iter().filter(|&&a| a).count();
            if assignments == 0 {
                return Err(GraffError::Config(format!(
                    "dataset '{name}' is not assigned to any split"
                )));
            }
            if assignments > 1 {
                return Err(GraffError::Config(format!(
                    "dataset '{name}' has conflicting split assignments"
                )));
            }

            let all: Vec<(usize, usize)> = (0..dataset.n_molecules()).map(|r| (d, r)).collect();
            if pure_train {
                split.train.extend(all);
            } else if pure_val {
                split.val.extend(all);
            } else if pure_test {
                split.test.extend(all);
            } else {
                let mut shuffled = all;
                let mut rng =
                    ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(stable_hash(name)));
                shuffled.shuffle(&mut rng);
                let n = shuffled.len();
                let n_val = (n as f64 * config.partition[1]).round() as usize;
                let n_test = (n as f64 * config.partition[2]).round() as usize;
                let n_val = n_val.min(n);
                let n_test = n_test.min(n - n_val);
                split.val.extend(shuffled.drain(..n_val));
                split.test.extend(shuffled.drain(..n_test));
                split.train.extend(shuffled);
            }
        }
        Ok(Self {
            datasets,
            split,
            config,
        })
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    fn members(&self, kind: SplitKind) -> &[(usize, usize)] {
        match kind {
            SplitKind::Train => &self.split.train,
            SplitKind::Val => &self.split.val,
            SplitKind::Test => &self.split.test,
        }
    }

    /// The deterministic batch plan for one epoch. Training plans reshuffle
    /// per epoch; validation and test plans are identical every epoch.
    pub fn epoch_batches(&self, kind: SplitKind, epoch: usize) -> Vec<Batch> {
        let mut members = self.members(kind).to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(
            self.config
                .seed
                .wrapping_add(epoch as u64)
                .wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        let strategy = match kind {
            SplitKind::Train => {
                members.shuffle(&mut rng);
                self.config.conf_strategy
            }
            SplitKind::Val | SplitKind::Test => self.config.val_conf_strategy,
        };
        // Validation stays fixed across epochs so the early-stopping metric
        // is comparable.
        let mut conf_rng = match kind {
            SplitKind::Train => rng,
            _ => ChaCha8Rng::seed_from_u64(self.config.seed),
        };
        let batch_size = match kind {
            SplitKind::Train => self.config.batch_size,
            SplitKind::Val => self.config.val_batch_size,
            SplitKind::Test => self.config.test_batch_size,
        };

        members
            .chunks(batch_size)
            .map(|chunk| Batch {
                items: chunk
                    .iter()
                    .map(|&(d, r)| {
                        let record = self.datasets[d].record(r);
                        let target = match strategy {
                            ConfStrategy::Fixed(n) => Some(n),
                            ConfStrategy::Mean => Some(self.datasets[d].mean_conf_count()),
                            ConfStrategy::All => None,
                        };
                        let conformations = select_conformations(
                            record.n_conformations(),
                            target,
                            &mut conf_rng,
                        );
                        BatchItem {
                            dataset: d,
                            record: r,
                            conformations,
                        }
                    })
                    .collect(),
            })
            .collect()
    }

    /// Loader worker count for the given split.
    pub fn workers(&self, kind: SplitKind) -> usize {
        match kind {
            SplitKind::Train => self.config.train_loader_workers,
            SplitKind::Val => self.config.val_loader_workers,
            SplitKind::Test => self.config.test_loader_workers,
        }
    }
}

fn select_conformations(
    available: usize,
    target: Option<usize>,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    match target {
        None => (0..available).collect(),
        Some(n) if n >= available => {
            let mut idx: Vec<usize> = (0..available).collect();
            // top up with replacement when the molecule has too few
            for _ in available..n {
                idx.push(rng.gen_range(0..available));
            }
            idx
        }
        Some(n) => {
            let mut idx: Vec<usize> = (0..available).collect();
            idx.shuffle(rng);
            idx.truncate(n);
            idx
        }
    }
}

/// Stream batches through a bounded channel so batch preparation overlaps
/// with the training step. With zero workers the plan is consumed inline.
pub fn stream_batches(
    batches: Vec<Batch>,
    workers: usize,
) -> Box<dyn Iterator<Item = Batch> + Send> {
    if workers == 0 {
        return Box::new(batches.into_iter());
    }
    let (tx, rx) = mpsc::sync_channel(workers * 2);
    std::thread::spawn(move || {
        for batch in batches {
            if tx.send(batch).is_err() {
                break;
            }
        }
    });
    Box::new(rx.into_iter())
}

fn stable_hash(name: &str) -> u64 {
    // FNV-1a, so the per-dataset split seed does not depend on dataset order
    let mut hash = 0xCBF2_9CE4_8422_2325u64;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
    hash
}
