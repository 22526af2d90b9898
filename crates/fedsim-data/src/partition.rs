// Partitioner — split a labeled collection into per-client shards
//
// Two modes:
//   IID     — uniform random shuffle, k equal contiguous blocks
//   Non-IID — sort by label, give each client a contiguous label range,
//             optionally blended with a uniform-random admixture
//
// Shard boundaries in non-IID mode are located with first/last-occurrence
// binary searches over the sorted label sequence; a label missing from the
// data yields an empty shard for that client rather than a failure.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use fedsim_core::{bail, Error, Result};

use crate::dataset::LabeledDataset;
use crate::shard::Shard;

/// How client shards are drawn from the training collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitMode {
    /// Every shard is a uniform random sample of the whole.
    Iid,
    /// Each shard is skewed to a disjoint label range; `iid_fraction` of
    /// the collection (in `[0, 1]`) is held aside and redistributed
    /// uniformly across all clients on top of the skew.
    NonIid { iid_fraction: f32 },
}

/// Immutable partitioning configuration.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Number of client shards to produce.
    pub num_clients: usize,
    /// IID or non-IID (optionally mixed) splitting.
    pub mode: SplitMode,
    /// Fraction of the collection carved out as a validation shard before
    /// client partitioning (0.0 disables it).
    pub validation_fraction: f32,
    /// Seed for every stochastic step, for reproducible partitions.
    pub seed: u64,
}

impl PartitionConfig {
    /// IID split across `num_clients` clients, no validation carve-out.
    pub fn iid(num_clients: usize) -> Self {
        Self {
            num_clients,
            mode: SplitMode::Iid,
            validation_fraction: 0.0,
            seed: 42,
        }
    }

    /// Non-IID split with no IID admixture.
    pub fn non_iid(num_clients: usize) -> Self {
        Self {
            num_clients,
            mode: SplitMode::NonIid { iid_fraction: 0.0 },
            validation_fraction: 0.0,
            seed: 42,
        }
    }

    pub fn mode(mut self, mode: SplitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validation_fraction(mut self, f: f32) -> Self {
        self.validation_fraction = f;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// The result of one partition call.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Exactly `num_clients` shards, all indexing the root collection.
    pub client_shards: Vec<Shard>,
    /// The validation shard, if a validation fraction was requested.
    pub validation: Option<Shard>,
}

/// Split `data` into per-client shards according to `config`.
pub fn partition(data: &LabeledDataset, config: &PartitionConfig) -> Result<Partition> {
    let k = config.num_clients;
    if k == 0 {
        bail!("num_clients must be > 0");
    }
    if !(0.0..=1.0).contains(&config.validation_fraction) {
        bail!(
            "validation_fraction {} outside [0, 1]",
            config.validation_fraction
        );
    }
    if let SplitMode::NonIid { iid_fraction } = config.mode {
        if !(0.0..=1.0).contains(&iid_fraction) {
            bail!("iid_fraction {} outside [0, 1]", iid_fraction);
        }
        if k > data.num_classes() {
            bail!(
                "{} clients exceed the {} available classes; every label range would be empty",
                k,
                data.num_classes()
            );
        }
    }

    let mut rng = StdRng::seed_from_u64(config.seed);

    // Carve the validation split first; everything downstream works on
    // root indices, never on positions within a previous subset.
    let mut indices: Vec<usize> = (0..data.len()).collect();
    indices.shuffle(&mut rng);
    let val_len = (config.validation_fraction * data.len() as f32).floor() as usize;
    let validation = if val_len > 0 {
        Some(Shard::new(indices[..val_len].to_vec()))
    } else {
        None
    };
    let train_indices = &indices[val_len..];

    let client_shards = match config.mode {
        SplitMode::Iid => iid_shards(train_indices, k, &mut rng),
        SplitMode::NonIid { iid_fraction } => {
            mixed_shards(data, train_indices, k, iid_fraction, &mut rng)
        }
    };

    Ok(Partition {
        client_shards,
        validation,
    })
}

/// Uniform split: shuffle, then k contiguous blocks of floor(n / k).
/// Remainder indices are dropped.
fn iid_shards(train_indices: &[usize], k: usize, rng: &mut StdRng) -> Vec<Shard> {
    let mut pool = train_indices.to_vec();
    pool.shuffle(rng);
    let block = pool.len() / k;
    (0..k)
        .map(|i| Shard::new(pool[i * block..(i + 1) * block].to_vec()))
        .collect()
}

/// Non-IID split, optionally blended with a uniform admixture.
fn mixed_shards(
    data: &LabeledDataset,
    train_indices: &[usize],
    k: usize,
    iid_fraction: f32,
    rng: &mut StdRng,
) -> Vec<Shard> {
    let mut pool = train_indices.to_vec();

    // Reserve the uniform admixture before the label-skewed split so the
    // two parts stay disjoint.
    let iid_len = (iid_fraction * pool.len() as f32).floor() as usize;
    let (iid_pool, skew_pool) = if iid_len > 0 {
        pool.shuffle(rng);
        let (a, b) = pool.split_at(iid_len);
        (a.to_vec(), b.to_vec())
    } else {
        (Vec::new(), pool)
    };

    let mut shards = non_iid_shards(data, &skew_pool, k, rng);

    if !iid_pool.is_empty() {
        // Even contiguous chunks of floor(len / k); remainder dropped.
        let chunk = iid_pool.len() / k;
        if chunk > 0 {
            for (i, shard) in shards.iter_mut().enumerate() {
                shard.extend(iid_pool[i * chunk..(i + 1) * chunk].iter().copied());
            }
        }
    }

    shards
}

/// Label-skewed split: sort the pool by label, then give client `i` the
/// contiguous label range `[i * c/k, (i + 1) * c/k)` (the last client
/// absorbs any remainder classes). The shard-to-client assignment order
/// is shuffled afterwards so client 0 is not always the lowest labels.
fn non_iid_shards(
    data: &LabeledDataset,
    pool: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Shard> {
    // Stable sort keeps equal labels in pool order.
    let mut by_label: Vec<usize> = pool.to_vec();
    by_label.sort_by_key(|&i| data.label(i));
    let sorted_labels: Vec<u32> = by_label.iter().map(|&i| data.label(i)).collect();

    let digits_per_client = data.num_classes() / k;

    let mut shards = Vec::with_capacity(k);
    for client in 0..k {
        let range_start = (client * digits_per_client) as u32;
        let range_end = range_start + digits_per_client as u32 - 1;

        let lo = first_index(&sorted_labels, range_start);
        let hi = if client == k - 1 {
            // Last client's boundary is forced to the end of the sequence
            // so remainder classes accrue to it.
            if sorted_labels.is_empty() {
                Err(Error::LabelNotFound { label: range_start })
            } else {
                Ok(sorted_labels.len() - 1)
            }
        } else {
            last_index(&sorted_labels, range_end)
        };

        match (lo, hi) {
            (Ok(lo), Ok(hi)) if lo <= hi => {
                shards.push(Shard::new(by_label[lo..=hi].to_vec()));
            }
            (lo, hi) => {
                // Degenerate input: the range has no samples. Surface it
                // and hand the client an empty shard.
                let missing = lo.err().or(hi.err());
                if let Some(Error::LabelNotFound { label }) = missing {
                    tracing::warn!(
                        client,
                        label,
                        "label range has no samples; client receives an empty shard"
                    );
                }
                shards.push(Shard::default());
            }
        }
    }

    shards.shuffle(rng);
    shards
}

/// Smallest index in the sorted sequence whose label equals `target`.
///
/// Iterative binary search; `LabelNotFound` if the label is absent.
fn first_index(labels: &[u32], target: u32) -> Result<usize> {
    let mut lo = 0isize;
    let mut hi = labels.len() as isize - 1;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let m = mid as usize;
        if labels[m] == target && (m == 0 || labels[m - 1] < target) {
            return Ok(m);
        } else if labels[m] < target {
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }
    Err(Error::LabelNotFound { label: target })
}

/// Largest index in the sorted sequence whose label equals `target`.
fn last_index(labels: &[u32], target: u32) -> Result<usize> {
    let mut lo = 0isize;
    let mut hi = labels.len() as isize - 1;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let m = mid as usize;
        if labels[m] == target && (m == labels.len() - 1 || labels[m + 1] > target) {
            return Ok(m);
        } else if labels[m] > target {
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
    }
    Err(Error::LabelNotFound { label: target })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_and_last_index_agree_with_a_scan() {
        let labels = vec![0, 0, 1, 1, 1, 3, 3, 7];
        for target in 0..9u32 {
            let scan_first = labels.iter().position(|&l| l == target);
            let scan_last = labels.iter().rposition(|&l| l == target);
            assert_eq!(first_index(&labels, target).ok(), scan_first, "first {target}");
            assert_eq!(last_index(&labels, target).ok(), scan_last, "last {target}");
        }
    }

    #[test]
    fn boundary_search_on_empty_sequence() {
        assert!(matches!(
            first_index(&[], 0),
            Err(Error::LabelNotFound { label: 0 })
        ));
        assert!(matches!(
            last_index(&[], 5),
            Err(Error::LabelNotFound { label: 5 })
        ));
    }

    #[test]
    fn iid_partition_is_exact_and_disjoint() {
        let ds = LabeledDataset::synthetic(103, 4, 10, 1);
        let part = partition(&ds, &PartitionConfig::iid(4)).unwrap();
        assert_eq!(part.client_shards.len(), 4);

        let mut seen: Vec<usize> = part
            .client_shards
            .iter()
            .flat_map(|s| s.indices().iter().copied())
            .collect();
        // 103 = 4 * 25 + 3 → three remainder indices dropped
        assert_eq!(seen.len(), 100);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 100);
        for shard in &part.client_shards {
            assert_eq!(shard.len(), 25);
        }
    }

    #[test]
    fn non_iid_labels_are_disjoint_ranges() {
        let ds = LabeledDataset::synthetic(400, 4, 10, 3);
        let part = partition(&ds, &PartitionConfig::non_iid(5)).unwrap();

        let mut all_label_sets = Vec::new();
        for shard in &part.client_shards {
            let mut labels: Vec<u32> = shard.indices().iter().map(|&i| ds.label(i)).collect();
            labels.sort_unstable();
            labels.dedup();
            assert_eq!(labels.len(), 2, "10 classes / 5 clients = 2 labels each");
            all_label_sets.push(labels);
        }
        // Disjoint across clients
        let mut flat: Vec<u32> = all_label_sets.into_iter().flatten().collect();
        flat.sort_unstable();
        flat.dedup();
        assert_eq!(flat.len(), 10);
    }

    #[test]
    fn non_iid_is_exhaustive() {
        let ds = LabeledDataset::synthetic(200, 4, 10, 4);
        let part = partition(&ds, &PartitionConfig::non_iid(2)).unwrap();
        let total: usize = part.client_shards.iter().map(|s| s.len()).sum();
        assert_eq!(total, 200);
    }

    #[test]
    fn remainder_classes_accrue_to_some_client() {
        // 10 classes across 3 clients: 3 + 3 + 4 label ranges
        let ds = LabeledDataset::synthetic(300, 4, 10, 5);
        let part = partition(&ds, &PartitionConfig::non_iid(3)).unwrap();
        let widths: Vec<usize> = part
            .client_shards
            .iter()
            .map(|shard| {
                let mut labels: Vec<u32> =
                    shard.indices().iter().map(|&i| ds.label(i)).collect();
                labels.sort_unstable();
                labels.dedup();
                labels.len()
            })
            .collect();
        let mut sorted = widths.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![3, 3, 4]);
    }

    #[test]
    fn missing_label_yields_empty_shard() {
        // 4 classes over 2 clients → ranges {0,1} and {2,3}. Class 2 is
        // absent, so the second range's start label cannot be located and
        // that client receives an empty shard; the first range is intact.
        let labels = vec![0, 0, 1, 1, 3, 3];
        let ds = LabeledDataset::new(vec![0.0; 6], 1, labels, 4).unwrap();
        let part = partition(&ds, &PartitionConfig::non_iid(2)).unwrap();
        let mut sizes: Vec<usize> = part.client_shards.iter().map(|s| s.len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![0, 4]);
    }

    #[test]
    fn validation_fraction_is_carved_first() {
        let ds = LabeledDataset::synthetic(100, 4, 10, 6);
        let cfg = PartitionConfig::iid(2).validation_fraction(0.2);
        let part = partition(&ds, &cfg).unwrap();
        let val = part.validation.expect("validation shard");
        assert_eq!(val.len(), 20);

        let train_total: usize = part.client_shards.iter().map(|s| s.len()).sum();
        assert_eq!(train_total, 80);

        // validation and client indices are disjoint
        for shard in &part.client_shards {
            for idx in shard.indices() {
                assert!(!val.indices().contains(idx));
            }
        }
    }

    #[test]
    fn mixed_mode_adds_uniform_admixture() {
        let ds = LabeledDataset::synthetic(500, 4, 10, 7);
        let cfg = PartitionConfig::non_iid(2).mode(SplitMode::NonIid { iid_fraction: 0.2 });
        let part = partition(&ds, &cfg).unwrap();

        // 100 indices reserved for the admixture → 50 appended per client;
        // each shard now spans more than its 5-label skew range.
        for shard in &part.client_shards {
            let mut labels: Vec<u32> = shard.indices().iter().map(|&i| ds.label(i)).collect();
            labels.sort_unstable();
            labels.dedup();
            assert!(labels.len() > 5, "admixture widens the label set");
        }

        // Still disjoint overall
        let mut all: Vec<usize> = part
            .client_shards
            .iter()
            .flat_map(|s| s.indices().iter().copied())
            .collect();
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n);
    }

    #[test]
    fn same_seed_same_partition() {
        let ds = LabeledDataset::synthetic(200, 4, 10, 8);
        let cfg = PartitionConfig::non_iid(5).seed(11);
        let a = partition(&ds, &cfg).unwrap();
        let b = partition(&ds, &cfg).unwrap();
        for (x, y) in a.client_shards.iter().zip(b.client_shards.iter()) {
            assert_eq!(x.indices(), y.indices());
        }
    }

    #[test]
    fn too_many_clients_rejected() {
        let ds = LabeledDataset::synthetic(50, 4, 3, 9);
        assert!(partition(&ds, &PartitionConfig::non_iid(5)).is_err());
    }
}
