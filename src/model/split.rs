//! Seeded stratified train/test partitioning.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SplitError {
    #[error("Need at least 2 distinct tags to stratify, got {0}")]
    TooFewClasses(usize),
    #[error("The least populated tag has only {0} member; every tag needs at least 2")]
    ClassTooSmall(usize),
    #[error("A {partition} set of {size} examples cannot hold all {classes} tags")]
    PartitionTooSmall {
        partition: &'static str,
        size: usize,
        classes: usize,
    },
    #[error("Test fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),
}

/// Row indices of the two partitions, each in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partition `labels` (class indices `0..n_classes`) into train/test sets
/// that preserve per-class proportions.
///
/// The test set has `ceil(n * test_fraction)` rows. Each class receives the
/// floor of its proportional share and leftover rows go to the classes with
/// the largest fractional remainders (lowest class index first on ties).
/// Members of each class are shuffled with `seed` before allocation.
pub fn stratified_split(
    labels: &[usize],
    n_classes: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<Split, SplitError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(test_fraction));
    }

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (row, &label) in labels.iter().enumerate() {
        members[label].push(row);
    }
    let present = members.iter().filter(|m| !m.is_empty()).count();
    if present < 2 {
        return Err(SplitError::TooFewClasses(present));
    }
    if let Some(smallest) = members.iter().map(Vec::len).filter(|&c| c > 0).min() {
        if smallest < 2 {
            return Err(SplitError::ClassTooSmall(smallest));
        }
    }

    let n = labels.len();
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    let n_train = n - n_test;
    if n_test < present {
        return Err(SplitError::PartitionTooSmall {
            partition: "test",
            size: n_test,
            classes: present,
        });
    }
    if n_train < present {
        return Err(SplitError::PartitionTooSmall {
            partition: "train",
            size: n_train,
            classes: present,
        });
    }

    let counts: Vec<usize> = members.iter().map(Vec::len).collect();
    let test_counts = allocate(&counts, n_test);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (rows, &k) in members.iter_mut().zip(&test_counts) {
        rows.shuffle(&mut rng);
        test.extend_from_slice(&rows[..k]);
        train.extend_from_slice(&rows[k..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    log::debug!(
        "Stratified split: {} train / {} test over {} classes",
        train.len(),
        test.len(),
        present
    );

    Ok(Split { train, test })
}

/// Largest-remainder apportionment of `total` rows across `counts`.
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    let exact: Vec<f64> = counts
        .iter()
        .map(|&c| total as f64 * c as f64 / n as f64)
        .collect();
    let mut shares: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });

    let mut remaining = total.saturating_sub(shares.iter().sum());
    while remaining > 0 {
        let mut progressed = false;
        for &class in &order {
            if remaining == 0 {
                break;
            }
            // A class never gives up all of its members to the test set
            if shares[class] + 1 < counts[class] {
                shares[class] += 1;
                remaining -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    shares
}
