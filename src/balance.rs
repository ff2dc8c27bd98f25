//! Class balancing with SMOTE (synthetic minority oversampling)

use crate::config::BalanceConfig;
use crate::error::ChurnError;
use linfa_nn::{distance::L2Dist, CommonNearestNeighbour, NearestNeighbour};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Balanced training data: original rows first, synthetic rows appended
#[derive(Debug, Clone)]
pub struct BalancedSet {
    pub records: Array2<f64>,
    pub labels: Array1<usize>,
    /// Number of synthetic rows appended after the originals
    pub synthetic: usize,
}

impl BalancedSet {
    /// Row count per label, indexed by label value
    pub fn class_counts(&self) -> [usize; 2] {
        class_counts(&self.labels)
    }
}

fn class_counts(labels: &Array1<usize>) -> [usize; 2] {
    let mut counts = [0usize; 2];
    for &label in labels.iter() {
        counts[label.min(1)] += 1;
    }
    counts
}

/// Oversample the minority class until both classes have equal counts
///
/// Each synthetic row is `x + gap * (neighbour - x)` for a random minority
/// sample `x`, one of its `k` nearest minority neighbours and `gap` drawn
/// uniformly from `[0, 1)`.
pub fn smote(
    records: &Array2<f64>,
    labels: &Array1<usize>,
    config: &BalanceConfig,
) -> crate::Result<BalancedSet> {
    if records.nrows() != labels.len() {
        return Err(ChurnError::SchemaMismatch(format!(
            "{} feature rows but {} labels",
            records.nrows(),
            labels.len()
        )));
    }
    if config.k_neighbors == 0 {
        return Err(ChurnError::InvalidConfig(
            "balance.k_neighbors must be at least 1".to_string(),
        ));
    }

    let counts = class_counts(labels);
    if counts[0] == 0 || counts[1] == 0 {
        return Err(ChurnError::SingleClass);
    }

    let (minority_label, minority_count, majority_count) = if counts[1] < counts[0] {
        (1, counts[1], counts[0])
    } else {
        (0, counts[0], counts[1])
    };
    let needed = majority_count - minority_count;

    if needed == 0 {
        debug!("classes already balanced; skipping SMOTE");
        return Ok(BalancedSet {
            records: records.clone(),
            labels: labels.clone(),
            synthetic: 0,
        });
    }

    if minority_count <= config.k_neighbors {
        return Err(ChurnError::InsufficientMinority {
            available: minority_count,
            k_neighbors: config.k_neighbors,
        });
    }

    let minority_idx: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|&(_, &l)| l == minority_label)
        .map(|(i, _)| i)
        .collect();
    let minority = records.select(Axis(0), &minority_idx);

    let index = CommonNearestNeighbour::KdTree
        .from_batch(&minority, L2Dist)
        .map_err(|e| ChurnError::NearestNeighbour(e.to_string()))?;

    // k nearest minority neighbours of every minority sample, self excluded
    let mut neighbours = Vec::with_capacity(minority.nrows());
    for (i, row) in minority.outer_iter().enumerate() {
        let found = index
            .k_nearest(row, config.k_neighbors + 1)
            .map_err(|e| ChurnError::NearestNeighbour(e.to_string()))?;
        let ids: Vec<usize> = found
            .into_iter()
            .map(|(_, j)| j)
            .filter(|&j| j != i)
            .take(config.k_neighbors)
            .collect();
        neighbours.push(ids);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let width = records.ncols();
    let mut synthetic = Array2::<f64>::zeros((needed, width));

    for mut out in synthetic.outer_iter_mut() {
        let base = rng.gen_range(0..minority.nrows());
        let candidates = &neighbours[base];
        let origin = minority.row(base);
        if candidates.is_empty() {
            out.assign(&origin);
            continue;
        }
        let neighbour = minority.row(candidates[rng.gen_range(0..candidates.len())]);
        let gap: f64 = rng.gen();
        for c in 0..width {
            out[c] = origin[c] + gap * (neighbour[c] - origin[c]);
        }
    }

    let records = ndarray::concatenate(Axis(0), &[records.view(), synthetic.view()])?;
    let labels = labels
        .iter()
        .copied()
        .chain(std::iter::repeat(minority_label).take(needed))
        .collect::<Array1<usize>>();

    info!(
        minority_label,
        minority_count, majority_count, synthetic = needed, "SMOTE balanced training data"
    );

    Ok(BalancedSet {
        records,
        labels,
        synthetic: needed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imbalanced(n_major: usize, n_minor: usize) -> (Array2<f64>, Array1<usize>) {
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n_major {
            data.extend_from_slice(&[i as f64, 10.0 + (i % 3) as f64]);
            labels.push(0);
        }
        for i in 0..n_minor {
            data.extend_from_slice(&[100.0 + i as f64, -(i as f64)]);
            labels.push(1);
        }
        (
            Array2::from_shape_vec((n_major + n_minor, 2), data).unwrap(),
            Array1::from_vec(labels),
        )
    }

    #[test]
    fn test_smote_balances_counts() {
        let (x, y) = imbalanced(40, 10);
        let balanced = smote(&x, &y, &BalanceConfig::default()).unwrap();

        let [neg, pos] = balanced.class_counts();
        assert_eq!(neg, 40);
        assert_eq!(pos, 40);
        assert_eq!(balanced.synthetic, 30);
        assert_eq!(balanced.records.nrows(), 80);
        let total = (neg + pos) as f64;
        assert!((neg as f64 - pos as f64).abs() / total <= 0.05);
    }

    #[test]
    fn test_synthetic_rows_lie_within_minority_hull() {
        let (x, y) = imbalanced(30, 8);
        let balanced = smote(&x, &y, &BalanceConfig::default()).unwrap();

        for row in balanced.records.outer_iter().skip(38) {
            assert!(row[0] >= 100.0 && row[0] <= 107.0, "x = {}", row[0]);
            assert!(row[1] <= 0.0 && row[1] >= -7.0, "y = {}", row[1]);
        }
        // originals are untouched and come first
        assert_eq!(balanced.records.row(0), x.row(0));
        assert_eq!(balanced.records.row(37), x.row(37));
    }

    #[test]
    fn test_smote_is_deterministic_for_seed() {
        let (x, y) = imbalanced(25, 7);
        let a = smote(&x, &y, &BalanceConfig::default()).unwrap();
        let b = smote(&x, &y, &BalanceConfig::default()).unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_insufficient_minority() {
        let (x, y) = imbalanced(20, 5);
        match smote(&x, &y, &BalanceConfig::default()) {
            Err(ChurnError::InsufficientMinority {
                available,
                k_neighbors,
            }) => {
                assert_eq!(available, 5);
                assert_eq!(k_neighbors, 5);
            }
            other => panic!("expected InsufficientMinority, got {:?}", other),
        }
    }

    #[test]
    fn test_single_class() {
        let (x, y) = imbalanced(10, 0);
        assert!(matches!(
            smote(&x, &y, &BalanceConfig::default()),
            Err(ChurnError::SingleClass)
        ));
    }

    #[test]
    fn test_already_balanced() {
        let (x, y) = imbalanced(6, 6);
        let balanced = smote(&x, &y, &BalanceConfig::default()).unwrap();
        assert_eq!(balanced.synthetic, 0);
        assert_eq!(balanced.records, x);
    }
}
