//! Activation transforms mapping raw model outputs to probability-like
//! scalars.
//!
//! Every transform is a total function: arbitrary real logits and any
//! probability in `[0, 1]` produce a finite (or saturated 0/1) result,
//! never a panic. Table-level dispatch goes through the closed
//! [`TransformKind`] enum so the compiler checks exhaustiveness — there
//! is no name-keyed lookup.

use serde::{Deserialize, Serialize};

/// Default winsorization limits: clip 5% of each tail.
pub const WINSORIZE_LIMITS: (f64, f64) = (0.05, 0.05);

/// Logistic sigmoid.
#[inline]
#[must_use]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse sigmoid. Saturates to the infinities at 0 and 1.
#[inline]
#[must_use]
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Sigmoid of each flag logit: P(modified).
#[must_use]
pub fn binary_logits_to_probas(logits: &[f64]) -> Vec<f64> {
    logits.iter().map(|&x| sigmoid(x)).collect()
}

/// Softmax each row across the class axis and sum the non-cover classes:
/// P(any modification) = 1 - P(cover).
#[must_use]
pub fn classifier_logits_to_probas(rows: &[Vec<f64>]) -> Vec<f64> {
    rows.iter()
        .map(|row| {
            let p = softmax(row);
            p.iter().skip(1).sum()
        })
        .collect()
}

/// Map embeddings to pseudo-probabilities by their angular distance from
/// the canonical cover anchor (one-hot at index 0):
/// `1 - cos_similarity(x, e0)^2`, monotonically increasing with
/// dissimilarity from "cover".
#[must_use]
pub fn embedding_to_probas(rows: &[Vec<f64>]) -> Vec<f64> {
    rows.iter()
        .map(|row| {
            let x0 = row.first().copied().unwrap_or(0.0);
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            // Anchor norm is 1; guard the denominator like torch does.
            let cos = x0 / norm.max(1e-8);
            1.0 - cos * cos
        })
        .collect()
}

/// Numerically stable softmax.
#[must_use]
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.iter().map(|&x| x / sum).collect()
}

/// Sharpen or flatten a probability without changing its rank order:
/// `sigmoid(logit(x) * t)`. Saturates to 0/1 at the interval endpoints.
#[must_use]
pub fn temperature_scale(x: f64, t: f64) -> f64 {
    sigmoid(logit(x) * t)
}

/// Clip each tail of the values to the given fractional limits.
///
/// Matches scipy's `mstats.winsorize`: the lowest `floor(n * low)` values
/// are raised to the smallest surviving value, symmetrically for the
/// upper tail.
#[must_use]
pub fn winsorize(values: &[f64], limits: (f64, f64)) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let lo_cut = (n as f64 * limits.0).floor() as usize;
    let hi_cut = (n as f64 * limits.1).floor() as usize;
    let lo = sorted[lo_cut.min(n - 1)];
    let hi = sorted[n - 1 - hi_cut.min(n - 1)];
    values.iter().map(|&v| v.clamp(lo, hi)).collect()
}

/// Fractional average ranks in `(0, 1]`.
///
/// Ties receive the mean of the ranks they span (scipy `rankdata`
/// behaviour), then ranks are divided by the sample count.
#[must_use]
pub fn rank_transform(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1 ..= j+1 averaged over the tie run.
        let avg = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks.iter().map(|r| r / n as f64).collect()
}

/// Closed set of scalar-array transforms used when reducing prediction
/// tables to submission labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Pass values through unchanged.
    Noop,
    /// Elementwise sigmoid.
    Sigmoid,
    /// Temperature scaling at the given temperature.
    TemperatureScale(f64),
    /// Tail clipping at [`WINSORIZE_LIMITS`].
    Winsorize,
    /// Fractional average ranks.
    Rank,
}

impl TransformKind {
    /// Apply the transform to a score array.
    #[must_use]
    pub fn apply(self, values: &[f64]) -> Vec<f64> {
        match self {
            Self::Noop => values.to_vec(),
            Self::Sigmoid => values.iter().map(|&v| sigmoid(v)).collect(),
            Self::TemperatureScale(t) => {
                values.iter().map(|&v| temperature_scale(v, t)).collect()
            }
            Self::Winsorize => winsorize(values, WINSORIZE_LIMITS),
            Self::Rank => rank_transform(values),
        }
    }
}
