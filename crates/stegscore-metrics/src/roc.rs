//! ROC curve computation.
//!
//! Reproduces scikit-learn's `roc_curve` exactly — the weighted metric in
//! [`crate::weighted`] is only bit-compatible with historically reported
//! scores if the underlying curve matches, including the collapse of tied
//! scores into one threshold, the removal of collinear interior points
//! (`drop_intermediate`), and the prepended `(0, 0)` origin.

use stegscore_core::StegScoreError;

/// Why a metric could not be computed from the given (label, score) pairs.
///
/// On the evaluation path these are coalesced to a `0.0` score by
/// [`crate::weighted::weighted_auc_or_zero`]; the pass never aborts
/// because one filtered subset happened to be degenerate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricError {
    /// Labels and scores have different lengths.
    #[error("labels ({labels}) and scores ({scores}) differ in length")]
    LengthMismatch {
        /// Number of labels.
        labels: usize,
        /// Number of scores.
        scores: usize,
    },

    /// No samples at all.
    #[error("empty input")]
    Empty,

    /// Only one class present; the ROC curve is undefined.
    #[error("single-class input: {positives} positives, {negatives} negatives")]
    SingleClass {
        /// Positive-sample count.
        positives: usize,
        /// Negative-sample count.
        negatives: usize,
    },

    /// A score was NaN.
    #[error("score at index {index} is NaN")]
    NanScore {
        /// Index of the offending score.
        index: usize,
    },
}

impl From<MetricError> for StegScoreError {
    fn from(err: MetricError) -> Self {
        StegScoreError::Metric(err.to_string())
    }
}

/// A receiver-operating-characteristic curve.
///
/// `fpr` is nondecreasing; `tpr` and `thresholds` are index-aligned with
/// it. The first point is always the `(0, 0)` origin with an infinite
/// threshold. Ephemeral: recomputed on every scorer invocation, never
/// cached (thresholds change with the data).
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    /// False-positive rates, ascending.
    pub fpr: Vec<f64>,
    /// True-positive rates, index-aligned with `fpr`.
    pub tpr: Vec<f64>,
    /// Decision thresholds, descending, index-aligned with `fpr`.
    pub thresholds: Vec<f64>,
}

/// Compute the ROC curve treating label `1` as positive.
///
/// Labels must already be binary; binarization of multiclass labels is
/// the reporting layer's responsibility.
///
/// # Errors
///
/// [`MetricError`] on empty input, length mismatch, NaN scores, or
/// single-class labels.
pub fn roc_curve(y_true: &[u8], y_score: &[f64]) -> Result<RocCurve, MetricError> {
    if y_true.len() != y_score.len() {
        return Err(MetricError::LengthMismatch {
            labels: y_true.len(),
            scores: y_score.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }
    if let Some(index) = y_score.iter().position(|s| s.is_nan()) {
        return Err(MetricError::NanScore { index });
    }

    // Stable sort by descending score.
    let mut order: Vec<usize> = (0..y_score.len()).collect();
    order.sort_by(|&a, &b| {
        y_score[b]
            .partial_cmp(&y_score[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Cumulative positive counts, one entry per distinct score value.
    let mut tps: Vec<usize> = Vec::new();
    let mut fps: Vec<usize> = Vec::new();
    let mut thresholds: Vec<f64> = Vec::new();
    let mut tp = 0usize;
    for (seen, &i) in order.iter().enumerate() {
        if y_true[i] > 0 {
            tp += 1;
        }
        let is_last = seen + 1 == order.len();
        if is_last || y_score[order[seen + 1]] != y_score[i] {
            tps.push(tp);
            fps.push(seen + 1 - tp);
            thresholds.push(y_score[i]);
        }
    }

    let total_pos = *tps.last().unwrap_or(&0);
    let total_neg = *fps.last().unwrap_or(&0);
    if total_pos == 0 || total_neg == 0 {
        return Err(MetricError::SingleClass {
            positives: total_pos,
            negatives: total_neg,
        });
    }

    // Drop suboptimal thresholds: interior points where neither count
    // changes slope are collinear and carry no information.
    if tps.len() > 2 {
        let keep: Vec<bool> = (0..tps.len())
            .map(|i| {
                i == 0
                    || i == tps.len() - 1
                    || second_difference(&fps, i)
                    || second_difference(&tps, i)
            })
            .collect();
        retain_by_mask(&mut tps, &keep);
        retain_by_mask(&mut fps, &keep);
        retain_by_mask(&mut thresholds, &keep);
    }

    let mut fpr = Vec::with_capacity(fps.len() + 1);
    let mut tpr = Vec::with_capacity(tps.len() + 1);
    let mut thr = Vec::with_capacity(thresholds.len() + 1);

    // Origin point so the curve starts at (0, 0).
    fpr.push(0.0);
    tpr.push(0.0);
    thr.push(f64::INFINITY);

    for i in 0..tps.len() {
        fpr.push(fps[i] as f64 / total_neg as f64);
        tpr.push(tps[i] as f64 / total_pos as f64);
        thr.push(thresholds[i]);
    }

    Ok(RocCurve {
        fpr,
        tpr,
        thresholds: thr,
    })
}

/// True when the increments of `values` change at interior index `i`.
fn second_difference(values: &[usize], i: usize) -> bool {
    let prev = values[i] as i64 - values[i - 1] as i64;
    let next = values[i + 1] as i64 - values[i] as i64;
    prev != next
}

fn retain_by_mask<T>(values: &mut Vec<T>, keep: &[bool]) {
    let mut idx = 0;
    values.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
}

/// Trapezoidal area under a curve given by aligned `x` / `y` sequences.
#[must_use]
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let mut area = 0.0;
    for i in 1..x.len() {
        area += (x[i] - x[i - 1]) * (y[i] + y[i - 1]) / 2.0;
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- roc_curve --------------------------------------------------------

    #[test]
    fn test_roc_curve_basic() {
        // labels 0,0,1,1 with ascending scores: classic perfect separation.
        let curve = roc_curve(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]).unwrap();
        // After collinear-drop and origin prepend: (0,0), (0,.5), (0,1), (1,1).
        assert_eq!(curve.fpr, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(curve.tpr, vec![0.0, 0.5, 1.0, 1.0]);
        assert_eq!(curve.thresholds[0], f64::INFINITY);
    }

    #[test]
    fn test_roc_curve_collapses_ties() {
        let curve = roc_curve(&[0, 1, 0, 1], &[0.5, 0.5, 0.5, 0.5]).unwrap();
        assert_eq!(curve.fpr, vec![0.0, 1.0]);
        assert_eq!(curve.tpr, vec![0.0, 1.0]);
    }

    #[test]
    fn test_roc_curve_drops_collinear_interior_points() {
        // Five positives in a row produce a vertical segment; only its
        // endpoints survive (plus the origin and the final point).
        let labels = [1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
        let scores = [0.9, 0.8, 0.7, 0.6, 0.55, 0.4, 0.3, 0.2, 0.1, 0.05];
        let curve = roc_curve(&labels, &scores).unwrap();
        assert_eq!(curve.fpr, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(curve.tpr, vec![0.0, 0.2, 1.0, 1.0]);
    }

    #[test]
    fn test_roc_curve_single_class_is_error() {
        assert_eq!(
            roc_curve(&[1, 1], &[0.2, 0.9]),
            Err(MetricError::SingleClass {
                positives: 2,
                negatives: 0
            })
        );
        assert_eq!(
            roc_curve(&[0, 0], &[0.2, 0.9]),
            Err(MetricError::SingleClass {
                positives: 0,
                negatives: 2
            })
        );
    }

    #[test]
    fn test_roc_curve_empty_and_mismatch() {
        assert_eq!(roc_curve(&[], &[]), Err(MetricError::Empty));
        assert_eq!(
            roc_curve(&[0, 1], &[0.5]),
            Err(MetricError::LengthMismatch {
                labels: 2,
                scores: 1
            })
        );
    }

    #[test]
    fn test_roc_curve_rejects_nan() {
        assert_eq!(
            roc_curve(&[0, 1], &[0.5, f64::NAN]),
            Err(MetricError::NanScore { index: 1 })
        );
    }

    // -- trapezoid --------------------------------------------------------

    #[test]
    fn test_trapezoid_unit_square_diagonal() {
        assert!((trapezoid(&[0.0, 1.0], &[0.0, 1.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_trapezoid_constant_height() {
        assert!((trapezoid(&[0.0, 0.25, 1.0], &[0.4, 0.4, 0.4]) - 0.4).abs() < 1e-12);
    }
}
