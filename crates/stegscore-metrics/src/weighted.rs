//! Weighted partial-AUC competition metric.
//!
//! The ROC curve's TPR axis is split into two bands, `[0.0, 0.4)` weighted
//! 2x and `[0.4, 1.0)` weighted 1x: correctness at low-recall operating
//! points counts double. Per band, points with TPR *strictly inside* the
//! band are selected (boundary points are deliberately dropped — a quirk
//! that must be preserved for score compatibility), the FPR axis is padded
//! to 1.0 with the TPR held at the band ceiling, and the shifted sub-curve
//! is integrated with the trapezoid rule. Band areas are weight-summed and
//! normalized so a complete curve scores 1.0.
//!
//! Degenerate inputs surface as [`MetricError`]; evaluation-path callers
//! use [`weighted_auc_or_zero`], which makes the "never abort a pass"
//! policy explicit at the call site.

use tracing::warn;

use crate::roc::{roc_curve, trapezoid, MetricError};

/// TPR band boundaries.
pub const TPR_THRESHOLDS: [f64; 3] = [0.0, 0.4, 1.0];

/// Integer weights per band, index-aligned with the bands formed by
/// consecutive [`TPR_THRESHOLDS`].
pub const BAND_WEIGHTS: [f64; 2] = [2.0, 1.0];

/// Number of linearly spaced FPR padding points appended per band.
const PADDING_POINTS: usize = 100;

/// Compute the weighted partial AUC of binary labels against scores.
///
/// Labels must be `{0, 1}`; any nonzero label is treated as positive by
/// the reporting layer *before* calling this.
///
/// # Errors
///
/// Propagates [`MetricError`] from the ROC computation (empty input,
/// length mismatch, NaN score, single-class labels).
pub fn weighted_auc(y_true: &[u8], y_pred: &[f64]) -> Result<f64, MetricError> {
    let curve = roc_curve(y_true, y_pred)?;

    let normalization: f64 = BAND_WEIGHTS
        .iter()
        .enumerate()
        .map(|(i, w)| (TPR_THRESHOLDS[i + 1] - TPR_THRESHOLDS[i]) * w)
        .sum();

    let mut competition_metric = 0.0;
    for (idx, &weight) in BAND_WEIGHTS.iter().enumerate() {
        let y_min = TPR_THRESHOLDS[idx];
        let y_max = TPR_THRESHOLDS[idx + 1];

        // Strictly inside the open band; boundary points excluded.
        let selected: Vec<usize> = (0..curve.tpr.len())
            .filter(|&i| y_min < curve.tpr[i] && curve.tpr[i] < y_max)
            .collect();
        if selected.is_empty() {
            continue;
        }

        let last_fpr = curve.fpr[*selected.last().unwrap()];
        let mut x: Vec<f64> = selected.iter().map(|&i| curve.fpr[i]).collect();
        let mut y: Vec<f64> = selected.iter().map(|&i| curve.tpr[i]).collect();

        // Continue the sub-curve to the (1, y_max) corner.
        for pad_x in linspace(last_fpr, 1.0, PADDING_POINTS) {
            x.push(pad_x);
            y.push(y_max);
        }

        // Shift so the sub-curve starts at zero height.
        for v in &mut y {
            *v -= y_min;
        }

        competition_metric += trapezoid(&x, &y) * weight;
    }

    Ok(competition_metric / normalization)
}

/// [`weighted_auc`] with metric failures coalesced to a literal `0.0`.
///
/// The failure cause is logged at `warn` level; callers that need hard
/// failures should call [`weighted_auc`] directly.
#[must_use]
pub fn weighted_auc_or_zero(y_true: &[u8], y_pred: &[f64]) -> f64 {
    match weighted_auc(y_true, y_pred) {
        Ok(score) => score,
        Err(err) => {
            warn!(error = %err, samples = y_true.len(), "weighted AUC not computable, scoring 0.0");
            0.0
        }
    }
}

/// `count` points linearly spaced from `start` to `stop`, inclusive.
fn linspace(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}
