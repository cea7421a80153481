//! Isotonic calibration fitted on out-of-fold predictions.
//!
//! [`IsotonicRegression`] fits a monotone nondecreasing step function via
//! pool-adjacent-violators and transforms new scores by linear
//! interpolation between block edges, clipping inputs to the fitted
//! domain and the output to `[0, 1]`.
//!
//! [`calibrate_predictions`] fits one map for the binary flag output and
//! one for the multiclass-derived type output — never shared — and
//! applies each to the test scores only if it improves the weighted AUC
//! on the out-of-fold set. A regression is expected occasionally on
//! small folds: the map is skipped with a warning, never a failure.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stegscore_core::{PredictionTable, Result, StegScoreError};
use stegscore_ensemble::activation::{classifier_logits_to_probas, sigmoid};
use stegscore_metrics::weighted_auc_or_zero;

// ---------------------------------------------------------------------------
// Isotonic regression
// ---------------------------------------------------------------------------

/// A monotone nondecreasing step function fitted by
/// pool-adjacent-violators, serializable as a calibration artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicRegression {
    /// Interpolation knot inputs, ascending.
    x: Vec<f64>,
    /// Interpolation knot outputs, nondecreasing, within `[0, 1]`.
    y: Vec<f64>,
}

impl IsotonicRegression {
    /// Fit on (score, target) pairs with targets in `[0, 1]`.
    ///
    /// Duplicate scores are weight-averaged before the block merge, so
    /// the fitted map is a function of the score value alone.
    pub fn fit(scores: &[f64], targets: &[f64]) -> Result<Self> {
        if scores.len() != targets.len() {
            return Err(StegScoreError::Calibration(format!(
                "isotonic fit arrays misaligned: {} scores, {} targets",
                scores.len(),
                targets.len()
            )));
        }
        if scores.is_empty() {
            return Err(StegScoreError::Calibration(
                "isotonic fit on empty arrays".to_string(),
            ));
        }
        if scores.iter().any(|s| s.is_nan()) {
            return Err(StegScoreError::Calibration(
                "isotonic fit scores contain NaN".to_string(),
            ));
        }

        let mut pairs: Vec<(f64, f64)> = scores.iter().copied().zip(targets.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        // Collapse duplicate inputs into weighted points.
        let mut points: Vec<(f64, f64, f64)> = Vec::new(); // (x, sum, weight)
        for (x, y) in pairs {
            match points.last_mut() {
                Some(last) if last.0 == x => {
                    last.1 += y;
                    last.2 += 1.0;
                }
                _ => points.push((x, y, 1.0)),
            }
        }

        // Pool adjacent violators: merge neighbouring blocks while the
        // running means decrease.
        struct Block {
            x_min: f64,
            x_max: f64,
            sum: f64,
            weight: f64,
        }
        let mut blocks: Vec<Block> = Vec::with_capacity(points.len());
        for (x, sum, weight) in points {
            blocks.push(Block {
                x_min: x,
                x_max: x,
                sum,
                weight,
            });
            while blocks.len() >= 2 {
                let n = blocks.len();
                let last_mean = blocks[n - 1].sum / blocks[n - 1].weight;
                let prev_mean = blocks[n - 2].sum / blocks[n - 2].weight;
                if last_mean >= prev_mean {
                    break;
                }
                blocks[n - 2].x_max = blocks[n - 1].x_max;
                blocks[n - 2].sum += blocks[n - 1].sum;
                blocks[n - 2].weight += blocks[n - 1].weight;
                blocks.truncate(n - 1);
            }
        }

        // Each block is constant over its span; between blocks the map is
        // linear. Emit both block edges as knots (deduped for singleton
        // blocks) and clamp fitted values to the unit interval.
        let mut x = Vec::with_capacity(blocks.len() * 2);
        let mut y = Vec::with_capacity(blocks.len() * 2);
        for block in &blocks {
            let value = (block.sum / block.weight).clamp(0.0, 1.0);
            x.push(block.x_min);
            y.push(value);
            if block.x_max > block.x_min {
                x.push(block.x_max);
                y.push(value);
            }
        }
        Ok(Self { x, y })
    }

    /// Transform one score. Inputs outside the fitted domain are clipped
    /// to it.
    #[must_use]
    pub fn transform(&self, score: f64) -> f64 {
        let first = self.x[0];
        let last = self.x[self.x.len() - 1];
        let v = score.clamp(first, last);

        let idx = self.x.partition_point(|&knot| knot <= v);
        if idx == 0 {
            return self.y[0];
        }
        if idx >= self.x.len() {
            return self.y[self.y.len() - 1];
        }
        let (x0, x1) = (self.x[idx - 1], self.x[idx]);
        let (y0, y1) = (self.y[idx - 1], self.y[idx]);
        if x1 == x0 {
            return y0;
        }
        y0 + (v - x0) / (x1 - x0) * (y1 - y0)
    }

    /// Transform a score array.
    #[must_use]
    pub fn transform_all(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|&s| self.transform(s)).collect()
    }

    /// Persist the fitted map as a JSON artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Restore a fitted map from a JSON artifact.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ---------------------------------------------------------------------------
// Gated calibration of prediction tables
// ---------------------------------------------------------------------------

/// Weighted-AUC scores on the out-of-fold set before and after fitting,
/// for the binary flag output (`b_`) and the classifier-derived type
/// output (`c_`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDiagnostics {
    /// Flag AUC on raw OOF probabilities.
    pub b_auc_before: f64,
    /// Flag AUC on calibrated OOF probabilities.
    pub b_auc_after: f64,
    /// Type AUC on raw OOF probabilities.
    pub c_auc_before: f64,
    /// Type AUC on calibrated OOF probabilities.
    pub c_auc_after: f64,
}

/// Per-sample probability scores after activation and (possibly)
/// calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedScores {
    /// Sample identifiers in table order.
    pub image_ids: Vec<String>,
    /// Flag probabilities.
    pub flag: Vec<f64>,
    /// Type probabilities (softmax-sum over attack classes).
    pub type_score: Vec<f64>,
}

/// Activate both tables, fit isotonic maps on the out-of-fold set, and
/// apply each map to the test scores only where it improves the
/// out-of-fold weighted AUC.
///
/// # Errors
///
/// `Config` error when the OOF table carries no ground truth; isotonic
/// fit errors propagate.
pub fn calibrate_predictions(
    test: &PredictionTable,
    oof: &PredictionTable,
) -> Result<(CalibratedScores, CalibrationDiagnostics)> {
    if !oof.has_ground_truth() {
        return Err(StegScoreError::Config(
            "out-of-fold table carries no ground-truth labels".to_string(),
        ));
    }

    let y_true: Vec<u8> = oof
        .records
        .iter()
        .map(|r| u8::from(r.true_flag.unwrap_or(0) > 0))
        .collect();
    let targets: Vec<f64> = y_true.iter().map(|&l| f64::from(l)).collect();

    let oof_flag: Vec<f64> = oof.records.iter().map(|r| sigmoid(r.flag_logit)).collect();
    let oof_type = type_probas(oof);
    let mut test_flag: Vec<f64> = test.records.iter().map(|r| sigmoid(r.flag_logit)).collect();
    let mut test_type = type_probas(test);

    // Flag output.
    let b_auc_before = weighted_auc_or_zero(&y_true, &oof_flag);
    let ir_flag = IsotonicRegression::fit(&oof_flag, &targets)?;
    let b_auc_after = weighted_auc_or_zero(&y_true, &ir_flag.transform_all(&oof_flag));
    if b_auc_after > b_auc_before {
        info!(b_auc_before, b_auc_after, "applying flag calibration");
        test_flag = ir_flag.transform_all(&test_flag);
    } else {
        warn!(
            b_auc_before,
            b_auc_after, "flag calibration did not improve the OOF metric, skipping"
        );
    }

    // Type output; fitted independently, never shared with the flag map.
    let c_auc_before = weighted_auc_or_zero(&y_true, &oof_type);
    let ir_type = IsotonicRegression::fit(&oof_type, &targets)?;
    let c_auc_after = weighted_auc_or_zero(&y_true, &ir_type.transform_all(&oof_type));
    if c_auc_after > c_auc_before {
        info!(c_auc_before, c_auc_after, "applying type calibration");
        test_type = ir_type.transform_all(&test_type);
    } else {
        warn!(
            c_auc_before,
            c_auc_after, "type calibration did not improve the OOF metric, skipping"
        );
    }

    let scores = CalibratedScores {
        image_ids: test.records.iter().map(|r| r.image_id.clone()).collect(),
        flag: test_flag,
        type_score: test_type,
    };
    let diagnostics = CalibrationDiagnostics {
        b_auc_before,
        b_auc_after,
        c_auc_before,
        c_auc_after,
    };
    Ok((scores, diagnostics))
}

fn type_probas(table: &PredictionTable) -> Vec<f64> {
    let rows: Vec<Vec<f64>> = table.records.iter().map(|r| r.type_logits.clone()).collect();
    classifier_logits_to_probas(&rows)
}
