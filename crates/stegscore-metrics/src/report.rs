//! Stratified metric breakdown and the telemetry sink boundary.
//!
//! [`CompetitionReport`] turns a finalized evaluation pass into the
//! overall weighted AUC, per-quality-factor scores, and a 3x3
//! (quality, attack-type) one-vs-cover separability matrix. Label
//! binarization (`label > 0` counts as positive) happens here, at the
//! reporting boundary — the scorer itself assumes binary labels.
//!
//! Emission goes through the [`MetricSink`] trait; the telemetry surface
//! behind it (dashboards, experiment trackers) is out of scope.

use tracing::info;

use stegscore_core::{ATTACK_LABELS, ATTACK_NAMES, QUALITY_LEVELS, QUALITY_NAMES};

use crate::accumulator::PassBuffers;
use crate::weighted::weighted_auc_or_zero;

/// Receiver for derived metric values.
pub trait MetricSink {
    /// Record a named scalar.
    fn scalar(&mut self, name: &str, value: f64);

    /// Record a named 3x3 matrix with axis labels.
    fn matrix(&mut self, name: &str, row_names: &[&str], col_names: &[&str], values: &[[f64; 3]; 3]);
}

/// Sink that logs every value through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn scalar(&mut self, name: &str, value: f64) {
        info!(metric = name, value, "metric");
    }

    fn matrix(&mut self, name: &str, row_names: &[&str], col_names: &[&str], values: &[[f64; 3]; 3]) {
        for (row, row_name) in row_names.iter().enumerate() {
            for (col, col_name) in col_names.iter().enumerate() {
                info!(
                    metric = name,
                    row = row_name,
                    col = col_name,
                    value = values[row][col],
                    "metric matrix cell"
                );
            }
        }
    }
}

/// In-memory sink for tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Recorded scalars in emission order.
    pub scalars: Vec<(String, f64)>,
    /// Recorded matrices in emission order.
    pub matrices: Vec<(String, [[f64; 3]; 3])>,
}

impl MetricSink for MemorySink {
    fn scalar(&mut self, name: &str, value: f64) {
        self.scalars.push((name.to_string(), value));
    }

    fn matrix(&mut self, name: &str, _row_names: &[&str], _col_names: &[&str], values: &[[f64; 3]; 3]) {
        self.matrices.push((name.to_string(), *values));
    }
}

/// Metric breakdown derived from one finalized evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionReport {
    /// Weighted AUC over the full pass.
    pub overall: f64,
    /// Weighted AUC per quality-factor level, index-aligned with
    /// [`QUALITY_LEVELS`].
    pub per_quality: [f64; 3],
    /// Rows = quality levels, columns = attack types; each cell scores
    /// cover-vs-one-attack separability within one quality level.
    pub matrix: [[f64; 3]; 3],
}

impl CompetitionReport {
    /// Compute the breakdown. Empty or single-class subsets resolve to
    /// `0.0` (never NaN, never a panic) via the scorer's failure policy.
    #[must_use]
    pub fn compute(pass: &PassBuffers) -> Self {
        let binary: Vec<u8> = pass.true_labels.iter().map(|&l| u8::from(l > 0)).collect();

        let overall = weighted_auc_or_zero(&binary, &pass.scores);

        let mut per_quality = [0.0; 3];
        for (slot, &qf) in QUALITY_LEVELS.iter().enumerate() {
            let (labels, scores) = filter_pass(pass, &binary, |i| {
                pass.quality_factors[i] == Some(qf)
            });
            per_quality[slot] = weighted_auc_or_zero(&labels, &scores);
        }

        let mut matrix = [[0.0; 3]; 3];
        for (row, &qf) in QUALITY_LEVELS.iter().enumerate() {
            for (col, &attack) in ATTACK_LABELS.iter().enumerate() {
                let (labels, scores) = filter_pass(pass, &binary, |i| {
                    pass.quality_factors[i] == Some(qf)
                        && (pass.true_labels[i] == 0 || pass.true_labels[i] == attack)
                });
                matrix[row][col] = weighted_auc_or_zero(&labels, &scores);
            }
        }

        Self {
            overall,
            per_quality,
            matrix,
        }
    }

    /// Emit the breakdown to a sink under the given metric prefix.
    pub fn emit(&self, prefix: &str, sink: &mut dyn MetricSink) {
        sink.scalar(prefix, self.overall);
        for (slot, name) in QUALITY_NAMES.iter().enumerate() {
            sink.scalar(&format!("{prefix}/qf_{name}"), self.per_quality[slot]);
        }
        sink.matrix(
            &format!("{prefix}/matrix"),
            &QUALITY_NAMES,
            &ATTACK_NAMES,
            &self.matrix,
        );
    }
}

/// Select the (binary label, score) pairs whose index passes the filter.
fn filter_pass(
    pass: &PassBuffers,
    binary: &[u8],
    keep: impl Fn(usize) -> bool,
) -> (Vec<u8>, Vec<f64>) {
    let mut labels = Vec::new();
    let mut scores = Vec::new();
    for i in 0..pass.len() {
        if keep(i) {
            labels.push(binary[i]);
            scores.push(pass.scores[i]);
        }
    }
    (labels, scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pass where quality 0 holds a separable cover/JMiPOD pair set and
    /// quality 1 holds only covers.
    fn sample_pass() -> PassBuffers {
        PassBuffers {
            image_ids: (0..8).map(|i| format!("{i:04}")).collect(),
            //               --- qf 0 ----------   --- qf 1 ---
            true_labels: vec![0, 0, 1, 1, 0, 1, /* qf 1: */ 0, 0],
            scores: vec![0.1, 0.2, 0.8, 0.9, 0.15, 0.7, 0.3, 0.4],
            quality_factors: vec![
                Some(0),
                Some(0),
                Some(0),
                Some(0),
                Some(0),
                Some(0),
                Some(1),
                Some(1),
            ],
        }
    }

    #[test]
    fn test_report_binarizes_multiclass_labels() {
        let pass = PassBuffers {
            image_ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            true_labels: vec![0, 3, 0, 2],
            scores: vec![0.1, 0.9, 0.2, 0.8],
            quality_factors: vec![None; 4],
        };
        let report = CompetitionReport::compute(&pass);
        // Same score as explicit binary labels on identical scores.
        let expected = weighted_auc_or_zero(&[0, 1, 0, 1], &pass.scores);
        assert!((report.overall - expected).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_quality_level_scores_zero() {
        let report = CompetitionReport::compute(&sample_pass());
        // Quality level 1 has only covers; the cell must be finite zero.
        assert_eq!(report.per_quality[1], 0.0);
        // Quality level 2 is entirely absent.
        assert_eq!(report.per_quality[2], 0.0);
        assert!(report.per_quality.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_matrix_cells_are_finite_when_empty() {
        let report = CompetitionReport::compute(&sample_pass());
        for row in &report.matrix {
            for cell in row {
                assert!(cell.is_finite());
            }
        }
        // No attack-2 or attack-3 samples anywhere.
        assert_eq!(report.matrix[0][1], 0.0);
        assert_eq!(report.matrix[0][2], 0.0);
    }

    #[test]
    fn test_matrix_cell_restricts_to_cover_or_attack() {
        let pass = PassBuffers {
            image_ids: (0..6).map(|i| i.to_string()).collect(),
            true_labels: vec![0, 0, 1, 1, 2, 2],
            // Attack 1 well separated, attack 2 scored below cover.
            scores: vec![0.1, 0.2, 0.8, 0.9, 0.01, 0.02],
            quality_factors: vec![Some(0); 6],
        };
        let report = CompetitionReport::compute(&pass);
        let attack1 = weighted_auc_or_zero(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]);
        let attack2 = weighted_auc_or_zero(&[0, 0, 1, 1], &[0.1, 0.2, 0.01, 0.02]);
        assert!((report.matrix[0][0] - attack1).abs() < 1e-12);
        assert!((report.matrix[0][1] - attack2).abs() < 1e-12);
    }

    #[test]
    fn test_emit_names_and_order() {
        let report = CompetitionReport::compute(&sample_pass());
        let mut sink = MemorySink::default();
        report.emit("auc", &mut sink);

        let names: Vec<&str> = sink.scalars.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["auc", "auc/qf_75", "auc/qf_90", "auc/qf_95"]);
        assert_eq!(sink.matrices.len(), 1);
        assert_eq!(sink.matrices[0].0, "auc/matrix");
    }
}
