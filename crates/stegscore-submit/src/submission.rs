//! Final submission building and CSV I/O.
//!
//! A submission is a two-column `Id,Label` table. Builders turn raw
//! prediction tables into probabilities (flag, type, or their product),
//! optionally routed through the calibration gate, and format image ids
//! for the target file naming scheme.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use stegscore_core::{
    PredictionTable, Result, StegScoreError, SUBMISSION_ID, SUBMISSION_LABEL,
};
use stegscore_ensemble::activation::{classifier_logits_to_probas, sigmoid};

use crate::calibrate::calibrate_predictions;

// ---------------------------------------------------------------------------
// Id formatting
// ---------------------------------------------------------------------------

/// How raw image ids are rendered in the `Id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdFormat {
    /// Emit the id unchanged.
    #[default]
    Raw,
    /// Append `.jpg` unless already present.
    Jpg,
    /// Zero-pad numeric ids to four digits and append `.jpg`.
    ZeroPadJpg,
}

impl IdFormat {
    /// Render one raw id.
    #[must_use]
    pub fn render(self, raw: &str) -> String {
        match self {
            Self::Raw => raw.to_string(),
            Self::Jpg => with_jpg(raw),
            Self::ZeroPadJpg => match raw.parse::<u64>() {
                Ok(n) => format!("{n:04}.jpg"),
                Err(_) => with_jpg(raw),
            },
        }
    }
}

impl FromStr for IdFormat {
    type Err = StegScoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(Self::Raw),
            "jpg" => Ok(Self::Jpg),
            "zero-pad-jpg" => Ok(Self::ZeroPadJpg),
            other => Err(StegScoreError::Config(format!(
                "unknown id format '{other}' (expected raw, jpg or zero-pad-jpg)"
            ))),
        }
    }
}

fn with_jpg(raw: &str) -> String {
    if raw.ends_with(".jpg") {
        raw.to_string()
    } else {
        format!("{raw}.jpg")
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A final `Id,Label` submission, order-preserving.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Submission {
    /// Rendered image ids.
    pub ids: Vec<String>,
    /// Scalar predictions, higher means more likely modified.
    pub labels: Vec<f64>,
}

impl Submission {
    /// Read a submission from CSV.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| StegScoreError::Schema {
            file: path.display().to_string(),
            message: format!("cannot open: {e}"),
        })?;
        let headers = reader
            .headers()
            .map_err(|e| StegScoreError::Schema {
                file: path.display().to_string(),
                message: format!("cannot read header: {e}"),
            })?
            .clone();
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| StegScoreError::Schema {
                    file: path.display().to_string(),
                    message: format!("missing column '{name}'"),
                })
        };
        let id_col = find(SUBMISSION_ID)?;
        let label_col = find(SUBMISSION_LABEL)?;

        let mut submission = Self::default();
        for (row_idx, row) in reader.records().enumerate() {
            let row = row.map_err(|e| StegScoreError::Schema {
                file: path.display().to_string(),
                message: format!("row {}: {e}", row_idx + 2),
            })?;
            let raw_label = row.get(label_col).unwrap_or_default();
            let label: f64 = raw_label.parse().map_err(|_| StegScoreError::Schema {
                file: path.display().to_string(),
                message: format!(
                    "column '{SUBMISSION_LABEL}' row {}: not a float: '{raw_label}'",
                    row_idx + 2
                ),
            })?;
            submission
                .ids
                .push(row.get(id_col).unwrap_or_default().to_string());
            submission.labels.push(label);
        }
        Ok(submission)
    }

    /// Write the submission to CSV.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| StegScoreError::Schema {
            file: path.display().to_string(),
            message: format!("cannot create: {e}"),
        })?;
        let io_err = |e: csv::Error| StegScoreError::Schema {
            file: path.display().to_string(),
            message: format!("write failed: {e}"),
        };
        writer
            .write_record([SUBMISSION_ID, SUBMISSION_LABEL])
            .map_err(io_err)?;
        for (id, label) in self.ids.iter().zip(&self.labels) {
            let label_text = label.to_string();
            writer
                .write_record([id.as_str(), label_text.as_str()])
                .map_err(io_err)?;
        }
        writer.flush().map_err(|e| StegScoreError::Schema {
            file: path.display().to_string(),
            message: format!("flush failed: {e}"),
        })?;
        info!(path = %path.display(), samples = self.ids.len(), "wrote submission");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Submission from the binary flag output alone.
#[must_use]
pub fn from_binary(table: &PredictionTable, format: IdFormat) -> Submission {
    build(table, format, |r| sigmoid(r.flag_logit))
}

/// Submission from the multiclass output: total softmax mass on the
/// attack classes.
#[must_use]
pub fn from_classifier(table: &PredictionTable, format: IdFormat) -> Submission {
    let rows: Vec<Vec<f64>> = table.records.iter().map(|r| r.type_logits.clone()).collect();
    let type_score = classifier_logits_to_probas(&rows);
    Submission {
        ids: render_ids(table, format),
        labels: type_score,
    }
}

/// Submission from the product of the flag probability and the attack
/// mass of the multiclass output.
#[must_use]
pub fn from_product(table: &PredictionTable, format: IdFormat) -> Submission {
    let flag = from_binary(table, format);
    let class = from_classifier(table, IdFormat::Raw);
    Submission {
        ids: flag.ids,
        labels: flag
            .labels
            .iter()
            .zip(&class.labels)
            .map(|(f, c)| f * c)
            .collect(),
    }
}

/// Per-fold calibrated flag submission, averaged across folds.
///
/// Each test table is calibrated against the out-of-fold table at the
/// same position; the fold submissions are then mean-averaged.
pub fn from_binary_calibrated(
    tests: &[PredictionTable],
    oofs: &[PredictionTable],
    format: IdFormat,
) -> Result<Submission> {
    calibrated(tests, oofs, format, |scores| scores.flag)
}

/// Per-fold calibrated type submission, averaged across folds.
pub fn from_classifier_calibrated(
    tests: &[PredictionTable],
    oofs: &[PredictionTable],
    format: IdFormat,
) -> Result<Submission> {
    calibrated(tests, oofs, format, |scores| scores.type_score)
}

fn calibrated(
    tests: &[PredictionTable],
    oofs: &[PredictionTable],
    format: IdFormat,
    pick: impl Fn(crate::calibrate::CalibratedScores) -> Vec<f64>,
) -> Result<Submission> {
    if tests.len() != oofs.len() || tests.is_empty() {
        return Err(StegScoreError::Config(format!(
            "calibrated submission needs matching fold lists, got {} test and {} OOF tables",
            tests.len(),
            oofs.len()
        )));
    }
    let first = &tests[0];
    let mut sum = vec![0.0; first.len()];
    for (fold, (test, oof)) in tests.iter().zip(oofs).enumerate() {
        if test.len() != first.len() {
            return Err(StegScoreError::Config(format!(
                "fold {fold} test table has {} rows, fold 0 has {}",
                test.len(),
                first.len()
            )));
        }
        let (scores, diagnostics) = calibrate_predictions(test, oof)?;
        info!(fold, ?diagnostics, "calibrated fold");
        for (acc, v) in sum.iter_mut().zip(pick(scores)) {
            *acc += v;
        }
    }
    let k = tests.len() as f64;
    Ok(Submission {
        ids: render_ids(first, format),
        labels: sum.into_iter().map(|v| v / k).collect(),
    })
}

fn render_ids(table: &PredictionTable, format: IdFormat) -> Vec<String> {
    table
        .records
        .iter()
        .map(|r| format.render(&r.image_id))
        .collect()
}

fn build(
    table: &PredictionTable,
    format: IdFormat,
    score: impl Fn(&stegscore_core::PredictionRecord) -> f64,
) -> Submission {
    Submission {
        ids: render_ids(table, format),
        labels: table.records.iter().map(score).collect(),
    }
}

// ---------------------------------------------------------------------------
// Table naming helpers
// ---------------------------------------------------------------------------

/// Sibling path of a prediction table holding its horizontal/vertical
/// flip TTA variant.
#[must_use]
pub fn as_flip_hv_tta(path: &Path) -> PathBuf {
    with_suffix(path, "_flip_hv_tta")
}

/// Sibling path of a prediction table holding its full dihedral TTA
/// variant.
#[must_use]
pub fn as_d4_tta(path: &Path) -> PathBuf {
    with_suffix(path, "_d4_tta")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    path.with_file_name(format!("{stem}{suffix}.{ext}"))
}

/// Extract the cross-validation fold index from a checkpoint or table
/// name containing a `fold<N>` component.
pub fn infer_fold(name: &str) -> Result<u32> {
    let bytes = name.as_bytes();
    let mut search = 0;
    while let Some(pos) = name[search..].find("fold") {
        let digits_at = search + pos + 4;
        let end = bytes[digits_at..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if end > 0 {
            if let Ok(fold) = name[digits_at..digits_at + end].parse::<u32>() {
                return Ok(fold);
            }
        }
        search = digits_at;
    }
    Err(StegScoreError::Config(format!(
        "cannot infer fold from '{name}': no fold<N> component"
    )))
}
