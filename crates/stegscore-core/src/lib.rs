//! Core types, traits, and errors for stegscore
//!
//! This crate contains the foundational types shared across all stegscore
//! components: the model prediction contract, feature tensors consumed by
//! test-time augmentation, the ensemble specification, prediction-table
//! records exchanged between pipeline stages, and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Label & column constants
// ---------------------------------------------------------------------------

/// Label value of an unmodified (cover) image.
pub const COVER_LABEL: u8 = 0;

/// Attack-type labels: 1 = JMiPOD, 2 = JUNIWARD, 3 = UERD.
pub const ATTACK_LABELS: [u8; 3] = [1, 2, 3];

/// Human-readable attack names, index-aligned with [`ATTACK_LABELS`].
pub const ATTACK_NAMES: [&str; 3] = ["JMiPOD", "JUNIWARD", "UERD"];

/// Discrete JPEG quality-factor levels used for stratified reporting.
pub const QUALITY_LEVELS: [u8; 3] = [0, 1, 2];

/// Human-readable quality-factor names, index-aligned with [`QUALITY_LEVELS`].
pub const QUALITY_NAMES: [&str; 3] = ["75", "90", "95"];

/// Prediction-table column: sample identifier.
pub const COLUMN_IMAGE_ID: &str = "image_id";
/// Prediction-table column: raw modification-flag logit.
pub const COLUMN_PRED_FLAG: &str = "pred_modification_flag";
/// Prediction-table column: string-encoded array of modification-type logits.
pub const COLUMN_PRED_TYPE: &str = "pred_modification_type";
/// Prediction-table column (OOF only): true modification flag.
pub const COLUMN_TRUE_FLAG: &str = "true_modification_flag";
/// Prediction-table column (OOF only): true modification type.
pub const COLUMN_TRUE_TYPE: &str = "true_modification_type";

/// Submission column: sample identifier.
pub const SUBMISSION_ID: &str = "Id";
/// Submission column: final scalar prediction.
pub const SUBMISSION_LABEL: &str = "Label";

/// Canonical name of the image input feature.
pub const FEATURE_IMAGE: &str = "image";

// ---------------------------------------------------------------------------
// Feature tensors
// ---------------------------------------------------------------------------

/// A dense CHW image tensor.
///
/// Carries enough geometry for the deterministic flips and rotations used
/// by test-time augmentation; it is not a general-purpose tensor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTensor {
    /// Number of channels.
    pub channels: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Image width in pixels.
    pub width: usize,
    /// Row-major CHW data, `channels * height * width` values.
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Create an image tensor, validating the buffer length.
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != channels * height * width {
            return Err(StegScoreError::Config(format!(
                "image buffer length {} does not match {}x{}x{}",
                data.len(),
                channels,
                height,
                width
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    #[inline]
    fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    /// Mirror the image horizontally (left-right).
    #[must_use]
    pub fn hflip(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.channels {
            for y in 0..self.height {
                for x in (0..self.width).rev() {
                    data.push(self.at(c, y, x));
                }
            }
        }
        Self { data, ..*self }
    }

    /// Mirror the image vertically (top-bottom).
    #[must_use]
    pub fn vflip(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.channels {
            for y in (0..self.height).rev() {
                for x in 0..self.width {
                    data.push(self.at(c, y, x));
                }
            }
        }
        Self { data, ..*self }
    }

    /// Rotate the image 90 degrees clockwise. Height and width swap.
    #[must_use]
    pub fn rot90(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.channels {
            for y in 0..self.width {
                for x in 0..self.height {
                    // out(y, x) = in(H - 1 - x, y)
                    data.push(self.at(c, self.height - 1 - x, y));
                }
            }
        }
        Self {
            channels: self.channels,
            height: self.width,
            width: self.height,
            data,
        }
    }
}

/// A named input feature for one batch of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Feature {
    /// Per-sample image tensors. Subject to TTA transforms.
    Images(Vec<ImageTensor>),
    /// Per-sample scalar covariates (e.g. quality factor). TTA-invariant.
    Scalars(Vec<f32>),
}

impl Feature {
    /// Number of samples carried by this feature.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Images(v) => v.len(),
            Self::Scalars(v) => v.len(),
        }
    }

    /// Whether the feature carries no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One batch of named input features plus sample identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBatch {
    /// Sample identifiers, batch-ordered.
    pub image_ids: Vec<String>,
    /// Named features, each batch-aligned with `image_ids`.
    pub features: HashMap<String, Feature>,
}

impl InputBatch {
    /// Create a batch, validating that every feature is batch-aligned.
    pub fn new(image_ids: Vec<String>, features: HashMap<String, Feature>) -> Result<Self> {
        for (name, feature) in &features {
            if feature.len() != image_ids.len() {
                return Err(StegScoreError::Config(format!(
                    "feature '{}' has {} samples, batch has {}",
                    name,
                    feature.len(),
                    image_ids.len()
                )));
            }
        }
        Ok(Self {
            image_ids,
            features,
        })
    }

    /// Number of samples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.image_ids.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image_ids.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Model contract
// ---------------------------------------------------------------------------

/// Raw per-batch model outputs.
///
/// Values are raw logits unless an activation stage has already been
/// applied by a wrapper (see the ensemble composer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBatch {
    /// One modification-flag logit per sample.
    pub modification_flag: Vec<f64>,
    /// One C-way modification-type logit row per sample.
    pub modification_type: Vec<Vec<f64>>,
    /// Optional per-sample embedding vectors.
    pub embedding: Option<Vec<Vec<f64>>>,
}

impl OutputBatch {
    /// Number of samples in the output.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modification_flag.len()
    }

    /// Whether the output is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modification_flag.is_empty()
    }
}

/// Contract implemented by every prediction producer.
///
/// The pipeline treats models as opaque: a callable mapping named input
/// features to an [`OutputBatch`], plus the set of features it needs the
/// inference driver to prepare.
pub trait PredictionModel: Send + Sync {
    /// Input feature names this model requires.
    fn required_features(&self) -> Vec<String>;

    /// Run one forward pass over a batch.
    fn forward(&self, batch: &InputBatch) -> Result<OutputBatch>;
}

// ---------------------------------------------------------------------------
// Ensemble specification
// ---------------------------------------------------------------------------

/// Pipeline stage at which logits are converted to probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStage {
    /// No activation; the composed model returns raw logits.
    None,
    /// Activate each constituent model's outputs before ensembling.
    /// Used when temperature or output scale differs across models.
    AfterModel,
    /// Activate after TTA averaging.
    AfterTta,
    /// Activate the ensembled output. Valid when models are homogeneous
    /// and activation commutes with averaging.
    AfterEnsemble,
}

impl FromStr for ActivationStage {
    type Err = StegScoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "after_model" => Ok(Self::AfterModel),
            "after_tta" => Ok(Self::AfterTta),
            "after_ensemble" => Ok(Self::AfterEnsemble),
            other => Err(StegScoreError::Config(format!(
                "unrecognized activation stage '{other}' \
                 (expected none|after_model|after_tta|after_ensemble)"
            ))),
        }
    }
}

/// Test-time augmentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TtaMode {
    /// No augmentation.
    None,
    /// Identity, horizontal, vertical, and combined flips (4 variants).
    FlipHv,
    /// Full dihedral group of the square (8 variants).
    D4,
}

impl FromStr for TtaMode {
    type Err = StegScoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "flip-hv" => Ok(Self::FlipHv),
            "d4" => Ok(Self::D4),
            other => Err(StegScoreError::Config(format!(
                "unrecognized TTA mode '{other}' (expected none|flip-hv|d4)"
            ))),
        }
    }
}

/// Model output selected for ensembling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKey {
    /// The binary modification-flag logit.
    ModificationFlag,
    /// The C-way modification-type logits.
    ModificationType,
    /// The embedding vector.
    Embedding,
}

/// Immutable recipe for composing checkpoints into one runtime model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSpec {
    /// Outputs the composed model must produce.
    pub output_keys: Vec<OutputKey>,
    /// Where in the pipeline activations are inserted.
    pub activation_stage: ActivationStage,
    /// Test-time augmentation mode.
    pub tta_mode: TtaMode,
    /// Temperature applied with the activations; must be positive.
    pub temperature: f64,
}

impl Default for EnsembleSpec {
    fn default() -> Self {
        Self {
            output_keys: vec![OutputKey::ModificationFlag, OutputKey::ModificationType],
            activation_stage: ActivationStage::AfterModel,
            tta_mode: TtaMode::None,
            temperature: 1.0,
        }
    }
}

impl EnsembleSpec {
    /// Validate spec invariants (positive temperature, non-empty outputs).
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0) {
            return Err(StegScoreError::Config(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if self.output_keys.is_empty() {
            return Err(StegScoreError::Config(
                "ensemble spec declares no output keys".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Prediction table
// ---------------------------------------------------------------------------

/// One row of a prediction table: raw per-sample outputs, plus ground
/// truth when the table holds out-of-fold predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Sample identifier.
    pub image_id: String,
    /// Raw modification-flag logit.
    pub flag_logit: f64,
    /// Raw C-way modification-type logits.
    pub type_logits: Vec<f64>,
    /// True modification flag (OOF tables only).
    pub true_flag: Option<u8>,
    /// True modification type (OOF tables only).
    pub true_type: Option<u8>,
}

/// Ordered set of per-sample predictions — the unit exchanged between
/// pipeline stages (accumulator output, calibrator input/output,
/// blender input).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionTable {
    /// Records in arrival order.
    pub records: Vec<PredictionRecord>,
}

impl PredictionTable {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the table carries ground truth for every record.
    #[must_use]
    pub fn has_ground_truth(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.true_flag.is_some())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type shared across the stegscore crates.
#[derive(Debug, thiserror::Error)]
pub enum StegScoreError {
    /// Weighted-AUC computation failed (degenerate ROC input). Callers on
    /// the evaluation path coalesce this to a literal `0.0` score.
    #[error("metric computation failed: {0}")]
    Metric(String),

    /// Isotonic calibration could not be fitted (empty, misaligned, or
    /// NaN-bearing input). A fitted map that merely fails to improve the
    /// held-out metric is not an error: it is skipped with a warning.
    #[error("calibration error: {0}")]
    Calibration(String),

    /// Invalid configuration (unknown activation stage, mismatched file
    /// lists, mismatched sample-id sets). Fatal before any work persists.
    #[error("configuration error: {0}")]
    Config(String),

    /// A prediction CSV is missing an expected column or holds a value
    /// that cannot be parsed. Fatal at the point of first access.
    #[error("schema error in {file}: {message}")]
    Schema {
        /// Offending file.
        file: String,
        /// What was missing or malformed.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization / deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, StegScoreError>`.
pub type Result<T> = std::result::Result<T, StegScoreError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn image_2x3(values: [f32; 6]) -> ImageTensor {
        ImageTensor::new(1, 2, 3, values.to_vec()).unwrap()
    }

    // -- ImageTensor ------------------------------------------------------

    #[test]
    fn test_image_new_rejects_bad_length() {
        assert!(ImageTensor::new(1, 2, 3, vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_hflip_reverses_rows() {
        let img = image_2x3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(img.hflip().data, vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
    }

    #[test]
    fn test_vflip_reverses_row_order() {
        let img = image_2x3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(img.vflip().data, vec![4.0, 5.0, 6.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_rot90_swaps_dims() {
        let img = image_2x3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rot = img.rot90();
        assert_eq!((rot.height, rot.width), (3, 2));
        // Clockwise: first output row is the first input column, bottom-up.
        assert_eq!(rot.data, vec![4.0, 1.0, 5.0, 2.0, 6.0, 3.0]);
    }

    #[test]
    fn test_rot90_four_times_is_identity() {
        let img = image_2x3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let back = img.rot90().rot90().rot90().rot90();
        assert_eq!(back, img);
    }

    #[test]
    fn test_double_flip_equals_rot180() {
        let img = image_2x3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(img.hflip().vflip(), img.rot90().rot90());
    }

    // -- InputBatch -------------------------------------------------------

    #[test]
    fn test_batch_rejects_misaligned_feature() {
        let mut features = HashMap::new();
        features.insert(FEATURE_IMAGE.to_string(), Feature::Scalars(vec![1.0]));
        let err = InputBatch::new(vec!["a".into(), "b".into()], features);
        assert!(matches!(err, Err(StegScoreError::Config(_))));
    }

    // -- Spec enums -------------------------------------------------------

    #[test]
    fn test_activation_stage_parsing() {
        assert_eq!(
            "after_model".parse::<ActivationStage>().unwrap(),
            ActivationStage::AfterModel
        );
        assert_eq!(
            "after_tta".parse::<ActivationStage>().unwrap(),
            ActivationStage::AfterTta
        );
        assert!(matches!(
            "sigmoid".parse::<ActivationStage>(),
            Err(StegScoreError::Config(_))
        ));
    }

    #[test]
    fn test_tta_mode_parsing() {
        assert_eq!("flip-hv".parse::<TtaMode>().unwrap(), TtaMode::FlipHv);
        assert_eq!("d4".parse::<TtaMode>().unwrap(), TtaMode::D4);
        assert!("d8".parse::<TtaMode>().is_err());
    }

    #[test]
    fn test_spec_validation() {
        let mut spec = EnsembleSpec::default();
        assert!(spec.validate().is_ok());
        spec.temperature = 0.0;
        assert!(spec.validate().is_err());
        spec.temperature = 2.0;
        spec.output_keys.clear();
        assert!(spec.validate().is_err());
    }

    // -- Errors -----------------------------------------------------------

    #[test]
    fn test_schema_error_names_file() {
        let err = StegScoreError::Schema {
            file: "oof.csv".to_string(),
            message: "missing column 'image_id'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("oof.csv"));
        assert!(msg.contains("image_id"));
    }
}
