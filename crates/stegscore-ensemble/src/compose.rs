//! Composition of checkpoint-derived models into one runtime callable.
//!
//! [`ensemble_from_checkpoints`] loads K checkpoints through a
//! [`ModelLoader`], then builds a fixed stage pipeline around them per the
//! [`EnsembleSpec`]: per-model activation, arithmetic-mean ensembling,
//! post-ensemble activation, TTA wrapping, post-TTA activation. Exactly
//! one activation stage is active; the stage enum is closed, so an
//! unrecognized stage string already failed at parse time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use stegscore_core::{
    ActivationStage, EnsembleSpec, InputBatch, OutputBatch, OutputKey, PredictionModel, Result,
    StegScoreError, TtaMode,
};

use crate::activation::{sigmoid, softmax};
use crate::tta::TtaModel;

// ---------------------------------------------------------------------------
// Checkpoint loading seam
// ---------------------------------------------------------------------------

/// Metadata surfaced from an opaque checkpoint bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Checkpoint file the model was restored from.
    pub path: PathBuf,
    /// Model architecture name recorded in `checkpoint_data.cmd_args.model`.
    pub model_name: String,
    /// Training fold recorded in `checkpoint_data.cmd_args.fold`, if any.
    pub fold: Option<u32>,
    /// Raw checkpoint metadata for reporting.
    pub raw: serde_json::Value,
}

/// Restores a model and its metadata from a checkpoint file.
///
/// Checkpoint format and model construction are external concerns; the
/// composer only requires this seam.
pub trait ModelLoader {
    /// Load one checkpoint, yielding the model and its metadata.
    fn load(&self, checkpoint: &Path) -> Result<(Box<dyn PredictionModel>, CheckpointMeta)>;
}

// ---------------------------------------------------------------------------
// Activation wrapper
// ---------------------------------------------------------------------------

/// Wraps a model so its raw logits leave as probabilities: sigmoid over
/// the modification flag, softmax over the modification-type row, both at
/// the configured temperature. Embeddings pass through untouched.
struct ActivatedModel {
    inner: Box<dyn PredictionModel>,
    temperature: f64,
}

impl ActivatedModel {
    fn wrap(inner: Box<dyn PredictionModel>, temperature: f64) -> Box<dyn PredictionModel> {
        Box::new(Self { inner, temperature })
    }
}

impl PredictionModel for ActivatedModel {
    fn required_features(&self) -> Vec<String> {
        self.inner.required_features()
    }

    fn forward(&self, batch: &InputBatch) -> Result<OutputBatch> {
        let raw = self.inner.forward(batch)?;
        let t = self.temperature;
        Ok(OutputBatch {
            modification_flag: raw
                .modification_flag
                .iter()
                .map(|&x| sigmoid(x * t))
                .collect(),
            modification_type: raw
                .modification_type
                .iter()
                .map(|row| softmax(&row.iter().map(|&x| x * t).collect::<Vec<_>>()))
                .collect(),
            embedding: raw.embedding,
        })
    }
}

// ---------------------------------------------------------------------------
// Averaging ensembler
// ---------------------------------------------------------------------------

/// Arithmetic-mean ensemble over K constituent models, averaged at batch
/// granularity across the declared output keys.
pub struct Ensembler {
    models: Vec<Box<dyn PredictionModel>>,
    output_keys: Vec<OutputKey>,
}

impl Ensembler {
    /// Build an ensembler over at least two models.
    pub fn new(models: Vec<Box<dyn PredictionModel>>, output_keys: Vec<OutputKey>) -> Result<Self> {
        if models.len() < 2 {
            return Err(StegScoreError::Config(format!(
                "ensembler requires at least 2 models, got {}",
                models.len()
            )));
        }
        Ok(Self {
            models,
            output_keys,
        })
    }
}

impl PredictionModel for Ensembler {
    fn required_features(&self) -> Vec<String> {
        union_features(self.models.iter().map(|m| m.as_ref()))
    }

    fn forward(&self, batch: &InputBatch) -> Result<OutputBatch> {
        let outputs: Vec<OutputBatch> = self
            .models
            .iter()
            .map(|m| m.forward(batch))
            .collect::<Result<_>>()?;
        average_outputs(&outputs, &self.output_keys)
    }
}

/// Average several output batches elementwise across the declared keys.
///
/// Undeclared outputs are carried from the first batch unchanged (they
/// were produced anyway and averaging them was not requested).
pub fn average_outputs(outputs: &[OutputBatch], keys: &[OutputKey]) -> Result<OutputBatch> {
    let first = outputs.first().ok_or_else(|| {
        StegScoreError::Config("cannot average zero output batches".to_string())
    })?;
    let n = first.len();
    for out in outputs {
        if out.len() != n {
            return Err(StegScoreError::Config(format!(
                "output batches disagree on sample count: {} vs {}",
                out.len(),
                n
            )));
        }
    }
    let k = outputs.len() as f64;

    let mut merged = first.clone();

    if keys.contains(&OutputKey::ModificationFlag) {
        merged.modification_flag = (0..n)
            .map(|i| outputs.iter().map(|o| o.modification_flag[i]).sum::<f64>() / k)
            .collect();
    }
    if keys.contains(&OutputKey::ModificationType) {
        merged.modification_type = (0..n)
            .map(|i| {
                let width = first.modification_type[i].len();
                (0..width)
                    .map(|c| {
                        outputs.iter().map(|o| o.modification_type[i][c]).sum::<f64>() / k
                    })
                    .collect()
            })
            .collect();
    }
    if keys.contains(&OutputKey::Embedding) {
        // Averaged only when every constituent produced one.
        let embeddings: Option<Vec<&Vec<Vec<f64>>>> =
            outputs.iter().map(|o| o.embedding.as_ref()).collect();
        merged.embedding = embeddings.map(|embeddings| {
            let dim = embeddings[0].first().map_or(0, Vec::len);
            (0..n)
                .map(|i| {
                    (0..dim)
                        .map(|d| embeddings.iter().map(|e| e[i][d]).sum::<f64>() / k)
                        .collect()
                })
                .collect()
        });
    }

    Ok(merged)
}

fn union_features<'a>(models: impl Iterator<Item = &'a dyn PredictionModel>) -> Vec<String> {
    let set: BTreeSet<String> = models.flat_map(|m| m.required_features()).collect();
    set.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Composition entry point
// ---------------------------------------------------------------------------

/// Load checkpoints and compose them into a single model per the spec.
///
/// Returns the composed callable, the per-checkpoint metadata records,
/// and the unioned required-feature set so the inference driver knows
/// which inputs to prepare.
///
/// # Errors
///
/// `Config` errors on an invalid spec or an empty checkpoint list;
/// loader errors propagate unchanged.
pub fn ensemble_from_checkpoints(
    loader: &dyn ModelLoader,
    checkpoints: &[PathBuf],
    spec: &EnsembleSpec,
) -> Result<(Box<dyn PredictionModel>, Vec<CheckpointMeta>, Vec<String>)> {
    spec.validate()?;
    if checkpoints.is_empty() {
        return Err(StegScoreError::Config(
            "no checkpoints given to ensemble".to_string(),
        ));
    }

    let mut models = Vec::with_capacity(checkpoints.len());
    let mut metas = Vec::with_capacity(checkpoints.len());
    for path in checkpoints {
        let (model, meta) = loader.load(path)?;
        info!(
            checkpoint = %path.display(),
            model = %meta.model_name,
            fold = meta.fold,
            "loaded checkpoint"
        );
        models.push(model);
        metas.push(meta);
    }

    let required_features = union_features(models.iter().map(|m| m.as_ref()));

    if spec.activation_stage == ActivationStage::AfterModel {
        info!(temperature = spec.temperature, "applying activations after each model");
        models = models
            .into_iter()
            .map(|m| ActivatedModel::wrap(m, spec.temperature))
            .collect();
    }

    // A single model is used directly: no averaging wrapper, bit-identical
    // output to calling it on its own.
    let mut model: Box<dyn PredictionModel> = if models.len() > 1 {
        Box::new(Ensembler::new(models, spec.output_keys.clone())?)
    } else {
        models.pop().ok_or_else(|| {
            StegScoreError::Config("no checkpoints given to ensemble".to_string())
        })?
    };

    if spec.activation_stage == ActivationStage::AfterEnsemble {
        info!(temperature = spec.temperature, "applying activations after ensembling");
        model = ActivatedModel::wrap(model, spec.temperature);
    }

    if spec.tta_mode != TtaMode::None {
        info!(mode = ?spec.tta_mode, "wrapping composed model with TTA");
        model = TtaModel::wrap(model, spec.tta_mode, &spec.output_keys);
    }

    if spec.activation_stage == ActivationStage::AfterTta {
        info!(temperature = spec.temperature, "applying activations after TTA");
        model = ActivatedModel::wrap(model, spec.temperature);
    }

    Ok((model, metas, required_features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stegscore_core::Feature;

    /// Fixed-output model for composition tests.
    struct ConstModel {
        flag: f64,
        types: Vec<f64>,
        features: Vec<String>,
    }

    impl PredictionModel for ConstModel {
        fn required_features(&self) -> Vec<String> {
            self.features.clone()
        }

        fn forward(&self, batch: &InputBatch) -> Result<OutputBatch> {
            let n = batch.len();
            Ok(OutputBatch {
                modification_flag: vec![self.flag; n],
                modification_type: vec![self.types.clone(); n],
                embedding: None,
            })
        }
    }

    struct ConstLoader;

    impl ModelLoader for ConstLoader {
        fn load(&self, checkpoint: &Path) -> Result<(Box<dyn PredictionModel>, CheckpointMeta)> {
            // Encode the flag logit in the file stem: "ck_<flag>".
            let stem = checkpoint.file_stem().unwrap().to_string_lossy();
            let flag: f64 = stem.trim_start_matches("ck_").parse().map_err(|_| {
                StegScoreError::Config(format!("bad test checkpoint name {stem}"))
            })?;
            let model = ConstModel {
                flag,
                types: vec![0.0, 0.0, 0.0, 0.0],
                features: vec!["image".to_string(), format!("aux_{flag}")],
            };
            let meta = CheckpointMeta {
                path: checkpoint.to_path_buf(),
                model_name: "const".to_string(),
                fold: Some(0),
                raw: serde_json::json!({"cmd_args": {"model": "const", "fold": 0}}),
            };
            Ok((Box::new(model), meta))
        }
    }

    fn batch(n: usize) -> InputBatch {
        let mut features = HashMap::new();
        features.insert("image".to_string(), Feature::Scalars(vec![0.0; n]));
        InputBatch::new((0..n).map(|i| i.to_string()).collect(), features).unwrap()
    }

    fn spec(stage: ActivationStage) -> EnsembleSpec {
        EnsembleSpec {
            activation_stage: stage,
            ..EnsembleSpec::default()
        }
    }

    #[test]
    fn test_single_checkpoint_is_used_directly() {
        let paths = vec![PathBuf::from("ck_2.0.ckpt")];
        let (model, metas, _) =
            ensemble_from_checkpoints(&ConstLoader, &paths, &spec(ActivationStage::None)).unwrap();
        let out = model.forward(&batch(2)).unwrap();
        // Raw logits, bit-identical to the lone model's own output.
        assert_eq!(out.modification_flag, vec![2.0, 2.0]);
        assert_eq!(metas.len(), 1);
    }

    #[test]
    fn test_ensemble_averages_flag_logits() {
        let paths = vec![PathBuf::from("ck_1.0.ckpt"), PathBuf::from("ck_3.0.ckpt")];
        let (model, metas, _) =
            ensemble_from_checkpoints(&ConstLoader, &paths, &spec(ActivationStage::None)).unwrap();
        let out = model.forward(&batch(1)).unwrap();
        assert_eq!(out.modification_flag, vec![2.0]);
        assert_eq!(metas.len(), 2);
    }

    #[test]
    fn test_after_model_activates_before_averaging() {
        let paths = vec![PathBuf::from("ck_0.0.ckpt"), PathBuf::from("ck_2.0.ckpt")];
        let (model, _, _) = ensemble_from_checkpoints(
            &ConstLoader,
            &paths,
            &spec(ActivationStage::AfterModel),
        )
        .unwrap();
        let out = model.forward(&batch(1)).unwrap();
        let expected = (sigmoid(0.0) + sigmoid(2.0)) / 2.0;
        assert!((out.modification_flag[0] - expected).abs() < 1e-12);
        // Type logits were softmaxed per model: uniform over 4 classes.
        assert!((out.modification_type[0][0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_after_ensemble_activates_the_average() {
        let paths = vec![PathBuf::from("ck_0.0.ckpt"), PathBuf::from("ck_2.0.ckpt")];
        let (model, _, _) = ensemble_from_checkpoints(
            &ConstLoader,
            &paths,
            &spec(ActivationStage::AfterEnsemble),
        )
        .unwrap();
        let out = model.forward(&batch(1)).unwrap();
        // sigmoid of the averaged logit, not the average of sigmoids.
        assert!((out.modification_flag[0] - sigmoid(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_required_features_unioned() {
        let paths = vec![PathBuf::from("ck_1.0.ckpt"), PathBuf::from("ck_3.0.ckpt")];
        let (_, _, features) =
            ensemble_from_checkpoints(&ConstLoader, &paths, &spec(ActivationStage::None)).unwrap();
        assert_eq!(features, vec!["aux_1", "aux_3", "image"]);
    }

    #[test]
    fn test_empty_checkpoint_list_is_config_error() {
        let err = ensemble_from_checkpoints(&ConstLoader, &[], &spec(ActivationStage::None));
        assert!(matches!(err, Err(StegScoreError::Config(_))));
    }

    #[test]
    fn test_temperature_scales_logits_before_sigmoid() {
        let paths = vec![PathBuf::from("ck_1.0.ckpt")];
        let mut s = spec(ActivationStage::AfterModel);
        s.temperature = 2.0;
        let (model, _, _) = ensemble_from_checkpoints(&ConstLoader, &paths, &s).unwrap();
        let out = model.forward(&batch(1)).unwrap();
        assert!((out.modification_flag[0] - sigmoid(2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_average_outputs_length_mismatch_is_error() {
        let a = OutputBatch {
            modification_flag: vec![0.0],
            modification_type: vec![vec![0.0]],
            embedding: None,
        };
        let b = OutputBatch {
            modification_flag: vec![0.0, 1.0],
            modification_type: vec![vec![0.0], vec![1.0]],
            embedding: None,
        };
        let err = average_outputs(&[a, b], &[OutputKey::ModificationFlag]);
        assert!(matches!(err, Err(StegScoreError::Config(_))));
    }
}
