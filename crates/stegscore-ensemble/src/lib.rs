//! Ensemble composition for stegscore
//!
//! Builds a single [`stegscore_core::PredictionModel`] from K checkpoint-
//! derived models: per-model or post-ensemble activations, arithmetic-mean
//! ensembling, and deterministic test-time augmentation, composed in the
//! fixed order dictated by the [`stegscore_core::EnsembleSpec`].

pub mod activation;
pub mod compose;
pub mod predict;
pub mod tta;

pub use activation::{
    binary_logits_to_probas, classifier_logits_to_probas, embedding_to_probas, logit,
    rank_transform, sigmoid, softmax, temperature_scale, winsorize, TransformKind,
    WINSORIZE_LIMITS,
};
pub use compose::{ensemble_from_checkpoints, CheckpointMeta, Ensembler, ModelLoader};
pub use predict::compute_predictions;
pub use tta::TtaModel;
