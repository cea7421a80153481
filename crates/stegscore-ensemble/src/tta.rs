//! Deterministic test-time augmentation wrappers.
//!
//! A [`TtaModel`] predicts on several flipped/rotated variants of the
//! input images and averages the resulting output batches. Scalar
//! features are TTA-invariant and passed through unchanged. Wrapping
//! happens after ensembling so the augmentation cost is paid once per
//! composed model, not once per constituent.

use stegscore_core::{
    Feature, ImageTensor, InputBatch, OutputBatch, OutputKey, PredictionModel, Result, TtaMode,
};

use crate::compose::average_outputs;

/// One element of the dihedral group: an optional horizontal mirror
/// followed by `rot` clockwise quarter-turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DihedralOp {
    flip: bool,
    rot: u8,
}

impl DihedralOp {
    const IDENTITY: Self = Self {
        flip: false,
        rot: 0,
    };

    fn apply(self, image: &ImageTensor) -> ImageTensor {
        let mut out = if self.flip {
            image.hflip()
        } else {
            image.clone()
        };
        for _ in 0..self.rot {
            out = out.rot90();
        }
        out
    }
}

/// Variant sets per TTA mode. `flip-hv` is identity, H-flip, V-flip and
/// the combined flip; `d4` is the full 8-element group.
fn variants(mode: TtaMode) -> Vec<DihedralOp> {
    match mode {
        TtaMode::None => vec![DihedralOp::IDENTITY],
        TtaMode::FlipHv => vec![
            DihedralOp::IDENTITY,
            DihedralOp { flip: true, rot: 0 },
            // Mirror + half-turn = vertical flip.
            DihedralOp { flip: true, rot: 2 },
            DihedralOp { flip: false, rot: 2 },
        ],
        TtaMode::D4 => (0..4)
            .flat_map(|rot| {
                [false, true].into_iter().map(move |flip| DihedralOp { flip, rot })
            })
            .collect(),
    }
}

/// Model wrapper averaging predictions over deterministic image variants.
pub struct TtaModel {
    inner: Box<dyn PredictionModel>,
    ops: Vec<DihedralOp>,
    output_keys: Vec<OutputKey>,
}

impl TtaModel {
    /// Wrap a model with the given TTA mode. `TtaMode::None` returns the
    /// model unchanged — no wrapper overhead.
    #[must_use]
    pub fn wrap(
        inner: Box<dyn PredictionModel>,
        mode: TtaMode,
        output_keys: &[OutputKey],
    ) -> Box<dyn PredictionModel> {
        if mode == TtaMode::None {
            return inner;
        }
        Box::new(Self {
            inner,
            ops: variants(mode),
            output_keys: output_keys.to_vec(),
        })
    }
}

impl PredictionModel for TtaModel {
    fn required_features(&self) -> Vec<String> {
        self.inner.required_features()
    }

    fn forward(&self, batch: &InputBatch) -> Result<OutputBatch> {
        let mut outputs = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            let augmented = augment_batch(batch, *op);
            outputs.push(self.inner.forward(&augmented)?);
        }
        average_outputs(&outputs, &self.output_keys)
    }
}

fn augment_batch(batch: &InputBatch, op: DihedralOp) -> InputBatch {
    if op == DihedralOp::IDENTITY {
        return batch.clone();
    }
    let features = batch
        .features
        .iter()
        .map(|(name, feature)| {
            let transformed = match feature {
                Feature::Images(images) => {
                    Feature::Images(images.iter().map(|img| op.apply(img)).collect())
                }
                Feature::Scalars(values) => Feature::Scalars(values.clone()),
            };
            (name.clone(), transformed)
        })
        .collect();
    InputBatch {
        image_ids: batch.image_ids.clone(),
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stegscore_core::FEATURE_IMAGE;

    /// Predicts the top-left pixel of the image feature — deliberately
    /// orientation-sensitive so averaging is observable.
    struct CornerModel;

    impl PredictionModel for CornerModel {
        fn required_features(&self) -> Vec<String> {
            vec![FEATURE_IMAGE.to_string()]
        }

        fn forward(&self, batch: &InputBatch) -> Result<OutputBatch> {
            let corners: Vec<f64> = match &batch.features[FEATURE_IMAGE] {
                Feature::Images(images) => {
                    images.iter().map(|img| f64::from(img.data[0])).collect()
                }
                Feature::Scalars(_) => unreachable!(),
            };
            Ok(OutputBatch {
                modification_type: corners.iter().map(|&c| vec![c, -c]).collect(),
                modification_flag: corners,
                embedding: None,
            })
        }
    }

    fn square_batch() -> InputBatch {
        let mut features = HashMap::new();
        features.insert(
            FEATURE_IMAGE.to_string(),
            Feature::Images(vec![
                ImageTensor::new(1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap()
            ]),
        );
        InputBatch::new(vec!["0001".to_string()], features).unwrap()
    }

    const KEYS: [OutputKey; 2] = [OutputKey::ModificationFlag, OutputKey::ModificationType];

    #[test]
    fn test_flip_hv_averages_four_corners() {
        let model = TtaModel::wrap(Box::new(CornerModel), TtaMode::FlipHv, &KEYS);
        let out = model.forward(&square_batch()).unwrap();
        // Corners visited: 1 (id), 2 (h), 3 (v), 4 (hv).
        assert!((out.modification_flag[0] - 2.5).abs() < 1e-12);
        assert!((out.modification_type[0][0] - 2.5).abs() < 1e-12);
        assert!((out.modification_type[0][1] + 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_d4_has_eight_variants_and_averages_corners() {
        assert_eq!(variants(TtaMode::D4).len(), 8);
        let model = TtaModel::wrap(Box::new(CornerModel), TtaMode::D4, &KEYS);
        let out = model.forward(&square_batch()).unwrap();
        // Each corner of the 2x2 image reaches the origin exactly twice.
        assert!((out.modification_flag[0] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_none_mode_returns_inner_unwrapped() {
        let model = TtaModel::wrap(Box::new(CornerModel), TtaMode::None, &KEYS);
        let out = model.forward(&square_batch()).unwrap();
        assert_eq!(out.modification_flag, vec![1.0]);
    }

    #[test]
    fn test_scalar_features_untouched_by_augmentation() {
        let op = DihedralOp { flip: true, rot: 1 };
        let mut features = HashMap::new();
        features.insert("qf".to_string(), Feature::Scalars(vec![2.0]));
        let batch = InputBatch::new(vec!["a".to_string()], features).unwrap();
        let augmented = augment_batch(&batch, op);
        assert_eq!(augmented.features["qf"], Feature::Scalars(vec![2.0]));
    }
}
