//! Batched inference into a prediction table.

use tracing::info;

use stegscore_core::{
    InputBatch, PredictionModel, PredictionRecord, PredictionTable, Result, StegScoreError,
};

/// Run a composed model over a sequence of batches and collect one raw
/// prediction record per sample, in arrival order.
///
/// Ground-truth columns are left empty; they are only present in
/// out-of-fold tables produced by the training pipeline.
pub fn compute_predictions(
    model: &dyn PredictionModel,
    batches: impl IntoIterator<Item = InputBatch>,
) -> Result<PredictionTable> {
    let mut table = PredictionTable::default();
    for batch in batches {
        let output = model.forward(&batch)?;
        if output.len() != batch.len() {
            return Err(StegScoreError::Config(format!(
                "model returned {} predictions for a batch of {}",
                output.len(),
                batch.len()
            )));
        }
        for (i, image_id) in batch.image_ids.iter().enumerate() {
            table.records.push(PredictionRecord {
                image_id: image_id.clone(),
                flag_logit: output.modification_flag[i],
                type_logits: output.modification_type[i].clone(),
                true_flag: None,
                true_type: None,
            });
        }
    }
    info!(samples = table.len(), "computed predictions");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stegscore_core::{Feature, OutputBatch};

    struct EchoModel;

    impl PredictionModel for EchoModel {
        fn required_features(&self) -> Vec<String> {
            vec!["x".to_string()]
        }

        fn forward(&self, batch: &InputBatch) -> Result<OutputBatch> {
            let values = match &batch.features["x"] {
                Feature::Scalars(v) => v.clone(),
                Feature::Images(_) => unreachable!(),
            };
            Ok(OutputBatch {
                modification_flag: values.iter().map(|&v| f64::from(v)).collect(),
                modification_type: values.iter().map(|&v| vec![f64::from(v); 4]).collect(),
                embedding: None,
            })
        }
    }

    fn batch(ids: &[&str], values: &[f32]) -> InputBatch {
        let mut features = HashMap::new();
        features.insert("x".to_string(), Feature::Scalars(values.to_vec()));
        InputBatch::new(ids.iter().map(|s| s.to_string()).collect(), features).unwrap()
    }

    #[test]
    fn test_collects_records_in_arrival_order() {
        let batches = vec![batch(&["a", "b"], &[0.1, 0.2]), batch(&["c"], &[0.3])];
        let table = compute_predictions(&EchoModel, batches).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.records[0].image_id, "a");
        assert_eq!(table.records[2].image_id, "c");
        assert!((table.records[2].flag_logit - 0.3).abs() < 1e-6);
        assert!(table.records.iter().all(|r| r.true_flag.is_none()));
    }
}
