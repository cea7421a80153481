//! Prediction-table CSV I/O.
//!
//! Tables are UTF-8 CSV with required columns `image_id`,
//! `pred_modification_flag` (float logit) and `pred_modification_type`
//! (string-encoded array literal `"[v0, v1, ..., vC-1]"` of logits), plus
//! optional `true_modification_flag` / `true_modification_type` columns
//! on out-of-fold tables. A missing required column or an unparseable
//! value is a fatal schema error naming the file and column.

use std::path::Path;

use stegscore_core::{
    PredictionRecord, PredictionTable, Result, StegScoreError, COLUMN_IMAGE_ID, COLUMN_PRED_FLAG,
    COLUMN_PRED_TYPE, COLUMN_TRUE_FLAG, COLUMN_TRUE_TYPE,
};

fn schema_err(file: &Path, message: impl Into<String>) -> StegScoreError {
    StegScoreError::Schema {
        file: file.display().to_string(),
        message: message.into(),
    }
}

/// Parse a string-encoded logit array literal like `"[0.1, -2.3, 4.5]"`.
pub fn parse_logit_array(text: &str) -> Option<Vec<f64>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect()
}

/// Format a logit array the way the tables store it.
#[must_use]
pub fn format_logit_array(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Read a prediction table from CSV.
pub fn read_prediction_table(path: &Path) -> Result<PredictionTable> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| schema_err(path, format!("cannot open: {e}")))?;

    let headers = reader
        .headers()
        .map_err(|e| schema_err(path, format!("cannot read header: {e}")))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let required = |name: &str| {
        column(name).ok_or_else(|| schema_err(path, format!("missing column '{name}'")))
    };

    let id_col = required(COLUMN_IMAGE_ID)?;
    let flag_col = required(COLUMN_PRED_FLAG)?;
    let type_col = required(COLUMN_PRED_TYPE)?;
    let true_flag_col = column(COLUMN_TRUE_FLAG);
    let true_type_col = column(COLUMN_TRUE_TYPE);

    let mut table = PredictionTable::default();
    for (row_idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| schema_err(path, format!("row {}: {e}", row_idx + 2)))?;
        let field = |col: usize| row.get(col).unwrap_or_default();

        let flag_logit: f64 = field(flag_col).parse().map_err(|_| {
            schema_err(
                path,
                format!(
                    "column '{COLUMN_PRED_FLAG}' row {}: not a float: '{}'",
                    row_idx + 2,
                    field(flag_col)
                ),
            )
        })?;
        let type_logits = parse_logit_array(field(type_col)).ok_or_else(|| {
            schema_err(
                path,
                format!(
                    "column '{COLUMN_PRED_TYPE}' row {}: not an array literal: '{}'",
                    row_idx + 2,
                    field(type_col)
                ),
            )
        })?;

        let parse_truth = |col: Option<usize>, name: &str| -> Result<Option<u8>> {
            match col {
                None => Ok(None),
                Some(c) => {
                    let raw = field(c);
                    if raw.is_empty() {
                        return Ok(None);
                    }
                    // Truth columns may be written as "1" or "1.0".
                    raw.parse::<f64>()
                        .map(|v| Some(v as u8))
                        .map_err(|_| {
                            schema_err(
                                path,
                                format!("column '{name}' row {}: not a label: '{raw}'", row_idx + 2),
                            )
                        })
                }
            }
        };

        table.records.push(PredictionRecord {
            image_id: field(id_col).to_string(),
            flag_logit,
            type_logits,
            true_flag: parse_truth(true_flag_col, COLUMN_TRUE_FLAG)?,
            true_type: parse_truth(true_type_col, COLUMN_TRUE_TYPE)?,
        });
    }
    Ok(table)
}

/// Write a prediction table to CSV. Ground-truth columns are emitted
/// only when the table carries them.
pub fn write_prediction_table(path: &Path, table: &PredictionTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| schema_err(path, format!("cannot create: {e}")))?;

    let with_truth = table.has_ground_truth();
    let mut header = vec![COLUMN_IMAGE_ID, COLUMN_PRED_FLAG, COLUMN_PRED_TYPE];
    if with_truth {
        header.push(COLUMN_TRUE_FLAG);
        header.push(COLUMN_TRUE_TYPE);
    }
    writer
        .write_record(&header)
        .map_err(|e| schema_err(path, format!("write failed: {e}")))?;

    for record in &table.records {
        let mut row = vec![
            record.image_id.clone(),
            record.flag_logit.to_string(),
            format_logit_array(&record.type_logits),
        ];
        if with_truth {
            row.push(record.true_flag.map(|v| v.to_string()).unwrap_or_default());
            row.push(record.true_type.map(|v| v.to_string()).unwrap_or_default());
        }
        writer
            .write_record(&row)
            .map_err(|e| schema_err(path, format!("write failed: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| schema_err(path, format!("flush failed: {e}")))?;
    Ok(())
}
