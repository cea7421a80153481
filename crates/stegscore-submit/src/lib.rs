//! Submission pipeline for stegscore
//!
//! Turns raw prediction tables into a final competition submission:
//! CSV table I/O, isotonic calibration fitted on out-of-fold predictions
//! and gated by the competition metric, multi-table blending, and
//! submission-file writing.

pub mod blend;
pub mod calibrate;
pub mod submission;
pub mod table;

pub use blend::{blend, BlendMethod};
pub use calibrate::{
    calibrate_predictions, CalibratedScores, CalibrationDiagnostics, IsotonicRegression,
};
pub use submission::{
    as_d4_tta, as_flip_hv_tta, from_binary, from_binary_calibrated, from_classifier,
    from_classifier_calibrated, from_product, infer_fold, IdFormat, Submission,
};
pub use table::{read_prediction_table, write_prediction_table};
