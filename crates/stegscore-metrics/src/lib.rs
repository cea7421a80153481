//! Competition metric and evaluation-pass plumbing for stegscore
//!
//! This crate computes the weighted partial ROC-AUC used to score
//! steganalysis predictions, accumulates per-batch predictions over an
//! evaluation pass (with distributed all-gather support), and derives the
//! stratified metric breakdown emitted to a telemetry sink.

pub mod accumulator;
pub mod report;
pub mod roc;
pub mod weighted;

pub use accumulator::{AllGather, BarrierGather, LocalGather, PassAccumulator, PassBuffers};
pub use report::{CompetitionReport, MemorySink, MetricSink, TracingSink};
pub use roc::{roc_curve, MetricError, RocCurve};
pub use weighted::{weighted_auc, weighted_auc_or_zero};
