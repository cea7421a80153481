//! Per-pass prediction accumulation and the distributed gather seam.
//!
//! [`PassAccumulator`] owns four parallel buffers for one evaluation pass:
//! true labels, predicted scores, quality factors, and sample ids. The
//! lifecycle is explicit — `reset` at pass start, `record_batch` per
//! batch, `finalize` at pass end — rather than being tied to framework
//! callback ordering. Activation is the caller's job; this component only
//! collects.
//!
//! In distributed mode every worker finalizes through an [`AllGather`]
//! implementation, which blocks until all participants have submitted
//! their local buffers and returns everyone's buffers in worker-rank
//! order. There is no partial or streaming aggregation, and no timeout:
//! a worker that dies mid-pass leaves the barrier hanging by design.

use std::sync::{Arc, Barrier, Mutex};

use stegscore_core::{Result, StegScoreError};

/// The four parallel buffers collected over one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassBuffers {
    /// Sample identifiers, arrival-ordered.
    pub image_ids: Vec<String>,
    /// True labels (multiclass; binarized downstream).
    pub true_labels: Vec<u8>,
    /// Predicted scores, activation already applied by the caller.
    pub scores: Vec<f64>,
    /// Quality factors; `None` when the covariate is absent.
    pub quality_factors: Vec<Option<u8>>,
}

impl PassBuffers {
    /// Number of collected samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.true_labels.len()
    }

    /// Whether no samples have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.true_labels.is_empty()
    }

    /// Append another worker's buffers, preserving their arrival order.
    pub fn extend_from(&mut self, other: PassBuffers) {
        self.image_ids.extend(other.image_ids);
        self.true_labels.extend(other.true_labels);
        self.scores.extend(other.scores);
        self.quality_factors.extend(other.quality_factors);
    }
}

/// Synchronous all-to-all collect barrier.
///
/// Returns every participating worker's buffers in worker-rank order.
/// Blocks until all participants have submitted.
pub trait AllGather {
    /// Submit this worker's buffers and receive all workers' buffers.
    fn gather(&self, local: PassBuffers) -> Result<Vec<PassBuffers>>;
}

/// Single-worker gather: returns the local buffers unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGather;

impl AllGather for LocalGather {
    fn gather(&self, local: PassBuffers) -> Result<Vec<PassBuffers>> {
        Ok(vec![local])
    }
}

/// In-process N-worker gather over a mutex-guarded slot table and a
/// barrier. One handle per worker; handles are created together by
/// [`BarrierGather::group`].
#[derive(Debug, Clone)]
pub struct BarrierGather {
    rank: usize,
    shared: Arc<GatherShared>,
}

#[derive(Debug)]
struct GatherShared {
    slots: Mutex<Vec<Option<PassBuffers>>>,
    submitted: Barrier,
    drained: Barrier,
}

impl BarrierGather {
    /// Create one gather handle per worker rank.
    #[must_use]
    pub fn group(world_size: usize) -> Vec<Self> {
        let shared = Arc::new(GatherShared {
            slots: Mutex::new(vec![None; world_size]),
            submitted: Barrier::new(world_size),
            drained: Barrier::new(world_size),
        });
        (0..world_size)
            .map(|rank| Self {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// This handle's worker rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl AllGather for BarrierGather {
    fn gather(&self, local: PassBuffers) -> Result<Vec<PassBuffers>> {
        {
            let mut slots = self
                .shared
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slots[self.rank] = Some(local);
        }
        self.shared.submitted.wait();

        let gathered: Vec<PassBuffers> = {
            let slots = self
                .shared
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slots
                .iter()
                .map(|slot| {
                    slot.clone().ok_or_else(|| {
                        StegScoreError::Config("gather slot missing a submission".to_string())
                    })
                })
                .collect::<Result<_>>()?
        };

        // Second barrier so rank 0 can clear the slots for the next pass
        // only after every worker has taken its copy.
        self.shared.drained.wait();
        if self.rank == 0 {
            let mut slots = self
                .shared
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.iter_mut().for_each(|slot| *slot = None);
        }
        Ok(gathered)
    }
}

/// Collects per-batch predictions over one evaluation pass.
#[derive(Debug, Default)]
pub struct PassAccumulator {
    buffers: PassBuffers,
}

impl PassAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all buffers. Call at pass start.
    pub fn reset(&mut self) {
        self.buffers = PassBuffers::default();
    }

    /// Append one batch of already-activated predictions.
    ///
    /// `quality_factors` may be omitted when the covariate is absent from
    /// the dataset; when present it must be batch-aligned.
    ///
    /// # Errors
    ///
    /// `Config` error on any length mismatch between the slices.
    pub fn record_batch(
        &mut self,
        image_ids: &[String],
        true_labels: &[u8],
        scores: &[f64],
        quality_factors: Option<&[u8]>,
    ) -> Result<()> {
        if image_ids.len() != true_labels.len() || true_labels.len() != scores.len() {
            return Err(StegScoreError::Config(format!(
                "batch arrays misaligned: {} ids, {} labels, {} scores",
                image_ids.len(),
                true_labels.len(),
                scores.len()
            )));
        }
        if let Some(qf) = quality_factors {
            if qf.len() != true_labels.len() {
                return Err(StegScoreError::Config(format!(
                    "batch arrays misaligned: {} labels, {} quality factors",
                    true_labels.len(),
                    qf.len()
                )));
            }
        }

        self.buffers.image_ids.extend_from_slice(image_ids);
        self.buffers.true_labels.extend_from_slice(true_labels);
        self.buffers.scores.extend_from_slice(scores);
        match quality_factors {
            Some(qf) => self
                .buffers
                .quality_factors
                .extend(qf.iter().map(|&q| Some(q))),
            None => self
                .buffers
                .quality_factors
                .extend(std::iter::repeat_n(None, true_labels.len())),
        }
        Ok(())
    }

    /// Number of samples collected so far by this worker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// End the pass: gather all workers' buffers and concatenate them in
    /// rank-major order. The local buffers are cleared.
    pub fn finalize(&mut self, gather: &dyn AllGather) -> Result<PassBuffers> {
        let local = std::mem::take(&mut self.buffers);
        let mut merged = PassBuffers::default();
        for worker in gather.gather(local)? {
            merged.extend_from(worker);
        }
        Ok(merged)
    }
}
