//! Blending of aligned submissions.
//!
//! All methods require the input submissions to list the same ids in the
//! same order; blending never reorders or joins.

use std::str::FromStr;

use tracing::info;

use stegscore_core::{Result, StegScoreError};
use stegscore_ensemble::activation::{rank_transform, winsorize, WINSORIZE_LIMITS};

use crate::submission::Submission;

/// How per-id scores from several submissions are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlendMethod {
    /// Plain arithmetic mean.
    Mean,
    /// Mean after winsorizing each submission's score column.
    WinsorizedMean {
        /// Per-tail clipping fractions.
        limits: (f64, f64),
    },
    /// Mean of per-submission fractional ranks. Invariant under any
    /// strictly increasing rescaling of the inputs.
    RankMean,
    /// Per-id median; even counts average the two middle values.
    Median,
}

impl FromStr for BlendMethod {
    type Err = StegScoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "winsorized-mean" => Ok(Self::WinsorizedMean {
                limits: WINSORIZE_LIMITS,
            }),
            "rank-mean" => Ok(Self::RankMean),
            "median" => Ok(Self::Median),
            other => Err(StegScoreError::Config(format!(
                "unknown blend method '{other}' (expected mean, winsorized-mean, rank-mean or median)"
            ))),
        }
    }
}

/// Blend two or more aligned submissions into one.
///
/// # Errors
///
/// `Config` error on an empty input list or when any submission's id
/// column differs from the first.
pub fn blend(submissions: &[Submission], method: BlendMethod) -> Result<Submission> {
    let first = submissions.first().ok_or_else(|| {
        StegScoreError::Config("blend requires at least one submission".to_string())
    })?;
    for (idx, sub) in submissions.iter().enumerate().skip(1) {
        if sub.ids != first.ids {
            return Err(StegScoreError::Config(format!(
                "submission {idx} ids do not match submission 0 (same ids in the same order required)"
            )));
        }
    }

    let columns: Vec<Vec<f64>> = match method {
        BlendMethod::Mean | BlendMethod::Median => {
            submissions.iter().map(|s| s.labels.clone()).collect()
        }
        BlendMethod::WinsorizedMean { limits } => submissions
            .iter()
            .map(|s| winsorize(&s.labels, limits))
            .collect(),
        BlendMethod::RankMean => submissions
            .iter()
            .map(|s| rank_transform(&s.labels))
            .collect(),
    };

    let n = first.ids.len();
    let k = columns.len();
    let labels: Vec<f64> = (0..n)
        .map(|i| match method {
            BlendMethod::Median => {
                let mut values: Vec<f64> = columns.iter().map(|c| c[i]).collect();
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                if k % 2 == 1 {
                    values[k / 2]
                } else {
                    (values[k / 2 - 1] + values[k / 2]) / 2.0
                }
            }
            _ => columns.iter().map(|c| c[i]).sum::<f64>() / k as f64,
        })
        .collect();

    info!(submissions = k, samples = n, ?method, "blended submissions");
    Ok(Submission {
        ids: first.ids.clone(),
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn sub(ids: &[&str], labels: &[f64]) -> Submission {
        Submission {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            labels: labels.to_vec(),
        }
    }

    #[test]
    fn test_mean_blend() {
        let a = sub(&["0001.jpg", "0002.jpg"], &[0.2, 0.8]);
        let b = sub(&["0001.jpg", "0002.jpg"], &[0.4, 0.6]);
        let out = blend(&[a, b], BlendMethod::Mean).unwrap();
        assert!((out.labels[0] - 0.3).abs() < EPS);
        assert!((out.labels[1] - 0.7).abs() < EPS);
    }

    #[test]
    fn test_median_blend_odd_and_even() {
        let ids = ["x.jpg"];
        let odd = [
            sub(&ids, &[0.1]),
            sub(&ids, &[0.9]),
            sub(&ids, &[0.5]),
        ];
        let out = blend(&odd, BlendMethod::Median).unwrap();
        assert!((out.labels[0] - 0.5).abs() < EPS);

        let even = [sub(&ids, &[0.2]), sub(&ids, &[0.8])];
        let out = blend(&even, BlendMethod::Median).unwrap();
        assert!((out.labels[0] - 0.5).abs() < EPS);
    }

    #[test]
    fn test_rank_blend_ignores_affine_rescaling() {
        let ids = ["a", "b", "c", "d"];
        let a = sub(&ids, &[0.1, 0.4, 0.2, 0.9]);
        let b = sub(&ids, &[0.5, 0.6, 0.3, 0.8]);
        // Rescale the second column; ranks are unchanged.
        let b_scaled = sub(&ids, &[5.0, 6.0, 3.0, 8.0]);

        let plain = blend(&[a.clone(), b], BlendMethod::RankMean).unwrap();
        let scaled = blend(&[a.clone(), b_scaled.clone()], BlendMethod::RankMean).unwrap();
        for (p, s) in plain.labels.iter().zip(&scaled.labels) {
            assert!((p - s).abs() < EPS);
        }

        // A plain mean is not invariant under the same rescaling.
        let mean_scaled = blend(&[a, b_scaled], BlendMethod::Mean).unwrap();
        assert!(plain
            .labels
            .iter()
            .zip(&mean_scaled.labels)
            .any(|(p, m)| (p - m).abs() > 1e-6));
    }

    #[test]
    fn test_winsorized_mean_clips_tails_per_column() {
        let ids = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        let spike = sub(&ids, &[0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 99.0]);
        let flat = sub(&ids, &[0.5; 10]);
        let out = blend(
            &[spike, flat],
            BlendMethod::WinsorizedMean {
                limits: (0.1, 0.1),
            },
        )
        .unwrap();
        // The outlier is replaced by the highest surviving value.
        assert!((out.labels[9] - 0.5).abs() < EPS);
    }

    #[test]
    fn test_mismatched_ids_rejected() {
        let a = sub(&["0001.jpg"], &[0.5]);
        let b = sub(&["0002.jpg"], &[0.5]);
        let err = blend(&[a, b], BlendMethod::Mean);
        assert!(matches!(err, Err(StegScoreError::Config(_))));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("mean".parse::<BlendMethod>().unwrap(), BlendMethod::Mean);
        assert_eq!(
            "median".parse::<BlendMethod>().unwrap(),
            BlendMethod::Median
        );
        assert!(matches!(
            "rank-mean".parse::<BlendMethod>().unwrap(),
            BlendMethod::RankMean
        ));
        assert!("voting".parse::<BlendMethod>().is_err());
    }
}
