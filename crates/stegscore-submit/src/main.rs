//! stegscore submission tool
//!
//! Turns prediction tables into competition submissions:
//!
//! ```text
//! stegscore calibrate <test.csv> <oof.csv> <output.csv>
//! stegscore blend <method> <output.csv> <input.csv> [<input.csv>...]
//! ```
//!
//! `calibrate` activates a test table, fits isotonic maps on the paired
//! out-of-fold table, applies them only where the weighted AUC improves,
//! and writes an `Id,Label` submission from the flag output. `blend`
//! combines two or more submissions with `mean`, `winsorized-mean`,
//! `rank-mean` or `median`. The id format for `calibrate` defaults to
//! `zero-pad-jpg` and can be overridden with `STEGSCORE_ID_FORMAT`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::info;

use stegscore_submit::{
    blend, calibrate_predictions, read_prediction_table, BlendMethod, IdFormat, Submission,
};

fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("calibrate") => run_calibrate(&args[1..]),
        Some("blend") => run_blend(&args[1..]),
        Some(other) => bail!("unknown command '{other}' (expected calibrate or blend)"),
        None => bail!("usage: stegscore <calibrate|blend> ..."),
    }
}

fn run_calibrate(args: &[String]) -> anyhow::Result<()> {
    let [test_path, oof_path, output_path] = args else {
        bail!("usage: stegscore calibrate <test.csv> <oof.csv> <output.csv>");
    };
    let id_format = load_id_format()?;

    let test = read_prediction_table(Path::new(test_path))
        .with_context(|| format!("reading test table {test_path}"))?;
    let oof = read_prediction_table(Path::new(oof_path))
        .with_context(|| format!("reading out-of-fold table {oof_path}"))?;

    let (scores, diagnostics) =
        calibrate_predictions(&test, &oof).context("calibration failed")?;
    info!(?diagnostics, "calibration complete");

    let submission = Submission {
        ids: scores
            .image_ids
            .iter()
            .map(|id| id_format.render(id))
            .collect(),
        labels: scores.flag,
    };
    submission
        .write_csv(Path::new(output_path))
        .with_context(|| format!("writing submission {output_path}"))?;
    Ok(())
}

fn run_blend(args: &[String]) -> anyhow::Result<()> {
    let [method, output_path, inputs @ ..] = args else {
        bail!("usage: stegscore blend <method> <output.csv> <input.csv> [<input.csv>...]");
    };
    if inputs.len() < 2 {
        bail!("blend needs at least two input submissions");
    }
    let method: BlendMethod = method.parse()?;

    let submissions = inputs
        .iter()
        .map(|p| {
            Submission::read_csv(&PathBuf::from(p)).with_context(|| format!("reading {p}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let blended = blend(&submissions, method).context("blend failed")?;
    blended
        .write_csv(Path::new(output_path))
        .with_context(|| format!("writing submission {output_path}"))?;
    Ok(())
}

/// Id format from `STEGSCORE_ID_FORMAT`, defaulting to `zero-pad-jpg`.
fn load_id_format() -> anyhow::Result<IdFormat> {
    match std::env::var("STEGSCORE_ID_FORMAT") {
        Ok(value) => Ok(value.parse()?),
        Err(std::env::VarError::NotPresent) => Ok(IdFormat::ZeroPadJpg),
        Err(e) => Err(e).context("reading STEGSCORE_ID_FORMAT"),
    }
}
