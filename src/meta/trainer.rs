//! Meta-model training runs over the extracted datasets.
//!
//! Two covariate families are swept, always against the same targets (the
//! base models' predictions at the final checkpoint):
//!
//! - `X ++ H`: sample pixels plus hyperparameters. Hparams exist before
//!   training, so these runs are recorded under pseudo-checkpoint -1.
//! - `X ++ W@chkpt`: sample pixels plus the base model's flat weights at an
//!   intermediate checkpoint, one run per configured checkpoint.
//!
//! Each (covariates, train_fraction) cell trains a fresh network on a
//! permutation split, persists the trained parameters, and appends a row to
//! the cumulative results table. The table is rewritten after every run so
//! an interrupted sweep loses at most the run in flight.

use anyhow::{ensure, Context, Result};
use ndarray::{concatenate, Array2, Axis};
use rand::prelude::*;

use crate::config::{Config, FINAL_CHECKPOINT, HPARAMS_CHKPT, CAT_HPARAMS};
use crate::extraction::store::{ExperimentStore, ResultRow};
use crate::extraction::{select_rows, ExtractedData};
use crate::zoo::{CnnWireframe, MetricsTable, WeightLayout};

use super::network::{EvalResult, MetaNetwork};

/// Auxiliary covariates appended to the sample pixels.
pub enum AuxCovariates<'a> {
    Hparams(&'a MetricsTable),
    Weights(&'a Array2<f32>),
}

impl AuxCovariates<'_> {
    fn to_matrix(&self) -> Result<Array2<f32>> {
        match self {
            AuxCovariates::Hparams(table) => hparams_to_matrix(table),
            AuxCovariates::Weights(matrix) => Ok((*matrix).clone()),
        }
    }
}

/// Convert a hyperparameter table to a numeric matrix.
///
/// Numeric columns parse as f32. Categorical columns are mapped to integer
/// codes over the sorted set of distinct values, so codes are stable across
/// row order.
pub fn hparams_to_matrix(table: &MetricsTable) -> Result<Array2<f32>> {
    let n = table.num_rows();
    let columns = table.columns().to_vec();
    let mut out = Array2::zeros((n, columns.len()));

    for (col_idx, column) in columns.iter().enumerate() {
        if CAT_HPARAMS.contains(&column.as_str()) {
            let mut distinct: Vec<String> = (0..n)
                .map(|r| table.str_at(r, column).map(|s| s.to_string()))
                .collect::<Result<_>>()?;
            distinct.sort();
            distinct.dedup();
            for row in 0..n {
                let value = table.str_at(row, column)?;
                let code = distinct
                    .binary_search_by(|probe| probe.as_str().cmp(value))
                    .expect("value came from this column");
                out[(row, col_idx)] = code as f32;
            }
        } else {
            for row in 0..n {
                out[(row, col_idx)] = table.f64_at(row, column)? as f32;
            }
        }
    }
    Ok(out)
}

/// Train one meta-model and evaluate it on both splits.
///
/// Covariates are `samples ++ aux` along the feature axis; the split is one
/// random permutation over rows cut at `train_fraction`. The trained
/// parameters are persisted under a checkpoint-and-fraction-qualified name.
pub fn train_meta_model_and_evaluate(
    config: &Config,
    store: &ExperimentStore,
    samples: &Array2<f32>,
    aux: AuxCovariates<'_>,
    targets: &Array2<f32>,
    chkpt: i32,
    train_fraction: f64,
) -> Result<(EvalResult, EvalResult)> {
    let aux = aux.to_matrix()?;
    ensure!(
        samples.nrows() == aux.nrows() && samples.nrows() == targets.nrows(),
        "samples ({}), aux ({}) and targets ({}) disagree on row count",
        samples.nrows(),
        aux.nrows(),
        targets.nrows()
    );

    let num_features = samples.ncols() + aux.ncols();
    let num_classes = config.dataset.num_classes();
    log::info!(
        "Training meta-model @ checkpoint {} on {:.3} fraction of {} rows ({} features)",
        chkpt,
        train_fraction,
        samples.nrows(),
        num_features
    );

    let mut rng = StdRng::seed_from_u64(config.random_seed);

    let n = samples.nrows();
    let mut permuted: Vec<usize> = (0..n).collect();
    permuted.shuffle(&mut rng);
    let cut = (train_fraction * n as f64) as usize;
    ensure!(cut > 0 && cut < n, "train fraction {} leaves an empty split", train_fraction);
    let (train_idx, test_idx) = permuted.split_at(cut);

    let covariates = concatenate(Axis(1), &[samples.view(), aux.view()])
        .context("failed to concatenate samples with aux covariates")?;
    let train_covariates = select_rows(&covariates, train_idx);
    let test_covariates = select_rows(&covariates, test_idx);
    let train_targets = select_rows(targets, train_idx);
    let test_targets = select_rows(targets, test_idx);

    let mut network = MetaNetwork::new(num_features, num_classes, config.random_seed);
    network.fit(
        &train_covariates,
        &train_targets,
        config.meta_model_epochs,
        config.meta_model_batch_size,
        &mut rng,
    )?;

    let model_path = store.model_path(config, chkpt, train_fraction);
    network.save(&model_path)?;
    log::info!("Saved meta-model to {}", model_path.display());

    let train_results = network.evaluate(&train_covariates, &train_targets)?;
    let test_results = network.evaluate(&test_covariates, &test_targets)?;
    log::info!(
        "Train acc/loss: %{:.3} / {:.3}",
        train_results.accuracy * 100.0,
        train_results.loss
    );
    log::info!(
        "Test acc/loss: %{:.3} / {:.3}",
        test_results.accuracy * 100.0,
        test_results.loss
    );

    Ok((train_results, test_results))
}

/// Sweep meta-models over all configured setups.
///
/// First the hparams-covariate runs (from the final-checkpoint extraction),
/// then the weights-covariate runs per checkpoint. Returns the full results
/// table, which is also persisted row by row.
pub fn train_over_setups(config: &Config, store: &ExperimentStore) -> Result<Vec<ResultRow>> {
    // Identical samples would make every model block carry the same pixels,
    // collapsing the meta-model's sample covariates to constants.
    ensure!(
        !config.use_identical_samples,
        "meta-model training requires per-model resampled extractions"
    );

    let mut results = store.load_results()?;

    // X ++ H against final predictions.
    let data = store.load_extraction(config, FINAL_CHECKPOINT)?;
    for &train_fraction in &config.train_fractions {
        let (train, test) = train_meta_model_and_evaluate(
            config,
            store,
            &data.samples,
            AuxCovariates::Hparams(&data.hparams),
            &data.y_preds,
            HPARAMS_CHKPT,
            train_fraction,
        )?;
        results.push(ResultRow {
            chkpt: HPARAMS_CHKPT,
            train_fraction,
            train_accuracy: train.accuracy,
            test_accuracy: test.accuracy,
        });
        store.save_results(&results)?;
    }
    drop(data);

    // X ++ W@chkpt against final predictions, one pass per checkpoint.
    let layout = {
        let (_, _, channels) = config.dataset.input_shape();
        WeightLayout::cnn_zoo(channels, config.dataset.num_classes())
    };
    for &chkpt in &config.covariate_checkpoints {
        let data = store.load_extraction(config, chkpt)?;
        verify_permutation_alignment(config, &layout, &data)?;

        for &train_fraction in &config.train_fractions {
            let (train, test) = train_meta_model_and_evaluate(
                config,
                store,
                &data.samples,
                AuxCovariates::Weights(&data.weights_chkpt),
                &data.y_preds,
                chkpt as i32,
                train_fraction,
            )?;
            results.push(ResultRow {
                chkpt: chkpt as i32,
                train_fraction,
                train_accuracy: train.accuracy,
                test_accuracy: test.accuracy,
            });
            store.save_results(&results)?;
        }
    }

    Ok(results)
}

/// Guard against decoupled permutations in stored artifacts: rebuilding the
/// first model from its stored FINAL weights (y_preds were computed from
/// final weights, never the chkpt ones) must reproduce its stored
/// prediction row.
fn verify_permutation_alignment(
    config: &Config,
    layout: &WeightLayout,
    data: &ExtractedData,
) -> Result<()> {
    ensure!(data.num_rows() > 0, "empty extraction");
    let wireframe = CnnWireframe::from_flat(
        layout,
        data.weights_final.row(0),
        config.dataset.input_shape(),
        config.dataset.num_classes(),
    )?;
    let sample = data.samples.slice(ndarray::s![0..1, ..]).to_owned();
    let prediction = wireframe.predict_batch(&sample)?;
    for (fresh, stored) in prediction.row(0).iter().zip(data.y_preds.row(0).iter()) {
        ensure!(
            (fresh - stored).abs() < 1e-2,
            "stored y_preds do not match weights: {} vs {}; artifact permutations are misaligned",
            fresh,
            stored
        );
    }
    Ok(())
}
