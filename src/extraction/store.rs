//! Experiment-directory artifact persistence.
//!
//! Extraction is expensive (inference over up to a thousand rebuilt CNNs),
//! so each checkpoint's seven arrays are written to disk once and re-read by
//! the trainer and the plotters. Layout:
//!
//! ```text
//! <experiment-dir>/
//!   samples<suffix>.bin      y_preds<suffix>.bin     y_trues<suffix>.bin
//!   hparams<suffix>.bin      w_chkpt<suffix>.bin     w_final<suffix>.bin
//!   metrics<suffix>.bin
//!   all_results.bin          # cumulative meta-model results table
//!   _models/                 # trained meta-model checkpoints
//!   _plots/                  # PNG output
//! ```
//!
//! `<suffix>` encodes the checkpoint plus the two global flags (accuracy
//! threshold, identical-samples), so artifacts from incompatible runs never
//! alias. Everything is bincode; these are single-machine scratch files, not
//! an interchange format.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::zoo::MetricsTable;

use super::ExtractedData;

/// Serializable mirror of `MetricsTable`.
#[derive(Debug, Serialize, Deserialize)]
struct SavedTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SavedTable {
    fn from_table(table: &MetricsTable) -> Self {
        let columns: Vec<String> = table.columns().to_vec();
        let rows = (0..table.num_rows())
            .map(|r| {
                columns
                    .iter()
                    .map(|c| table.str_at(r, c).expect("column exists").to_string())
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    fn into_table(self) -> Result<MetricsTable> {
        MetricsTable::new(self.columns, self.rows)
    }
}

/// One meta-model training outcome, appended to the cumulative table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResultRow {
    /// Checkpoint of the weight covariates, or -1 for hparams covariates.
    pub chkpt: i32,
    pub train_fraction: f64,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
}

/// Handle on the experiment directory.
pub struct ExperimentStore {
    root: PathBuf,
}

impl ExperimentStore {
    /// Open the experiment directory, creating it and its `_models/` /
    /// `_plots/` subdirectories if needed.
    pub fn open(config: &Config) -> Result<Self> {
        let root = config.experiment_dir.clone();
        for dir in [&root, &config.models_dir(), &config.plots_dir()] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory: {}", dir.display()))?;
        }
        Ok(Self { root })
    }

    fn path(&self, stem: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{}{}.bin", stem, suffix))
    }

    /// Persist all seven parts of one extraction.
    pub fn save_extraction(&self, config: &Config, chkpt: u32, data: &ExtractedData) -> Result<()> {
        let suffix = config.file_suffix(chkpt);
        write_bincode(&self.path("samples", &suffix), &data.samples)?;
        write_bincode(&self.path("y_preds", &suffix), &data.y_preds)?;
        write_bincode(&self.path("y_trues", &suffix), &data.y_trues)?;
        write_bincode(&self.path("hparams", &suffix), &SavedTable::from_table(&data.hparams))?;
        write_bincode(&self.path("w_chkpt", &suffix), &data.weights_chkpt)?;
        write_bincode(&self.path("w_final", &suffix), &data.weights_final)?;
        write_bincode(&self.path("metrics", &suffix), &SavedTable::from_table(&data.metrics))?;
        log::info!("Saved extraction artifacts for checkpoint {}", chkpt);
        Ok(())
    }

    /// Load all seven parts of one extraction; re-checks alignment.
    pub fn load_extraction(&self, config: &Config, chkpt: u32) -> Result<ExtractedData> {
        let suffix = config.file_suffix(chkpt);
        let data = ExtractedData {
            samples: read_bincode(&self.path("samples", &suffix))?,
            y_preds: read_bincode(&self.path("y_preds", &suffix))?,
            y_trues: read_bincode(&self.path("y_trues", &suffix))?,
            hparams: read_bincode::<SavedTable>(&self.path("hparams", &suffix))?.into_table()?,
            weights_chkpt: read_bincode(&self.path("w_chkpt", &suffix))?,
            weights_final: read_bincode(&self.path("w_final", &suffix))?,
            metrics: read_bincode::<SavedTable>(&self.path("metrics", &suffix))?.into_table()?,
        };
        data.assert_aligned()?;
        Ok(data)
    }

    /// Load the cumulative results table, or empty if none exists yet.
    pub fn load_results(&self) -> Result<Vec<ResultRow>> {
        let path = self.root.join("all_results.bin");
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_bincode(&path)
    }

    /// Overwrite the cumulative results table. Called after every training
    /// run so a crashed sweep loses at most one row.
    pub fn save_results(&self, results: &[ResultRow]) -> Result<()> {
        write_bincode(&self.root.join("all_results.bin"), &results.to_vec())
    }

    /// Path for a trained meta-model checkpoint, qualified by the accuracy
    /// threshold, the covariate checkpoint, and the train fraction.
    pub fn model_path(&self, config: &Config, chkpt: i32, train_fraction: f64) -> PathBuf {
        config.models_dir().join(format!(
            "model_weights_min_acc_{}_chkpt_{}_train_fraction_{}",
            config.keep_models_above_test_accuracy, chkpt, train_fraction
        ))
    }
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create artifact: {}", path.display()))?;
    bincode::serialize_into(BufWriter::new(file), value)
        .with_context(|| format!("failed to encode artifact: {}", path.display()))
}

fn read_bincode<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("failed to open artifact: {}", path.display()))?;
    bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("failed to decode artifact: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn scratch_config(name: &str) -> Config {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        Config {
            experiment_dir: dir,
            ..Config::default()
        }
    }

    fn tiny_extraction() -> ExtractedData {
        let table = MetricsTable::new(
            vec!["step".into(), "test_accuracy".into()],
            vec![
                vec!["86".into(), "0.9".into()],
                vec!["86".into(), "0.8".into()],
            ],
        )
        .unwrap();
        ExtractedData {
            samples: array![[0.1f32, 0.2], [0.3, 0.4]],
            y_preds: array![[0.9f32, 0.1], [0.2, 0.8]],
            y_trues: array![[1.0f32, 0.0], [0.0, 1.0]],
            hparams: table.clone(),
            weights_chkpt: array![[1.0f32], [2.0]],
            weights_final: array![[3.0f32], [4.0]],
            metrics: table,
        }
    }

    #[test]
    fn test_extraction_roundtrip() -> Result<()> {
        let config = scratch_config("metazoo_test_store_roundtrip");
        let store = ExperimentStore::open(&config)?;
        let data = tiny_extraction();

        store.save_extraction(&config, 20, &data)?;
        let loaded = store.load_extraction(&config, 20)?;

        assert_eq!(loaded.samples, data.samples);
        assert_eq!(loaded.y_preds, data.y_preds);
        assert_eq!(loaded.weights_final, data.weights_final);
        assert_eq!(loaded.metrics.num_rows(), 2);
        assert_eq!(loaded.hparams.str_at(1, "test_accuracy")?, "0.8");

        std::fs::remove_dir_all(&config.experiment_dir)?;
        Ok(())
    }

    #[test]
    fn test_suffix_isolation_between_checkpoints() -> Result<()> {
        let config = scratch_config("metazoo_test_store_suffix");
        let store = ExperimentStore::open(&config)?;
        let data = tiny_extraction();

        store.save_extraction(&config, 20, &data)?;
        // Checkpoint 40 was never saved; loading it must fail.
        assert!(store.load_extraction(&config, 40).is_err());

        std::fs::remove_dir_all(&config.experiment_dir)?;
        Ok(())
    }

    #[test]
    fn test_results_table_accumulates() -> Result<()> {
        let config = scratch_config("metazoo_test_store_results");
        let store = ExperimentStore::open(&config)?;

        assert!(store.load_results()?.is_empty(), "fresh store has no results");

        let mut results = vec![ResultRow {
            chkpt: -1,
            train_fraction: 0.1,
            train_accuracy: 0.8,
            test_accuracy: 0.7,
        }];
        store.save_results(&results)?;

        results.push(ResultRow {
            chkpt: 20,
            train_fraction: 0.5,
            train_accuracy: 0.9,
            test_accuracy: 0.85,
        });
        store.save_results(&results)?;

        let loaded = store.load_results()?;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].chkpt, 20);

        std::fs::remove_dir_all(&config.experiment_dir)?;
        Ok(())
    }

    #[test]
    fn test_model_path_qualification() {
        let config = scratch_config("metazoo_test_store_modelpath");
        let store = ExperimentStore { root: config.experiment_dir.clone() };
        let path = store.model_path(&config, 20, 0.5);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.contains("min_acc_0.55"));
        assert!(name.contains("chkpt_20"));
        assert!(name.contains("train_fraction_0.5"));
    }
}
