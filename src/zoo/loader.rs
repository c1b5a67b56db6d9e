//! Thin I/O wrapper over the zoo archive files.
//!
//! Two files per collection, loaded once per run:
//! - `weights.bin`: bincode-encoded dense matrix, one flattened model per row
//! - `metrics.csv`: one row per (model, checkpoint) with `step`,
//!   `train_accuracy`, `test_accuracy`, and the hyperparameter columns
//!
//! The only check performed here is the row-count cross-check between the
//! two files; everything else is the extractor's job.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// On-disk form of the dense weights matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsArchive {
    pub rows: usize,
    pub cols: usize,
    /// Row-major flattened values, `rows * cols` long.
    pub data: Vec<f32>,
}

impl WeightsArchive {
    pub fn from_matrix(matrix: &Array2<f32>) -> Self {
        Self {
            rows: matrix.nrows(),
            cols: matrix.ncols(),
            data: matrix.iter().copied().collect(),
        }
    }

    pub fn into_matrix(self) -> Result<Array2<f32>> {
        if self.data.len() != self.rows * self.cols {
            bail!(
                "weights archive claims {}x{} but holds {} values",
                self.rows,
                self.cols,
                self.data.len()
            );
        }
        Array2::from_shape_vec((self.rows, self.cols), self.data)
            .context("weights archive shape mismatch")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open weights archive: {}", path.display()))?;
        bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("failed to decode weights archive: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create weights archive: {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .with_context(|| format!("failed to encode weights archive: {}", path.display()))
    }
}

/// In-memory metrics table: named columns over string cells, parsed on
/// access. Small enough (~270K rows x ~15 cols) that this is fine.
#[derive(Debug, Clone)]
pub struct MetricsTable {
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl MetricsTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                bail!(
                    "metrics row {} has {} cells, expected {}",
                    i,
                    row.len(),
                    columns.len()
                );
            }
        }
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Ok(Self { columns, column_index, rows })
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open metrics csv: {}", path.display()))?;
        let columns: Vec<String> = reader
            .headers()
            .context("metrics csv has no header row")?
            .iter()
            .map(|h| h.to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("malformed metrics csv record")?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }
        Self::new(columns, rows)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn col(&self, name: &str) -> Result<usize> {
        self.column_index
            .get(name)
            .copied()
            .with_context(|| format!("metrics table has no column `{}`", name))
    }

    /// Raw cell as text (categorical columns).
    pub fn str_at(&self, row: usize, column: &str) -> Result<&str> {
        let col = self.col(column)?;
        Ok(&self.rows[row][col])
    }

    /// Cell parsed as f64 (numeric columns).
    pub fn f64_at(&self, row: usize, column: &str) -> Result<f64> {
        let value = self.str_at(row, column)?;
        value
            .parse()
            .with_context(|| format!("column `{}` row {}: `{}` is not numeric", column, row, value))
    }

    /// Indices of rows whose `step` column equals the given checkpoint.
    pub fn rows_where_step(&self, step: u32) -> Result<Vec<usize>> {
        let col = self.col("step")?;
        let needle = step.to_string();
        Ok(self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                // steps may be written as "86" or "86.0"
                let cell = &row[col];
                cell == &needle
                    || cell.parse::<f64>().map(|v| v == step as f64).unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect())
    }

    /// New table containing the given rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            column_index: self.column_index.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// New table containing only the named columns, all rows.
    pub fn project(&self, columns: &[&str]) -> Result<Self> {
        let picked: Vec<usize> = columns
            .iter()
            .map(|c| self.col(c))
            .collect::<Result<_>>()?;
        let rows = self
            .rows
            .iter()
            .map(|row| picked.iter().map(|&c| row[c].clone()).collect())
            .collect();
        MetricsTable::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    /// Repeat every row `times` times, preserving order. Used to broadcast
    /// per-model rows across each model's sample block.
    pub fn repeat_rows(&self, times: usize) -> Self {
        let rows = self
            .rows
            .iter()
            .flat_map(|row| std::iter::repeat(row.clone()).take(times))
            .collect();
        Self {
            columns: self.columns.clone(),
            column_index: self.column_index.clone(),
            rows,
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create csv: {}", path.display()))?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush().context("failed to flush csv")
    }
}

/// Load the weights matrix and metrics table for the configured collection.
/// Fails when the row counts disagree.
pub fn load_zoo(config: &Config) -> Result<(Array2<f32>, MetricsTable)> {
    log::info!("Loading CNN zoo weights and metrics for {}...", config.dataset);

    let weights = WeightsArchive::load(&config.data_dir.join("weights.bin"))?.into_matrix()?;
    let metrics = MetricsTable::from_csv(&config.data_dir.join("metrics.csv"))?;

    if weights.nrows() != metrics.num_rows() {
        bail!(
            "zoo archive mismatch: {} weight rows vs {} metric rows",
            weights.nrows(),
            metrics.num_rows()
        );
    }

    log::info!("Loaded {} rows x {} weights per row", weights.nrows(), weights.ncols());
    Ok((weights, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn tiny_table() -> MetricsTable {
        MetricsTable::new(
            vec!["step".into(), "test_accuracy".into(), "config.optimizer".into()],
            vec![
                vec!["0".into(), "0.1".into(), "adam".into()],
                vec!["86".into(), "0.9".into(), "adam".into()],
                vec!["0".into(), "0.2".into(), "sgd".into()],
                vec!["86.0".into(), "0.7".into(), "sgd".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rows_where_step_handles_float_cells() {
        let table = tiny_table();
        assert_eq!(table.rows_where_step(0).unwrap(), vec![0, 2]);
        // "86.0" must match step 86 too
        assert_eq!(table.rows_where_step(86).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_select_preserves_order() {
        let table = tiny_table();
        let picked = table.select(&[3, 0]);
        assert_eq!(picked.num_rows(), 2);
        assert_eq!(picked.f64_at(0, "test_accuracy").unwrap(), 0.7);
        assert_eq!(picked.f64_at(1, "test_accuracy").unwrap(), 0.1);
    }

    #[test]
    fn test_repeat_rows_broadcasts() {
        let table = tiny_table().select(&[1, 3]).repeat_rows(3);
        assert_eq!(table.num_rows(), 6);
        assert_eq!(table.str_at(0, "config.optimizer").unwrap(), "adam");
        assert_eq!(table.str_at(2, "config.optimizer").unwrap(), "adam");
        assert_eq!(table.str_at(3, "config.optimizer").unwrap(), "sgd");
    }

    #[test]
    fn test_missing_column_is_error() {
        let table = tiny_table();
        assert!(table.f64_at(0, "no_such_column").is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = MetricsTable::new(
            vec!["a".into(), "b".into()],
            vec![vec!["1".into()]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_weights_archive_roundtrip() {
        let matrix = array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let archive = WeightsArchive::from_matrix(&matrix);
        let restored = archive.into_matrix().unwrap();
        assert_eq!(restored, matrix);
    }

    #[test]
    fn test_weights_archive_rejects_bad_shape() {
        let archive = WeightsArchive { rows: 2, cols: 3, data: vec![0.0; 5] };
        assert!(archive.into_matrix().is_err());
    }
}
