//! Run configuration loaded from metazoo.toml.
//!
//! Every pipeline stage takes an immutable `Config` reference; there is no
//! process-wide mutable state. Defaults are baked in so the binary runs
//! without a config file, and a standalone `metazoo.toml` can override any
//! subset of fields.
//!
//! ## Example
//!
//! ```toml
//! dataset = "mnist"
//! data-dir = "data/cnn_zoo"
//! experiment-dir = "_experiments"
//! keep-models-above-test-accuracy = 0.55
//! num-base-models = 1000
//! num-samples-per-base-model = 32
//! use-identical-samples = true
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Training-step snapshots recorded in the zoo, in row order.
pub const CHECKPOINTS: &[u32] = &[0, 1, 2, 3, 20, 40, 60, 80, 86];

/// The final training step; metrics filtering and prediction targets
/// always key off this checkpoint.
pub const FINAL_CHECKPOINT: u32 = 86;

/// Pseudo-checkpoint under which hparams-covariate runs are recorded in the
/// results table (hparams exist "before training").
pub const HPARAMS_CHKPT: i32 = -1;

/// Categorical hyperparameter columns in the zoo metrics table.
pub const CAT_HPARAMS: &[&str] = &[
    "config.optimizer",
    "config.activation",
    "config.init_method",
];

/// Numeric hyperparameter columns in the zoo metrics table.
pub const NUM_HPARAMS: &[&str] = &[
    "config.learning_rate",
    "config.init_std",
    "config.l2reg",
    "config.train_fraction",
    "config.dropout",
];

/// Numeric hyperparameters whose sampling range is log-uniform; these are
/// rounded to markers in log space.
pub const LOG_SCALE_HPARAMS: &[&str] = &[
    "config.learning_rate",
    "config.init_std",
    "config.l2reg",
];

/// All hyperparameter columns, categorical first.
pub fn all_hparams() -> Vec<&'static str> {
    CAT_HPARAMS.iter().chain(NUM_HPARAMS.iter()).copied().collect()
}

/// Metric columns broadcast per instance in the extracted dataset.
pub const ALL_METRICS: &[&str] = &["step", "train_accuracy", "test_accuracy"];

/// Which CNN-zoo collection a run operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Mnist,
    FashionMnist,
    Cifar10,
    SvhnCropped,
}

impl Dataset {
    /// Image dimensions as (rows, cols, channels).
    pub fn input_shape(&self) -> (usize, usize, usize) {
        match self {
            Dataset::Mnist | Dataset::FashionMnist => (28, 28, 1),
            Dataset::Cifar10 | Dataset::SvhnCropped => (32, 32, 3),
        }
    }

    pub fn num_classes(&self) -> usize {
        10
    }

    /// Flattened sample width.
    pub fn sample_width(&self) -> usize {
        let (r, c, ch) = self.input_shape();
        r * c * ch
    }

    /// Total rows in this collection's weights/metrics files. A handful of
    /// runs in each collection died mid-training, so the totals are not all
    /// 30_000 models x 9 checkpoints.
    pub fn expected_zoo_rows(&self) -> usize {
        match self {
            Dataset::Mnist => 269_973,
            Dataset::FashionMnist => 270_000,
            Dataset::Cifar10 => 270_000,
            Dataset::SvhnCropped => 269_892,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dataset::Mnist => "mnist",
            Dataset::FashionMnist => "fashion_mnist",
            Dataset::Cifar10 => "cifar10",
            Dataset::SvhnCropped => "svhn_cropped",
        };
        write!(f, "{}", name)
    }
}

/// Marker values to which a numeric hyperparameter column is rounded before
/// treatment-effect plotting. Sampled hparams are continuous; plots need a
/// few discrete treatment levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HparamMarkers {
    pub column: String,
    pub markers: Vec<f64>,
}

/// Immutable run configuration, passed to every pipeline stage.
#[derive(Debug, Clone)]
pub struct Config {
    /// Source file for this config (for display).
    pub source: Option<PathBuf>,

    /// Which zoo collection to analyze.
    pub dataset: Dataset,

    /// Directory holding `weights.bin` and `metrics.csv`.
    pub data_dir: PathBuf,

    /// Experiment output directory (artifacts, `_models/`, `_plots/`).
    pub experiment_dir: PathBuf,

    /// Keep only base models whose final test accuracy exceeds this.
    pub keep_models_above_test_accuracy: f64,

    /// Cap on the number of base models after filtering.
    pub num_base_models: usize,

    /// Images drawn per base model during extraction.
    pub num_samples_per_base_model: usize,

    /// Use one class-stratified batch for all base models (required for
    /// treatment-effect plots) instead of resampling per model.
    pub use_identical_samples: bool,

    /// Seed for every permutation and sampling decision.
    pub random_seed: u64,

    /// Checkpoints at which weights-covariate datasets are extracted.
    pub covariate_checkpoints: Vec<u32>,

    /// Train fractions swept during meta-model training.
    pub train_fractions: Vec<f64>,

    /// Meta-model fitting epochs.
    pub meta_model_epochs: usize,

    /// Meta-model minibatch size.
    pub meta_model_batch_size: usize,

    /// Skip the hard-coded per-dataset row-total asserts (for fixtures).
    pub run_on_test_data: bool,

    /// Number of shared samples shown in treatment-effect plots.
    pub num_samples_to_plot_te_for: usize,

    /// Rounding markers per numeric hyperparameter column.
    pub hparam_markers: Vec<HparamMarkers>,
}

/// Raw config as deserialized from TOML; every field optional.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    dataset: Option<Dataset>,
    data_dir: Option<PathBuf>,
    experiment_dir: Option<PathBuf>,
    keep_models_above_test_accuracy: Option<f64>,
    num_base_models: Option<usize>,
    num_samples_per_base_model: Option<usize>,
    use_identical_samples: Option<bool>,
    random_seed: Option<u64>,
    covariate_checkpoints: Option<Vec<u32>>,
    train_fractions: Option<Vec<f64>>,
    meta_model_epochs: Option<usize>,
    meta_model_batch_size: Option<usize>,
    run_on_test_data: Option<bool>,
    num_samples_to_plot_te_for: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            dataset: Dataset::Mnist,
            data_dir: PathBuf::from("data/cnn_zoo"),
            experiment_dir: PathBuf::from("_experiments"),
            keep_models_above_test_accuracy: 0.55,
            num_base_models: 1000,
            num_samples_per_base_model: 32,
            use_identical_samples: true,
            random_seed: 42,
            covariate_checkpoints: CHECKPOINTS.to_vec(),
            train_fractions: vec![0.1, 0.2, 0.4, 0.8],
            meta_model_epochs: 10,
            meta_model_batch_size: 256,
            run_on_test_data: false,
            num_samples_to_plot_te_for: 5,
            hparam_markers: default_hparam_markers(),
        }
    }
}

/// Marker grids mirroring the sampling ranges of the zoo sweep.
fn default_hparam_markers() -> Vec<HparamMarkers> {
    let grid = |column: &str, markers: &[f64]| HparamMarkers {
        column: column.to_string(),
        markers: markers.to_vec(),
    };
    vec![
        grid("config.learning_rate", &[5e-4, 5e-3, 5e-2]),
        grid("config.init_std", &[1e-3, 1e-2, 1e-1]),
        grid("config.l2reg", &[1e-8, 1e-6, 1e-4, 1e-2]),
        grid("config.train_fraction", &[0.1, 0.25, 0.5, 1.0]),
        grid("config.dropout", &[0.0, 0.2, 0.45, 0.7]),
    ]
}

impl Config {
    /// Load configuration from `metazoo.toml` in the given directory, or
    /// defaults if the file is missing or unreadable.
    pub fn load(directory: &Path) -> Self {
        let path = directory.join("metazoo.toml");
        if path.exists() {
            if let Some(config) = Self::load_toml(&path) {
                return config;
            }
        }
        Self::default()
    }

    fn load_toml(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let raw: RawConfig = toml::from_str(&content).ok()?;
        Some(Self::from_raw(raw, path.to_path_buf()))
    }

    fn from_raw(raw: RawConfig, source: PathBuf) -> Self {
        let defaults = Self::default();
        Self {
            source: Some(source),
            dataset: raw.dataset.unwrap_or(defaults.dataset),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            experiment_dir: raw.experiment_dir.unwrap_or(defaults.experiment_dir),
            keep_models_above_test_accuracy: raw
                .keep_models_above_test_accuracy
                .unwrap_or(defaults.keep_models_above_test_accuracy),
            num_base_models: raw.num_base_models.unwrap_or(defaults.num_base_models),
            num_samples_per_base_model: raw
                .num_samples_per_base_model
                .unwrap_or(defaults.num_samples_per_base_model),
            use_identical_samples: raw
                .use_identical_samples
                .unwrap_or(defaults.use_identical_samples),
            random_seed: raw.random_seed.unwrap_or(defaults.random_seed),
            covariate_checkpoints: raw
                .covariate_checkpoints
                .unwrap_or(defaults.covariate_checkpoints),
            train_fractions: raw.train_fractions.unwrap_or(defaults.train_fractions),
            meta_model_epochs: raw.meta_model_epochs.unwrap_or(defaults.meta_model_epochs),
            meta_model_batch_size: raw
                .meta_model_batch_size
                .unwrap_or(defaults.meta_model_batch_size),
            run_on_test_data: raw.run_on_test_data.unwrap_or(defaults.run_on_test_data),
            num_samples_to_plot_te_for: raw
                .num_samples_to_plot_te_for
                .unwrap_or(defaults.num_samples_to_plot_te_for),
            hparam_markers: defaults.hparam_markers,
        }
    }

    /// Validate cross-field invariants once at startup.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.keep_models_above_test_accuracy) {
            bail!(
                "keep-models-above-test-accuracy must be in [0, 1), got {}",
                self.keep_models_above_test_accuracy
            );
        }
        if self.num_base_models == 0 || self.num_samples_per_base_model == 0 {
            bail!("num-base-models and num-samples-per-base-model must be positive");
        }
        for chkpt in &self.covariate_checkpoints {
            if !CHECKPOINTS.contains(chkpt) {
                bail!("unknown checkpoint {}; zoo records {:?}", chkpt, CHECKPOINTS);
            }
        }
        for fraction in &self.train_fractions {
            if !(*fraction > 0.0 && *fraction <= 1.0) {
                bail!("train fraction {} outside (0, 1]", fraction);
            }
        }
        Ok(())
    }

    /// Consistent suffix for per-checkpoint artifact names. Encodes the two
    /// global flags so artifacts from incompatible runs never collide.
    pub fn file_suffix(&self, chkpt: u32) -> String {
        format!(
            "_@_epoch_{}_test_acc>{}_identical_samples_{}",
            chkpt, self.keep_models_above_test_accuracy, self.use_identical_samples
        )
    }

    /// Directory for trained meta-model checkpoints.
    pub fn models_dir(&self) -> PathBuf {
        self.experiment_dir.join("_models")
    }

    /// Directory for PNG plots.
    pub fn plots_dir(&self) -> PathBuf {
        self.experiment_dir.join("_plots")
    }

    /// Rounding markers for a numeric hyperparameter column, if configured.
    pub fn markers_for(&self, column: &str) -> Option<&[f64]> {
        self.hparam_markers
            .iter()
            .find(|m| m.column == column)
            .map(|m| m.markers.as_slice())
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();
        match &self.source {
            Some(source) => lines.push(format!("   Config: {}", source.display())),
            None => lines.push("   Config: (defaults)".to_string()),
        }
        lines.push(format!("   Dataset: {}", self.dataset));
        lines.push(format!("   Data dir: {}", self.data_dir.display()));
        lines.push(format!("   Experiment dir: {}", self.experiment_dir.display()));
        lines.push(format!(
            "   Keep models above test acc: {}",
            self.keep_models_above_test_accuracy
        ));
        lines.push(format!(
            "   Base models: {} x {} samples (identical = {})",
            self.num_base_models, self.num_samples_per_base_model, self.use_identical_samples
        ));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn test_file_suffix_encodes_flags() {
        let config = Config::default();
        let suffix = config.file_suffix(86);
        assert!(suffix.contains("epoch_86"));
        assert!(suffix.contains("0.55"));
        assert!(suffix.contains("true"));

        let other = Config {
            use_identical_samples: false,
            ..Config::default()
        };
        assert_ne!(suffix, other.file_suffix(86), "flags must change the suffix");
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = Config {
            keep_models_above_test_accuracy: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_checkpoint() {
        let config = Config {
            covariate_checkpoints: vec![0, 7],
            ..Config::default()
        };
        assert!(config.validate().is_err(), "7 is not a zoo checkpoint");
    }

    #[test]
    fn test_toml_overrides_subset() {
        let raw: RawConfig = toml::from_str(
            r#"
            dataset = "cifar10"
            num-base-models = 50
            "#,
        )
        .unwrap();
        let config = Config::from_raw(raw, PathBuf::from("metazoo.toml"));
        assert_eq!(config.dataset, Dataset::Cifar10);
        assert_eq!(config.num_base_models, 50);
        // Untouched fields keep defaults
        assert_eq!(config.num_samples_per_base_model, 32);
    }

    #[test]
    fn test_dataset_shapes() {
        assert_eq!(Dataset::Mnist.sample_width(), 784);
        assert_eq!(Dataset::Cifar10.sample_width(), 3072);
        assert_eq!(Dataset::Mnist.expected_zoo_rows(), 269_973);
    }
}
