//! metazoo - meta-models over a CNN model zoo
//!
//! Given a zoo of thousands of small CNNs trained under sampled
//! hyperparameters, metazoo studies what the zoo reveals about training:
//! can a meta-model predict a base model's converged behavior from its
//! hyperparameters, or from a snapshot of its weights mid-training?
//!
//! # Pipeline
//!
//! ```text
//! Zoo Loading → Extraction → Meta-Model Training → Plots
//!      ↓             ↓               ↓                ↓
//!  weights.bin   aligned rows    500→100→C dense   treatment effects,
//!  metrics.csv   per (model,     softmax head,     accuracy spreads,
//!                 sample)        Adam              result heatmaps
//! ```
//!
//! Every stage persists bincode artifacts under the experiment directory,
//! so stages can be rerun independently.
//!
//! A second, self-contained family of metrics lives in [`novelty`]: seen vs
//! unseen partitions of generated symbolic expressions, and the distance of
//! their asymptotic conditions from the condition they were generated for.

pub mod config;
pub mod extraction;
pub mod meta;
pub mod novelty;
pub mod plots;
pub mod zoo;

// Re-export the pipeline's core types
pub use config::{Config, Dataset, FINAL_CHECKPOINT, HPARAMS_CHKPT};
pub use extraction::store::{ExperimentStore, ResultRow};
pub use extraction::{extract_covariates_and_targets, ExtractedData, ImagePool};
pub use meta::{train_over_setups, EvalResult, MetaNetwork};
pub use zoo::{load_zoo, CnnWireframe, MetricsTable, WeightLayout, WeightsArchive};
