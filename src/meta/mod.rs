//! Meta-model training.
//!
//! A meta-model is a small classifier trained to predict a base model's
//! output from covariates describing that base model (its hyperparameters,
//! or its weights at some checkpoint) plus the input sample, without running
//! the base model at inference time.
//!
//! - `network`: the 3-layer dense classifier (500 -> 100 -> classes) with
//!   Adam and categorical cross-entropy
//! - `trainer`: train/test splitting, covariate assembly, the sweep over
//!   checkpoints and train fractions, and the cumulative results table

pub mod network;
pub mod trainer;

pub use network::{EvalResult, MetaNetwork};
pub use trainer::{
    hparams_to_matrix, train_meta_model_and_evaluate, train_over_setups, AuxCovariates,
};
