//! CNN model-zoo access.
//!
//! The zoo is a fixed archive of ~30K small CNNs, each trained under a
//! sampled hyperparameter configuration and snapshotted at 9 checkpoints.
//! Three concerns live here:
//!
//! - `schema`: the declarative layout of a flattened weight vector
//!   (which slice is which layer's bias/kernel), validated once at startup
//! - `loader`: the thin I/O wrapper over `weights.bin` + `metrics.csv`
//! - `cnn`: the fixed wireframe rebuilt from a flat vector, with batch
//!   forward inference

pub mod cnn;
pub mod loader;
pub mod schema;

pub use cnn::CnnWireframe;
pub use loader::{load_zoo, MetricsTable, WeightsArchive};
pub use schema::{LayerSlot, WeightLayout};
