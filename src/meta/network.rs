//! The 3-layer dense meta-model.
//!
//! Architecture, fixed by the study design:
//!
//! ```text
//! input (samples ++ aux covariates)
//!   -> dense 500, ReLU
//!   -> dense 100, ReLU
//!   -> dense num_classes, softmax
//! ```
//!
//! Categorical cross-entropy loss, Adam with the stock hyperparameters
//! (lr 1e-3, beta1 0.9, beta2 0.999). Everything is a plain ndarray
//! forward/backward pass; with at most a few thousand features and a few
//! tens of thousands of rows, minibatch epochs on one core are quick.

use anyhow::{ensure, Context, Result};
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

const HIDDEN_1: usize = 500;
const HIDDEN_2: usize = 100;

const ADAM_LR: f32 = 1e-3;
const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-7;

/// (loss, accuracy) over one dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub loss: f64,
    pub accuracy: f64,
}

/// One dense layer's parameters plus its Adam moments.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dense {
    /// (in_features, out_features)
    weights: Array2<f32>,
    bias: Array1<f32>,
    m_weights: Array2<f32>,
    v_weights: Array2<f32>,
    m_bias: Array1<f32>,
    v_bias: Array1<f32>,
}

impl Dense {
    fn new(in_features: usize, out_features: usize, rng: &mut StdRng) -> Self {
        // Glorot uniform
        let limit = (6.0 / (in_features + out_features) as f32).sqrt();
        let weights = Array2::from_shape_fn((in_features, out_features), |_| {
            rng.gen_range(-limit..limit)
        });
        Self {
            weights,
            bias: Array1::zeros(out_features),
            m_weights: Array2::zeros((in_features, out_features)),
            v_weights: Array2::zeros((in_features, out_features)),
            m_bias: Array1::zeros(out_features),
            v_bias: Array1::zeros(out_features),
        }
    }

    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        input.dot(&self.weights) + &self.bias
    }

    /// Adam parameter update. `t` is the 1-based step count.
    fn adam_step(&mut self, grad_w: &Array2<f32>, grad_b: &Array1<f32>, t: i32) {
        let bc1 = 1.0 - ADAM_BETA1.powi(t);
        let bc2 = 1.0 - ADAM_BETA2.powi(t);

        self.m_weights = &self.m_weights * ADAM_BETA1 + grad_w * (1.0 - ADAM_BETA1);
        self.v_weights = &self.v_weights * ADAM_BETA2 + &grad_w.mapv(|g| g * g) * (1.0 - ADAM_BETA2);
        let update = (&self.m_weights / bc1)
            / ((&self.v_weights / bc2).mapv(f32::sqrt) + ADAM_EPS);
        self.weights = &self.weights - &(update * ADAM_LR);

        self.m_bias = &self.m_bias * ADAM_BETA1 + grad_b * (1.0 - ADAM_BETA1);
        self.v_bias = &self.v_bias * ADAM_BETA2 + &grad_b.mapv(|g| g * g) * (1.0 - ADAM_BETA2);
        let update = (&self.m_bias / bc1) / ((&self.v_bias / bc2).mapv(f32::sqrt) + ADAM_EPS);
        self.bias = &self.bias - &(update * ADAM_LR);
    }
}

/// The meta-model: two ReLU hidden layers and a softmax head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaNetwork {
    input_dim: usize,
    num_classes: usize,
    layer1: Dense,
    layer2: Dense,
    output: Dense,
    /// Adam step counter, shared across layers.
    steps: i32,
}

impl MetaNetwork {
    pub fn new(input_dim: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            input_dim,
            num_classes,
            layer1: Dense::new(input_dim, HIDDEN_1, &mut rng),
            layer2: Dense::new(HIDDEN_1, HIDDEN_2, &mut rng),
            output: Dense::new(HIDDEN_2, num_classes, &mut rng),
            steps: 0,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Forward pass returning class probabilities, (n, num_classes).
    pub fn predict(&self, covariates: &Array2<f32>) -> Result<Array2<f32>> {
        ensure!(
            covariates.ncols() == self.input_dim,
            "covariate width {} does not match declared input dim {}",
            covariates.ncols(),
            self.input_dim
        );
        let a1 = relu(self.layer1.forward(covariates));
        let a2 = relu(self.layer2.forward(&a1));
        Ok(softmax_rows(self.output.forward(&a2)))
    }

    /// Fit with minibatch Adam for the given number of epochs. Rows are
    /// reshuffled every epoch with the caller's RNG.
    pub fn fit(
        &mut self,
        covariates: &Array2<f32>,
        targets: &Array2<f32>,
        epochs: usize,
        batch_size: usize,
        rng: &mut StdRng,
    ) -> Result<()> {
        ensure!(
            covariates.nrows() == targets.nrows(),
            "covariates and targets disagree on row count"
        );
        ensure!(
            covariates.ncols() == self.input_dim,
            "covariate width {} does not match declared input dim {}",
            covariates.ncols(),
            self.input_dim
        );
        ensure!(batch_size > 0, "batch size must be positive");

        let n = covariates.nrows();
        let mut order: Vec<usize> = (0..n).collect();

        for epoch in 0..epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0f64;

            for chunk in order.chunks(batch_size) {
                let x = gather(covariates, chunk);
                let y = gather(targets, chunk);
                epoch_loss += self.train_batch(&x, &y) * chunk.len() as f64;
            }

            log::debug!("epoch {}: mean loss {:.5}", epoch, epoch_loss / n as f64);
        }
        Ok(())
    }

    /// One minibatch forward/backward/update; returns mean batch loss.
    fn train_batch(&mut self, x: &Array2<f32>, y: &Array2<f32>) -> f64 {
        let batch = x.nrows() as f32;

        // Forward, keeping activations for backprop.
        let z1 = self.layer1.forward(x);
        let a1 = relu(z1.clone());
        let z2 = self.layer2.forward(&a1);
        let a2 = relu(z2.clone());
        let probs = softmax_rows(self.output.forward(&a2));

        let loss = cross_entropy(&probs, y);

        // Softmax + cross-entropy collapse to (p - y) at the head.
        let delta_out = (&probs - y) / batch;
        let grad_w_out = a2.t().dot(&delta_out);
        let grad_b_out = delta_out.sum_axis(Axis(0));

        let delta2 = delta_out.dot(&self.output.weights.t()) * relu_grad(&z2);
        let grad_w2 = a1.t().dot(&delta2);
        let grad_b2 = delta2.sum_axis(Axis(0));

        let delta1 = delta2.dot(&self.layer2.weights.t()) * relu_grad(&z1);
        let grad_w1 = x.t().dot(&delta1);
        let grad_b1 = delta1.sum_axis(Axis(0));

        self.steps += 1;
        let t = self.steps;
        self.output.adam_step(&grad_w_out, &grad_b_out, t);
        self.layer2.adam_step(&grad_w2, &grad_b2, t);
        self.layer1.adam_step(&grad_w1, &grad_b1, t);

        loss
    }

    /// Mean cross-entropy loss and argmax accuracy over a split.
    pub fn evaluate(&self, covariates: &Array2<f32>, targets: &Array2<f32>) -> Result<EvalResult> {
        let probs = self.predict(covariates)?;
        let loss = cross_entropy(&probs, targets);

        let mut correct = 0usize;
        for (pred_row, true_row) in probs.rows().into_iter().zip(targets.rows()) {
            if argmax(pred_row.iter()) == argmax(true_row.iter()) {
                correct += 1;
            }
        }
        Ok(EvalResult {
            loss,
            accuracy: correct as f64 / probs.nrows().max(1) as f64,
        })
    }

    /// Persist the trained parameters.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create model file: {}", path.display()))?;
        bincode::serialize_into(std::io::BufWriter::new(file), self)
            .with_context(|| format!("failed to encode model: {}", path.display()))
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open model file: {}", path.display()))?;
        bincode::deserialize_from(std::io::BufReader::new(file))
            .with_context(|| format!("failed to decode model: {}", path.display()))
    }
}

fn relu(mut a: Array2<f32>) -> Array2<f32> {
    a.mapv_inplace(|v| v.max(0.0));
    a
}

fn relu_grad(z: &Array2<f32>) -> Array2<f32> {
    z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

fn softmax_rows(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

/// Mean categorical cross-entropy.
fn cross_entropy(probs: &Array2<f32>, targets: &Array2<f32>) -> f64 {
    let n = probs.nrows().max(1) as f64;
    let mut total = 0.0f64;
    for (p_row, t_row) in probs.rows().into_iter().zip(targets.rows()) {
        for (&p, &t) in p_row.iter().zip(t_row.iter()) {
            if t > 0.0 {
                total -= t as f64 * (p.max(1e-12) as f64).ln();
            }
        }
    }
    total / n
}

fn argmax<'a>(values: impl Iterator<Item = &'a f32>) -> usize {
    values
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Gather rows by index, in order.
fn gather(matrix: &Array2<f32>, indices: &[usize]) -> Array2<f32> {
    let mut out = Array2::zeros((indices.len(), matrix.ncols()));
    for (i, &idx) in indices.iter().enumerate() {
        out.row_mut(i).assign(&matrix.row(idx));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::one_hot;

    /// Linearly separable toy problem: class = which half of the input
    /// carries the mass.
    fn toy_dataset(n: usize, seed: u64) -> (Array2<f32>, Array2<f32>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Array2::zeros((n, 4));
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let class = rng.gen_range(0..2usize);
            for j in 0..4 {
                let base = if (class == 0) == (j < 2) { 1.0 } else { 0.0 };
                x[(i, j)] = base + rng.gen_range(-0.2..0.2);
            }
            labels.push(class);
        }
        (x, one_hot(&labels, 2))
    }

    #[test]
    fn test_untrained_predictions_are_distributions() {
        let net = MetaNetwork::new(4, 2, 0);
        let (x, _) = toy_dataset(8, 1);
        let probs = net.predict(&x).unwrap();
        for row in probs.rows() {
            let sum: f32 = row.sum();
            assert!((sum - 1.0).abs() < 1e-5, "rows must sum to 1, got {}", sum);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_fit_learns_separable_problem() {
        let (x, y) = toy_dataset(200, 2);
        let mut net = MetaNetwork::new(4, 2, 0);
        let mut rng = StdRng::seed_from_u64(3);

        let before = net.evaluate(&x, &y).unwrap();
        net.fit(&x, &y, 20, 32, &mut rng).unwrap();
        let after = net.evaluate(&x, &y).unwrap();

        assert!(
            after.accuracy > 0.95,
            "separable problem should be learned, got accuracy {}",
            after.accuracy
        );
        assert!(after.loss < before.loss, "loss should decrease");
    }

    #[test]
    fn test_width_mismatch_is_fatal() {
        let mut net = MetaNetwork::new(4, 2, 0);
        let x = Array2::zeros((10, 7));
        let y = Array2::zeros((10, 2));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(net.fit(&x, &y, 1, 4, &mut rng).is_err());
        assert!(net.predict(&x).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = std::env::temp_dir().join("metazoo_test_meta_net");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.bin");

        let (x, y) = toy_dataset(50, 4);
        let mut net = MetaNetwork::new(4, 2, 0);
        let mut rng = StdRng::seed_from_u64(5);
        net.fit(&x, &y, 5, 16, &mut rng).unwrap();

        net.save(&path).unwrap();
        let restored = MetaNetwork::load(&path).unwrap();

        let original = net.evaluate(&x, &y).unwrap();
        let reloaded = restored.evaluate(&x, &y).unwrap();
        assert_eq!(original, reloaded, "reloaded model must evaluate identically");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cross_entropy_perfect_prediction() {
        let probs = ndarray::array![[1.0f32, 0.0], [0.0, 1.0]];
        let targets = probs.clone();
        let loss = cross_entropy(&probs, &targets);
        assert!(loss.abs() < 1e-6, "perfect predictions have ~0 loss, got {}", loss);
    }
}
