//! The fixed zoo CNN, rebuilt from flattened weights.
//!
//! Topology (identical for every model in the zoo):
//!
//! ```text
//! input (h, w, c)
//!   -> conv 3x3, 16 filters, stride 2, same padding, ReLU
//!   -> conv 3x3, 16 filters, stride 2, same padding, ReLU
//!   -> conv 3x3, 16 filters, stride 2, same padding, ReLU
//!   -> global average pooling            (no parameters)
//!   -> dense 16 -> num_classes, softmax
//! ```
//!
//! Kernels are stored in (kh, kw, in, out) order and biases separately,
//! matching the flattening the zoo used when the rows were written. Padding
//! follows the "same" convention: total padding max((out-1)*stride + k - in, 0),
//! split with the extra row/column at the bottom/right.
//!
//! Inference is a plain nested-loop forward pass. The network has 4,970
//! parameters; there is nothing to optimize here.

use anyhow::{ensure, Context, Result};
use ndarray::{Array1, Array2, Array3, Array4, ArrayView1, ArrayView3, Axis};

use super::schema::{WeightLayout, CONV_FILTERS, KERNEL_SIZE};

const CONV_STRIDE: usize = 2;

/// One convolutional layer's parameters.
#[derive(Debug, Clone)]
struct ConvLayer {
    /// (kh, kw, in_channels, out_channels)
    kernel: Array4<f32>,
    bias: Array1<f32>,
}

/// The dense classifier head.
#[derive(Debug, Clone)]
struct DenseLayer {
    /// (in_features, out_features)
    weights: Array2<f32>,
    bias: Array1<f32>,
}

/// A zoo CNN with weights loaded, ready for inference.
#[derive(Debug, Clone)]
pub struct CnnWireframe {
    input_shape: (usize, usize, usize),
    num_classes: usize,
    conv: Vec<ConvLayer>,
    dense: DenseLayer,
}

impl CnnWireframe {
    /// Rebuild the network from one flattened weight row.
    ///
    /// Layers with no slot in the layout (pooling) are skipped, exactly as
    /// the layout declares them.
    pub fn from_flat(
        layout: &WeightLayout,
        flat: ArrayView1<f32>,
        input_shape: (usize, usize, usize),
        num_classes: usize,
    ) -> Result<Self> {
        layout.validate(flat.len())?;

        let (_, _, channels) = input_shape;
        let channel_progression = [channels, CONV_FILTERS, CONV_FILTERS];

        let mut conv = Vec::with_capacity(3);
        let mut param_slots = layout.slots.iter().flatten();

        for (layer_idx, &in_ch) in channel_progression.iter().enumerate() {
            let slot = param_slots
                .next()
                .with_context(|| format!("layout missing conv layer {}", layer_idx))?;
            let bias = Array1::from_iter(flat.slice(ndarray::s![slot.bias.clone()]).iter().copied());
            let kernel = Array4::from_shape_vec(
                (KERNEL_SIZE, KERNEL_SIZE, in_ch, CONV_FILTERS),
                flat.slice(ndarray::s![slot.weights.clone()]).iter().copied().collect(),
            )
            .with_context(|| format!("conv layer {} kernel slice has wrong length", layer_idx))?;
            conv.push(ConvLayer { kernel, bias });
        }

        let slot = param_slots.next().context("layout missing dense layer")?;
        let bias = Array1::from_iter(flat.slice(ndarray::s![slot.bias.clone()]).iter().copied());
        let weights = Array2::from_shape_vec(
            (CONV_FILTERS, num_classes),
            flat.slice(ndarray::s![slot.weights.clone()]).iter().copied().collect(),
        )
        .context("dense kernel slice has wrong length")?;
        ensure!(bias.len() == num_classes, "dense bias length != num_classes");

        Ok(Self {
            input_shape,
            num_classes,
            conv,
            dense: DenseLayer { weights, bias },
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Run inference over a batch of flattened images.
    ///
    /// `batch` has shape (n, h*w*c); the return value has shape
    /// (n, num_classes) with softmax rows.
    pub fn predict_batch(&self, batch: &Array2<f32>) -> Result<Array2<f32>> {
        let (h, w, c) = self.input_shape;
        ensure!(
            batch.ncols() == h * w * c,
            "batch width {} does not match input shape {:?}",
            batch.ncols(),
            self.input_shape
        );

        let mut out = Array2::zeros((batch.nrows(), self.num_classes));
        for (i, row) in batch.rows().into_iter().enumerate() {
            let image = Array3::from_shape_vec((h, w, c), row.iter().copied().collect())
                .context("failed to reshape flattened image")?;
            let probs = self.forward(image.view());
            out.row_mut(i).assign(&probs);
        }
        Ok(out)
    }

    /// Forward pass for one image.
    fn forward(&self, image: ArrayView3<f32>) -> Array1<f32> {
        let mut activations = image.to_owned();
        for layer in &self.conv {
            activations = conv2d_same_relu(activations.view(), layer);
        }

        // Global average pooling over the spatial dims.
        let pooled = activations
            .mean_axis(Axis(0))
            .and_then(|a| a.mean_axis(Axis(0)))
            .unwrap_or_else(|| Array1::zeros(CONV_FILTERS));

        let logits = pooled.dot(&self.dense.weights) + &self.dense.bias;
        softmax(logits)
    }
}

/// 3x3 stride-2 "same" convolution followed by ReLU.
fn conv2d_same_relu(input: ArrayView3<f32>, layer: &ConvLayer) -> Array3<f32> {
    let (in_h, in_w, in_ch) = input.dim();
    let (kh, kw, _, out_ch) = layer.kernel.dim();

    let out_h = in_h.div_ceil(CONV_STRIDE);
    let out_w = in_w.div_ceil(CONV_STRIDE);

    // "same" padding with the extra row/column at the bottom/right
    let pad_h = ((out_h - 1) * CONV_STRIDE + kh).saturating_sub(in_h);
    let pad_w = ((out_w - 1) * CONV_STRIDE + kw).saturating_sub(in_w);
    let pad_top = pad_h / 2;
    let pad_left = pad_w / 2;

    let mut output = Array3::zeros((out_h, out_w, out_ch));
    for oy in 0..out_h {
        for ox in 0..out_w {
            for oc in 0..out_ch {
                let mut acc = layer.bias[oc];
                for ky in 0..kh {
                    let iy = (oy * CONV_STRIDE + ky) as isize - pad_top as isize;
                    if iy < 0 || iy as usize >= in_h {
                        continue;
                    }
                    for kx in 0..kw {
                        let ix = (ox * CONV_STRIDE + kx) as isize - pad_left as isize;
                        if ix < 0 || ix as usize >= in_w {
                            continue;
                        }
                        for ic in 0..in_ch {
                            acc += input[(iy as usize, ix as usize, ic)]
                                * layer.kernel[(ky, kx, ic, oc)];
                        }
                    }
                }
                output[(oy, ox, oc)] = acc.max(0.0);
            }
        }
    }
    output
}

/// Numerically stable softmax.
fn softmax(logits: Array1<f32>) -> Array1<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn layout_1ch() -> WeightLayout {
        WeightLayout::cnn_zoo(1, 10)
    }

    fn zero_weights() -> Array1<f32> {
        Array1::zeros(layout_1ch().total_len())
    }

    #[test]
    fn test_from_flat_accepts_exact_length() {
        let weights = zero_weights();
        let net = CnnWireframe::from_flat(&layout_1ch(), weights.view(), (28, 28, 1), 10);
        assert!(net.is_ok());
    }

    #[test]
    fn test_from_flat_rejects_wrong_length() {
        let weights = Array1::<f32>::zeros(100);
        let net = CnnWireframe::from_flat(&layout_1ch(), weights.view(), (28, 28, 1), 10);
        assert!(net.is_err());
    }

    #[test]
    fn test_zero_network_predicts_uniform() {
        let weights = zero_weights();
        let net = CnnWireframe::from_flat(&layout_1ch(), weights.view(), (28, 28, 1), 10).unwrap();
        let batch = Array2::zeros((2, 784));
        let preds = net.predict_batch(&batch).unwrap();

        assert_eq!(preds.dim(), (2, 10));
        for value in preds.iter() {
            assert!((value - 0.1).abs() < 1e-6, "all-zero net should be uniform, got {}", value);
        }
    }

    #[test]
    fn test_dense_bias_steers_prediction() {
        // Zero everything except a large bias on class 3
        let layout = layout_1ch();
        let mut weights = zero_weights();
        let dense = layout.slots[4].clone().unwrap();
        weights[dense.bias.start + 3] = 10.0;

        let net = CnnWireframe::from_flat(&layout, weights.view(), (28, 28, 1), 10).unwrap();
        let batch = Array2::zeros((1, 784));
        let preds = net.predict_batch(&batch).unwrap();

        let argmax = preds
            .row(0)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(argmax, 3);
    }

    #[test]
    fn test_predictions_sum_to_one() {
        let layout = layout_1ch();
        // Small deterministic nonzero weights
        let weights =
            Array1::from_iter((0..layout.total_len()).map(|i| ((i % 13) as f32 - 6.0) * 1e-2));
        let net = CnnWireframe::from_flat(&layout, weights.view(), (28, 28, 1), 10).unwrap();

        let batch = Array2::from_elem((3, 784), 0.5f32);
        let preds = net.predict_batch(&batch).unwrap();
        for row in preds.rows() {
            let sum: f32 = row.sum();
            assert!((sum - 1.0).abs() < 1e-5, "softmax rows must sum to 1, got {}", sum);
        }
    }

    #[test]
    fn test_batch_width_mismatch_is_error() {
        let weights = zero_weights();
        let net = CnnWireframe::from_flat(&layout_1ch(), weights.view(), (28, 28, 1), 10).unwrap();
        let batch = Array2::zeros((1, 100));
        assert!(net.predict_batch(&batch).is_err());
    }

    #[test]
    fn test_conv_output_shapes() {
        // 28 -> 14 -> 7 -> 4 under stride 2 same padding
        let layer = ConvLayer {
            kernel: Array4::zeros((3, 3, 1, 16)),
            bias: Array1::zeros(16),
        };
        let out = conv2d_same_relu(Array3::<f32>::zeros((28, 28, 1)).view(), &layer);
        assert_eq!(out.dim(), (14, 14, 16));

        let layer2 = ConvLayer {
            kernel: Array4::zeros((3, 3, 16, 16)),
            bias: Array1::zeros(16),
        };
        let out2 = conv2d_same_relu(out.view(), &layer2);
        assert_eq!(out2.dim(), (7, 7, 16));
        let out3 = conv2d_same_relu(out2.view(), &layer2);
        assert_eq!(out3.dim(), (4, 4, 16));
    }
}
