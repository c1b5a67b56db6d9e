//! Declarative layout of a flattened weight vector.
//!
//! Every model in the zoo is stored as one flat f32 row. Rebuilding the
//! network requires knowing which slice of that row is which layer's bias
//! and which is its kernel. The original analysis hard-coded these offsets
//! inline; here they are a schema object constructed once, validated once,
//! and passed to whatever rebuilds a network.
//!
//! Layout rules (matching the zoo's flattening order):
//! - layers appear in topology order
//! - within a layer, bias comes first, then kernel weights
//! - layers without learnable parameters (global average pooling) occupy
//!   no slice and are skipped at rebuild time
//!
//! For the 1-channel collections the offsets come out to the known fixed
//! table: conv1 (0..16, 16..160), conv2 (160..176, 176..2480),
//! conv3 (2480..2496, 2496..4800), dense (4800..4810, 4810..4970).

use std::ops::Range;

use anyhow::{bail, Result};

/// Number of filters in each conv layer of the zoo CNN.
pub const CONV_FILTERS: usize = 16;

/// Conv kernel side length.
pub const KERNEL_SIZE: usize = 3;

/// One parameterized layer's slices within the flat vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSlot {
    /// Slice holding the bias vector.
    pub bias: Range<usize>,
    /// Slice holding the kernel/weight matrix, flattened.
    pub weights: Range<usize>,
}

impl LayerSlot {
    pub fn len(&self) -> usize {
        self.bias.len() + self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Full layout: one optional slot per layer, in topology order.
/// `None` marks a layer with no learnable parameters.
#[derive(Debug, Clone)]
pub struct WeightLayout {
    pub slots: Vec<Option<LayerSlot>>,
}

impl WeightLayout {
    /// Layout for the fixed zoo CNN: three 3x3 conv layers with 16 filters,
    /// global average pooling, then a dense classifier head.
    pub fn cnn_zoo(in_channels: usize, num_classes: usize) -> Self {
        let mut slots = Vec::new();
        let mut offset = 0;

        let mut push = |bias_len: usize, weight_len: usize, offset: &mut usize| {
            let bias = *offset..*offset + bias_len;
            let weights = bias.end..bias.end + weight_len;
            *offset = weights.end;
            Some(LayerSlot { bias, weights })
        };

        let kernel = KERNEL_SIZE * KERNEL_SIZE;

        // conv1: in_channels -> 16
        slots.push(push(CONV_FILTERS, kernel * in_channels * CONV_FILTERS, &mut offset));
        // conv2, conv3: 16 -> 16
        slots.push(push(CONV_FILTERS, kernel * CONV_FILTERS * CONV_FILTERS, &mut offset));
        slots.push(push(CONV_FILTERS, kernel * CONV_FILTERS * CONV_FILTERS, &mut offset));
        // global average pooling: no params
        slots.push(None);
        // dense: 16 -> num_classes
        slots.push(push(num_classes, CONV_FILTERS * num_classes, &mut offset));

        Self { slots }
    }

    /// Total flattened length implied by the layout.
    pub fn total_len(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.len())
            .sum()
    }

    /// Validate against the archive's per-row weight length. Slots must be
    /// contiguous, non-overlapping, in order, and cover the row exactly.
    /// Run once at startup; a mismatch is fatal.
    pub fn validate(&self, weight_len: usize) -> Result<()> {
        let mut cursor = 0;
        for (idx, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot else { continue };
            if slot.bias.start != cursor {
                bail!(
                    "layer {} bias starts at {} but previous slice ended at {}",
                    idx,
                    slot.bias.start,
                    cursor
                );
            }
            if slot.weights.start != slot.bias.end {
                bail!("layer {} has a gap between bias and weights", idx);
            }
            cursor = slot.weights.end;
        }
        if cursor != weight_len {
            bail!(
                "weight layout covers {} values but archive rows have {}",
                cursor,
                weight_len
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_channel_layout_matches_fixed_offsets() {
        let layout = WeightLayout::cnn_zoo(1, 10);

        let slot = |i: usize| layout.slots[i].clone().unwrap();
        assert_eq!(slot(0), LayerSlot { bias: 0..16, weights: 16..160 });
        assert_eq!(slot(1), LayerSlot { bias: 160..176, weights: 176..2480 });
        assert_eq!(slot(2), LayerSlot { bias: 2480..2496, weights: 2496..4800 });
        assert!(layout.slots[3].is_none(), "pooling layer has no params");
        assert_eq!(slot(4), LayerSlot { bias: 4800..4810, weights: 4810..4970 });
        assert_eq!(layout.total_len(), 4970);
    }

    #[test]
    fn test_three_channel_layout_shifts_everything() {
        let layout = WeightLayout::cnn_zoo(3, 10);
        let first = layout.slots[0].clone().unwrap();
        assert_eq!(first.weights.len(), 3 * 3 * 3 * 16);
        assert_eq!(layout.total_len(), 4970 + 2 * 144);
    }

    #[test]
    fn test_validate_accepts_exact_length() {
        let layout = WeightLayout::cnn_zoo(1, 10);
        layout.validate(4970).expect("exact length must validate");
    }

    #[test]
    fn test_validate_rejects_length_mismatch() {
        let layout = WeightLayout::cnn_zoo(1, 10);
        assert!(layout.validate(5000).is_err());
        assert!(layout.validate(100).is_err());
    }

    #[test]
    fn test_validate_rejects_gap() {
        let mut layout = WeightLayout::cnn_zoo(1, 10);
        // Introduce a gap between conv1 and conv2
        layout.slots[1] = Some(LayerSlot { bias: 170..186, weights: 186..2490 });
        assert!(layout.validate(4970).is_err(), "gap at 160..170 must be rejected");
    }
}
