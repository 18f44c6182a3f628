//! Network architecture configuration structures

use crate::preprocess::TensorLayout;
use serde::{Deserialize, Serialize};

/// Architecture of a sequential network whose weights live in a
/// safetensors file.
///
/// Convolution weights are expected in `(out, in / groups, k, k)` order and
/// linear weights in `(out, in)` order; every parameterized layer reads its
/// tensors under its `name` prefix (`<name>.weight`, `<name>.bias`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Shape of one input sample, excluding the batch dimension
    pub input_shape: Vec<usize>,

    /// Layout of `input_shape`
    #[serde(default)]
    pub input_layout: TensorLayout,

    /// Layers in execution order
    pub layers: Vec<LayerSpec>,
}

/// A single layer of a sequential network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LayerSpec {
    /// 2D convolution
    Conv2d {
        name: String,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: usize,
        #[serde(default = "default_true")]
        bias: bool,
    },

    /// Depthwise 2D convolution (one filter per channel)
    DepthwiseConv2d {
        name: String,
        channels: usize,
        kernel: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: usize,
        #[serde(default = "default_true")]
        bias: bool,
    },

    /// Batch normalization with frozen running statistics
    BatchNorm {
        name: String,
        channels: usize,
        #[serde(default = "default_bn_eps")]
        eps: f64,
    },

    Relu,

    /// ReLU clipped at 6
    Relu6,

    /// Square max pooling with stride equal to the window
    MaxPool { size: usize },

    /// Average over the spatial dimensions, producing `(1, C)`
    GlobalAvgPool,

    Flatten,

    /// Fully connected layer
    Linear {
        name: String,
        in_features: usize,
        out_features: usize,
    },

    /// Identity at inference time
    Dropout,

    Softmax,
}

fn default_stride() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_bn_eps() -> f64 {
    1e-3
}

impl NetworkSpec {
    /// Whether the last executed layer already produces probabilities
    pub fn ends_with_softmax(&self) -> bool {
        self.layers
            .iter()
            .rev()
            .find(|layer| !matches!(layer, LayerSpec::Dropout))
            .is_some_and(|layer| matches!(layer, LayerSpec::Softmax))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network_spec() {
        let yaml = r#"
input_shape: [224, 224, 3]
input_layout: nhwc
layers:
  - type: conv2d
    name: stem
    in_channels: 3
    out_channels: 8
    kernel: 3
    stride: 2
    padding: 1
    bias: false
  - type: batch-norm
    name: stem_bn
    channels: 8
  - type: relu6
  - type: depthwise-conv2d
    name: block1_dw
    channels: 8
    kernel: 3
    padding: 1
  - type: relu
  - type: max-pool
    size: 2
  - type: global-avg-pool
  - type: dropout
  - type: linear
    name: head
    in_features: 8
    out_features: 4
  - type: softmax
"#;

        let spec: NetworkSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.input_shape, vec![224, 224, 3]);
        assert_eq!(spec.input_layout, TensorLayout::Nhwc);
        assert_eq!(spec.layers.len(), 10);
        assert!(spec.ends_with_softmax());

        match &spec.layers[0] {
            LayerSpec::Conv2d { stride, padding, bias, .. } => {
                assert_eq!(*stride, 2);
                assert_eq!(*padding, 1);
                assert!(!bias);
            }
            other => panic!("Expected conv2d, got {other:?}"),
        }

        match &spec.layers[1] {
            LayerSpec::BatchNorm { eps, .. } => assert!((eps - 1e-3).abs() < 1e-12),
            other => panic!("Expected batch-norm, got {other:?}"),
        }

        match &spec.layers[3] {
            LayerSpec::DepthwiseConv2d { stride, bias, .. } => {
                assert_eq!(*stride, 1);
                assert!(*bias);
            }
            other => panic!("Expected depthwise-conv2d, got {other:?}"),
        }
    }

    #[test]
    fn test_softmax_detection_skips_dropout() {
        let spec: NetworkSpec = serde_yaml::from_str(
            "input_shape: [16]\ninput_layout: flat\nlayers: [{type: softmax}, {type: dropout}]",
        )
        .unwrap();
        assert!(spec.ends_with_softmax());

        let feature_net: NetworkSpec = serde_yaml::from_str(
            "input_shape: [16]\ninput_layout: flat\n\
             layers: [{type: linear, name: fc, in_features: 16, out_features: 8}]",
        )
        .unwrap();
        assert!(!feature_net.ends_with_softmax());
    }
}
