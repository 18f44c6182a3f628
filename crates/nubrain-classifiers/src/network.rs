//! Sequential Candle networks built from a `NetworkSpec`
//!
//! The same runtime serves both artifact roles: a network ending in class
//! scores is wrapped in a [`DenseClassifier`], and a network ending in an
//! embedding is used directly as a [`FeatureExtractor`].

use crate::classifier::{
    ensure_batched_shape, ClassifierArtifact, ClassifierOutput, FeatureExtractor,
};
use crate::model_config::{LayerSpec, NetworkSpec};
use crate::preprocess::TensorLayout;
use candle_core::{DType, Device, Tensor};
use candle_nn::{
    BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Linear, Module, ModuleT, VarBuilder,
};
use nubrain_core::{Error, Result};
use std::path::Path;

enum Layer {
    Conv(Conv2d),
    BatchNorm(BatchNorm),
    Relu,
    Relu6,
    MaxPool(usize),
    GlobalAvgPool,
    /// Flattens in HWC order when the network was fed channels-last input
    Flatten { channels_last: bool },
    Linear(Linear),
    Softmax,
}

impl Layer {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Conv(conv) => conv.forward(x),
            Self::BatchNorm(bn) => bn.forward_t(x, false),
            Self::Relu => x.relu(),
            Self::Relu6 => x.clamp(0f32, 6f32),
            Self::MaxPool(size) => x.max_pool2d(*size),
            Self::GlobalAvgPool => x.mean((2, 3)),
            Self::Flatten { channels_last } => {
                if *channels_last && x.rank() == 4 {
                    x.permute((0, 2, 3, 1))?.flatten_from(1)
                } else {
                    x.flatten_from(1)
                }
            }
            Self::Linear(linear) => linear.forward(x),
            Self::Softmax => candle_nn::ops::softmax_last_dim(x),
        }
    }
}

/// A loaded sequential network
pub struct SequentialNetwork {
    name: String,
    input_shape: Vec<usize>,
    input_layout: TensorLayout,
    layers: Vec<Layer>,
    ends_with_softmax: bool,
    output_dim: usize,
}

impl SequentialNetwork {
    /// Load a network from a safetensors weights file
    pub fn load(
        name: impl Into<String>,
        spec: &NetworkSpec,
        weights: &Path,
        device: &Device,
    ) -> Result<Self> {
        let name = name.into();

        if !weights.exists() {
            return Err(Error::artifact(format!(
                "Weights for '{}' not found: {}",
                name,
                weights.display()
            )));
        }

        // SAFETY: the weights file is treated as read-only for the lifetime
        // of the process.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device) }
            .map_err(|e| {
                Error::artifact(format!(
                    "Failed to load weights for '{}' from {}: {}",
                    name,
                    weights.display(),
                    e
                ))
            })?;

        Self::from_var_builder(name, spec, vb, device)
    }

    /// Build a network from an existing `VarBuilder`
    pub fn from_var_builder(
        name: impl Into<String>,
        spec: &NetworkSpec,
        vb: VarBuilder,
        device: &Device,
    ) -> Result<Self> {
        let name = name.into();

        if spec.input_shape.is_empty() || spec.input_shape.contains(&0) {
            return Err(Error::config(format!(
                "Network '{}' has an invalid input shape {:?}",
                name, spec.input_shape
            )));
        }

        let channels_last = spec.input_layout == TensorLayout::Nhwc;
        let mut layers = Vec::with_capacity(spec.layers.len());

        for layer in &spec.layers {
            let built = build_layer(layer, &vb, channels_last).map_err(|e| {
                Error::artifact(format!("Failed to build layer {:?} of '{}': {}", layer, name, e))
            })?;
            if let Some(built) = built {
                layers.push(built);
            }
        }

        let mut network = Self {
            name,
            input_shape: spec.input_shape.clone(),
            input_layout: spec.input_layout,
            layers,
            ends_with_softmax: spec.ends_with_softmax(),
            output_dim: 0,
        };

        network.output_dim = network.probe_output_dim(device)?;

        tracing::info!(
            "Loaded network '{}' with {} layers: input {:?} ({:?}) -> output {}",
            network.name,
            network.layers.len(),
            network.input_shape,
            network.input_layout,
            network.output_dim
        );

        Ok(network)
    }

    /// Run a zero input through the network once so that incompatible
    /// layer dimensions fail at load time instead of per request.
    fn probe_output_dim(&self, device: &Device) -> Result<usize> {
        let mut dims = Vec::with_capacity(self.input_shape.len() + 1);
        dims.push(1);
        dims.extend_from_slice(&self.input_shape);

        let probe = Tensor::zeros(dims, DType::F32, device)
            .map_err(|e| Error::artifact(format!("Failed to allocate probe tensor: {}", e)))?;

        let output = self.forward(&probe).map_err(|e| {
            Error::artifact(format!("Network '{}' failed its load-time probe: {}", self.name, e))
        })?;

        match output.dims() {
            [1, dim] => Ok(*dim),
            other => Err(Error::artifact(format!(
                "Network '{}' must produce a (1, D) output, got {:?}",
                self.name, other
            ))),
        }
    }

    /// Run the network on a `(1, ..input_shape)` tensor
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        ensure_batched_shape(&self.name, input, &self.input_shape)?;

        let mut x = if self.input_layout == TensorLayout::Nhwc && input.rank() == 4 {
            input
                .permute((0, 3, 1, 2))
                .and_then(|t| t.contiguous())
                .map_err(|e| Error::inference(format!("Failed to permute input: {}", e)))?
        } else {
            input.clone()
        };

        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x).map_err(|e| {
                Error::inference(format!("Layer {} of '{}' failed: {}", i, self.name, e))
            })?;
        }

        Ok(x)
    }

    /// Get the network name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length of the output vector
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }
}

impl FeatureExtractor for SequentialNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn feature_dim(&self) -> usize {
        self.output_dim
    }

    fn extract(&self, input: &Tensor) -> Result<Tensor> {
        self.forward(input)
    }
}

/// A network whose outputs are class scores
pub struct DenseClassifier {
    network: SequentialNetwork,
}

impl DenseClassifier {
    pub fn new(network: SequentialNetwork) -> Self {
        Self { network }
    }

    /// Get the wrapped network
    pub fn network(&self) -> &SequentialNetwork {
        &self.network
    }
}

impl ClassifierArtifact for DenseClassifier {
    fn name(&self) -> &str {
        &self.network.name
    }

    fn input_shape(&self) -> &[usize] {
        &self.network.input_shape
    }

    fn num_classes(&self) -> usize {
        self.network.output_dim
    }

    fn predict(&self, input: &Tensor) -> Result<ClassifierOutput> {
        let logits = self.network.forward(input)?;

        let probs = if self.network.ends_with_softmax {
            logits
        } else {
            candle_nn::ops::softmax_last_dim(&logits)
                .map_err(|e| Error::inference(format!("Softmax failed: {}", e)))?
        };

        let probs = probs
            .squeeze(0)
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::inference(format!("Failed to read probabilities: {}", e)))?;

        Ok(ClassifierOutput::Probabilities(probs))
    }
}

fn build_layer(
    spec: &LayerSpec,
    vb: &VarBuilder,
    channels_last: bool,
) -> candle_core::Result<Option<Layer>> {
    let layer = match spec {
        LayerSpec::Conv2d {
            name,
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
            bias,
        } => {
            let cfg = Conv2dConfig {
                padding: *padding,
                stride: *stride,
                ..Default::default()
            };
            let conv = if *bias {
                candle_nn::conv2d(*in_channels, *out_channels, *kernel, cfg, vb.pp(name))?
            } else {
                candle_nn::conv2d_no_bias(*in_channels, *out_channels, *kernel, cfg, vb.pp(name))?
            };
            Layer::Conv(conv)
        }
        LayerSpec::DepthwiseConv2d {
            name,
            channels,
            kernel,
            stride,
            padding,
            bias,
        } => {
            let cfg = Conv2dConfig {
                padding: *padding,
                stride: *stride,
                groups: *channels,
                ..Default::default()
            };
            let conv = if *bias {
                candle_nn::conv2d(*channels, *channels, *kernel, cfg, vb.pp(name))?
            } else {
                candle_nn::conv2d_no_bias(*channels, *channels, *kernel, cfg, vb.pp(name))?
            };
            Layer::Conv(conv)
        }
        LayerSpec::BatchNorm {
            name,
            channels,
            eps,
        } => {
            let cfg = BatchNormConfig {
                eps: *eps,
                ..Default::default()
            };
            Layer::BatchNorm(candle_nn::batch_norm(*channels, cfg, vb.pp(name))?)
        }
        LayerSpec::Relu => Layer::Relu,
        LayerSpec::Relu6 => Layer::Relu6,
        LayerSpec::MaxPool { size } => Layer::MaxPool(*size),
        LayerSpec::GlobalAvgPool => Layer::GlobalAvgPool,
        LayerSpec::Flatten => Layer::Flatten { channels_last },
        LayerSpec::Linear {
            name,
            in_features,
            out_features,
        } => Layer::Linear(candle_nn::linear(*in_features, *out_features, vb.pp(name))?),
        LayerSpec::Dropout => return Ok(None),
        LayerSpec::Softmax => Layer::Softmax,
    };

    Ok(Some(layer))
}
