//! Artifact traits and common result types

use candle_core::Tensor;
use nubrain_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A pre-trained decision function over a batch-of-one input tensor.
///
/// Implementations are loaded once and only read afterwards, so a single
/// instance can be shared between threads.
pub trait ClassifierArtifact: Send + Sync {
    /// Get the artifact name
    fn name(&self) -> &str;

    /// Shape of a single sample, excluding the batch dimension
    fn input_shape(&self) -> &[usize];

    /// Size of the output index space
    fn num_classes(&self) -> usize;

    /// Run the classifier on a `(1, ..input_shape)` tensor
    fn predict(&self, input: &Tensor) -> Result<ClassifierOutput>;
}

/// A pre-trained transform from an image tensor to a `(1, D)` feature vector.
pub trait FeatureExtractor: Send + Sync {
    /// Get the extractor name
    fn name(&self) -> &str;

    /// Shape of a single sample, excluding the batch dimension
    fn input_shape(&self) -> &[usize];

    /// Length `D` of the produced feature vector
    fn feature_dim(&self) -> usize;

    /// Run the extractor on a `(1, ..input_shape)` tensor
    fn extract(&self, input: &Tensor) -> Result<Tensor>;
}

/// Raw output of a classifier artifact
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutput {
    /// One probability per class
    Probabilities(Vec<f32>),

    /// A single predicted class index
    DiscreteIndex(usize),
}

impl ClassifierOutput {
    /// Reduce either output shape to a class index.
    ///
    /// Probabilities select the arg-max with no confidence threshold; ties go
    /// to the lowest index.
    pub fn class_index(&self) -> Result<usize> {
        match self {
            Self::DiscreteIndex(index) => Ok(*index),
            Self::Probabilities(probs) => {
                if probs.is_empty() {
                    return Err(Error::inference("classifier produced an empty probability vector"));
                }
                if let Some(bad) = probs.iter().find(|p| !p.is_finite()) {
                    return Err(Error::inference(format!(
                        "classifier produced a non-finite probability: {}",
                        bad
                    )));
                }

                let mut best = 0;
                for (i, &p) in probs.iter().enumerate().skip(1) {
                    if p > probs[best] {
                        best = i;
                    }
                }
                Ok(best)
            }
        }
    }

    /// Probability of the selected class, when the classifier reports one
    pub fn score(&self) -> Option<f32> {
        match self {
            Self::Probabilities(probs) => self.class_index().ok().map(|i| probs[i]),
            Self::DiscreteIndex(_) => None,
        }
    }

    /// Number of classes the output covers, when it can be inferred
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Self::Probabilities(probs) => Some(probs.len()),
            Self::DiscreteIndex(_) => None,
        }
    }
}

/// Result of classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Classification label, always a member of the pipeline's label space
    pub label: String,

    /// Index of the label in the label space
    pub index: usize,

    /// Probability of the selected class (probability-vector classifiers only)
    pub score: Option<f32>,

    /// Additional metadata
    pub metadata: ClassificationMetadata,

    /// Latency in microseconds
    pub latency_us: u64,
}

/// Metadata about classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationMetadata {
    /// Pipeline or model name
    pub model: Option<String>,

    /// All class scores (probability-vector classifiers only)
    pub all_scores: Option<Vec<(String, f32)>>,
}

/// Check that `tensor` is a batch of one sample shaped `sample_shape`
pub fn ensure_batched_shape(stage: &str, tensor: &Tensor, sample_shape: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    let matches = actual.len() == sample_shape.len() + 1
        && actual[0] == 1
        && &actual[1..] == sample_shape;

    if matches {
        Ok(())
    } else {
        let mut expected = Vec::with_capacity(sample_shape.len() + 1);
        expected.push(1);
        expected.extend_from_slice(sample_shape);
        Err(Error::shape(stage, &expected, actual))
    }
}
