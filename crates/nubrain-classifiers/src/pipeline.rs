//! The image-to-label inference pipeline
//!
//! A pipeline owns an immutable bundle of artifacts: preprocessing
//! parameters, an optional feature extractor, an optional scaler, the
//! classifier and its label space. Stage shapes and label cardinality are
//! checked once in [`PipelineBuilder::build`]; per-call checks remain in the
//! artifacts themselves.

use crate::classifier::{
    ClassificationMetadata, ClassificationResult, ClassifierArtifact, ClassifierOutput,
    FeatureExtractor,
};
use crate::preprocess::{PreprocessConfig, Preprocessor};
use crate::scaler::StandardScaler;
use candle_core::{Device, Tensor};
use image::DynamicImage;
use nubrain_core::{Error, LabelSpace, Result};
use std::sync::Arc;
use std::time::Instant;

/// A fully loaded inference pipeline
pub struct InferencePipeline {
    name: String,
    preprocessor: Preprocessor,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    scaler: Option<StandardScaler>,
    classifier: Arc<dyn ClassifierArtifact>,
    labels: LabelSpace,
    device: Device,
}

impl std::fmt::Debug for InferencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferencePipeline")
            .field("name", &self.name)
            .field("preprocessing", self.preprocessor.config())
            .field("extractor", &self.extractor.as_ref().map(|e| e.name().to_string()))
            .field("scaler", &self.scaler.as_ref().map(StandardScaler::dim))
            .field("classifier", &self.classifier.name())
            .field("labels", &self.labels)
            .finish()
    }
}

impl InferencePipeline {
    /// Start building a pipeline
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Classify encoded image bytes, returning only the label
    pub fn classify(&self, image_bytes: &[u8]) -> Result<String> {
        self.classify_detailed(image_bytes).map(|result| result.label)
    }

    /// Classify encoded image bytes
    pub fn classify_detailed(&self, image_bytes: &[u8]) -> Result<ClassificationResult> {
        let start = Instant::now();
        let input = self.prepare(image_bytes)?;
        self.run(&input, start)
    }

    /// Classify an already decoded image
    pub fn classify_image(&self, image: &DynamicImage) -> Result<ClassificationResult> {
        let start = Instant::now();
        let input = self.preprocessor.prepare_image(image, &self.device)?;
        self.run(&input, start)
    }

    /// Classify a tensor that is already in the preprocessed layout
    pub fn classify_tensor(&self, input: &Tensor) -> Result<ClassificationResult> {
        self.run(input, Instant::now())
    }

    /// Decode and preprocess image bytes into the classifier input layout
    pub fn prepare(&self, image_bytes: &[u8]) -> Result<Tensor> {
        self.preprocessor.prepare(image_bytes, &self.device)
    }

    fn run(&self, input: &Tensor, start: Instant) -> Result<ClassificationResult> {
        let features = match &self.extractor {
            Some(extractor) => extractor.extract(input)?,
            None => input.clone(),
        };

        let features = match &self.scaler {
            Some(scaler) => scaler.transform(&features)?,
            None => features,
        };

        let output = self.classifier.predict(&features)?;
        let index = output.class_index()?;

        if let Some(cardinality) = output.cardinality() {
            if cardinality != self.labels.len() {
                return Err(Error::labels(format!(
                    "classifier '{}' produced {} scores for {} labels",
                    self.classifier.name(),
                    cardinality,
                    self.labels.len()
                )));
            }
        }

        let label = self.labels.get(index)?.to_string();

        let all_scores = match &output {
            ClassifierOutput::Probabilities(probs) => Some(
                self.labels
                    .iter()
                    .map(str::to_string)
                    .zip(probs.iter().copied())
                    .collect(),
            ),
            ClassifierOutput::DiscreteIndex(_) => None,
        };

        let latency_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            pipeline = %self.name,
            label = %label,
            index,
            latency_us,
            "Classified image"
        );

        Ok(ClassificationResult {
            label,
            index,
            score: output.score(),
            metadata: ClassificationMetadata {
                model: Some(self.name.clone()),
                all_scores,
            },
            latency_us,
        })
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the label space
    pub fn labels(&self) -> &LabelSpace {
        &self.labels
    }

    /// Get the preprocessing configuration
    pub fn preprocessing(&self) -> &PreprocessConfig {
        self.preprocessor.config()
    }

    /// Get the classifier artifact
    pub fn classifier(&self) -> &Arc<dyn ClassifierArtifact> {
        &self.classifier
    }

    /// Whether a feature extractor runs before the classifier
    pub fn has_extractor(&self) -> bool {
        self.extractor.is_some()
    }

    /// Whether features are standardized before the classifier
    pub fn has_scaler(&self) -> bool {
        self.scaler.is_some()
    }

    /// Get the device tensors are created on
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Builder for creating pipelines
pub struct PipelineBuilder {
    name: String,
    preprocessing: PreprocessConfig,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    scaler: Option<StandardScaler>,
    classifier: Option<Arc<dyn ClassifierArtifact>>,
    labels: Option<LabelSpace>,
    device: Device,
}

impl PipelineBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preprocessing: PreprocessConfig::default(),
            extractor: None,
            scaler: None,
            classifier: None,
            labels: None,
            device: Device::Cpu,
        }
    }

    /// Set preprocessing parameters
    pub fn preprocessing(mut self, config: PreprocessConfig) -> Self {
        self.preprocessing = config;
        self
    }

    /// Add a feature extractor
    pub fn extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Add a scaler
    pub fn scaler(mut self, scaler: StandardScaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    /// Set the classifier
    pub fn classifier(mut self, classifier: Arc<dyn ClassifierArtifact>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the label space
    pub fn labels(mut self, labels: LabelSpace) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Set the device
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Validate the artifact chain and build the pipeline
    pub fn build(self) -> Result<InferencePipeline> {
        let classifier = self.classifier.ok_or_else(|| {
            Error::config(format!("pipeline '{}' has no classifier", self.name))
        })?;
        let labels = self.labels.ok_or_else(|| {
            Error::config(format!("pipeline '{}' has no label space", self.name))
        })?;

        let preprocessor = Preprocessor::new(self.preprocessing)?;

        let mut shape = preprocessor.output_shape();

        if let Some(extractor) = &self.extractor {
            check_stage_input(extractor.name(), extractor.input_shape(), &shape)?;
            shape = vec![extractor.feature_dim()];
        }

        if let Some(scaler) = &self.scaler {
            check_stage_input("scaler", &[scaler.dim()], &shape)?;
        }

        check_stage_input(classifier.name(), classifier.input_shape(), &shape)?;

        if classifier.num_classes() != labels.len() {
            return Err(Error::labels(format!(
                "classifier '{}' has {} classes but pipeline '{}' has {} labels",
                classifier.name(),
                classifier.num_classes(),
                self.name,
                labels.len()
            )));
        }

        tracing::info!(
            "Built pipeline '{}': {:?} {}x{} -> {}{}{} ({} classes)",
            self.name,
            preprocessor.config().color_mode,
            preprocessor.config().width,
            preprocessor.config().height,
            self.extractor
                .as_ref()
                .map(|e| format!("{} -> ", e.name()))
                .unwrap_or_default(),
            if self.scaler.is_some() { "scaler -> " } else { "" },
            classifier.name(),
            labels.len()
        );

        Ok(InferencePipeline {
            name: self.name,
            preprocessor,
            extractor: self.extractor,
            scaler: self.scaler,
            classifier,
            labels,
            device: self.device,
        })
    }
}

fn check_stage_input(stage: &str, expected: &[usize], produced: &[usize]) -> Result<()> {
    if expected == produced {
        return Ok(());
    }

    let batched = |shape: &[usize]| {
        let mut dims = Vec::with_capacity(shape.len() + 1);
        dims.push(1);
        dims.extend_from_slice(shape);
        dims
    };
    Err(Error::shape(stage, &batched(expected), &batched(produced)))
}
