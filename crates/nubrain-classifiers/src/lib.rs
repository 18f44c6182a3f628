//! NuBrain Classifiers
//!
//! Image-to-label inference for brain MRI tumor classification.
//!
//! A pipeline turns encoded image bytes into one label of a fixed label
//! space:
//! - decode and convert to the configured color mode
//! - force-resize and normalize into a batch-of-one tensor
//! - optionally extract features and standardize them
//! - run the classifier and map its class index to a label
//!
//! Artifacts are loaded once at startup and shared read-only afterwards.

pub mod classifier;
pub mod config;
pub mod knn;
pub mod loader;
pub mod model_config;
pub mod model_loader;
pub mod network;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod scaler;

pub use classifier::{
    ClassificationMetadata, ClassificationResult, ClassifierArtifact, ClassifierOutput,
    FeatureExtractor,
};
pub use config::{
    ArtifactSourceSpec, ClassifierConfig, ClassifierSpec, DeviceSpec, ExtractorSpec, LabelsSpec,
    NetworkSource, PipelineConfigSpec,
};
pub use knn::KnnClassifier;
pub use loader::PipelineLoader;
pub use model_config::{LayerSpec, NetworkSpec};
pub use model_loader::{create_device, ArtifactSource, ArtifactStore, DeviceType};
pub use network::{DenseClassifier, SequentialNetwork};
pub use pipeline::{InferencePipeline, PipelineBuilder};
pub use preprocess::{
    ColorMode, Normalization, PreprocessConfig, Preprocessor, ResizeFilter, TensorLayout,
};
pub use registry::{load_config, PipelineRegistry};
pub use scaler::StandardScaler;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{ClassificationResult, ClassifierArtifact, ClassifierOutput};
    pub use crate::pipeline::InferencePipeline;
    pub use crate::preprocess::PreprocessConfig;
    pub use crate::registry::PipelineRegistry;
    pub use nubrain_core::{Error, LabelSpace, Result};
}
