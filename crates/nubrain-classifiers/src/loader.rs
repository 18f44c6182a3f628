//! Builds pipelines from configuration by resolving and loading artifacts

use crate::classifier::{ClassifierArtifact, FeatureExtractor};
use crate::config::{
    ArtifactSourceSpec, ClassifierSpec, DeviceSpec, LabelsSpec, NetworkSource, PipelineConfigSpec,
};
use crate::knn::KnnClassifier;
use crate::model_config::NetworkSpec;
use crate::model_loader::{create_device, ArtifactSource, ArtifactStore};
use crate::network::{DenseClassifier, SequentialNetwork};
use crate::pipeline::InferencePipeline;
use crate::scaler::StandardScaler;
use nubrain_core::{Error, LabelSpace, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Loads every artifact a pipeline names, failing on the first error
pub struct PipelineLoader {
    store: ArtifactStore,
    default_device: DeviceSpec,
}

impl PipelineLoader {
    /// Create a loader resolving artifacts through `store`
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            default_device: DeviceSpec::default(),
        }
    }

    /// Device used by pipelines without an override
    pub fn with_default_device(mut self, device: DeviceSpec) -> Self {
        self.default_device = device;
        self
    }

    /// Get the artifact store
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Load one pipeline
    pub async fn load(&self, name: &str, spec: &PipelineConfigSpec) -> Result<InferencePipeline> {
        info!("Loading pipeline '{}'", name);

        let device = create_device(spec.device_type(self.default_device))?;
        let labels = self.load_labels(&spec.labels).await?;

        let mut builder = InferencePipeline::builder(name)
            .preprocessing(spec.preprocessing.clone())
            .device(device.clone());

        if let Some(extractor) = &spec.extractor {
            let weights = self.resolve(&extractor.weights).await?;
            let network = self.load_network(&extractor.network).await?;
            let network = SequentialNetwork::load(
                format!("{}/extractor", name),
                &network,
                &weights,
                &device,
            )?;
            builder = builder.extractor(Arc::new(network) as Arc<dyn FeatureExtractor>);
        }

        if let Some(scaler) = &spec.scaler {
            let path = self.resolve(scaler).await?;
            builder = builder.scaler(StandardScaler::from_file(&path, &device)?);
        }

        let classifier: Arc<dyn ClassifierArtifact> = match &spec.classifier {
            ClassifierSpec::Dense { weights, network } => {
                let weights = self.resolve(weights).await?;
                let network = self.load_network(network).await?;
                let network = SequentialNetwork::load(
                    format!("{}/classifier", name),
                    &network,
                    &weights,
                    &device,
                )?;
                Arc::new(DenseClassifier::new(network))
            }
            ClassifierSpec::Knn {
                weights,
                k,
                num_classes,
            } => {
                let path = self.resolve(weights).await?;
                Arc::new(KnnClassifier::load(
                    format!("{}/classifier", name),
                    &path,
                    *k,
                    *num_classes,
                    &device,
                )?)
            }
        };

        builder.classifier(classifier).labels(labels).build()
    }

    async fn resolve(&self, spec: &ArtifactSourceSpec) -> Result<PathBuf> {
        self.store.resolve(&ArtifactSource::from(spec)).await
    }

    async fn load_labels(&self, spec: &LabelsSpec) -> Result<LabelSpace> {
        match spec {
            LabelsSpec::Inline(labels) => LabelSpace::new(labels.iter().cloned()),
            LabelsSpec::File(source) => {
                let path = self.resolve(source).await?;
                LabelSpace::from_file(path)
            }
        }
    }

    async fn load_network(&self, source: &NetworkSource) -> Result<NetworkSpec> {
        match source {
            NetworkSource::Inline(spec) => Ok(spec.clone()),
            NetworkSource::File(source) => {
                let path = self.resolve(source).await?;
                let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    Error::artifact(format!("Failed to read network {}: {}", path.display(), e))
                })?;
                serde_yaml::from_str(&contents).map_err(|e| {
                    Error::artifact(format!("Invalid network {}: {}", path.display(), e))
                })
            }
        }
    }
}
