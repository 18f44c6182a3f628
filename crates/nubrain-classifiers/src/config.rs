//! Configuration for inference pipelines

use crate::knn::DEFAULT_K;
use crate::model_config::NetworkSpec;
use crate::model_loader::{default_cache_dir, ArtifactSource, DeviceType};
use crate::preprocess::PreprocessConfig;
use nubrain_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration: named pipelines sharing a device and cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Pipeline definitions
    pub pipelines: HashMap<String, PipelineConfigSpec>,

    /// Pipeline used when a request does not name one
    pub default_pipeline: Option<String>,

    /// Default device for inference
    #[serde(default)]
    pub default_device: DeviceSpec,

    /// Download cache for remote artifacts
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

/// One pipeline: preprocessing, artifacts and label space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfigSpec {
    /// Pipeline description
    pub description: Option<String>,

    /// Image preprocessing
    #[serde(default)]
    pub preprocessing: PreprocessConfig,

    /// Ordered class names
    pub labels: LabelsSpec,

    /// Optional feature extractor run before the classifier
    pub extractor: Option<ExtractorSpec>,

    /// Optional standardization applied to the classifier input
    pub scaler: Option<ArtifactSourceSpec>,

    /// The classifier artifact
    pub classifier: ClassifierSpec,

    /// Device override for this pipeline
    pub device: Option<DeviceSpec>,
}

/// Label space, inline or from a file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelsSpec {
    Inline(Vec<String>),
    File(ArtifactSourceSpec),
}

/// Feature extractor network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorSpec {
    /// Safetensors weights
    pub weights: ArtifactSourceSpec,

    /// Layer description
    pub network: NetworkSource,
}

/// Classifier artifact specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClassifierSpec {
    /// Sequential network producing class scores
    Dense {
        weights: ArtifactSourceSpec,
        network: NetworkSource,
    },

    /// Nearest-neighbour vote over stored training vectors
    Knn {
        weights: ArtifactSourceSpec,
        #[serde(default = "default_k")]
        k: usize,
        num_classes: Option<usize>,
    },
}

fn default_k() -> usize {
    DEFAULT_K
}

/// Network layer description, inline or from a YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworkSource {
    Inline(NetworkSpec),
    File(ArtifactSourceSpec),
}

/// Artifact source specification (for config files)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactSourceSpec {
    /// Bare local path
    Path(PathBuf),

    /// Local file path
    Local { path: PathBuf },

    /// Hugging Face Hub
    HuggingFace {
        repo_id: String,
        filename: String,
        revision: Option<String>,
    },

    /// HTTP(S) URL
    Url { url: String, filename: Option<String> },
}

impl From<&ArtifactSourceSpec> for ArtifactSource {
    fn from(spec: &ArtifactSourceSpec) -> Self {
        match spec {
            ArtifactSourceSpec::Path(path) | ArtifactSourceSpec::Local { path } => {
                ArtifactSource::LocalPath(path.clone())
            }
            ArtifactSourceSpec::HuggingFace {
                repo_id,
                filename,
                revision,
            } => ArtifactSource::HuggingFace {
                repo_id: repo_id.clone(),
                revision: revision.clone(),
                filename: filename.clone(),
            },
            ArtifactSourceSpec::Url { url, filename } => ArtifactSource::Url {
                url: url.clone(),
                filename: filename.clone(),
            },
        }
    }
}

/// Device specification (for config files)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda { index: Option<usize> },
    Metal { index: Option<usize> },
}

impl From<DeviceSpec> for DeviceType {
    fn from(spec: DeviceSpec) -> Self {
        match spec {
            DeviceSpec::Cpu => DeviceType::Cpu,
            DeviceSpec::Cuda { index } => DeviceType::Cuda(index.unwrap_or(0)),
            DeviceSpec::Metal { index } => DeviceType::Metal(index.unwrap_or(0)),
        }
    }
}

impl ClassifierConfig {
    /// Parse and validate a YAML configuration
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    /// Check cross-references between pipelines
    pub fn validate(&self) -> Result<()> {
        if self.pipelines.is_empty() {
            return Err(Error::config("no pipelines configured"));
        }

        if let Some(default) = &self.default_pipeline {
            if !self.pipelines.contains_key(default) {
                return Err(Error::config(format!(
                    "default pipeline '{}' is not defined",
                    default
                )));
            }
        }

        for (name, pipeline) in &self.pipelines {
            if let ClassifierSpec::Knn { k: 0, .. } = pipeline.classifier {
                return Err(Error::config(format!("pipeline '{}': k must be at least 1", name)));
            }
        }

        Ok(())
    }

    /// Name of the pipeline used when none is requested
    pub fn default_pipeline_name(&self) -> Option<&str> {
        if let Some(name) = &self.default_pipeline {
            return Some(name);
        }
        // A single pipeline is the implicit default
        if self.pipelines.len() == 1 {
            return self.pipelines.keys().next().map(String::as_str);
        }
        None
    }

    /// Pipeline names in sorted order
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }
}

impl PipelineConfigSpec {
    /// Effective device for this pipeline
    pub fn device_type(&self, default: DeviceSpec) -> DeviceType {
        self.device.unwrap_or(default).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{ColorMode, Normalization, TensorLayout};

    const SAMPLE: &str = include_str!("../../../config/nubrain.yaml");

    #[test]
    fn test_parse_sample_config() {
        let config = ClassifierConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            config.pipeline_names(),
            vec!["end-to-end-cnn", "knn-cnn-features", "knn-raw-pixels"]
        );
        assert_eq!(config.default_pipeline_name(), Some("end-to-end-cnn"));
        assert_eq!(config.default_device, DeviceSpec::Cpu);
    }

    #[test]
    fn test_end_to_end_cnn_variant() {
        let config = ClassifierConfig::from_yaml(SAMPLE).unwrap();
        let cnn = &config.pipelines["end-to-end-cnn"];

        assert_eq!(cnn.preprocessing, PreprocessConfig::color_224());
        assert!(cnn.extractor.is_none());
        assert!(cnn.scaler.is_none());
        assert!(matches!(cnn.labels, LabelsSpec::Inline(ref l) if l.len() == 4));
        match &cnn.classifier {
            ClassifierSpec::Dense { network, .. } => {
                assert!(matches!(network, NetworkSource::File(_)));
            }
            other => panic!("Expected dense classifier, got {other:?}"),
        }
    }

    #[test]
    fn test_knn_raw_pixels_variant() {
        let config = ClassifierConfig::from_yaml(SAMPLE).unwrap();
        let knn = &config.pipelines["knn-raw-pixels"];

        assert_eq!(knn.preprocessing.color_mode, ColorMode::Grayscale);
        assert_eq!((knn.preprocessing.width, knn.preprocessing.height), (64, 64));
        assert_eq!(knn.preprocessing.normalization, Normalization::Raw);
        assert_eq!(knn.preprocessing.layout, TensorLayout::Flat);
        assert!(knn.extractor.is_none());
        assert!(knn.scaler.is_some());
        match &knn.classifier {
            ClassifierSpec::Knn { k, num_classes, .. } => {
                assert_eq!(*k, 5);
                assert_eq!(*num_classes, Some(4));
            }
            other => panic!("Expected knn classifier, got {other:?}"),
        }
    }

    #[test]
    fn test_knn_cnn_features_variant() {
        let config = ClassifierConfig::from_yaml(SAMPLE).unwrap();
        let pipeline = &config.pipelines["knn-cnn-features"];

        assert_eq!(pipeline.preprocessing, PreprocessConfig::color_224());
        assert!(pipeline.extractor.is_some());
        assert!(pipeline.scaler.is_some());
        assert!(matches!(pipeline.classifier, ClassifierSpec::Knn { .. }));
    }

    #[test]
    fn test_artifact_source_forms() {
        let yaml = r#"
- models/cnn.safetensors
- path: models/knn.safetensors
- repo_id: org/brain-mri
  filename: cnn.safetensors
  revision: v1
- url: https://example.com/scaler.json
"#;
        let specs: Vec<ArtifactSourceSpec> = serde_yaml::from_str(yaml).unwrap();
        let sources: Vec<ArtifactSource> = specs.iter().map(ArtifactSource::from).collect();

        assert_eq!(sources[0], ArtifactSource::local("models/cnn.safetensors"));
        assert_eq!(sources[1], ArtifactSource::local("models/knn.safetensors"));
        assert_eq!(
            sources[2],
            ArtifactSource::HuggingFace {
                repo_id: "org/brain-mri".to_string(),
                revision: Some("v1".to_string()),
                filename: "cnn.safetensors".to_string(),
            }
        );
        assert_eq!(
            sources[3],
            ArtifactSource::Url {
                url: "https://example.com/scaler.json".to_string(),
                filename: None,
            }
        );
    }

    #[test]
    fn test_device_specs() {
        let spec: DeviceSpec = serde_yaml::from_str("cpu").unwrap();
        assert_eq!(DeviceType::from(spec), DeviceType::Cpu);

        assert_eq!(
            DeviceType::from(DeviceSpec::Cuda { index: Some(1) }),
            DeviceType::Cuda(1)
        );
        assert_eq!(
            DeviceType::from(DeviceSpec::Metal { index: None }),
            DeviceType::Metal(0)
        );

        let pipeline: PipelineConfigSpec = serde_yaml::from_str(
            "labels: [a]\nclassifier: {type: knn, weights: knn.safetensors}",
        )
        .unwrap();
        assert_eq!(pipeline.device_type(DeviceSpec::Cpu), DeviceType::Cpu);
    }

    #[test]
    fn test_validation_errors() {
        assert!(ClassifierConfig::from_yaml("pipelines: {}").is_err());

        let unknown_default = r#"
default_pipeline: missing
pipelines:
  only:
    labels: [a, b]
    classifier: {type: knn, weights: knn.safetensors}
"#;
        assert!(matches!(
            ClassifierConfig::from_yaml(unknown_default),
            Err(Error::Config(_))
        ));

        let zero_k = r#"
pipelines:
  only:
    labels: [a, b]
    classifier: {type: knn, weights: knn.safetensors, k: 0}
"#;
        assert!(ClassifierConfig::from_yaml(zero_k).is_err());
    }

    #[test]
    fn test_single_pipeline_is_default() {
        let yaml = r#"
pipelines:
  only:
    labels: [a, b]
    classifier: {type: knn, weights: knn.safetensors}
"#;
        let config = ClassifierConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.default_pipeline_name(), Some("only"));
        assert_eq!(config.pipelines["only"].preprocessing, PreprocessConfig::default());
    }
}
