//! Pipeline registry initialization and lookup

use crate::config::ClassifierConfig;
use crate::loader::PipelineLoader;
use crate::model_loader::ArtifactStore;
use crate::pipeline::InferencePipeline;
use nubrain_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Load classifier configuration from a YAML file
pub fn load_config(path: impl AsRef<Path>) -> Result<ClassifierConfig> {
    ClassifierConfig::from_file(path)
}

/// Named, fully loaded pipelines
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<InferencePipeline>>,
    default: Option<String>,
}

impl PipelineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every configured pipeline.
    ///
    /// Relative local artifact paths are resolved against `base_dir`. The
    /// first artifact that fails to load aborts the whole registry. Without
    /// a configured default, the first pipeline in name order is the default.
    pub async fn from_config(config: &ClassifierConfig, base_dir: Option<&Path>) -> Result<Self> {
        config.validate()?;

        let mut store = ArtifactStore::new(&config.cache_dir);
        if let Some(dir) = base_dir {
            store = store.with_base_dir(dir);
        }
        let loader = PipelineLoader::new(store).with_default_device(config.default_device);

        let mut registry = Self::new();
        for name in config.pipeline_names() {
            let spec = &config.pipelines[&name];
            let pipeline = loader.load(&name, spec).await?;
            registry.insert(pipeline);
        }

        if let Some(default) = config.default_pipeline_name() {
            registry.default = Some(default.to_string());
        }

        info!(
            "Loaded {} pipelines (default: {})",
            registry.len(),
            registry.default.as_deref().unwrap_or("none")
        );

        Ok(registry)
    }

    /// Load a registry from a configuration file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = load_config(path)?;
        Self::from_config(&config, path.parent()).await
    }

    /// Register a pipeline under its own name
    pub fn insert(&mut self, pipeline: InferencePipeline) {
        let name = pipeline.name().to_string();
        if self.pipelines.is_empty() && self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.pipelines.insert(name, Arc::new(pipeline));
    }

    /// Set the pipeline used when a lookup names none
    pub fn set_default(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if !self.pipelines.contains_key(&name) {
            return Err(Error::config(format!("pipeline '{}' is not registered", name)));
        }
        self.default = Some(name);
        Ok(())
    }

    /// Look up a pipeline by name, or the default pipeline when `name` is `None`
    pub fn get(&self, name: Option<&str>) -> Option<Arc<InferencePipeline>> {
        let name = name.or(self.default.as_deref())?;
        self.pipelines.get(name).cloned()
    }

    /// Name of the default pipeline
    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
