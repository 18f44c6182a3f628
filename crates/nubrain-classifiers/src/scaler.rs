//! Per-feature standardization fitted offline

use crate::classifier::ensure_batched_shape;
use candle_core::{Device, Tensor};
use nubrain_core::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Standard scaler: `(x - mean) / scale` per feature.
///
/// Features with a zero scale were constant in the training set and are
/// only centered.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Tensor,
    scale: Tensor,
    dim: usize,
}

#[derive(Deserialize)]
struct ScalerFile {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl StandardScaler {
    /// Create a scaler from fitted statistics
    pub fn new(mean: Vec<f32>, scale: Vec<f32>, device: &Device) -> Result<Self> {
        if mean.is_empty() {
            return Err(Error::artifact("scaler statistics are empty"));
        }
        if mean.len() != scale.len() {
            return Err(Error::artifact(format!(
                "scaler mean has {} features but scale has {}",
                mean.len(),
                scale.len()
            )));
        }
        if let Some(bad) = mean.iter().chain(scale.iter()).find(|v| !v.is_finite()) {
            return Err(Error::artifact(format!("scaler contains a non-finite value: {}", bad)));
        }

        let dim = mean.len();
        let scale: Vec<f32> = scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();

        let mean = Tensor::from_vec(mean, (1, dim), device)
            .map_err(|e| Error::artifact(format!("Failed to build scaler mean: {}", e)))?;
        let scale = Tensor::from_vec(scale, (1, dim), device)
            .map_err(|e| Error::artifact(format!("Failed to build scaler scale: {}", e)))?;

        Ok(Self { mean, scale, dim })
    }

    /// Parse `{"mean": [...], "scale": [...]}`
    pub fn from_json(json: &str, device: &Device) -> Result<Self> {
        let file: ScalerFile = serde_json::from_str(json)?;
        Self::new(file.mean, file.scale, device)
    }

    /// Load `mean` and `scale` tensors from a safetensors file
    pub fn from_safetensors(path: &Path, device: &Device) -> Result<Self> {
        let tensors = candle_core::safetensors::load(path, device).map_err(|e| {
            Error::artifact(format!("Failed to load scaler {}: {}", path.display(), e))
        })?;

        let read = |key: &str| -> Result<Vec<f32>> {
            tensors
                .get(key)
                .ok_or_else(|| {
                    Error::artifact(format!("Scaler {} has no '{}' tensor", path.display(), key))
                })?
                .flatten_all()
                .and_then(|t| t.to_dtype(candle_core::DType::F32))
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| Error::artifact(format!("Invalid scaler tensor '{}': {}", key, e)))
        };

        Self::new(read("mean")?, read("scale")?, device)
    }

    /// Load a scaler, choosing the format from the file extension
    pub fn from_file(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();

        let scaler = match path.extension().and_then(|s| s.to_str()) {
            Some("safetensors") => Self::from_safetensors(path, device)?,
            _ => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::artifact(format!("Failed to read scaler {}: {}", path.display(), e))
                })?;
                Self::from_json(&contents, device).map_err(|e| {
                    Error::artifact(format!("Invalid scaler {}: {}", path.display(), e))
                })?
            }
        };

        tracing::debug!("Loaded scaler with {} features from {}", scaler.dim, path.display());
        Ok(scaler)
    }

    /// Number of features
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Standardize a `(1, D)` feature vector
    pub fn transform(&self, features: &Tensor) -> Result<Tensor> {
        ensure_batched_shape("scaler", features, &[self.dim])?;

        features
            .broadcast_sub(&self.mean)
            .and_then(|t| t.broadcast_div(&self.scale))
            .map_err(|e| Error::inference(format!("Scaling failed: {}", e)))
    }
}
