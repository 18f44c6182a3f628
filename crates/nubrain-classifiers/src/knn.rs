//! K-nearest-neighbours classifier over stored training vectors

use crate::classifier::{ensure_batched_shape, ClassifierArtifact, ClassifierOutput};
use candle_core::{DType, Device, Tensor};
use nubrain_core::{Error, Result};
use std::cmp::Ordering;
use std::path::Path;

/// Default neighbourhood size
pub const DEFAULT_K: usize = 5;

/// Uniform-weight KNN with Euclidean distance.
///
/// The `k` nearest training vectors vote with their labels; ties between
/// equally voted classes go to the smallest class index, and ties between
/// equidistant neighbours go to the earlier training row.
pub struct KnnClassifier {
    name: String,
    train_x: Tensor,
    train_y: Vec<usize>,
    k: usize,
    dim: usize,
    num_classes: usize,
}

impl KnnClassifier {
    /// Create a classifier from an `(N, D)` training matrix and `N` labels
    pub fn new(
        name: impl Into<String>,
        train_x: Tensor,
        train_y: Vec<usize>,
        k: usize,
        num_classes: Option<usize>,
    ) -> Result<Self> {
        let name = name.into();

        let (rows, dim) = train_x.dims2().map_err(|_| {
            Error::artifact(format!(
                "KNN '{}' training matrix must be 2-D, got {:?}",
                name,
                train_x.dims()
            ))
        })?;

        if rows == 0 || dim == 0 {
            return Err(Error::artifact(format!("KNN '{}' has no training data", name)));
        }
        if train_y.len() != rows {
            return Err(Error::artifact(format!(
                "KNN '{}' has {} training vectors but {} labels",
                name,
                rows,
                train_y.len()
            )));
        }
        if k == 0 || k > rows {
            return Err(Error::artifact(format!(
                "KNN '{}' needs 1 <= k <= {}, got k = {}",
                name, rows, k
            )));
        }

        let observed = train_y.iter().max().map_or(0, |m| m + 1);
        let num_classes = match num_classes {
            Some(n) if n < observed => {
                return Err(Error::artifact(format!(
                    "KNN '{}' declares {} classes but its labels reach index {}",
                    name,
                    n,
                    observed - 1
                )));
            }
            Some(n) => n,
            None => observed,
        };

        let train_x = train_x
            .to_dtype(DType::F32)
            .map_err(|e| Error::artifact(format!("KNN '{}' training matrix: {}", name, e)))?;

        Ok(Self {
            name,
            train_x,
            train_y,
            k,
            dim,
            num_classes,
        })
    }

    /// Load `train_x` and `train_y` tensors from a safetensors file
    pub fn load(
        name: impl Into<String>,
        path: &Path,
        k: usize,
        num_classes: Option<usize>,
        device: &Device,
    ) -> Result<Self> {
        let name = name.into();

        let mut tensors = candle_core::safetensors::load(path, device).map_err(|e| {
            Error::artifact(format!("Failed to load KNN '{}' from {}: {}", name, path.display(), e))
        })?;

        let mut take = |key: &str| {
            tensors.remove(key).ok_or_else(|| {
                Error::artifact(format!("KNN file {} has no '{}' tensor", path.display(), key))
            })
        };
        let train_x = take("train_x")?;
        let train_y = take("train_y")?;

        let train_y = labels_from_tensor(&train_y)
            .map_err(|e| Error::artifact(format!("KNN '{}' labels: {}", name, e)))?;

        let knn = Self::new(name, train_x, train_y, k, num_classes)?;

        tracing::info!(
            "Loaded KNN '{}': {} training vectors of dimension {}, k = {}, {} classes",
            knn.name,
            knn.train_y.len(),
            knn.dim,
            knn.k,
            knn.num_classes
        );

        Ok(knn)
    }

    /// Neighbourhood size
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of stored training vectors
    pub fn len(&self) -> usize {
        self.train_y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train_y.is_empty()
    }

    fn nearest(&self, distances: &[f32]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..distances.len()).collect();
        order.sort_by(|&a, &b| {
            distances[a]
                .partial_cmp(&distances[b])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        order.truncate(self.k);
        order
    }

    fn vote(&self, neighbours: &[usize]) -> usize {
        let mut votes = vec![0usize; self.num_classes];
        for &row in neighbours {
            votes[self.train_y[row]] += 1;
        }

        let mut best = 0;
        for (class, &count) in votes.iter().enumerate().skip(1) {
            if count > votes[best] {
                best = class;
            }
        }
        best
    }
}

impl ClassifierArtifact for KnnClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_shape(&self) -> &[usize] {
        std::slice::from_ref(&self.dim)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: &Tensor) -> Result<ClassifierOutput> {
        ensure_batched_shape(&self.name, input, &[self.dim])?;

        let distances = self
            .train_x
            .broadcast_sub(input)
            .and_then(|d| d.sqr())
            .and_then(|d| d.sum(1))
            .and_then(|d| d.to_vec1::<f32>())
            .map_err(|e| Error::inference(format!("KNN distance computation failed: {}", e)))?;

        if distances.iter().any(|d| !d.is_finite()) {
            return Err(Error::inference("KNN input produced non-finite distances"));
        }

        let neighbours = self.nearest(&distances);
        Ok(ClassifierOutput::DiscreteIndex(self.vote(&neighbours)))
    }
}

fn labels_from_tensor(tensor: &Tensor) -> Result<Vec<usize>> {
    let values = tensor
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F64))
        .and_then(|t| t.to_vec1::<f64>())
        .map_err(|e| Error::artifact(e.to_string()))?;

    values
        .into_iter()
        .map(|v| {
            if v >= 0.0 && v.fract() == 0.0 {
                Ok(v as usize)
            } else {
                Err(Error::artifact(format!("{} is not a class index", v)))
            }
        })
        .collect()
}
