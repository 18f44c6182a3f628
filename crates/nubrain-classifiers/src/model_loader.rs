//! Artifact resolution and device selection

use candle_core::Device;
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use nubrain_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Where an artifact file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Load from local file system
    LocalPath(PathBuf),

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
        filename: String,
    },

    /// Download over HTTP(S)
    Url {
        url: String,
        filename: Option<String>,
    },
}

impl ArtifactSource {
    /// Local file source
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::LocalPath(path.into())
    }

    /// Hugging Face source on the default revision
    pub fn hf(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::HuggingFace {
            repo_id: repo_id.into(),
            revision: None,
            filename: filename.into(),
        }
    }

    /// File name the artifact will have once resolved
    pub fn file_name(&self) -> Option<String> {
        match self {
            Self::LocalPath(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Self::HuggingFace { filename, .. } => Path::new(filename)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            Self::Url { url, filename } => filename.clone().or_else(|| url_file_name(url)),
        }
    }
}

impl std::fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalPath(path) => write!(f, "{}", path.display()),
            Self::HuggingFace {
                repo_id,
                revision,
                filename,
            } => write!(
                f,
                "hf://{}@{}/{}",
                repo_id,
                revision.as_deref().unwrap_or("main"),
                filename
            ),
            Self::Url { url, .. } => write!(f, "{}", url),
        }
    }
}

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// CPU inference (always available)
    #[default]
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize),
    /// Metal (Apple Silicon)
    Metal(usize),
}

/// Create Candle device from device type
pub fn create_device(device_type: DeviceType) -> Result<Device> {
    match device_type {
        DeviceType::Cpu => Ok(Device::Cpu),
        DeviceType::Cuda(idx) => Device::new_cuda(idx)
            .map_err(|e| Error::config(format!("Failed to create CUDA device {}: {}", idx, e))),
        DeviceType::Metal(idx) => Device::new_metal(idx)
            .map_err(|e| Error::config(format!("Failed to create Metal device {}: {}", idx, e))),
    }
}

/// Default artifact cache location
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache/nubrain/artifacts")
}

/// Resolves artifact sources to readable local files.
///
/// Relative local paths are interpreted against `base_dir` (usually the
/// directory of the configuration file). Remote artifacts are downloaded
/// once into `cache_dir` and reused afterwards.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cache_dir: PathBuf,
    base_dir: Option<PathBuf>,
    client: reqwest::Client,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(default_cache_dir())
    }
}

impl ArtifactStore {
    /// Create a store caching downloads under `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("nubrain/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            cache_dir: cache_dir.into(),
            base_dir: None,
            client,
        }
    }

    /// Resolve relative local paths against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve a source to a local file path, downloading if needed
    pub async fn resolve(&self, source: &ArtifactSource) -> Result<PathBuf> {
        match source {
            ArtifactSource::LocalPath(path) => {
                let path = match &self.base_dir {
                    Some(base) if path.is_relative() => base.join(path),
                    _ => path.clone(),
                };
                if !path.is_file() {
                    return Err(Error::artifact(format!(
                        "Artifact file not found: {}",
                        path.display()
                    )));
                }
                Ok(path)
            }
            ArtifactSource::HuggingFace {
                repo_id,
                revision,
                filename,
            } => {
                self.download_from_huggingface(repo_id, revision.as_deref(), filename)
                    .await
            }
            ArtifactSource::Url { url, filename } => {
                self.download_from_url(url, filename.as_deref()).await
            }
        }
    }

    async fn download_from_huggingface(
        &self,
        repo_id: &str,
        revision: Option<&str>,
        filename: &str,
    ) -> Result<PathBuf> {
        let revision = revision.unwrap_or("main").to_string();
        tracing::info!("Fetching {} from HuggingFace: {} @ {}", filename, repo_id, revision);

        let cache_dir = self.cache_dir.join("huggingface");
        let repo = Repo::with_revision(repo_id.to_string(), RepoType::Model, revision);
        let filename = filename.to_string();

        // hf-hub's sync API blocks on network IO
        tokio::task::spawn_blocking(move || {
            let api = ApiBuilder::new()
                .with_cache_dir(cache_dir)
                .build()
                .map_err(|e| {
                    Error::artifact(format!("Failed to initialize HuggingFace API: {}", e))
                })?;

            api.repo(repo).get(&filename).map_err(|e| {
                Error::artifact(format!("Failed to download {} from HuggingFace: {}", filename, e))
            })
        })
        .await
        .map_err(|e| Error::internal(format!("Download task failed: {}", e)))?
    }

    /// Cache location of a URL artifact: `url/<url digest>/<file name>`
    fn url_cache_path(&self, url: &str, filename: Option<&str>) -> Result<PathBuf> {
        let filename = match filename {
            Some(name) => name.to_string(),
            None => url_file_name(url).ok_or_else(|| {
                Error::config(format!("Cannot derive a file name from URL '{}'", url))
            })?,
        };

        if !is_plain_file_name(&filename) {
            return Err(Error::config(format!("Unsafe artifact file name '{}'", filename)));
        }

        Ok(self.cache_dir.join("url").join(url_digest(url)).join(filename))
    }

    async fn download_from_url(&self, url: &str, filename: Option<&str>) -> Result<PathBuf> {
        let target = self.url_cache_path(url, filename)?;
        if target.is_file() {
            tracing::debug!("Using cached artifact {}", target.display());
            return Ok(target);
        }

        tracing::info!("Downloading artifact {} from {}", target.display(), url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::artifact(format!("Failed to download {}: {}", url, e)))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::artifact(format!("Failed to read body of {}: {}", url, e)))?;

        self.store_download(url, filename, &bytes).await
    }

    /// Write downloaded bytes into the URL cache
    async fn store_download(
        &self,
        url: &str,
        filename: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let target = self.url_cache_path(url, filename)?;
        let cache_error = |e: std::io::Error| {
            Error::artifact(format!("Failed to cache {} at {}: {}", url, target.display(), e))
        };

        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(cache_error)?;
        }

        // Write to a temporary name first so an interrupted download is
        // never mistaken for a cached artifact.
        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        tokio::fs::write(&partial, bytes).await.map_err(cache_error)?;
        tokio::fs::rename(&partial, &target).await.map_err(cache_error)?;

        tracing::info!("Cached {} bytes at {}", bytes.len(), target.display());
        Ok(target)
    }
}

/// Short hex digest identifying a URL in the cache
fn url_digest(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn url_file_name(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    if name.is_empty() || !path.contains("://") {
        return None;
    }
    // Bare host such as https://example.com
    if path.trim_end_matches('/').matches('/').count() < 3 {
        return None;
    }
    Some(name.to_string())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}
