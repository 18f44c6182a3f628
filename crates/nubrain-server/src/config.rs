//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// HTTP server settings, read from the `server` section of the pipeline
/// configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
}

/// Command line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub max_body_bytes: Option<usize>,
}

impl ServerConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &Path, overrides: &ServerOverrides) -> anyhow::Result<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str::<ConfigFile>(&content)?.server
        } else {
            Self::default()
        };

        if let Some(listen) = &overrides.listen {
            config.listen = listen.clone();
        }

        if let Some(port) = overrides.port {
            config.port = port;
        }

        if let Some(max) = overrides.max_body_bytes {
            config.max_body_bytes = max;
        }

        Ok(config)
    }

    /// Socket address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.listen, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
