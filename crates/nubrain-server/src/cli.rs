use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nubrain-server")]
#[command(author, version, about = "Brain MRI tumor classification server")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Pipeline configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "NUBRAIN_CONFIG",
        default_value = "config/nubrain.yaml"
    )]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load all pipelines and serve the HTTP API
    Serve {
        /// Listen address
        #[arg(short = 'l', long)]
        listen: Option<String>,

        /// Listen port
        #[arg(short = 'P', long)]
        port: Option<u16>,

        /// Maximum accepted upload size in bytes
        #[arg(long)]
        max_body_bytes: Option<usize>,
    },

    /// Classify a single image file and print its label
    Classify {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,

        /// Pipeline to use instead of the configured default
        #[arg(short, long)]
        pipeline: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured pipelines without loading artifacts
    Pipelines,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::parse_from([
            "nubrain-server",
            "--config",
            "custom.yaml",
            "serve",
            "--port",
            "9000",
            "--max-body-bytes",
            "1024",
        ]);

        assert_eq!(cli.config, PathBuf::from("custom.yaml"));
        match cli.command {
            Commands::Serve {
                listen,
                port,
                max_body_bytes,
            } => {
                assert_eq!(listen, None);
                assert_eq!(port, Some(9000));
                assert_eq!(max_body_bytes, Some(1024));
            }
            other => panic!("Expected serve, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_classify() {
        let cli = Cli::parse_from([
            "nubrain-server",
            "classify",
            "scan.png",
            "--pipeline",
            "knn-raw-pixels",
            "-v",
        ]);

        assert!(cli.verbose);
        match cli.command {
            Commands::Classify {
                image,
                pipeline,
                json,
            } => {
                assert_eq!(image, PathBuf::from("scan.png"));
                assert_eq!(pipeline.as_deref(), Some("knn-raw-pixels"));
                assert!(!json);
            }
            other => panic!("Expected classify, got {other:?}"),
        }
    }
}
