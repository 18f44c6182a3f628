//! NuBrain Server
//!
//! Serves brain MRI tumor classification over HTTP and classifies single
//! images from the command line.

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use nubrain_classifiers::{ArtifactStore, ClassifierConfig, PipelineLoader, PipelineRegistry};
use std::net::SocketAddr;
use std::path::Path;
use tokio::signal;
use tracing::{info, warn};

use nubrain_server::cli::{Cli, Commands};
use nubrain_server::{create_router, AppState, ServerConfig, ServerOverrides};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Serve {
            listen,
            port,
            max_body_bytes,
        } => {
            let overrides = ServerOverrides {
                listen,
                port,
                max_body_bytes,
            };
            serve(&cli.config, &overrides).await
        }
        Commands::Classify {
            image,
            pipeline,
            json,
        } => classify(&cli.config, &image, pipeline.as_deref(), json).await,
        Commands::Pipelines => list_pipelines(&cli.config),
    }
}

async fn serve(config_path: &Path, overrides: &ServerOverrides) -> Result<()> {
    info!("Starting NuBrain server");

    let server_config = ServerConfig::load(config_path, overrides)?;
    info!("Configuration loaded from {}", config_path.display());

    let metrics_handle = init_metrics()?;

    // Every artifact is loaded before the listener binds
    info!("Loading pipelines...");
    let registry = PipelineRegistry::from_file(config_path)
        .await
        .context("Failed to load pipelines")?;
    info!("Pipelines ready: {}", registry.names().join(", "));

    let state = AppState::new(registry).with_metrics(metrics_handle);
    let app = create_router(state, server_config.max_body_bytes);

    let addr: SocketAddr = server_config.address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Load only the requested pipeline and classify one file
async fn classify(
    config_path: &Path,
    image: &Path,
    pipeline: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = ClassifierConfig::from_file(config_path)?;

    let name = match pipeline {
        Some(name) => name.to_string(),
        None => config
            .default_pipeline_name()
            .map(str::to_string)
            .or_else(|| config.pipeline_names().into_iter().next())
            .context("No pipelines configured")?,
    };
    let spec = config
        .pipelines
        .get(&name)
        .with_context(|| format!("Unknown pipeline '{}'", name))?;

    let mut store = ArtifactStore::new(&config.cache_dir);
    if let Some(dir) = config_path.parent() {
        store = store.with_base_dir(dir);
    }
    let loader = PipelineLoader::new(store).with_default_device(config.default_device);
    let pipeline = loader.load(&name, spec).await?;

    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;

    let result = tokio::task::spawn_blocking(move || pipeline.classify_detailed(&bytes)).await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.label);
    }

    Ok(())
}

fn list_pipelines(config_path: &Path) -> Result<()> {
    let config = ClassifierConfig::from_file(config_path)?;
    let default = config.default_pipeline_name();

    for name in config.pipeline_names() {
        let marker = if Some(name.as_str()) == default { "*" } else { " " };
        let description = config.pipelines[&name]
            .description
            .as_deref()
            .unwrap_or("");
        println!("{} {:<24} {}", marker, name, description);
    }

    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("nubrain_server=debug,nubrain_classifiers=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("nubrain_server=info,nubrain_classifiers=info")
        })
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "nubrain_requests_total",
        "Classification requests by pipeline and outcome"
    );
    metrics::describe_counter!(
        "nubrain_predictions_total",
        "Predicted labels by pipeline"
    );
    metrics::describe_histogram!(
        "nubrain_request_latency_us",
        metrics::Unit::Microseconds,
        "Classification request latency in microseconds"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}
