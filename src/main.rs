use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;

use scratch_detector::{start_server, AppState, CleanupScheduler, Config, Detector, StoragePaths};

#[cfg(not(feature = "embedded-python"))]
fn load_detector(config: &Config) -> anyhow::Result<Arc<dyn Detector>> {
    let worker = scratch_detector::detector::PythonWorker::spawn(&config.python, &config.weights)
        .with_context(|| format!("failed to load model {}", config.weights.display()))?;
    Ok(Arc::new(worker))
}

#[cfg(feature = "embedded-python")]
fn load_detector(config: &Config) -> anyhow::Result<Arc<dyn Detector>> {
    let model = scratch_detector::detector::YOLOModel::new(&config.weights)
        .with_context(|| format!("failed to load model {}", config.weights.display()))?;
    Ok(Arc::new(model))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::parse();
    let storage = StoragePaths::init(&config.upload_dir, &config.output_dir)
        .context("failed to create storage directories")?;
    info!(
        "Uploads in {}, outputs in {}, cleanup after {:?}",
        storage.upload_dir.display(),
        storage.output_dir.display(),
        config.cleanup_delay()
    );

    let detector = load_detector(&config)?;
    info!("Model ready ({})", detector.name());

    let state = AppState {
        detector,
        storage,
        cleanup: CleanupScheduler::new(config.cleanup_delay()),
        upload_field: config.upload_field.clone(),
    };
    start_server(state, &config.bind, config.workers)
        .await
        .context("HTTP server failed")?;

    info!("Shutting down, pending cleanups are abandoned");
    Ok(())
}
