//! Detector station binary
//!
//! Entry point for a single conversion station: loads the YAML config,
//! assembles the pipeline, and runs it until a halt condition or shutdown
//! signal.

use anyhow::Result;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evflow_core::{LoggingConsumer, Pipeline};
use evflow_station::builder::DiagnosticEventBuilder;
use evflow_station::config::StationConfig;
use evflow_station::synthetic::SyntheticFeed;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting detector station...");

    // Load configuration: first CLI argument, EVFLOW_CONFIG, or defaults
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("EVFLOW_CONFIG").ok());
    let config = StationConfig::load(config_path.as_deref().map(std::path::Path::new))?;

    tracing::info!(
        station = %config.station.name,
        source = ?config.source,
        target = ?config.pipeline.target,
        stop_on_errors = config.pipeline.stop_on_errors,
        stop_on_run_boundary = config.pipeline.stop_on_run_boundary,
        "Configuration loaded"
    );

    // Assemble the pipeline
    let pipeline_config = config.pipeline_config();
    let needs_builder = pipeline_config.needs_builder();
    let mut pipeline = Pipeline::new(pipeline_config)?.with_consumer(Box::new(LoggingConsumer));
    if needs_builder {
        pipeline = pipeline.with_event_builder(Box::new(DiagnosticEventBuilder::default()));
    }

    // Spawn the synthetic feed when configured
    let feed_task = if config.source.is_synthetic() {
        let queue = pipeline
            .raw_input()
            .ok_or_else(|| anyhow::anyhow!("synthetic source requires the live queue"))?;
        let feed = SyntheticFeed::new(config.synthetic.clone(), queue);
        Some(tokio::spawn(feed.run()))
    } else {
        None
    };

    let mut handle = pipeline.spawn().await?;
    handle.go()?;

    // Run until the pipeline halts on its own or a shutdown signal arrives
    let halted_on_its_own = tokio::select! {
        _ = handle.wait_done() => true,
        _ = shutdown_signal() => false,
    };
    if !halted_on_its_own {
        tracing::info!("Shutdown signal received, stopping pipeline...");
        let _ = handle.stop();
    }
    let status = handle.wait_done().await;

    if let Some(feed_task) = feed_task {
        match feed_task.await {
            Ok(Ok(frames)) => tracing::debug!(frames, "Synthetic feed completed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "Synthetic feed stopped early"),
            Err(e) => tracing::warn!(error = %e, "Synthetic feed task failed"),
        }
    }

    tracing::info!(status = %status.to_json()?, "Station finished");
    handle.join().await?;

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
