//! Billing Filter Processor
//!
//! Watches an input directory of delimited CDR files and routes each one to
//! the success or failure directory after filtering and rewriting its records.

use anyhow::{Context, Result};
use billing_filter_processor::{FlowRuntime, ProcessorConfig, RecordTransformProcessor, ServiceRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    tracing::info!("Starting Billing Filter Processor");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ProcessorConfig::load().context("Failed to load configuration")?;

    tracing::info!(
        processor_name = %config.processor_name,
        record_reader = %config.record_reader,
        record_writer = %config.record_writer,
        services = config.services.len(),
        schemas = config.schemas.len(),
        "Configuration loaded successfully"
    );

    let registry =
        ServiceRegistry::from_config(&config).context("Failed to build controller services")?;
    let processor = RecordTransformProcessor::from_config(&config, &registry)
        .context("Failed to configure processor")?;

    let runtime = FlowRuntime::new(processor, config.runtime.clone());
    runtime.run().await?;

    tracing::info!("Processor stopped");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,billing_filter_processor=debug")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
