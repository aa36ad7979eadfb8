mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, SignalArgs};
use gatehouse::blocks::BlockPipeline;
use gatehouse::bootstrap::BootstrapPipeline;
use gatehouse::config::GatehouseConfig;
use gatehouse::generation::AnthropicClient;
use gatehouse::migration::MigrationPipeline;
use gatehouse::{PipelineHandle, PipelineKind};
use ui::PipelineProgress;

const CLI_EXIT_REASON: &str = "cli-exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => GatehouseConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatehouseConfig::load()?,
    };

    let payload = cli.command.payload()?;
    let signals = cli.command.signals();

    match &cli.command {
        Command::Blocks { .. } => {
            let mut pipeline = BlockPipeline::new(config.blocks.options());
            if config.text_generation {
                if config.api_key.is_empty() {
                    warn!("text_generation is enabled but no API key is set; skipping narratives");
                } else {
                    let client = AnthropicClient::new(config.api_key.clone(), config.model.clone())?;
                    pipeline = pipeline.with_generator(Arc::new(client));
                }
            }
            let handle = pipeline.start(payload)?;
            drive(PipelineKind::Blocks, handle, &signals).await
        }
        Command::Migrate { .. } => {
            let handle = MigrationPipeline::new(config.migration.clone()).start(payload)?;
            drive(PipelineKind::Migration, handle, &signals).await
        }
        Command::Bootstrap { .. } => {
            let handle = BootstrapPipeline::new(config.bootstrap.options()).start(payload)?;
            drive(PipelineKind::Bootstrap, handle, &signals).await
        }
    }
}

/// Deliver the requested signals, follow the instance until it finishes or
/// parks with nothing left to deliver, then print the outcome as JSON.
async fn drive<O>(kind: PipelineKind, handle: PipelineHandle<O>, signals: &SignalArgs) -> anyhow::Result<()>
where
    O: Serialize + Send + 'static,
{
    info!(instance_id = %handle.id(), pipeline = %kind, "instance started");

    if let Some(note) = &signals.approve_note {
        handle.approve(Some(note.clone()))?;
    }
    if let Some(evidence) = &signals.docs_parity {
        handle.docs_parity(evidence.clone())?;
    }
    for _ in 0..signals.advance {
        handle.advance()?;
    }

    let progress = PipelineProgress::start(kind, handle.id());
    let settled = loop {
        tokio::select! {
            state = handle.settle() => break state,
            _ = tokio::time::sleep(Duration::from_millis(120)) => progress.update(&handle.query()),
        }
    };

    if settled.status.is_waiting() {
        progress.stalled(&settled);
        handle.terminate(Some(CLI_EXIT_REASON));
        let state = handle.wait_until(|s| s.status.is_terminal()).await;
        progress.finish(&state);
        println!("{}", serde_json::to_string_pretty(&state)?);
        bail!(
            "instance {} stopped at {} waiting for a signal",
            state.instance_id,
            state.current_stage
        );
    }

    let state = handle.query();
    progress.finish(&state);
    match handle.result().await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Err(err.into())
        }
    }
}
