use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod features;
mod ledger_client;
mod models;
mod processor;
mod store;
#[cfg(test)]
mod test_support;

use config::AppConfig;
use ledger_client::LedgerClient;
use processor::BatchRunner;

fn run() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    let app_config = AppConfig::load().context("Invalid configuration")?;
    info!(
        "Input: {}, output: {}, flush every {} wallets",
        app_config.run.input_path.display(),
        app_config.run.output_path.display(),
        app_config.run.flush_interval
    );

    let addresses = store::load_addresses(&app_config.run.input_path)
        .context("Failed to load wallet address list")?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    let summary = rt.block_on(async {
        let client = LedgerClient::from_config(&app_config.api)?;
        if app_config.api.probe_on_start {
            client.probe().await?;
        }

        let runner = BatchRunner::new(
            client,
            app_config.run.output_path.clone(),
            app_config.run.clone(),
        );
        runner.run(&addresses).await
    })?;

    if summary.interrupted {
        info!(
            "Stopped early after {} wallets; rerun to resume from {}",
            summary.processed,
            app_config.run.output_path.display()
        );
    }
    info!(
        "Run finished: {} processed, {} failed, {} skipped, {} rows total",
        summary.processed, summary.failed, summary.skipped, summary.total_rows
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    info!("Starting wallet feature extraction");

    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
