use anyhow::{Context, Result};
use rand::Rng;
use std::future::Future;
use std::path::PathBuf;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::features::{extract_features, FeatureRecord};
use crate::ledger_client::{BalanceSummary, FetchStatus, HttpTransport, JsonTransport, LedgerClient};
use crate::models::Address;
use crate::store::{checkpointed_addresses, FeatureTable};

/// Counts reported at the end of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Rows found in the table before the run.
    pub checkpointed: usize,
    /// Input addresses skipped because they were already in the table.
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    /// Rows in the table after the final flush.
    pub total_rows: usize,
    pub interrupted: bool,
}

/// Drives feature extraction over an address list with checkpointed persistence.
pub struct BatchRunner<T = HttpTransport> {
    client: LedgerClient<T>,
    table: FeatureTable,
    settings: RunConfig,
}

impl<T: JsonTransport> BatchRunner<T> {
    /// Creates a runner writing its table to `output_path`
    pub fn new(client: LedgerClient<T>, output_path: impl Into<PathBuf>, settings: RunConfig) -> Self {
        Self {
            client,
            table: FeatureTable::new(output_path),
            settings,
        }
    }

    /// Runs until the list is exhausted or Ctrl-C / SIGTERM is received.
    pub async fn run(&self, addresses: &[String]) -> Result<RunSummary> {
        self.run_until(addresses, shutdown_signal()).await
    }

    /// Processes `addresses` in order, skipping those already in the output table.
    /// The full table is saved every `flush_interval` addresses, after the last
    /// one, and when `shutdown` completes.
    pub async fn run_until<F>(&self, addresses: &[String], shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let mut rows = self
            .table
            .load()
            .context("Failed to load checkpointed feature table")?;
        let done = checkpointed_addresses(&rows);

        let pending: Vec<&String> = addresses
            .iter()
            .filter(|a| !done.contains(&a.trim().to_lowercase()))
            .collect();

        let mut summary = RunSummary {
            checkpointed: rows.len(),
            skipped: addresses.len() - pending.len(),
            ..Default::default()
        };
        if summary.checkpointed > 0 {
            info!(
                "Resuming from checkpoint: {} rows present, {} addresses remaining",
                summary.checkpointed,
                pending.len()
            );
        }

        tokio::pin!(shutdown);
        let total = pending.len();

        for (index, raw) in pending.iter().enumerate() {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    summary.interrupted = true;
                    break;
                }
                outcome = self.process_address(raw) => outcome,
            };

            match outcome {
                Ok(record) => {
                    rows.push(record);
                    summary.processed += 1;
                }
                Err(e) => {
                    error!("Failed to extract features for {}: {:#}", raw, e);
                    summary.failed += 1;
                }
            }

            let attempted = index + 1;
            info!(
                "[{}/{}] {} (ok: {}, failed: {})",
                attempted, total, raw, summary.processed, summary.failed
            );

            if attempted % self.settings.flush_interval == 0 && attempted < total {
                match self.table.save(&rows) {
                    Ok(()) => info!("Saved {} wallets to {}", rows.len(), self.table.path().display()),
                    Err(e) => error!("Checkpoint save failed, will retry at next flush: {:#}", e),
                }
            }

            if attempted < total {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        summary.interrupted = true;
                        break;
                    }
                    _ = self.pace() => {}
                }
            }
        }

        self.table
            .save(&rows)
            .with_context(|| format!("Failed to save feature table {}", self.table.path().display()))?;
        summary.total_rows = rows.len();

        info!(
            "Completed extraction for {} wallets ({} failed, {} rows in {})",
            summary.processed,
            summary.failed,
            summary.total_rows,
            self.table.path().display()
        );
        Ok(summary)
    }

    async fn process_address(&self, raw: &str) -> Result<FeatureRecord> {
        let address = Address::parse(raw)?;

        let transactions = self.client.fetch_all_transactions(&address).await;
        debug!("Fetched {} transactions for {}", transactions.len(), address);

        let balances = if transactions.is_empty() && !self.settings.token_features_for_inactive {
            debug!("Skipping balances for inactive wallet {}", address);
            BalanceSummary::degraded()
        } else {
            let balances = self.client.fetch_balances(&address).await;
            if balances.status == FetchStatus::Degraded {
                warn!("Token features for {} fall back to defaults", address);
            }
            balances
        };

        Ok(extract_features(&address, &transactions, &balances))
    }

    /// Uniform random delay between addresses to stay under the upstream rate limit.
    async fn pace(&self) {
        let (min, max) = (self.settings.pacing_min_ms, self.settings.pacing_max_ms);
        if max == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(min..=max);
        sleep(Duration::from_millis(delay)).await;
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM. The SIGTERM handler is installed
/// before this returns. A handler that cannot be installed never resolves.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = {
        use tokio::signal::unix::{signal, SignalKind};
        let stream = signal(SignalKind::terminate())
            .map_err(|e| error!("Failed to listen for SIGTERM: {}", e))
            .ok();
        async move {
            match stream {
                Some(mut stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => warn!("Interrupt received, saving progress"),
            _ = terminate => warn!("Termination signal received, saving progress"),
        }
    }
}
