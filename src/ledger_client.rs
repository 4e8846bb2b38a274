use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::models::{Address, ApiResponse, TokenHolding, TransactionRecord};

/// Query parameters for a single GET.
pub type Params = Vec<(&'static str, String)>;

/// One GET returning a JSON body. A non-success status or unparsable body is an error.
#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn get_json(&self, url: &str, params: &Params) -> Result<Value, FetchError>;
}

/// reqwest-backed transport used against the real service.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonTransport for HttpTransport {
    async fn get_json(&self, url: &str, params: &Params) -> Result<Value, FetchError> {
        let response = self.client.get(url).query(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::MalformedBody(e.to_string()))
    }
}

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// Whether a balance summary reflects a real answer from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Complete,
    /// The fetch failed and the summary holds defaults.
    Degraded,
}

/// Current holdings of one wallet, reduced to what the feature aggregator needs.
#[derive(Debug, Clone)]
pub struct BalanceSummary {
    /// Holdings typed as `cryptocurrency`.
    pub tokens: Vec<TokenHolding>,
    pub unique_count: u64,
    /// Quote value over every holding, spam included.
    pub total_quote_value: f64,
    pub spam_count: u64,
    /// Decimal-scaled balance of the native asset.
    pub native_balance: f64,
    pub status: FetchStatus,
}

impl BalanceSummary {
    /// Empty summary used when the balances call gives no usable answer
    pub fn degraded() -> Self {
        Self {
            tokens: Vec::new(),
            unique_count: 0,
            total_quote_value: 0.0,
            spam_count: 0,
            native_balance: 0.0,
            status: FetchStatus::Degraded,
        }
    }

    /// Summarizes a complete balances response
    pub fn from_holdings(items: Vec<TokenHolding>) -> Self {
        let total_quote_value = items.iter().map(|t| t.quote.unwrap_or(0.0)).sum();
        let spam_count = items.iter().filter(|t| t.is_spam()).count() as u64;
        let native_balance = items
            .iter()
            .find(|t| t.is_native())
            .map(TokenHolding::scaled_balance)
            .unwrap_or(0.0);
        let tokens: Vec<TokenHolding> = items.into_iter().filter(|t| t.is_cryptocurrency()).collect();

        Self {
            unique_count: tokens.len() as u64,
            tokens,
            total_quote_value,
            spam_count,
            native_balance,
            status: FetchStatus::Complete,
        }
    }
}

/// Client for the paginated ledger-history REST API.
pub struct LedgerClient<T = HttpTransport> {
    transport: T,
    base_url: String,
    api_key: String,
    chain_id: u64,
    retry: RetryPolicy,
    max_pages: u32,
    page_size: u32,
}

impl LedgerClient<HttpTransport> {
    /// Creates a new ledger client over HTTP
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: JsonTransport> LedgerClient<T> {
    /// Creates a client over an arbitrary transport, normalizing the base URL
    pub fn with_transport(transport: T, config: &ApiConfig) -> Self {
        let mut base_url = config.base_url.clone();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            base_url = format!("https://{}", base_url);
        }
        if base_url.ends_with('/') {
            base_url.pop();
        }

        debug!("Creating ledger client with URL: {}", base_url);

        Self {
            transport,
            base_url,
            api_key: config.api_key.clone(),
            chain_id: config.chain_id,
            retry: RetryPolicy {
                max_attempts: config.max_retries.max(1),
                backoff_base: config.backoff_base(),
            },
            max_pages: config.max_pages,
            page_size: config.page_size,
        }
    }

    /// GET with retries. Every failure kind consumes an attempt; after the
    /// last one the most recent error is returned inside `RetriesExhausted`.
    pub async fn fetch(&self, url: &str, params: &Params) -> Result<Value, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.get_json(url, params).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt >= self.retry.max_attempts => {
                    warn!("Giving up on {} after {} attempts: {}", url, attempt, e);
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    debug!(
                        "Attempt {} for {} failed: {}. Retrying in {:?}",
                        attempt, url, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Single request to confirm the service is reachable with the configured key.
    pub async fn probe(&self) -> Result<()> {
        let url = format!("{}/v1/chains/status/", self.base_url);
        self.fetch(&url, &self.key_params())
            .await
            .context("Ledger API is not reachable")?;
        info!("Connected to ledger API at {}", self.base_url);
        Ok(())
    }

    /// Walks transaction pages from 1 up to `max_pages`. A failed, empty or
    /// malformed page ends the walk and keeps what was collected so far.
    pub async fn fetch_all_transactions(&self, address: &Address) -> Vec<TransactionRecord> {
        let url = format!(
            "{}/v1/{}/address/{}/transactions_v3/",
            self.base_url, self.chain_id, address
        );
        let mut transactions = Vec::new();

        for page in 1..=self.max_pages {
            let mut params = self.key_params();
            params.push(("page-size", self.page_size.to_string()));
            params.push(("page-number", page.to_string()));

            let body = match self.fetch(&url, &params).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Transactions page {} for {} unavailable: {}", page, address, e);
                    break;
                }
            };

            let response: ApiResponse<TransactionRecord> = match serde_json::from_value(body) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Malformed transactions page {} for {}: {}", page, address, e);
                    break;
                }
            };

            let Some(data) = response.data else {
                break;
            };
            if data.items.is_empty() {
                break;
            }

            debug!("Page {} for {}: {} transactions", page, address, data.items.len());
            transactions.extend(data.items);

            let has_more = data
                .pagination
                .and_then(|p| p.has_more)
                .unwrap_or(false);
            if !has_more {
                break;
            }
        }

        transactions
    }

    /// Current holdings. Never fails: an unavailable answer yields a degraded empty summary.
    pub async fn fetch_balances(&self, address: &Address) -> BalanceSummary {
        let url = format!(
            "{}/v1/{}/address/{}/balances_v2/",
            self.base_url, self.chain_id, address
        );

        let body = match self.fetch(&url, &self.key_params()).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Balances for {} unavailable: {}", address, e);
                return BalanceSummary::degraded();
            }
        };

        match serde_json::from_value::<ApiResponse<TokenHolding>>(body) {
            Ok(ApiResponse { data: Some(data) }) => BalanceSummary::from_holdings(data.items),
            Ok(ApiResponse { data: None }) => {
                warn!("Balances response for {} has no data", address);
                BalanceSummary::degraded()
            }
            Err(e) => {
                warn!("Malformed balances response for {}: {}", address, e);
                BalanceSummary::degraded()
            }
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn key_params(&self) -> Params {
        vec![("key", self.api_key.clone())]
    }
}
