use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables are read as `WALLET_FEATURES__<SECTION>__<KEY>`,
/// e.g. `WALLET_FEATURES__API__API_KEY`.
pub const ENV_PREFIX: &str = "WALLET_FEATURES";

/// Optional config file, looked up as `wallet_features.{toml,yaml,json}`
/// in the working directory.
pub const CONFIG_FILE_STEM: &str = "wallet_features";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub run: RunConfig,
}

/// Upstream ledger-history service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub chain_id: u64,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Total attempts per request, including the first one.
    pub max_retries: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff_base_ms`.
    pub backoff_base_ms: u64,
    pub max_pages: u32,
    pub page_size: u32,
    /// Check that the service answers before starting a run.
    pub probe_on_start: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.covalenthq.com".to_string(),
            api_key: String::new(),
            chain_id: 1,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 2_000,
            max_pages: 5,
            page_size: 100,
            probe_on_start: true,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Batch run settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Flush the full table after this many processed addresses.
    pub flush_interval: usize,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    /// When false, wallets without transactions skip the balance call and
    /// report zero token features.
    pub token_features_for_inactive: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/wallets.csv"),
            output_path: PathBuf::from("data/wallet_features.csv"),
            flush_interval: 50,
            pacing_min_ms: 500,
            pacing_max_ms: 1_200,
            token_features_for_inactive: true,
        }
    }
}

impl AppConfig {
    /// Layers the optional config file and environment variables over the defaults.
    pub fn load() -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.api_key.trim().is_empty() {
            anyhow::bail!("api.api_key must be set ({}__API__API_KEY)", ENV_PREFIX);
        }
        if self.api.max_retries == 0 {
            anyhow::bail!("api.max_retries must be at least 1");
        }
        if self.api.max_pages == 0 || self.api.page_size == 0 {
            anyhow::bail!("api.max_pages and api.page_size must be positive");
        }
        if self.run.flush_interval == 0 {
            anyhow::bail!("run.flush_interval must be positive");
        }
        if self.run.pacing_min_ms > self.run.pacing_max_ms {
            anyhow::bail!(
                "run.pacing_min_ms ({}) exceeds run.pacing_max_ms ({})",
                self.run.pacing_min_ms,
                self.run.pacing_max_ms
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.api.base_url, "https://api.covalenthq.com");
        assert_eq!(config.api.chain_id, 1);
        assert_eq!(config.api.max_retries, 3);
        assert_eq!(config.api.backoff_base(), Duration::from_secs(2));
        assert_eq!(config.api.max_pages, 5);
        assert_eq!(config.api.page_size, 100);
        assert_eq!(config.run.flush_interval, 50);
        assert_eq!(config.run.pacing_min_ms, 500);
        assert_eq!(config.run.pacing_max_ms, 1_200);
        assert!(config.run.token_features_for_inactive);
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_pacing_is_rejected() {
        let mut config = AppConfig::default();
        config.api.api_key = "key".to_string();
        config.run.pacing_min_ms = 2_000;
        config.run.pacing_max_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("WALLET_FEATURES__API__API_KEY", "test-key");
        env::set_var("WALLET_FEATURES__API__MAX_PAGES", "2");
        env::set_var("WALLET_FEATURES__RUN__FLUSH_INTERVAL", "10");

        let config = AppConfig::load().unwrap();

        assert_eq!(config.api.api_key, "test-key");
        assert_eq!(config.api.max_pages, 2);
        assert_eq!(config.run.flush_interval, 10);
        assert_eq!(config.api.page_size, 100);

        env::remove_var("WALLET_FEATURES__API__API_KEY");
        env::remove_var("WALLET_FEATURES__API__MAX_PAGES");
        env::remove_var("WALLET_FEATURES__RUN__FLUSH_INTERVAL");
    }
}
