use serde::Deserialize;
use std::env;

use crate::constants::{
    HTTP_TIMEOUT_SECS, KASPA_MAINNET_API_URL, KASPA_RETRY_ATTEMPTS,
    KASPA_RETRY_BASE_DELAY_MILLIS, KASPA_TESTNET_API_URL, KASPA_TRANSACTIONS_PAGE_SIZE,
    KASPA_WALLET_TIMER_INTERVAL_MILLIS, WALLET_TIMER_INTERVAL_MILLIS,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Sync timers
    pub wallet_timer_interval_millis: u64,
    pub kaspa_wallet_timer_interval_millis: u64,

    // Kaspa REST backend
    pub kaspa_mainnet_api_url: String,
    pub kaspa_testnet_api_url: String,
    pub kaspa_transactions_page_size: u32,
    pub kaspa_retry_attempts: u32,
    pub kaspa_retry_base_delay_millis: u64,

    // HTTP
    pub http_timeout_secs: u64,

    // CORS
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            wallet_timer_interval_millis: env::var("WALLET_TIMER_INTERVAL_MILLIS")
                .unwrap_or_else(|_| WALLET_TIMER_INTERVAL_MILLIS.to_string())
                .parse()?,
            kaspa_wallet_timer_interval_millis: env::var("KASPA_WALLET_TIMER_INTERVAL_MILLIS")
                .unwrap_or_else(|_| KASPA_WALLET_TIMER_INTERVAL_MILLIS.to_string())
                .parse()?,

            kaspa_mainnet_api_url: env::var("KASPA_MAINNET_API_URL")
                .unwrap_or_else(|_| KASPA_MAINNET_API_URL.to_string()),
            kaspa_testnet_api_url: env::var("KASPA_TESTNET_API_URL")
                .unwrap_or_else(|_| KASPA_TESTNET_API_URL.to_string()),
            kaspa_transactions_page_size: env::var("KASPA_TRANSACTIONS_PAGE_SIZE")
                .unwrap_or_else(|_| KASPA_TRANSACTIONS_PAGE_SIZE.to_string())
                .parse()?,
            kaspa_retry_attempts: env::var("KASPA_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| KASPA_RETRY_ATTEMPTS.to_string())
                .parse()?,
            kaspa_retry_base_delay_millis: env::var("KASPA_RETRY_BASE_DELAY_MILLIS")
                .unwrap_or_else(|_| KASPA_RETRY_BASE_DELAY_MILLIS.to_string())
                .parse()?,

            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| HTTP_TIMEOUT_SECS.to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.wallet_timer_interval_millis == 0 {
            anyhow::bail!("WALLET_TIMER_INTERVAL_MILLIS must be > 0");
        }
        if self.kaspa_wallet_timer_interval_millis == 0 {
            anyhow::bail!("KASPA_WALLET_TIMER_INTERVAL_MILLIS must be > 0");
        }
        for (name, raw) in [
            ("KASPA_MAINNET_API_URL", &self.kaspa_mainnet_api_url),
            ("KASPA_TESTNET_API_URL", &self.kaspa_testnet_api_url),
        ] {
            if let Err(err) = url::Url::parse(raw) {
                anyhow::bail!("{name} is not a valid URL: {err}");
            }
        }
        if self.kaspa_transactions_page_size == 0 {
            anyhow::bail!("KASPA_TRANSACTIONS_PAGE_SIZE must be > 0");
        }

        if self.kaspa_retry_attempts == 0 {
            tracing::warn!("KASPA_RETRY_ATTEMPTS is 0; a single attempt will be made");
        }
        if self.wallet_timer_interval_millis < 1_000 {
            tracing::warn!(
                "WALLET_TIMER_INTERVAL_MILLIS={} polls ledgers more than once per second",
                self.wallet_timer_interval_millis
            );
        }
        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }

        Ok(())
    }

    pub fn is_testnet(&self) -> bool {
        self.environment == "development" || self.environment == "testnet"
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 3000,
        environment: "development".to_string(),
        wallet_timer_interval_millis: WALLET_TIMER_INTERVAL_MILLIS,
        kaspa_wallet_timer_interval_millis: KASPA_WALLET_TIMER_INTERVAL_MILLIS,
        kaspa_mainnet_api_url: KASPA_MAINNET_API_URL.to_string(),
        kaspa_testnet_api_url: KASPA_TESTNET_API_URL.to_string(),
        kaspa_transactions_page_size: KASPA_TRANSACTIONS_PAGE_SIZE,
        kaspa_retry_attempts: KASPA_RETRY_ATTEMPTS,
        kaspa_retry_base_delay_millis: 0,
        http_timeout_secs: HTTP_TIMEOUT_SECS,
        cors_allowed_origins: "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = test_config();
        config.wallet_timer_interval_millis = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_invalid_kaspa_url() {
        let mut config = test_config();
        config.kaspa_testnet_api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}
