//! Configuration module for the strike engine
//!
//! Loads an optional TOML file, overlays environment variables (after
//! `.env` has been read through dotenvy) and validates the result. Every
//! field has a default targeting Base mainnet, so an empty file or no file
//! at all is a valid starting point; only the treasury secret is mandatory.

use crate::submission::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TREASURY_PRIVATE_KEY is not set")]
    MissingSecret,

    #[error("invalid treasury secret key: {0}")]
    InvalidSecret(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub wallet: WalletConfig,
    pub strike: StrikeConfig,
    pub stream: StreamConfig,
    pub submission: PipelineConfig,
    pub accounting: AccountingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub chain_id: u64,
    /// Label reported by `/status`
    pub name: String,
    /// Request-response endpoints, in rotation order
    pub rpc_urls: Vec<String>,
    /// Streaming endpoints, in rotation order
    pub ws_urls: Vec<String>,
    pub rpc_timeout_ms: u64,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Hex secret key; normally supplied through `TREASURY_PRIVATE_KEY`
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Default withdrawal destination
    pub payout_wallet: Option<String>,
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("payout_wallet", &self.payout_wallet)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrikeConfig {
    /// Destination of every strike submission
    pub router: String,
    /// Observed transactions must carry strictly more than this
    pub min_value_eth: String,
    pub value_eth: String,
    pub gas_limit: u64,
    pub priority_fee_wei: u64,
    /// Ledger credit per confirmed strike
    pub credit_usd: f64,
    /// Fraction of pending hashes that are looked up, in (0, 1]
    pub sampling_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub stall_threshold_secs: u64,
    pub liveness_check_interval_secs: u64,
    pub reconnect_delay_ms: u64,
    pub handshake_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// USD per ETH used for dollar figures
    pub reference_price_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Retry interval for the startup nonce resync
    pub init_retry_ms: u64,
    pub init_retry_max_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: 8453,
            name: "BASE-MAINNET".to_string(),
            rpc_urls: vec!["https://mainnet.base.org".to_string()],
            ws_urls: vec!["wss://base-rpc.publicnode.com".to_string()],
            rpc_timeout_ms: 10_000,
        }
    }
}

impl Default for StrikeConfig {
    fn default() -> Self {
        Self {
            router: "0x4752ba5DBc23f44D87826276BF6Fd6b1C372aD24".to_string(),
            min_value_eth: "0.0001".to_string(),
            value_eth: "0.0002".to_string(),
            gas_limit: 150_000,
            priority_fee_wei: 50_000_000,
            credit_usd: 1.50,
            sampling_rate: 1.0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: 60,
            liveness_check_interval_secs: 10,
            reconnect_delay_ms: 5_000,
            handshake_timeout_ms: 10_000,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            reference_price_usd: 3913.0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            init_retry_ms: 5_000,
            init_retry_max_ms: 60_000,
        }
    }
}

/// Split a comma separated endpoint list, dropping blanks
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` if it exists (defaults otherwise), then apply `.env` and
    /// process environment overrides and validate.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("TREASURY_PRIVATE_KEY") {
            self.wallet.secret_key = Some(secret);
        }
        if let Some(payout) = lookup("PAYOUT_WALLET") {
            let payout = payout.trim().to_string();
            self.wallet.payout_wallet = (!payout.is_empty()).then_some(payout);
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("PORT", format!("{}: {}", port, e)))?;
        }
        if let Some(chain_id) = lookup("CHAIN_ID") {
            self.network.chain_id = chain_id
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("CHAIN_ID", format!("{}: {}", chain_id, e)))?;
        }
        if let Some(urls) = lookup("RPC_URLS") {
            self.network.rpc_urls = split_list(&urls);
        }
        if let Some(urls) = lookup("WSS_URLS") {
            self.network.ws_urls = split_list(&urls);
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.rpc_urls.iter().all(|u| u.trim().is_empty()) {
            return Err(ConfigError::invalid("network.rpc_urls", "at least one endpoint required"));
        }
        if self.network.ws_urls.iter().all(|u| u.trim().is_empty()) {
            return Err(ConfigError::invalid("network.ws_urls", "at least one endpoint required"));
        }
        if self.network.chain_id == 0 {
            return Err(ConfigError::invalid("network.chain_id", "must be non-zero"));
        }

        let rate = self.strike.sampling_rate;
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ConfigError::invalid(
                "strike.sampling_rate",
                format!("{} is outside (0, 1]", rate),
            ));
        }
        if !(self.accounting.reference_price_usd.is_finite()
            && self.accounting.reference_price_usd > 0.0)
        {
            return Err(ConfigError::invalid(
                "accounting.reference_price_usd",
                "must be positive",
            ));
        }
        if !(self.strike.credit_usd.is_finite() && self.strike.credit_usd >= 0.0) {
            return Err(ConfigError::invalid("strike.credit_usd", "must be non-negative"));
        }
        if self.strike.gas_limit < 21_000 {
            return Err(ConfigError::invalid("strike.gas_limit", "below intrinsic 21000"));
        }

        if self.stream.stall_threshold_secs == 0 || self.stream.liveness_check_interval_secs == 0 {
            return Err(ConfigError::invalid("stream", "stall threshold and liveness interval must be > 0"));
        }
        if self.submission.poll_interval.is_zero() {
            return Err(ConfigError::invalid("submission.poll_interval", "must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_target_base_mainnet() {
        let config = Config::default();
        assert_eq!(config.network.chain_id, 8453);
        assert_eq!(config.network.rpc_urls, vec!["https://mainnet.base.org"]);
        assert_eq!(config.accounting.reference_price_usd, 3913.0);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.strike.credit_usd, 1.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[network]
rpc_urls = ["http://a", "http://b"]

[strike]
sampling_rate = 0.25

[submission]
confirmation_timeout = 30000
poll_interval = 500
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.rpc_urls.len(), 2);
        assert_eq!(config.network.chain_id, 8453);
        assert_eq!(config.strike.sampling_rate, 0.25);
        assert_eq!(config.strike.value_eth, "0.0002");
        assert_eq!(config.submission.confirmation_timeout.as_secs(), 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("TREASURY_PRIVATE_KEY", "0xabc"),
                ("PAYOUT_WALLET", "0x0000000000000000000000000000000000000001"),
                ("PORT", "9000"),
                ("RPC_URLS", "http://one, ,http://two"),
                ("CHAIN_ID", "84532"),
            ]))
            .unwrap();

        assert_eq!(config.wallet.secret_key.as_deref(), Some("0xabc"));
        assert!(config.wallet.payout_wallet.is_some());
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.network.rpc_urls, vec!["http://one", "http://two"]);
        assert_eq!(config.network.chain_id, 84532);
        assert_eq!(config.network.ws_urls, vec!["wss://base-rpc.publicnode.com"]);
    }

    #[test]
    fn test_bad_port_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.network.rpc_urls = vec![" ".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.strike.sampling_rate = 0.0;
        assert!(config.validate().is_err());
        config.strike.sampling_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.accounting.reference_price_usd = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secret_is_redacted() {
        let mut config = Config::default();
        config.wallet.secret_key = Some("0xdeadbeef".to_string());
        let debug = format!("{:?}", config.wallet);
        assert!(!debug.contains("deadbeef"));
        let toml = toml::to_string(&config).unwrap();
        assert!(!toml.contains("deadbeef"));
    }
}
