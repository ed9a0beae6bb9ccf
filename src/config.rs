//! Configuration types for the colored asset wallet
//!
//! Manages global configuration including network settings, the Esplora
//! endpoint, collaborator services (metadata server, phone directory) and
//! event delivery settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global wallet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub bitcoin: BitcoinConfig,
    pub services: ServicesConfig,
    pub events: EventsConfig,
    pub transactions: TransactionConfig,
}

/// Bitcoin network and blockchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinConfig {
    pub network: NetworkType,
    pub esplora_url: String,
}

/// Collaborator service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Base URL of the asset metadata server
    pub metadata_url: String,
    /// Base URL of the phone-number directory
    pub directory_url: String,
    /// Verify fetched metadata against the issuance transaction
    #[serde(default = "default_true")]
    pub verify_metadata: bool,
}

/// Event notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Start the notifier when the client is created
    pub enabled: bool,
    /// Re-validate every event against the chain before delivery
    pub secure: bool,
    /// Poll interval for transports that poll (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

/// Transaction construction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Fee rate in sat/vB
    pub fee_rate: f64,
    /// Number of receiving addresses revealed when a wallet is opened
    #[serde(default = "default_lookahead")]
    pub address_lookahead: u32,
}

/// Bitcoin network type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Regtest,
    Signet,
    Testnet,
    Mainnet,
}

impl NetworkType {
    /// Map to the `bitcoin` crate network
    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            NetworkType::Mainnet => bitcoin::Network::Bitcoin,
            NetworkType::Testnet => bitcoin::Network::Testnet,
            NetworkType::Signet => bitcoin::Network::Signet,
            NetworkType::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl std::str::FromStr for NetworkType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regtest" => Ok(NetworkType::Regtest),
            "signet" => Ok(NetworkType::Signet),
            "testnet" => Ok(NetworkType::Testnet),
            "mainnet" => Ok(NetworkType::Mainnet),
            other => Err(ConfigError::InvalidNetwork(other.to_string())),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_lookahead() -> u32 {
    5
}

impl GlobalConfig {
    /// Create default configuration for a network
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            bitcoin: BitcoinConfig {
                network,
                esplora_url: default_esplora_url(network),
            },
            services: ServicesConfig {
                metadata_url: "http://localhost:8080".to_string(),
                directory_url: "http://localhost:8081".to_string(),
                verify_metadata: true,
            },
            events: EventsConfig {
                enabled: true,
                secure: true,
                poll_interval_secs: default_poll_interval(),
            },
            transactions: TransactionConfig {
                fee_rate: 2.0,
                address_lookahead: default_lookahead(),
            },
        }
    }

    /// Create default configuration for regtest
    pub fn default_regtest() -> Self {
        Self::for_network(NetworkType::Regtest)
    }

    /// Create default configuration for testnet
    pub fn default_testnet() -> Self {
        Self::for_network(NetworkType::Testnet)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::default_regtest()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Config directory not found")]
    DirectoryNotFound,
}

/// Configuration overrides from CLI arguments or environment variables
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub network: Option<NetworkType>,
    pub esplora_url: Option<String>,
    pub metadata_url: Option<String>,
    pub directory_url: Option<String>,
    pub fee_rate: Option<f64>,
    pub events_secure: Option<bool>,
}

impl ConfigOverrides {
    /// Create empty overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Create overrides from environment variables
    pub fn from_env() -> Self {
        Self {
            network: std::env::var("BITCOIN_NETWORK")
                .ok()
                .and_then(|s| s.parse().ok()),
            esplora_url: std::env::var("ESPLORA_URL").ok(),
            metadata_url: std::env::var("METADATA_URL").ok(),
            directory_url: std::env::var("PHONE_DIRECTORY_URL").ok(),
            fee_rate: std::env::var("FEE_RATE").ok().and_then(|s| s.parse().ok()),
            events_secure: std::env::var("EVENTS_SECURE")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Merge with another set of overrides (other takes precedence)
    pub fn merge(mut self, other: Self) -> Self {
        if other.network.is_some() {
            self.network = other.network;
        }
        if other.esplora_url.is_some() {
            self.esplora_url = other.esplora_url;
        }
        if other.metadata_url.is_some() {
            self.metadata_url = other.metadata_url;
        }
        if other.directory_url.is_some() {
            self.directory_url = other.directory_url;
        }
        if other.fee_rate.is_some() {
            self.fee_rate = other.fee_rate;
        }
        if other.events_secure.is_some() {
            self.events_secure = other.events_secure;
        }
        self
    }
}

/// Get the default configuration directory path
///
/// Returns: `~/.colored-asset-wallet/`
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".colored-asset-wallet"))
        .ok_or(ConfigError::DirectoryNotFound)
}

/// Get the default configuration file path
///
/// Returns: `~/.colored-asset-wallet/config.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join("config.json"))
}

/// Get default Esplora URL for a given network
pub fn default_esplora_url(network: NetworkType) -> String {
    match network {
        NetworkType::Regtest => "http://localhost:3002".to_string(),
        NetworkType::Signet => "https://mempool.space/signet/api".to_string(),
        NetworkType::Testnet => "https://mempool.space/testnet/api".to_string(),
        NetworkType::Mainnet => "https://mempool.space/api".to_string(),
    }
}

/// Load configuration from file with overrides
///
/// # Priority (highest to lowest):
/// 1. CLI overrides (passed as argument)
/// 2. Environment variables
/// 3. Config file
/// 4. Network defaults
///
/// # Example
///
/// ```ignore
/// use colored_asset_wallet::config::{load_config, ConfigOverrides, NetworkType};
///
/// let mut cli_overrides = ConfigOverrides::new();
/// cli_overrides.network = Some(NetworkType::Regtest);
///
/// let config = load_config(None, cli_overrides)?;
/// ```
pub fn load_config(
    config_path: Option<&Path>,
    cli_overrides: ConfigOverrides,
) -> Result<GlobalConfig, ConfigError> {
    load_config_with_env(config_path, ConfigOverrides::from_env(), cli_overrides)
}

/// Load configuration with explicit environment overrides
///
/// Same precedence as [`load_config`], without reading the process environment.
pub fn load_config_with_env(
    config_path: Option<&Path>,
    env_overrides: ConfigOverrides,
    cli_overrides: ConfigOverrides,
) -> Result<GlobalConfig, ConfigError> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents)?
    } else {
        let network = cli_overrides
            .network
            .or(env_overrides.network)
            .unwrap_or(NetworkType::Regtest);
        GlobalConfig::for_network(network)
    };

    apply_overrides(&mut config, env_overrides);
    apply_overrides(&mut config, cli_overrides);

    validate(&config)?;
    Ok(config)
}

/// Save configuration to file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &GlobalConfig, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;

    Ok(())
}

fn validate(config: &GlobalConfig) -> Result<(), ConfigError> {
    if !(config.transactions.fee_rate > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "fee rate must be positive, got {}",
            config.transactions.fee_rate
        )));
    }
    if config.transactions.address_lookahead == 0 {
        return Err(ConfigError::Invalid(
            "address lookahead must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Apply configuration overrides (internal helper)
fn apply_overrides(config: &mut GlobalConfig, overrides: ConfigOverrides) {
    // Network change also moves the Esplora URL unless one is given explicitly
    if let Some(network) = overrides.network {
        if config.bitcoin.network != network {
            config.bitcoin.network = network;
            if overrides.esplora_url.is_none() {
                config.bitcoin.esplora_url = default_esplora_url(network);
            }
        }
    }

    if let Some(url) = overrides.esplora_url {
        config.bitcoin.esplora_url = url;
    }
    if let Some(url) = overrides.metadata_url {
        config.services.metadata_url = url;
    }
    if let Some(url) = overrides.directory_url {
        config.services.directory_url = url;
    }
    if let Some(fee_rate) = overrides.fee_rate {
        config.transactions.fee_rate = fee_rate;
    }
    if let Some(secure) = overrides.events_secure {
        config.events.secure = secure;
    }
}
