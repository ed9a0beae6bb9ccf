//! CLI command implementations

pub mod asset;
pub mod config;
pub mod events;
pub mod wallet;

use std::sync::Arc;
use std::time::Duration;

use crate::chain::EsploraChain;
use crate::config::{load_config, ConfigError, ConfigOverrides, GlobalConfig};
use crate::directory::HttpPhoneDirectory;
use crate::events::{EsploraPollTransport, PushTransport, WatchedAddresses};
use crate::manager::{AssetClient, ClientError, ClientSettings, Collaborators};
use crate::metadata::HttpMetadataSource;
use crate::wallet::{MnemonicWallet, WalletError};

/// Error type for CLI commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Mnemonic required (use --mnemonic or set WALLET_MNEMONIC)")]
    MissingMnemonic,

    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Open a client against the configured Esplora and HTTP services
pub fn open_client(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
) -> Result<(GlobalConfig, AssetClient), CommandError> {
    let config = load_config(None, overrides.clone())?;
    let phrase = mnemonic.ok_or(CommandError::MissingMnemonic)?;
    let network = config.bitcoin.network.to_bitcoin();

    let wallet = Arc::new(MnemonicWallet::from_phrase(
        phrase,
        network,
        config.transactions.address_lookahead,
    )?);
    let chain = Arc::new(EsploraChain::new(
        &config.bitcoin.esplora_url,
        config.bitcoin.network,
    ));

    let watched = WatchedAddresses::new();
    let transport: Option<Arc<dyn PushTransport>> = if config.events.enabled {
        Some(Arc::new(EsploraPollTransport::new(
            chain.clone(),
            watched.clone(),
            network,
            Duration::from_secs(config.events.poll_interval_secs),
        )))
    } else {
        None
    };

    let client = AssetClient::new(
        ClientSettings::from_config(&config)?,
        Collaborators {
            wallet,
            chain,
            directory: Arc::new(HttpPhoneDirectory::new(&config.services.directory_url)),
            metadata: Arc::new(HttpMetadataSource::new(&config.services.metadata_url)),
            transport,
            watched,
        },
    )?;
    Ok((config, client))
}

/// Print a value as pretty JSON
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CommandError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
