//! CLI argument definitions using clap

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "colored-asset-wallet",
    version,
    about = "Colored Asset Wallet - issue, send and watch colored-coin assets on Bitcoin",
    long_about = None
)]
pub struct Cli {
    /// Network to use: regtest, signet, testnet, mainnet (overrides config)
    #[arg(short, long, global = true)]
    pub network: Option<String>,

    /// Esplora server URL (overrides config)
    #[arg(long, global = true)]
    pub esplora_url: Option<String>,

    /// Metadata server URL (overrides config)
    #[arg(long, global = true)]
    pub metadata_url: Option<String>,

    /// Phone directory URL (overrides config)
    #[arg(long, global = true)]
    pub directory_url: Option<String>,

    /// Fee rate in sat/vB (overrides config)
    #[arg(long, global = true)]
    pub fee_rate: Option<f64>,

    /// BIP39 mnemonic of the wallet
    #[arg(long, global = true, env = "WALLET_MNEMONIC", hide_env_values = true)]
    pub mnemonic: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize or manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Wallet key commands
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },

    /// Issue a new asset
    IssueAsset {
        /// JSON issuance request file; other flags are ignored when given
        #[arg(long)]
        request: Option<String>,

        /// Total units to issue
        #[arg(short, long)]
        amount: Option<u64>,

        /// Decimal places (0-7)
        #[arg(short, long, default_value = "0")]
        divisibility: u8,

        /// Allow later reissuance
        #[arg(long)]
        reissueable: bool,

        /// Asset name stored in the metadata
        #[arg(long)]
        name: Option<String>,

        /// Issuer stored in the metadata
        #[arg(long)]
        issuer: Option<String>,

        /// Description stored in the metadata
        #[arg(long, default_value = "")]
        description: String,

        /// Icon URL stored in the metadata
        #[arg(long)]
        icon: Option<String>,
    },

    /// Send asset units
    SendAsset {
        /// JSON transfer request file; other flags are ignored when given
        #[arg(long)]
        request: Option<String>,

        /// Asset id to send
        #[arg(long)]
        asset_id: Option<String>,

        /// Units to send
        #[arg(short, long)]
        amount: Option<u64>,

        /// Destination address
        #[arg(short, long, conflicts_with = "phone")]
        to: Option<String>,

        /// Destination phone number
        #[arg(long)]
        phone: Option<String>,

        /// Source address (repeatable)
        #[arg(long = "from", conflicts_with = "utxo")]
        from: Vec<String>,

        /// Source UTXO "txid:vout" (repeatable)
        #[arg(long = "utxo")]
        utxo: Vec<String>,
    },

    /// List asset holdings
    Assets,

    /// List wallet transactions
    Transactions,

    /// List assets issued by this wallet
    IssuedAssets,

    /// Show asset metadata
    Metadata {
        /// Asset id
        asset_id: String,

        /// Issuance UTXO "txid:vout"
        utxo: String,

        /// Bypass the cache
        #[arg(long)]
        refresh: bool,
    },

    /// Print wallet transactions as they arrive
    Watch {
        /// Only colored transactions
        #[arg(long)]
        colored_only: bool,

        /// Trust transport events without re-validating them
        #[arg(long)]
        unsecure: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Initialize config file with defaults
    Init {
        /// Network: regtest, signet, testnet, mainnet
        #[arg(short, long)]
        network: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum WalletAction {
    /// Generate a new mnemonic
    New,

    /// Reveal a fresh receiving address
    Address,

    /// Print the private seed in hex
    Seed,
}
