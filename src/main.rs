//! Colored Asset Wallet CLI
//!
//! Command-line interface for issuing, sending and watching colored-coin assets

use clap::Parser;
use colored_asset_wallet::cli::args::{Cli, Commands, ConfigAction, WalletAction};
use colored_asset_wallet::cli::commands::{self, asset::IssueArgs, asset::SendArgs, CommandError};
use colored_asset_wallet::config::{ConfigOverrides, NetworkType};
use std::process;

fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let network = match cli.network.as_deref().map(str::parse::<NetworkType>) {
        Some(Ok(network)) => Some(network),
        Some(Err(e)) => {
            eprintln!("Error: {}. Use: regtest, signet, testnet, or mainnet", e);
            process::exit(1);
        }
        None => None,
    };

    // Build config overrides from global arguments
    let overrides = ConfigOverrides {
        network,
        esplora_url: cli.esplora_url.clone(),
        metadata_url: cli.metadata_url.clone(),
        directory_url: cli.directory_url.clone(),
        fee_rate: cli.fee_rate,
        events_secure: None,
    };
    let mnemonic = cli.mnemonic.as_deref();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create async runtime: {}", e);
            process::exit(1);
        }
    };

    let result: Result<(), CommandError> = match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init { network } => commands::config::init(network).map_err(Into::into),
        },

        Commands::Wallet { action } => match action {
            WalletAction::New => commands::wallet::create(&overrides),
            WalletAction::Address => {
                runtime.block_on(commands::wallet::address(&overrides, mnemonic))
            }
            WalletAction::Seed => runtime.block_on(commands::wallet::seed(&overrides, mnemonic)),
        },

        Commands::IssueAsset {
            request,
            amount,
            divisibility,
            reissueable,
            name,
            issuer,
            description,
            icon,
        } => runtime.block_on(commands::asset::issue(
            &overrides,
            mnemonic,
            request.as_deref(),
            IssueArgs {
                amount,
                divisibility,
                reissueable,
                name,
                issuer,
                description,
                icon,
            },
        )),

        Commands::SendAsset {
            request,
            asset_id,
            amount,
            to,
            phone,
            from,
            utxo,
        } => runtime.block_on(commands::asset::send(
            &overrides,
            mnemonic,
            request.as_deref(),
            SendArgs {
                asset_id,
                amount,
                to,
                phone,
                from,
                utxo,
            },
        )),

        Commands::Assets => runtime.block_on(commands::asset::assets(&overrides, mnemonic)),

        Commands::Transactions => {
            runtime.block_on(commands::asset::transactions(&overrides, mnemonic))
        }

        Commands::IssuedAssets => {
            runtime.block_on(commands::asset::issued_assets(&overrides, mnemonic))
        }

        Commands::Metadata {
            asset_id,
            utxo,
            refresh,
        } => runtime.block_on(commands::asset::metadata(
            &overrides, mnemonic, &asset_id, &utxo, refresh,
        )),

        Commands::Watch {
            colored_only,
            unsecure,
        } => runtime.block_on(commands::events::watch(
            &overrides,
            mnemonic,
            colored_only,
            unsecure,
        )),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
