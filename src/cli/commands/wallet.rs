//! Wallet command implementations

use super::{open_client, CommandError};
use crate::config::{load_config, ConfigOverrides};
use crate::wallet::keys::generate_mnemonic;
use crate::wallet::{HdWallet, MnemonicWallet};

/// Generate a new mnemonic and show its first address
pub fn create(overrides: &ConfigOverrides) -> Result<(), CommandError> {
    let config = load_config(None, overrides.clone())?;
    let network = config.bitcoin.network;

    let mnemonic = generate_mnemonic().map_err(crate::wallet::WalletError::from)?;
    let wallet = MnemonicWallet::new(&mnemonic, network.to_bitcoin(), 1)?;
    let first_address = wallet
        .addresses()
        .into_iter()
        .next()
        .map(|a| a.to_string())
        .unwrap_or_default();

    println!("✓ Wallet created");
    println!();
    println!("  Network:       {:?}", network);
    println!("  First Address: {}", first_address);
    println!();
    println!("  IMPORTANT: Write down your recovery phrase:");
    println!("  {}", mnemonic);
    println!();
    println!("  Pass it with --mnemonic or WALLET_MNEMONIC to use the wallet.");

    Ok(())
}

/// Reveal a fresh receiving address
pub async fn address(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
) -> Result<(), CommandError> {
    let (_, client) = open_client(overrides, mnemonic)?;
    let address = client.receiving_address()?;
    println!("{}", address);
    Ok(())
}

/// Print the private seed in hex
pub async fn seed(overrides: &ConfigOverrides, mnemonic: Option<&str>) -> Result<(), CommandError> {
    let (_, client) = open_client(overrides, mnemonic)?;
    println!("{}", client.private_seed_hex());
    Ok(())
}
