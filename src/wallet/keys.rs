//! Key derivation utilities
//!
//! Provides BIP39 mnemonic generation and BIP32 account derivation for the
//! native segwit (BIP84) receiving chain.

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Network;
use rand::rngs::OsRng;
use rand::RngCore;
use std::str::FromStr;

/// Key derivation errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("BIP39 error: {0}")]
    Bip39(String),

    #[error("BIP32 derivation error: {0}")]
    Bip32(String),
}

/// Generate a new BIP39 mnemonic (12 words)
///
/// # Example
///
/// ```ignore
/// let mnemonic = generate_mnemonic()?;
/// println!("Mnemonic: {}", mnemonic);
/// ```
pub fn generate_mnemonic() -> Result<bip39::Mnemonic, KeyError> {
    // 128 bits of entropy for 12 words
    let mut entropy = [0u8; 16];
    OsRng.fill_bytes(&mut entropy);

    bip39::Mnemonic::from_entropy(&entropy).map_err(|e| KeyError::Bip39(e.to_string()))
}

/// Parse a mnemonic phrase, normalizing whitespace
pub fn parse_mnemonic(phrase: &str) -> Result<bip39::Mnemonic, KeyError> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    bip39::Mnemonic::parse_normalized(&normalized).map_err(|e| KeyError::Bip39(e.to_string()))
}

/// BIP84 coin type: 0 for mainnet, 1 for every test network
pub fn coin_type(network: Network) -> u32 {
    match network {
        Network::Bitcoin => 0,
        _ => 1,
    }
}

/// Derive the account key at m/84'/coin_type'/0'
///
/// # Arguments
///
/// * `seed` - BIP39 seed bytes
/// * `network` - Target network
///
/// # Example
///
/// ```ignore
/// let mnemonic = generate_mnemonic()?;
/// let account = derive_account_key(&mnemonic.to_seed(""), Network::Regtest, &secp)?;
/// ```
pub fn derive_account_key(
    seed: &[u8],
    network: Network,
    secp: &Secp256k1<All>,
) -> Result<Xpriv, KeyError> {
    let master_key = Xpriv::new_master(network, seed)
        .map_err(|e| KeyError::Bip32(format!("Failed to create master key: {}", e)))?;

    let path_str = format!("m/84'/{}'/0'", coin_type(network));
    let derivation_path = DerivationPath::from_str(&path_str)
        .map_err(|e| KeyError::Bip32(format!("Invalid derivation path: {}", e)))?;

    master_key
        .derive_priv(secp, &derivation_path)
        .map_err(|e| KeyError::Bip32(format!("Derivation failed: {}", e)))
}

/// Derive the receiving key at `index` below an account key (`0/index`)
pub fn derive_receiving_key(
    account: &Xpriv,
    index: u32,
    secp: &Secp256k1<All>,
) -> Result<Xpriv, KeyError> {
    let path = [
        ChildNumber::from_normal_idx(0).map_err(|e| KeyError::Bip32(e.to_string()))?,
        ChildNumber::from_normal_idx(index).map_err(|e| KeyError::Bip32(e.to_string()))?,
    ];
    account
        .derive_priv(secp, &path)
        .map_err(|e| KeyError::Bip32(format!("Receiving key {} derivation failed: {}", index, e)))
}
