//! HD wallet collaborator
//!
//! The engine derives addresses and signs skeletons through [`HdWallet`];
//! [`MnemonicWallet`] implements it over a BIP39 seed with P2WPKH outputs.

pub mod keys;
pub mod mnemonic;

use bitcoin::{Address, Network, Transaction, Txid};
use serde::Serialize;

use crate::engine::UnsignedSkeleton;

pub use keys::KeyError;
pub use mnemonic::MnemonicWallet;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Wallet state unavailable")]
    StateUnavailable,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SigningError {
    #[error("Skeleton has {inputs} inputs but {prevouts} previous outputs")]
    PrevoutMismatch { inputs: usize, prevouts: usize },

    #[error("Input {0} is not controlled by this wallet")]
    ForeignInput(usize),

    #[error("Sighash computation failed for input {index}: {reason}")]
    Sighash { index: usize, reason: String },

    #[error("Key derivation failed: {0}")]
    Key(String),
}

/// A fully signed transaction ready for broadcast
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTx {
    pub tx_hex: String,
    pub txid: Txid,
    #[serde(skip)]
    pub tx: Transaction,
}

/// Hierarchical-deterministic wallet: key derivation and signing
pub trait HdWallet: Send + Sync {
    /// Raw seed bytes the wallet derives its keys from
    fn derive_private_seed(&self) -> Vec<u8>;

    /// Reveal and return a fresh receiving address
    fn next_receiving_address(&self) -> Result<Address, WalletError>;

    /// Every address revealed so far, in derivation order
    fn addresses(&self) -> Vec<Address>;

    fn network(&self) -> Network;

    /// Sign every input of `skeleton`
    fn sign(&self, skeleton: &UnsignedSkeleton) -> Result<SignedTx, SigningError>;
}
