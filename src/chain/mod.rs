//! Chain data collaborators
//!
//! The engine reads unspent outputs and transactions and broadcasts through
//! [`ChainSource`]. Two sources ship with the crate: an in-process ledger used
//! by tests and demos, and an Esplora-backed source for real networks.

pub mod esplora;
pub mod memory;

use async_trait::async_trait;
use bitcoin::{Address, OutPoint, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::coloring::{AssetAmount, AssetId};

pub use esplora::EsploraChain;
pub use memory::MemoryChain;

/// Errors reading chain data
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("Transaction not found: {0}")]
    TxNotFound(String),

    #[error("Chain request failed: {0}")]
    Request(String),
}

/// Broadcast failures, classified by the chain source
#[derive(Debug, Clone, thiserror::Error)]
pub enum BroadcastError {
    /// The network refused the transaction (double spend, fee too low, ...)
    #[error("Broadcast rejected: {0}")]
    Rejected(String),

    /// The request did not reach a node that could judge it
    #[error("Transient broadcast failure: {0}")]
    Transient(String),
}

impl BroadcastError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BroadcastError::Transient(_))
    }
}

/// Which unspent outputs to select
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoSelector {
    /// Every unspent output paying to the address
    Address(Address),
    /// One specific outpoint
    Outpoint(OutPoint),
}

/// An unspent output together with the colors it carries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColoredUtxo {
    pub outpoint: OutPoint,
    /// Value in satoshis
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub address: Option<String>,
    /// Empty for uncolored outputs
    pub assets: Vec<AssetAmount>,
    pub confirmed: bool,
}

impl ColoredUtxo {
    pub fn is_colored(&self) -> bool {
        !self.assets.is_empty()
    }

    /// Units of `asset_id` carried by this output
    pub fn amount_of(&self, asset_id: &AssetId) -> u64 {
        self.assets
            .iter()
            .filter(|a| &a.asset_id == asset_id)
            .map(|a| a.amount)
            .sum()
    }
}

/// A transaction as seen by the chain source
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub tx: Transaction,
    /// Height of the confirming block, `None` while unconfirmed
    pub block_height: Option<u32>,
}

/// Raw blockchain and UTXO data provider
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Unspent outputs matching `selector`, in chain order
    ///
    /// When `asset` is given only outputs carrying that asset are returned.
    /// An unknown or spent outpoint yields an empty list.
    async fn select_unspent(
        &self,
        selector: &UtxoSelector,
        asset: Option<&AssetId>,
    ) -> Result<Vec<ColoredUtxo>, ChainError>;

    async fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError>;

    /// Transactions paying to or spending from `address`, oldest first
    async fn address_transactions(
        &self,
        address: &Address,
    ) -> Result<Vec<ChainTransaction>, ChainError>;

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError>;
}
