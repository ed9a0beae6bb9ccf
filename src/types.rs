//! Shared types for colored-asset-wallet
//!
//! Caller-facing results. Everything serializes with camelCase field names.

use serde::{Deserialize, Serialize};

use crate::coloring::{AssetId, LockStatus};

/// Result of a broadcast issuance or transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    /// Signed transaction, hex encoded
    pub tx_hex: String,

    pub txid: String,

    /// Outputs carrying asset value, in output order
    pub colored_output_indexes: Vec<u32>,
}

/// An output credited by an issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivingAddress {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceResult {
    #[serde(flatten)]
    pub transaction: TransactionResult,

    pub asset_id: AssetId,

    /// `txid:vout` the asset id derives from; key for metadata lookups
    pub issuance_utxo: String,

    pub issue_address: String,

    pub receiving_addresses: Vec<ReceivingAddress>,
}

/// One UTXO contributing to a holding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingUtxo {
    /// Outpoint in format "txid:vout"
    pub utxo: String,
    pub address: String,
    pub amount: u64,
}

/// Units of one asset held across the wallet's addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHolding {
    pub asset_id: AssetId,

    /// Sum over `utxos`, in indivisible units
    pub amount: u64,

    pub divisibility: u8,

    pub lock_status: LockStatus,

    pub utxos: Vec<HoldingUtxo>,
}

/// A transaction touching the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub txid: String,

    pub tx_hex: String,

    /// Carries a readable colored payload
    pub colored: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u32>,

    pub confirmed: bool,
}

/// An asset this wallet issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedAsset {
    pub asset_id: AssetId,

    /// Issuance transaction
    pub txid: String,

    pub issuance_utxo: String,

    pub amount: u64,

    pub divisibility: u8,

    pub reissueable: bool,

    pub issue_address: String,
}
