//! Asset identifiers
//!
//! An asset id is derived from the issuance UTXO (issuance txid plus the first
//! colored output) together with the asset's divisibility and lock status, so
//! the same issuance UTXO always reproduces the same id.

use std::fmt;
use std::str::FromStr;

use bitcoin::base58;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// Maximum number of decimal places an asset can declare
pub const MAX_DIVISIBILITY: u8 = 7;

const ASSET_ID_VERSION: u8 = 0x17;
const LOCKED_PREFIX: char = 'L';
const UNLOCKED_PREFIX: char = 'U';

/// Whether further issuance of an asset is permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    /// Not reissueable
    Locked,
    /// Reissueable
    Unlocked,
}

impl LockStatus {
    pub fn from_reissueable(reissueable: bool) -> Self {
        if reissueable {
            LockStatus::Unlocked
        } else {
            LockStatus::Locked
        }
    }

    pub fn is_reissueable(self) -> bool {
        matches!(self, LockStatus::Unlocked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetIdError {
    #[error("Asset id is empty")]
    Empty,

    #[error("Unknown asset id prefix '{0}'")]
    UnknownPrefix(char),

    #[error("Invalid asset id encoding: {0}")]
    Encoding(String),
}

/// Opaque asset identifier, e.g. `La3Xv...` (locked) or `Ub9Qw...` (unlocked)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Derive the asset id for an issuance UTXO
    pub fn derive(txid: &Txid, vout: u32, divisibility: u8, reissueable: bool) -> Self {
        let mut preimage = Vec::with_capacity(32 + 4 + 2);
        preimage.extend_from_slice(&txid.to_byte_array());
        preimage.extend_from_slice(&vout.to_le_bytes());
        preimage.push(divisibility);
        preimage.push(reissueable as u8);

        let digest = sha256d::Hash::hash(&preimage);

        let mut payload = Vec::with_capacity(21);
        payload.push(ASSET_ID_VERSION);
        payload.extend_from_slice(&digest.to_byte_array()[..20]);

        let prefix = if reissueable {
            UNLOCKED_PREFIX
        } else {
            LOCKED_PREFIX
        };
        AssetId(format!("{}{}", prefix, base58::encode_check(&payload)))
    }

    /// Lock status encoded in the id prefix
    pub fn lock_status(&self) -> LockStatus {
        if self.0.starts_with(UNLOCKED_PREFIX) {
            LockStatus::Unlocked
        } else {
            LockStatus::Locked
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AssetId {
    type Err = AssetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let prefix = chars.next().ok_or(AssetIdError::Empty)?;
        if prefix != LOCKED_PREFIX && prefix != UNLOCKED_PREFIX {
            return Err(AssetIdError::UnknownPrefix(prefix));
        }

        let payload = base58::decode_check(chars.as_str())
            .map_err(|e| AssetIdError::Encoding(e.to_string()))?;
        if payload.len() != 21 || payload[0] != ASSET_ID_VERSION {
            return Err(AssetIdError::Encoding(format!(
                "unexpected payload of {} bytes",
                payload.len()
            )));
        }

        Ok(AssetId(s.to_string()))
    }
}

impl TryFrom<String> for AssetId {
    type Error = AssetIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
