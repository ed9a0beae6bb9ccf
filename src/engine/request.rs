//! Caller-facing issuance and transfer requests
//!
//! Requests arrive in the loose JSON shape callers use (`from`/`sendutxo`,
//! `address`/`phoneNumber`) and are normalized into tagged variants before
//! any network call is made.

use std::str::FromStr;

use bitcoin::{Address, Network, OutPoint};
use serde::{Deserialize, Serialize};

use crate::coloring::{AssetId, MAX_DIVISIBILITY};
use crate::metadata::IssuanceMetadata;

/// A request that failed validation before any network call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Issue a new asset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceRequest {
    /// Total units issued
    pub amount: u64,
    #[serde(default)]
    pub divisibility: u8,
    #[serde(default)]
    pub reissueable: bool,
    /// How issued units are split; the remainder returns to the issuer
    #[serde(default)]
    pub transfer: Vec<IssuanceTransfer>,
    #[serde(default)]
    pub metadata: Option<IssuanceMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceTransfer {
    pub amount: u64,
    /// Defaults to the issue address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Send existing asset units
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Fund from these addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Vec<String>>,
    /// Fund from these outpoints (`txid:vout`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sendutxo: Option<Vec<String>>,
    pub to: Vec<TransferTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub asset_id: String,
    pub amount: u64,
}

/// Where transfer funding comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    ByAddress(Vec<Address>),
    ByUtxo(Vec<OutPoint>),
}

/// Who receives a transfer entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Address(Address),
    Phone(String),
}

/// One normalized (destination, asset, amount) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrder {
    pub destination: Destination,
    pub asset_id: AssetId,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTransfer {
    pub source: SourceSelection,
    pub orders: Vec<TransferOrder>,
}

/// Parse an address and require it to belong to `network`
pub fn parse_address(s: &str, network: Network) -> Result<Address, ValidationError> {
    Address::from_str(s.trim())
        .map_err(|e| ValidationError::new(format!("invalid address '{}': {}", s, e)))?
        .require_network(network)
        .map_err(|_| ValidationError::new(format!("address '{}' is not a {} address", s, network)))
}

/// Parse a `txid:vout` reference
pub fn parse_outpoint(s: &str) -> Result<OutPoint, ValidationError> {
    OutPoint::from_str(s.trim())
        .map_err(|e| ValidationError::new(format!("invalid utxo '{}': {}", s, e)))
}

impl IssuanceRequest {
    /// Check amounts and divisibility
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount == 0 {
            return Err(ValidationError::new("issuance amount must be positive"));
        }
        if self.divisibility > MAX_DIVISIBILITY {
            return Err(ValidationError::new(format!(
                "divisibility {} exceeds the maximum of {}",
                self.divisibility, MAX_DIVISIBILITY
            )));
        }
        if self.transfer.iter().any(|t| t.amount == 0) {
            return Err(ValidationError::new("transfer amounts must be positive"));
        }

        let assigned = self
            .transfer
            .iter()
            .try_fold(0u64, |acc, t| acc.checked_add(t.amount))
            .ok_or_else(|| ValidationError::new("transfer amounts overflow"))?;
        if assigned > self.amount {
            return Err(ValidationError::new(format!(
                "transfers assign {} units but only {} are issued",
                assigned, self.amount
            )));
        }
        Ok(())
    }
}

impl TransferRequest {
    /// Normalize into tagged source and destination variants
    pub fn normalize(&self, network: Network) -> Result<NormalizedTransfer, ValidationError> {
        let source = match (&self.from, &self.sendutxo) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::new(
                    "'from' and 'sendutxo' are mutually exclusive",
                ))
            }
            (None, None) => {
                return Err(ValidationError::new(
                    "one of 'from' or 'sendutxo' is required",
                ))
            }
            (Some(from), None) => {
                if from.is_empty() {
                    return Err(ValidationError::new("'from' is empty"));
                }
                SourceSelection::ByAddress(
                    from.iter()
                        .map(|a| parse_address(a, network))
                        .collect::<Result<_, _>>()?,
                )
            }
            (None, Some(utxos)) => {
                if utxos.is_empty() {
                    return Err(ValidationError::new("'sendutxo' is empty"));
                }
                SourceSelection::ByUtxo(
                    utxos
                        .iter()
                        .map(|u| parse_outpoint(u))
                        .collect::<Result<_, _>>()?,
                )
            }
        };

        if self.to.is_empty() {
            return Err(ValidationError::new("'to' is empty"));
        }

        let orders = self
            .to
            .iter()
            .enumerate()
            .map(|(i, target)| target.normalize(i, network))
            .collect::<Result<Vec<_>, _>>()?;

        let normalized = NormalizedTransfer { source, orders };
        normalized.totals()?;
        Ok(normalized)
    }
}

impl NormalizedTransfer {
    /// Units requested per asset, in first-seen order
    pub fn totals(&self) -> Result<Vec<(AssetId, u64)>, ValidationError> {
        let mut totals: Vec<(AssetId, u64)> = Vec::new();
        for order in &self.orders {
            match totals.iter_mut().find(|(id, _)| id == &order.asset_id) {
                Some((id, total)) => {
                    *total = total.checked_add(order.amount).ok_or_else(|| {
                        ValidationError::new(format!("amounts requested for {} overflow", id))
                    })?
                }
                None => totals.push((order.asset_id.clone(), order.amount)),
            }
        }
        Ok(totals)
    }
}

impl TransferTarget {
    fn normalize(&self, position: usize, network: Network) -> Result<TransferOrder, ValidationError> {
        if self.amount == 0 {
            return Err(ValidationError::new(format!(
                "'to[{}]' amount must be positive",
                position
            )));
        }

        let destination = match (&self.address, &self.phone_number) {
            (Some(address), None) => Destination::Address(parse_address(address, network)?),
            (None, Some(phone)) if !phone.trim().is_empty() => {
                Destination::Phone(phone.trim().to_string())
            }
            (Some(_), Some(_)) => {
                return Err(ValidationError::new(format!(
                    "'to[{}]' has both an address and a phone number",
                    position
                )))
            }
            _ => {
                return Err(ValidationError::new(format!(
                    "'to[{}]' needs an address or a phone number",
                    position
                )))
            }
        };

        let asset_id = AssetId::from_str(&self.asset_id).map_err(|e| {
            ValidationError::new(format!("'to[{}]' asset id: {}", position, e))
        })?;

        Ok(TransferOrder {
            destination,
            asset_id,
            amount: self.amount,
        })
    }
}
