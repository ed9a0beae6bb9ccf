//! Amount and recipient resolution
//!
//! Normalizes requests, resolves phone-number destinations through the
//! directory and selects funding UTXOs from the chain source. The only side
//! effects are directory lookups and chain reads.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::{Address, OutPoint};

use super::request::{
    parse_address, Destination, IssuanceRequest, SourceSelection, TransferRequest, ValidationError,
};
use crate::chain::{ChainError, ChainSource, ColoredUtxo, UtxoSelector};
use crate::coloring::AssetId;
use crate::directory::{DirectoryError, PhoneDirectory};
use crate::events::WatchedAddresses;
use crate::wallet::{HdWallet, WalletError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient {asset_id}: need {needed} units, sources hold {available}")]
    InsufficientAsset {
        asset_id: AssetId,
        needed: u64,
        available: u64,
    },

    #[error("No spendable bitcoin available to fund the transaction")]
    NoFunding,

    #[error("Cannot resolve recipient {phone}: {reason}")]
    UnresolvableRecipient { phone: String, reason: String },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// A resolved transfer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub address: Address,
    pub asset_id: AssetId,
    pub amount: u64,
}

/// Everything the builder needs for a transfer
#[derive(Debug, Clone)]
pub struct TransferPlan {
    /// Colored outputs being spent, in input order
    pub sources: Vec<ColoredUtxo>,
    /// Uncolored outputs available for fees, in preference order
    pub fee_candidates: Vec<ColoredUtxo>,
    pub outputs: Vec<ResolvedOutput>,
    /// Receives colored and BTC change
    pub change_address: Address,
}

/// Everything the builder needs for an issuance
#[derive(Debug, Clone)]
pub struct IssuancePlan {
    pub request: IssuanceRequest,
    /// Uncolored wallet outputs, largest first
    pub funding: Vec<ColoredUtxo>,
    /// Receives the remainder, default transfers and BTC change
    pub issue_address: Address,
    pub recipients: Vec<(Address, u64)>,
}

pub struct Resolver {
    wallet: Arc<dyn HdWallet>,
    chain: Arc<dyn ChainSource>,
    directory: Arc<dyn PhoneDirectory>,
    watched: WatchedAddresses,
}

impl Resolver {
    pub fn new(
        wallet: Arc<dyn HdWallet>,
        chain: Arc<dyn ChainSource>,
        directory: Arc<dyn PhoneDirectory>,
    ) -> Self {
        Self {
            wallet,
            chain,
            directory,
            watched: WatchedAddresses::new(),
        }
    }

    /// Share the set that freshly revealed addresses are added to
    pub fn with_watched(mut self, watched: WatchedAddresses) -> Self {
        self.watched = watched;
        self
    }

    /// Reveal the next wallet address and start watching it
    fn reveal_address(&self) -> Result<Address, ResolveError> {
        let address = self.wallet.next_receiving_address()?;
        if self.watched.insert(&address.to_string()) {
            log::debug!("Watching newly revealed {}", address);
        }
        Ok(address)
    }

    /// Resolve an issuance request into a funding plan
    pub async fn resolve_issuance(
        &self,
        request: &IssuanceRequest,
    ) -> Result<IssuancePlan, ResolveError> {
        request.validate()?;
        let network = self.wallet.network();

        let recipients_to: Vec<Option<Address>> = request
            .transfer
            .iter()
            .map(|t| t.to.as_deref().map(|a| parse_address(a, network)).transpose())
            .collect::<Result<_, _>>()?;

        let mut funding = self.wallet_uncolored(&[]).await?;
        if funding.is_empty() {
            return Err(ResolveError::NoFunding);
        }
        funding.sort_by(|a, b| b.value.cmp(&a.value));

        let issue_address = match funding
            .first()
            .and_then(|u| u.address.as_deref())
            .and_then(|a| parse_address(a, network).ok())
        {
            Some(address) => address,
            None => self.reveal_address()?,
        };

        let recipients = request
            .transfer
            .iter()
            .zip(recipients_to)
            .map(|(t, to)| (to.unwrap_or_else(|| issue_address.clone()), t.amount))
            .collect();

        log::debug!(
            "Issuance plan: {} funding candidates, issue address {}",
            funding.len(),
            issue_address
        );

        Ok(IssuancePlan {
            request: request.clone(),
            funding,
            issue_address,
            recipients,
        })
    }

    /// Resolve a transfer request into a funding plan
    pub async fn resolve_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferPlan, ResolveError> {
        let network = self.wallet.network();
        let normalized = request.normalize(network)?;

        let mut outputs = Vec::with_capacity(normalized.orders.len());
        for order in &normalized.orders {
            let address = match &order.destination {
                Destination::Address(address) => address.clone(),
                Destination::Phone(phone) => self.resolve_phone(phone).await?,
            };
            outputs.push(ResolvedOutput {
                address,
                asset_id: order.asset_id.clone(),
                amount: order.amount,
            });
        }

        let needed = normalized.totals()?;

        let (sources, change_address, preferred) = match &normalized.source {
            SourceSelection::ByAddress(addresses) => {
                let sources = self.select_from_addresses(addresses, &needed).await?;
                (sources, addresses[0].clone(), addresses.clone())
            }
            SourceSelection::ByUtxo(outpoints) => {
                let sources = self.select_outpoints(outpoints, &needed).await?;
                let owned = self.wallet.addresses();
                let change = sources
                    .iter()
                    .filter_map(|s| s.address.as_deref())
                    .filter_map(|a| parse_address(a, network).ok())
                    .find(|a| owned.contains(a));
                let change = match change {
                    Some(address) => address,
                    None => self.reveal_address()?,
                };
                (sources, change.clone(), vec![change])
            }
        };

        let fee_candidates = self.wallet_uncolored(&preferred).await?;

        log::debug!(
            "Transfer plan: {} sources, {} outputs, {} fee candidates",
            sources.len(),
            outputs.len(),
            fee_candidates.len()
        );

        Ok(TransferPlan {
            sources,
            fee_candidates,
            outputs,
            change_address,
        })
    }

    async fn resolve_phone(&self, phone: &str) -> Result<Address, ResolveError> {
        let unresolvable = |reason: String| ResolveError::UnresolvableRecipient {
            phone: phone.to_string(),
            reason,
        };

        let raw = self.directory.resolve(phone).await.map_err(|e| match e {
            DirectoryError::NotFound(_) => unresolvable("not registered".to_string()),
            other => unresolvable(other.to_string()),
        })?;
        let address =
            parse_address(&raw, self.wallet.network()).map_err(|e| unresolvable(e.to_string()))?;

        log::debug!("Resolved {} to {}", phone, address);
        Ok(address)
    }

    /// Greedy selection in chain order, per requested asset
    async fn select_from_addresses(
        &self,
        addresses: &[Address],
        needed: &[(AssetId, u64)],
    ) -> Result<Vec<ColoredUtxo>, ResolveError> {
        let mut selected: Vec<ColoredUtxo> = Vec::new();

        for (asset_id, amount) in needed {
            let mut covered: u64 = selected.iter().map(|u| u.amount_of(asset_id)).sum();

            'addresses: for address in addresses {
                if covered >= *amount {
                    break;
                }
                let utxos = self
                    .chain
                    .select_unspent(&UtxoSelector::Address(address.clone()), Some(asset_id))
                    .await?;
                for utxo in utxos {
                    if selected.iter().any(|s| s.outpoint == utxo.outpoint) {
                        continue;
                    }
                    covered += utxo.amount_of(asset_id);
                    selected.push(utxo);
                    if covered >= *amount {
                        break 'addresses;
                    }
                }
            }

            if covered < *amount {
                return Err(ResolveError::InsufficientAsset {
                    asset_id: asset_id.clone(),
                    needed: *amount,
                    available: covered,
                });
            }
        }

        Ok(selected)
    }

    async fn select_outpoints(
        &self,
        outpoints: &[OutPoint],
        needed: &[(AssetId, u64)],
    ) -> Result<Vec<ColoredUtxo>, ResolveError> {
        let mut selected: Vec<ColoredUtxo> = Vec::new();
        for outpoint in outpoints {
            if selected.iter().any(|s| &s.outpoint == outpoint) {
                return Err(ValidationError::new(format!("utxo {} listed twice", outpoint)).into());
            }
            let utxo = self
                .chain
                .select_unspent(&UtxoSelector::Outpoint(*outpoint), None)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ValidationError::new(format!("unknown or spent utxo {}", outpoint)))?;
            selected.push(utxo);
        }

        for (asset_id, amount) in needed {
            let available: u64 = selected.iter().map(|u| u.amount_of(asset_id)).sum();
            if available < *amount {
                return Err(ResolveError::InsufficientAsset {
                    asset_id: asset_id.clone(),
                    needed: *amount,
                    available,
                });
            }
        }
        Ok(selected)
    }

    /// Uncolored outputs at `preferred` first, then at every wallet address
    async fn wallet_uncolored(
        &self,
        preferred: &[Address],
    ) -> Result<Vec<ColoredUtxo>, ResolveError> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut addresses: Vec<Address> = preferred.to_vec();
        addresses.extend(self.wallet.addresses());

        for address in addresses {
            let utxos = self
                .chain
                .select_unspent(&UtxoSelector::Address(address), None)
                .await?;
            for utxo in utxos.into_iter().filter(|u| !u.is_colored()) {
                if seen.insert(utxo.outpoint) {
                    candidates.push(utxo);
                }
            }
        }
        Ok(candidates)
    }
}
