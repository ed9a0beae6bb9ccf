//! Asset client - main integration layer
//!
//! Wires the resolver, builder, gateway, metadata cache and event notifier
//! to the collaborators and exposes the caller-facing operations.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Address, Network, OutPoint, Transaction, Txid};

use crate::chain::{ChainError, ChainSource, UtxoSelector};
use crate::coloring::{ledger, AssetId, Payload};
use crate::config::{ConfigError, GlobalConfig};
use crate::directory::PhoneDirectory;
use crate::engine::request::parse_outpoint;
use crate::engine::{
    BuildError, FeeRateConfig, Gateway, GatewayError, IssuanceRequest, ResolveError, Resolver,
    TransactionBuilder, TransferRequest, ValidationError,
};
use crate::events::{
    EventCategory, EventNotifier, NotifierError, NotifierState, PushTransport, SubscriptionId,
    TransactionEvent, WatchedAddresses,
};
use crate::metadata::{AssetMetadata, MetadataError, MetadataResolver, MetadataSource};
use crate::types::{
    AssetHolding, HoldingUtxo, IssuanceResult, IssuedAsset, TransactionResult, WalletTransaction,
};
use crate::wallet::{HdWallet, WalletError};

/// Error categories callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    UnresolvableRecipient,
    Signing,
    /// Key derivation or wallet state failures outside of signing
    Wallet,
    BroadcastRejected,
    MetadataIntegrity,
    TransportDisconnected,
    Chain,
    MetadataSource,
    Config,
    ColorConservation,
    Timeout,
}

/// Errors that can occur in the asset client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Events are not configured for this client")]
    EventsDisabled,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Validation(_) => ErrorKind::Validation,
            ClientError::Resolve(e) => match e {
                ResolveError::Validation(_) => ErrorKind::Validation,
                ResolveError::InsufficientAsset { .. } | ResolveError::NoFunding => {
                    ErrorKind::InsufficientFunds
                }
                ResolveError::UnresolvableRecipient { .. } => ErrorKind::UnresolvableRecipient,
                ResolveError::Chain(_) => ErrorKind::Chain,
                ResolveError::Wallet(_) => ErrorKind::Wallet,
            },
            ClientError::Build(e) => match e {
                BuildError::Validation(_) => ErrorKind::Validation,
                BuildError::InsufficientFunds { .. } | BuildError::InsufficientAsset { .. } => {
                    ErrorKind::InsufficientFunds
                }
                BuildError::ColorConservation(_) => ErrorKind::ColorConservation,
            },
            ClientError::Gateway(e) => match e {
                GatewayError::Signing(_) => ErrorKind::Signing,
                GatewayError::Broadcast(_) => ErrorKind::BroadcastRejected,
            },
            ClientError::Metadata(e) => match e {
                MetadataError::Integrity(_) => ErrorKind::MetadataIntegrity,
                MetadataError::Chain(_) => ErrorKind::Chain,
                _ => ErrorKind::MetadataSource,
            },
            ClientError::Notifier(e) => match e {
                NotifierError::Timeout(_) => ErrorKind::Timeout,
                _ => ErrorKind::TransportDisconnected,
            },
            ClientError::Chain(_) => ErrorKind::Chain,
            ClientError::Wallet(_) => ErrorKind::Wallet,
            ClientError::Config(_) | ClientError::EventsDisabled => ErrorKind::Config,
        }
    }
}

/// Behavioural settings of a client
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub network: Network,
    pub fee_rate: FeeRateConfig,
    /// Check fetched metadata against the issuance transaction
    pub verify_metadata: bool,
    /// Initial event delivery mode
    pub events_secure: bool,
}

impl ClientSettings {
    pub fn from_config(config: &GlobalConfig) -> Result<Self, ClientError> {
        let fee_rate = FeeRateConfig::new(config.transactions.fee_rate)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self {
            network: config.bitcoin.network.to_bitcoin(),
            fee_rate,
            verify_metadata: config.services.verify_metadata,
            events_secure: config.events.secure,
        })
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            fee_rate: FeeRateConfig::low_priority(),
            verify_metadata: true,
            events_secure: true,
        }
    }
}

/// External services the client talks to
pub struct Collaborators {
    pub wallet: Arc<dyn HdWallet>,
    pub chain: Arc<dyn ChainSource>,
    pub directory: Arc<dyn PhoneDirectory>,
    pub metadata: Arc<dyn MetadataSource>,
    /// `None` disables event subscriptions
    pub transport: Option<Arc<dyn PushTransport>>,
    /// Address set shared with the transport, if it polls
    pub watched: WatchedAddresses,
}

/// Caller-facing asset wallet session
///
/// # Example
///
/// ```ignore
/// let client = AssetClient::new(ClientSettings::regtest(), collaborators)?;
/// let issued = client.issue_asset(&request).await?;
/// println!("issued {} in {}", issued.asset_id, issued.transaction.txid);
/// ```
pub struct AssetClient {
    settings: ClientSettings,
    wallet: Arc<dyn HdWallet>,
    chain: Arc<dyn ChainSource>,
    metadata_source: Arc<dyn MetadataSource>,
    resolver: Resolver,
    builder: TransactionBuilder,
    gateway: Gateway,
    metadata: MetadataResolver,
    notifier: Option<EventNotifier>,
    watched: WatchedAddresses,
}

impl AssetClient {
    pub fn new(settings: ClientSettings, collaborators: Collaborators) -> Result<Self, ClientError> {
        let Collaborators {
            wallet,
            chain,
            directory,
            metadata,
            transport,
            watched,
        } = collaborators;

        if wallet.network() != settings.network {
            return Err(ConfigError::Invalid(format!(
                "wallet network {} does not match configured network {}",
                wallet.network(),
                settings.network
            ))
            .into());
        }

        for address in wallet.addresses() {
            watched.insert(&address.to_string());
        }

        let notifier = transport.map(|transport| {
            EventNotifier::new(
                transport,
                Arc::clone(&chain),
                settings.network,
                watched.clone(),
                settings.events_secure,
            )
        });

        log::info!(
            "Asset client ready on {} watching {} addresses",
            settings.network,
            watched.len()
        );

        Ok(Self {
            resolver: Resolver::new(Arc::clone(&wallet), Arc::clone(&chain), directory)
                .with_watched(watched.clone()),
            builder: TransactionBuilder::new(settings.fee_rate),
            gateway: Gateway::new(Arc::clone(&wallet), Arc::clone(&chain)),
            metadata: MetadataResolver::new(Arc::clone(&metadata), Arc::clone(&chain)),
            metadata_source: metadata,
            settings,
            wallet,
            chain,
            notifier,
            watched,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Issue a new asset
    ///
    /// Metadata is published before the transaction is broadcast so that
    /// recipients can resolve it as soon as they see the issuance.
    pub async fn issue_asset(
        &self,
        request: &IssuanceRequest,
    ) -> Result<IssuanceResult, ClientError> {
        let plan = self.resolver.resolve_issuance(request).await?;
        let issuance = self.builder.build_issuance(&plan)?;
        let signed = self.gateway.sign(&issuance.skeleton)?;

        if let Some(metadata) = &issuance.metadata {
            self.metadata_source
                .publish(&issuance.asset_id, &issuance.issuance_utxo, metadata)
                .await?;
        }

        self.gateway.broadcast(&signed).await?;
        log::info!(
            "Issued {} units of {} in {}",
            request.amount,
            issuance.asset_id,
            signed.txid
        );

        Ok(IssuanceResult {
            transaction: TransactionResult {
                tx_hex: signed.tx_hex,
                txid: signed.txid.to_string(),
                colored_output_indexes: issuance.skeleton.colored_output_indexes,
            },
            asset_id: issuance.asset_id,
            issuance_utxo: issuance.issuance_utxo.to_string(),
            issue_address: issuance.issue_address.to_string(),
            receiving_addresses: issuance.receiving_addresses,
        })
    }

    /// Send asset units to addresses or phone-number recipients
    pub async fn send_asset(
        &self,
        request: &TransferRequest,
    ) -> Result<TransactionResult, ClientError> {
        let plan = self.resolver.resolve_transfer(request).await?;
        let skeleton = self.builder.build_transfer(&plan)?;
        let signed = self.gateway.sign_and_broadcast(&skeleton).await?;

        Ok(TransactionResult {
            tx_hex: signed.tx_hex,
            txid: signed.txid.to_string(),
            colored_output_indexes: skeleton.colored_output_indexes,
        })
    }

    /// Asset holdings across every wallet address
    pub async fn get_assets(&self) -> Result<Vec<AssetHolding>, ClientError> {
        let mut holdings: Vec<AssetHolding> = Vec::new();

        for address in self.wallet.addresses() {
            let utxos = self
                .chain
                .select_unspent(&UtxoSelector::Address(address.clone()), None)
                .await?;
            for utxo in utxos.iter().filter(|u| u.is_colored()) {
                for asset in &utxo.assets {
                    let entry = HoldingUtxo {
                        utxo: utxo.outpoint.to_string(),
                        address: address.to_string(),
                        amount: asset.amount,
                    };
                    match holdings.iter_mut().find(|h| h.asset_id == asset.asset_id) {
                        Some(holding) => {
                            holding.amount += asset.amount;
                            holding.utxos.push(entry);
                        }
                        None => holdings.push(AssetHolding {
                            asset_id: asset.asset_id.clone(),
                            amount: asset.amount,
                            divisibility: asset.divisibility,
                            lock_status: asset.lock_status,
                            utxos: vec![entry],
                        }),
                    }
                }
            }
        }
        Ok(holdings)
    }

    /// Transactions touching any wallet address, each listed once
    pub async fn get_transactions(&self) -> Result<Vec<WalletTransaction>, ClientError> {
        let mut seen = HashSet::new();
        let mut transactions = Vec::new();

        for address in self.wallet.addresses() {
            for entry in self.chain.address_transactions(&address).await? {
                let txid = entry.tx.compute_txid();
                if !seen.insert(txid) {
                    continue;
                }
                transactions.push(WalletTransaction {
                    txid: txid.to_string(),
                    tx_hex: bitcoin::consensus::encode::serialize_hex(&entry.tx),
                    colored: matches!(Payload::find_in(&entry.tx), Some(Ok(_))),
                    block_height: entry.block_height,
                    confirmed: entry.block_height.is_some(),
                });
            }
        }
        Ok(transactions)
    }

    /// Assets issued by transactions this wallet funded
    pub async fn get_issued_assets(&self) -> Result<Vec<IssuedAsset>, ClientError> {
        let scripts: HashSet<_> = self
            .wallet
            .addresses()
            .iter()
            .map(Address::script_pubkey)
            .collect();
        let mut seen = HashSet::new();
        let mut issued = Vec::new();

        for address in self.wallet.addresses() {
            for entry in self.chain.address_transactions(&address).await? {
                let tx = entry.tx;
                let txid = tx.compute_txid();
                if !seen.insert(txid) {
                    continue;
                }
                let Some(Ok((payload_index, payload))) = Payload::find_in(&tx) else {
                    continue;
                };
                let Payload::Issuance {
                    amount,
                    divisibility,
                    reissueable,
                    ref instructions,
                    ..
                } = payload
                else {
                    continue;
                };

                let funder = self.funding_script(&tx).await?;
                let Some(funder) = funder.filter(|s| scripts.contains(s)) else {
                    continue;
                };
                let Some(genesis) = ledger::issuance_output(&tx, payload_index, instructions)
                else {
                    continue;
                };

                let issuance_utxo = OutPoint {
                    txid,
                    vout: genesis as u32,
                };
                issued.push(IssuedAsset {
                    asset_id: AssetId::derive(&txid, issuance_utxo.vout, divisibility, reissueable),
                    txid: txid.to_string(),
                    issuance_utxo: issuance_utxo.to_string(),
                    amount,
                    divisibility,
                    reissueable,
                    issue_address: Address::from_script(&funder, self.settings.network)
                        .map(|a| a.to_string())
                        .unwrap_or_default(),
                });
            }
        }
        Ok(issued)
    }

    /// Script spent by the first input, the issuer's funding output
    async fn funding_script(
        &self,
        tx: &Transaction,
    ) -> Result<Option<bitcoin::ScriptBuf>, ClientError> {
        let Some(first) = tx.input.first() else {
            return Ok(None);
        };
        if tx.is_coinbase() {
            return Ok(None);
        }
        let parent = self
            .chain
            .get_transaction(&first.previous_output.txid)
            .await?;
        Ok(parent
            .output
            .get(first.previous_output.vout as usize)
            .map(|o| o.script_pubkey.clone()))
    }

    /// Metadata of an asset, from cache unless `refresh`
    pub async fn get_asset_metadata(
        &self,
        asset_id: &str,
        issuance_utxo: &str,
        refresh: bool,
    ) -> Result<AssetMetadata, ClientError> {
        let asset_id =
            AssetId::from_str(asset_id).map_err(|e| ValidationError::new(e.to_string()))?;
        let utxo = parse_outpoint(issuance_utxo)?;
        Ok(self
            .metadata
            .resolve(&asset_id, &utxo, self.settings.verify_metadata, refresh)
            .await?)
    }

    fn notifier(&self) -> Result<&EventNotifier, ClientError> {
        self.notifier.as_ref().ok_or(ClientError::EventsDisabled)
    }

    /// Subscribe to every transaction touching the wallet
    pub async fn on_new_transaction<F>(&self, callback: F) -> Result<SubscriptionId, ClientError>
    where
        F: Fn(&TransactionEvent) + Send + Sync + 'static,
    {
        Ok(self
            .notifier()?
            .subscribe(EventCategory::NewTransaction, callback)
            .await?)
    }

    /// Subscribe to colored transactions touching the wallet
    pub async fn on_new_cc_transaction<F>(
        &self,
        callback: F,
    ) -> Result<SubscriptionId, ClientError>
    where
        F: Fn(&TransactionEvent) + Send + Sync + 'static,
    {
        Ok(self
            .notifier()?
            .subscribe(EventCategory::NewColoredTransaction, callback)
            .await?)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, ClientError> {
        Ok(self.notifier()?.unsubscribe(id))
    }

    pub fn on_notifier_error<F>(&self, callback: F) -> Result<(), ClientError>
    where
        F: Fn(&NotifierError) + Send + Sync + 'static,
    {
        self.notifier()?.on_error(callback);
        Ok(())
    }

    /// Switch event delivery mode; applies to events received afterwards
    pub async fn set_events_secure(&self, secure: bool) -> Result<(), ClientError> {
        self.notifier()?.set_secure(secure).await;
        Ok(())
    }

    pub fn events_secure(&self) -> bool {
        match &self.notifier {
            Some(notifier) => notifier.is_secure(),
            None => self.settings.events_secure,
        }
    }

    pub fn notifier_state(&self) -> Option<NotifierState> {
        self.notifier.as_ref().map(EventNotifier::state)
    }

    /// Wait until the notifier delivers `txid` in `category`
    pub async fn await_transaction(
        &self,
        txid: &str,
        category: EventCategory,
        timeout: Duration,
    ) -> Result<TransactionEvent, ClientError> {
        let txid = Txid::from_str(txid)
            .map_err(|e| ValidationError::new(format!("invalid txid {}: {}", txid, e)))?;
        Ok(self
            .notifier()?
            .await_transaction(&txid, category, timeout)
            .await?)
    }

    pub async fn shutdown(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.shutdown().await;
        }
    }

    /// Hex of the wallet's private seed
    pub fn private_seed_hex(&self) -> String {
        hex::encode(self.wallet.derive_private_seed())
    }

    /// Reveal a fresh receiving address and watch it for events
    pub fn receiving_address(&self) -> Result<Address, ClientError> {
        let address = self.wallet.next_receiving_address()?;
        self.watched.insert(&address.to_string());
        Ok(address)
    }

    /// Balances per asset id, summed over holdings
    pub async fn asset_balances(&self) -> Result<HashMap<AssetId, u64>, ClientError> {
        Ok(self
            .get_assets()
            .await?
            .into_iter()
            .map(|h| (h.asset_id, h.amount))
            .collect())
    }
}
