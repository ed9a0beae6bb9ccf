//! Common test utilities for colored-asset-wallet integration tests
//!
//! This module provides shared test infrastructure including:
//! - An in-process regtest environment (chain, metadata store, directory)
//! - Fixed-mnemonic wallets so addresses are reproducible
//! - Request builders and event collection helpers

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Address, Network, OutPoint};
use colored_asset_wallet::chain::MemoryChain;
use colored_asset_wallet::directory::MemoryPhoneDirectory;
use colored_asset_wallet::engine::{IssuanceRequest, IssuanceTransfer, TransferRequest, TransferTarget};
use colored_asset_wallet::events::{MemoryTransport, TransactionEvent, WatchedAddresses};
use colored_asset_wallet::manager::{AssetClient, ClientSettings, Collaborators};
use colored_asset_wallet::metadata::{IssuanceMetadata, MemoryMetadataSource, MetadataUrl};
use colored_asset_wallet::types::IssuanceResult;
use colored_asset_wallet::wallet::{HdWallet, MnemonicWallet};
use tokio::sync::mpsc;

/// Wallet under test
pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Counterparty wallet
pub const PEER_MNEMONIC: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";

/// Phone number registered to the peer's first address
pub const TEST_PHONE: &str = "+1234567890";

pub const LOOKAHEAD: u32 = 5;

/// Initialize logging once; respects RUST_LOG
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Shared in-process collaborators plus a client for the test wallet
pub struct TestEnv {
    pub chain: Arc<MemoryChain>,
    pub metadata: Arc<MemoryMetadataSource>,
    pub directory: Arc<MemoryPhoneDirectory>,
    pub wallet: Arc<MnemonicWallet>,
    pub peer_wallet: Arc<MnemonicWallet>,
    pub client: AssetClient,
}

impl TestEnv {
    /// Unfunded environment with default regtest settings
    pub fn new() -> Self {
        Self::with_settings(ClientSettings::regtest())
    }

    pub fn with_settings(settings: ClientSettings) -> Self {
        init_test_logging();

        let chain = Arc::new(MemoryChain::new(Network::Regtest));
        let metadata = Arc::new(MemoryMetadataSource::new());
        let directory = Arc::new(MemoryPhoneDirectory::new());

        let wallet = Arc::new(
            MnemonicWallet::from_phrase(TEST_MNEMONIC, Network::Regtest, LOOKAHEAD)
                .expect("Failed to open test wallet"),
        );
        let peer_wallet = Arc::new(
            MnemonicWallet::from_phrase(PEER_MNEMONIC, Network::Regtest, LOOKAHEAD)
                .expect("Failed to open peer wallet"),
        );
        directory.register(TEST_PHONE, &peer_wallet.addresses()[0].to_string());

        let client = build_client(&chain, &metadata, &directory, wallet.clone(), settings);

        Self {
            chain,
            metadata,
            directory,
            wallet,
            peer_wallet,
            client,
        }
    }

    /// Environment whose first wallet address holds `sats`
    pub fn funded(sats: u64) -> Self {
        let env = Self::new();
        env.fund(0, sats);
        env
    }

    /// Credit `sats` to wallet address `index`
    pub fn fund(&self, index: usize, sats: u64) -> OutPoint {
        self.chain.fund(&self.address(index), sats)
    }

    pub fn address(&self, index: usize) -> Address {
        self.wallet.addresses()[index].clone()
    }

    pub fn peer_address(&self, index: usize) -> Address {
        self.peer_wallet.addresses()[index].clone()
    }

    /// Client for the peer wallet over the same chain and services
    pub fn peer_client(&self) -> AssetClient {
        build_client(
            &self.chain,
            &self.metadata,
            &self.directory,
            self.peer_wallet.clone(),
            ClientSettings::regtest(),
        )
    }

    /// Issue `amount` units of a locked asset with sample metadata
    pub async fn issue(&self, amount: u64) -> IssuanceResult {
        self.client
            .issue_asset(&issuance_request(amount))
            .await
            .expect("Failed to issue asset")
    }
}

fn build_client(
    chain: &Arc<MemoryChain>,
    metadata: &Arc<MemoryMetadataSource>,
    directory: &Arc<MemoryPhoneDirectory>,
    wallet: Arc<MnemonicWallet>,
    settings: ClientSettings,
) -> AssetClient {
    AssetClient::new(
        settings,
        Collaborators {
            wallet,
            chain: chain.clone(),
            directory: directory.clone(),
            metadata: metadata.clone(),
            transport: Some(Arc::new(MemoryTransport::new(chain.feed()))),
            watched: WatchedAddresses::new(),
        },
    )
    .expect("Failed to create asset client")
}

pub fn sample_metadata() -> IssuanceMetadata {
    IssuanceMetadata {
        asset_name: "Test Gold".to_string(),
        issuer: "Test Issuer Ltd".to_string(),
        description: "One unit redeems one gram of gold".to_string(),
        urls: vec![MetadataUrl {
            name: "icon".to_string(),
            url: "https://example.com/gold.png".to_string(),
            mime_type: "image/png".to_string(),
        }],
        user_data: None,
    }
}

pub fn issuance_request(amount: u64) -> IssuanceRequest {
    IssuanceRequest {
        amount,
        divisibility: 2,
        reissueable: false,
        transfer: Vec::new(),
        metadata: Some(sample_metadata()),
    }
}

pub fn issuance_transfer(amount: u64, to: Option<&Address>) -> IssuanceTransfer {
    IssuanceTransfer {
        amount,
        to: to.map(|a| a.to_string()),
    }
}

/// Transfer of `amount` units from `utxo` to `to`
pub fn send_from_utxo(utxo: &str, asset_id: &str, amount: u64, to: &Address) -> TransferRequest {
    TransferRequest {
        from: None,
        sendutxo: Some(vec![utxo.to_string()]),
        to: vec![TransferTarget {
            address: Some(to.to_string()),
            phone_number: None,
            asset_id: asset_id.to_string(),
            amount,
        }],
    }
}

/// Callback forwarding every delivered event into a channel
pub fn event_channel() -> (
    impl Fn(&TransactionEvent) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<TransactionEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |event: &TransactionEvent| {
        let _ = tx.send(event.clone());
    };
    (callback, rx)
}

/// Next event from `rx`, or `None` after `timeout`
pub async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<TransactionEvent>,
    timeout: Duration,
) -> Option<TransactionEvent> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}
