//! Esplora chain source
//!
//! Wraps the blocking Esplora client; every request runs on the blocking
//! thread pool. Output colors are resolved through a [`ColorIndex`] that
//! replays ancestry fetched from the same server.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bdk_esplora::esplora_client::{self, BlockingClient};
use bitcoin::{Address, OutPoint, Transaction, Txid};

use super::{BroadcastError, ChainError, ChainSource, ChainTransaction, ColoredUtxo, UtxoSelector};
use crate::coloring::{AssetId, ColorIndex, RawTransactionSource};
use crate::config::NetworkType;

/// Confirmed transactions per `scripthash_txs` page
const CONFIRMED_PAGE_SIZE: usize = 25;

/// Chain source backed by an Esplora server
pub struct EsploraChain {
    fetcher: EsploraFetcher,
    network: NetworkType,
    url: String,
    index: Arc<ColorIndex>,
}

#[derive(Clone)]
struct EsploraFetcher {
    client: BlockingClient,
}

/// Failure of a blocking client call
#[derive(Debug)]
enum CallError {
    Client(esplora_client::Error),
    Worker(String),
}

impl EsploraFetcher {
    /// Run a blocking client call off the async runtime
    async fn call<T, F>(&self, f: F) -> Result<T, CallError>
    where
        T: Send + 'static,
        F: FnOnce(&BlockingClient) -> Result<T, esplora_client::Error> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| CallError::Worker(e.to_string()))?
            .map_err(CallError::Client)
    }
}

#[async_trait]
impl RawTransactionSource for EsploraFetcher {
    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        let id = *txid;
        self.call(move |client| client.get_tx(&id))
            .await
            .map_err(request_error)?
            .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))
    }
}

fn request_error(e: CallError) -> ChainError {
    match e {
        CallError::Client(e) => ChainError::Request(e.to_string()),
        CallError::Worker(e) => ChainError::Request(format!("worker failed: {}", e)),
    }
}

/// 4xx answers are node verdicts; anything else may succeed on retry
fn classify_broadcast(e: CallError) -> BroadcastError {
    match e {
        CallError::Client(esplora_client::Error::HttpResponse { status, message })
            if status < 500 =>
        {
            BroadcastError::Rejected(message)
        }
        CallError::Client(other) => BroadcastError::Transient(other.to_string()),
        CallError::Worker(e) => BroadcastError::Transient(e),
    }
}

impl EsploraChain {
    /// Create a chain source for the Esplora server at `url`
    ///
    /// # Arguments
    ///
    /// * `url` - Esplora server URL (e.g., "http://localhost:3002")
    /// * `network` - Network the server indexes
    ///
    /// # Example
    ///
    /// ```ignore
    /// use colored_asset_wallet::chain::EsploraChain;
    /// use colored_asset_wallet::config::NetworkType;
    ///
    /// let chain = EsploraChain::new("http://localhost:3002", NetworkType::Regtest);
    /// ```
    pub fn new(url: &str, network: NetworkType) -> Self {
        Self::with_builder(esplora_client::Builder::new(url), url, network)
    }

    /// Create a chain source with a custom request timeout
    pub fn with_timeout(url: &str, network: NetworkType, timeout: Duration) -> Self {
        let builder = esplora_client::Builder::new(url).timeout(timeout.as_secs());
        Self::with_builder(builder, url, network)
    }

    fn with_builder(builder: esplora_client::Builder, url: &str, network: NetworkType) -> Self {
        Self {
            fetcher: EsploraFetcher {
                client: BlockingClient::from_builder(builder),
            },
            network,
            url: url.to_string(),
            index: Arc::new(ColorIndex::new()),
        }
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the current blockchain tip height
    pub async fn get_height(&self) -> Result<u32, ChainError> {
        self.fetcher
            .call(|client| client.get_height())
            .await
            .map_err(request_error)
    }

    /// Every transaction touching `address`, following Esplora's paging
    async fn history(&self, address: &Address) -> Result<Vec<esplora_client::Tx>, ChainError> {
        let script = address.script_pubkey();
        let mut all: Vec<esplora_client::Tx> = Vec::new();
        let mut last_seen: Option<Txid> = None;

        loop {
            let page_script = script.clone();
            let cursor = last_seen;
            let page = self
                .fetcher
                .call(move |client| client.scripthash_txs(&page_script, cursor))
                .await
                .map_err(request_error)?;

            let confirmed = page.iter().filter(|tx| tx.status.confirmed).count();
            last_seen = page.iter().filter(|tx| tx.status.confirmed).last().map(|tx| tx.txid);
            all.extend(page);

            if confirmed < CONFIRMED_PAGE_SIZE || last_seen.is_none() {
                break;
            }
        }

        // Esplora lists newest first
        all.reverse();
        let mut seen = HashSet::new();
        all.retain(|tx| seen.insert(tx.txid));
        Ok(all)
    }

    async fn colored(
        &self,
        outpoint: OutPoint,
        txout: &bitcoin::TxOut,
        confirmed: bool,
    ) -> Result<ColoredUtxo, ChainError> {
        let assets = self.index.outpoint_colors(&self.fetcher, &outpoint).await?;
        Ok(ColoredUtxo {
            outpoint,
            value: txout.value.to_sat(),
            script_pubkey: txout.script_pubkey.clone(),
            address: Address::from_script(&txout.script_pubkey, self.network.to_bitcoin())
                .ok()
                .map(|a| a.to_string()),
            assets,
            confirmed,
        })
    }
}

#[async_trait]
impl ChainSource for EsploraChain {
    async fn select_unspent(
        &self,
        selector: &UtxoSelector,
        asset: Option<&AssetId>,
    ) -> Result<Vec<ColoredUtxo>, ChainError> {
        let mut utxos = Vec::new();

        match selector {
            UtxoSelector::Address(address) => {
                let history = self.history(address).await?;
                let script = address.script_pubkey();
                let spent: HashSet<OutPoint> = history
                    .iter()
                    .flat_map(|tx| tx.vin.iter())
                    .map(|vin| OutPoint {
                        txid: vin.txid,
                        vout: vin.vout,
                    })
                    .collect();

                for entry in &history {
                    let tx = entry.to_tx();
                    for (vout, txout) in tx.output.iter().enumerate() {
                        let outpoint = OutPoint {
                            txid: entry.txid,
                            vout: vout as u32,
                        };
                        if txout.script_pubkey != script || spent.contains(&outpoint) {
                            continue;
                        }
                        utxos.push(self.colored(outpoint, txout, entry.status.confirmed).await?);
                    }
                }
            }
            UtxoSelector::Outpoint(outpoint) => {
                let op = *outpoint;
                let tx = self
                    .fetcher
                    .call(move |client| client.get_tx(&op.txid))
                    .await
                    .map_err(request_error)?;
                let status = self
                    .fetcher
                    .call(move |client| client.get_output_status(&op.txid, op.vout as u64))
                    .await
                    .map_err(request_error)?;

                if let (Some(tx), Some(status)) = (tx, status) {
                    if let Some(txout) = tx.output.get(op.vout as usize) {
                        if !status.spent && !txout.script_pubkey.is_op_return() {
                            let confirmed = status
                                .status
                                .map(|s| s.confirmed)
                                .unwrap_or(false);
                            utxos.push(self.colored(op, txout, confirmed).await?);
                        }
                    }
                }
            }
        }

        if let Some(id) = asset {
            utxos.retain(|u| u.assets.iter().any(|a| &a.asset_id == id));
        }
        log::debug!("Selected {} unspent outputs for {:?}", utxos.len(), selector);
        Ok(utxos)
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        self.fetcher.raw_transaction(txid).await
    }

    async fn address_transactions(
        &self,
        address: &Address,
    ) -> Result<Vec<ChainTransaction>, ChainError> {
        Ok(self
            .history(address)
            .await?
            .into_iter()
            .map(|entry| ChainTransaction {
                tx: entry.to_tx(),
                block_height: entry.status.block_height,
            })
            .collect())
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError> {
        let txid = tx.compute_txid();
        let owned = tx.clone();
        self.fetcher
            .call(move |client| client.broadcast(&owned))
            .await
            .map_err(classify_broadcast)?;
        log::info!("Broadcast transaction {} to {}", txid, self.url);
        Ok(txid)
    }
}

impl std::fmt::Debug for EsploraChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsploraChain")
            .field("network", &self.network)
            .field("url", &self.url)
            .finish()
    }
}
