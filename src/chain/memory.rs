//! In-process chain
//!
//! A minimal UTXO ledger that accepts broadcasts, colors outputs with the
//! color transfer rules and publishes every accepted transaction to an
//! [`EventFeed`]. Scripts are not interpreted; inputs only need to exist,
//! be unspent and carry a witness.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::script::PushBytesBuf;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};

use super::{BroadcastError, ChainError, ChainSource, ChainTransaction, ColoredUtxo, UtxoSelector};
use crate::coloring::{transfer_colors, AssetAmount, AssetId};
use crate::events::memory::EventFeed;
use crate::events::RawTransactionEvent;

struct StoredTx {
    tx: Transaction,
    block_height: Option<u32>,
}

struct UtxoEntry {
    outpoint: OutPoint,
    txout: TxOut,
    assets: Vec<AssetAmount>,
    confirmed: bool,
}

#[derive(Default)]
struct ChainState {
    transactions: HashMap<Txid, StoredTx>,
    /// Txids in acceptance order
    order: Vec<Txid>,
    /// Unspent outputs in acceptance order
    unspent: Vec<UtxoEntry>,
    height: u32,
    funding_counter: u32,
    pending_failures: VecDeque<BroadcastError>,
    broadcast_attempts: usize,
}

/// In-memory chain source
pub struct MemoryChain {
    network: Network,
    state: Mutex<ChainState>,
    feed: EventFeed,
}

impl MemoryChain {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(ChainState {
                height: 1,
                ..Default::default()
            }),
            feed: EventFeed::new(),
        }
    }

    /// Feed carrying an event for every accepted transaction
    pub fn feed(&self) -> EventFeed {
        self.feed.clone()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Credit `sats` to `address` with a confirmed, uncolored output
    pub fn fund(&self, address: &Address, sats: u64) -> OutPoint {
        let tx = {
            let mut state = self.state();
            state.funding_counter += 1;

            let mut tag = PushBytesBuf::new();
            // Distinct script_sig per funding keeps txids unique
            let _ = tag.extend_from_slice(&state.funding_counter.to_le_bytes());

            let tx = Transaction {
                version: Version::TWO,
                lock_time: LockTime::ZERO,
                input: vec![TxIn {
                    previous_output: OutPoint::null(),
                    script_sig: ScriptBuf::builder().push_slice(tag).into_script(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                }],
                output: vec![TxOut {
                    value: Amount::from_sat(sats),
                    script_pubkey: address.script_pubkey(),
                }],
            };

            let height = state.height;
            let txid = tx.compute_txid();
            state.unspent.push(UtxoEntry {
                outpoint: OutPoint { txid, vout: 0 },
                txout: tx.output[0].clone(),
                assets: Vec::new(),
                confirmed: true,
            });
            state.transactions.insert(
                txid,
                StoredTx {
                    tx: tx.clone(),
                    block_height: Some(height),
                },
            );
            state.order.push(txid);
            tx
        };

        log::debug!("Funded {} with {} sats in {}", address, sats, tx.compute_txid());
        self.feed.publish(self.event_for(&tx, &[]));
        OutPoint {
            txid: tx.compute_txid(),
            vout: 0,
        }
    }

    /// Confirm every pending transaction in a new block
    pub fn mine(&self) -> u32 {
        let mut state = self.state();
        state.height += 1;
        let height = state.height;
        for stored in state.transactions.values_mut() {
            if stored.block_height.is_none() {
                stored.block_height = Some(height);
            }
        }
        for entry in state.unspent.iter_mut() {
            entry.confirmed = true;
        }
        height
    }

    /// Make the next broadcast fail with `error` before any validation
    pub fn inject_broadcast_failure(&self, error: BroadcastError) {
        self.state().pending_failures.push_back(error);
    }

    /// Number of broadcast calls received so far
    pub fn broadcast_attempts(&self) -> usize {
        self.state().broadcast_attempts
    }

    pub fn height(&self) -> u32 {
        self.state().height
    }

    fn address_of(&self, script: &bitcoin::Script) -> Option<String> {
        Address::from_script(script, self.network)
            .ok()
            .map(|a| a.to_string())
    }

    fn event_for(&self, tx: &Transaction, spent: &[TxOut]) -> RawTransactionEvent {
        let mut addresses: Vec<String> = Vec::new();
        for script in tx
            .output
            .iter()
            .chain(spent.iter())
            .map(|o| o.script_pubkey.as_script())
        {
            if let Some(address) = self.address_of(script) {
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }
        RawTransactionEvent {
            txid: tx.compute_txid().to_string(),
            hex: Some(serialize_hex(tx)),
            addresses,
        }
    }

    fn to_colored(&self, entry: &UtxoEntry) -> ColoredUtxo {
        ColoredUtxo {
            outpoint: entry.outpoint,
            value: entry.txout.value.to_sat(),
            script_pubkey: entry.txout.script_pubkey.clone(),
            address: self.address_of(&entry.txout.script_pubkey),
            assets: entry.assets.clone(),
            confirmed: entry.confirmed,
        }
    }

    fn accept(&self, tx: &Transaction) -> Result<(Txid, Vec<TxOut>), BroadcastError> {
        let mut state = self.state();
        state.broadcast_attempts += 1;

        if let Some(failure) = state.pending_failures.pop_front() {
            return Err(failure);
        }

        let txid = tx.compute_txid();
        if state.transactions.contains_key(&txid) {
            return Err(BroadcastError::Rejected(format!(
                "transaction {} already known",
                txid
            )));
        }
        if tx.input.is_empty() || tx.output.is_empty() {
            return Err(BroadcastError::Rejected(
                "transaction has no inputs or no outputs".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut spent_indexes = Vec::with_capacity(tx.input.len());
        for (i, input) in tx.input.iter().enumerate() {
            if !seen.insert(input.previous_output) {
                return Err(BroadcastError::Rejected(format!(
                    "duplicate input {}",
                    input.previous_output
                )));
            }
            let index = state
                .unspent
                .iter()
                .position(|e| e.outpoint == input.previous_output)
                .ok_or_else(|| {
                    BroadcastError::Rejected(format!(
                        "missing or spent input {}",
                        input.previous_output
                    ))
                })?;
            if input.witness.is_empty() {
                return Err(BroadcastError::Rejected(format!("input {} is not signed", i)));
            }
            spent_indexes.push(index);
        }

        let value_in: u64 = spent_indexes
            .iter()
            .map(|i| state.unspent[*i].txout.value.to_sat())
            .sum();
        let value_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        if value_out > value_in {
            return Err(BroadcastError::Rejected(format!(
                "outputs ({} sats) exceed inputs ({} sats)",
                value_out, value_in
            )));
        }

        let input_colors: Vec<Vec<AssetAmount>> = spent_indexes
            .iter()
            .map(|i| state.unspent[*i].assets.clone())
            .collect();
        let spent: Vec<TxOut> = spent_indexes
            .iter()
            .map(|i| state.unspent[*i].txout.clone())
            .collect();
        let output_colors = transfer_colors(tx, &input_colors);

        state
            .unspent
            .retain(|e| !tx.input.iter().any(|i| i.previous_output == e.outpoint));
        for (vout, (txout, assets)) in tx.output.iter().zip(output_colors).enumerate() {
            if txout.script_pubkey.is_op_return() {
                continue;
            }
            state.unspent.push(UtxoEntry {
                outpoint: OutPoint {
                    txid,
                    vout: vout as u32,
                },
                txout: txout.clone(),
                assets,
                confirmed: false,
            });
        }

        state.transactions.insert(
            txid,
            StoredTx {
                tx: tx.clone(),
                block_height: None,
            },
        );
        state.order.push(txid);

        Ok((txid, spent))
    }
}

#[async_trait]
impl ChainSource for MemoryChain {
    async fn select_unspent(
        &self,
        selector: &UtxoSelector,
        asset: Option<&AssetId>,
    ) -> Result<Vec<ColoredUtxo>, ChainError> {
        let state = self.state();
        let matches = |entry: &&UtxoEntry| match selector {
            UtxoSelector::Address(address) => entry.txout.script_pubkey == address.script_pubkey(),
            UtxoSelector::Outpoint(outpoint) => &entry.outpoint == outpoint,
        };

        Ok(state
            .unspent
            .iter()
            .filter(matches)
            .filter(|entry| match asset {
                Some(id) => entry.assets.iter().any(|a| &a.asset_id == id),
                None => true,
            })
            .map(|entry| self.to_colored(entry))
            .collect())
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        self.state()
            .transactions
            .get(txid)
            .map(|stored| stored.tx.clone())
            .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))
    }

    async fn address_transactions(
        &self,
        address: &Address,
    ) -> Result<Vec<ChainTransaction>, ChainError> {
        let state = self.state();
        let script = address.script_pubkey();

        let pays_to = |tx: &Transaction| tx.output.iter().any(|o| o.script_pubkey == script);
        let spends_from = |tx: &Transaction| {
            tx.input.iter().any(|input| {
                state
                    .transactions
                    .get(&input.previous_output.txid)
                    .and_then(|parent| parent.tx.output.get(input.previous_output.vout as usize))
                    .map(|prev| prev.script_pubkey == script)
                    .unwrap_or(false)
            })
        };

        Ok(state
            .order
            .iter()
            .filter_map(|txid| state.transactions.get(txid))
            .filter(|stored| pays_to(&stored.tx) || spends_from(&stored.tx))
            .map(|stored| ChainTransaction {
                tx: stored.tx.clone(),
                block_height: stored.block_height,
            })
            .collect())
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError> {
        let (txid, spent) = self.accept(tx)?;
        log::info!("Accepted transaction {}", txid);
        self.feed.publish(self.event_for(tx, &spent));
        Ok(txid)
    }
}
