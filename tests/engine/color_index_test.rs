//! Color index tests
//!
//! Replays transaction ancestry from the in-process chain and checks the
//! resolved colors against what the chain itself tracked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use colored_asset_wallet::chain::{ChainError, ChainSource, MemoryChain, UtxoSelector};
use colored_asset_wallet::coloring::{ColorIndex, Instruction, Payload, RawTransactionSource};

use crate::common::{send_from_utxo, TestEnv};

/// Raw transaction source over the in-process chain that counts lookups
struct CountingSource {
    chain: Arc<MemoryChain>,
    lookups: AtomicUsize,
}

#[async_trait]
impl RawTransactionSource for CountingSource {
    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.chain.get_transaction(txid).await
    }
}

/// Raw transaction source over a fixed set of transactions
#[derive(Default)]
struct MapSource {
    transactions: HashMap<Txid, Transaction>,
    lookups: AtomicUsize,
}

impl MapSource {
    fn add(&mut self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        self.transactions.insert(txid, tx);
        txid
    }
}

#[async_trait]
impl RawTransactionSource for MapSource {
    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))
    }
}

fn spend(previous_output: OutPoint, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output,
    }
}

fn plain_output(sats: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
    }
}

/// Coinbase-rooted chain of `length` payload-less transactions, returns the tip
fn plain_chain(source: &mut MapSource, length: usize) -> Txid {
    let mut tip = source.add(spend(OutPoint::null(), vec![plain_output(50_000)]));
    for i in 1..length {
        tip = source.add(spend(
            OutPoint { txid: tip, vout: 0 },
            vec![plain_output(50_000 - i as u64)],
        ));
    }
    tip
}

#[tokio::test]
async fn test_index_replays_issuance_and_transfer() {
    let env = TestEnv::funded(100_000);
    let issued = env.issue(1_000).await;
    let sent = env
        .client
        .send_asset(&send_from_utxo(
            &issued.issuance_utxo,
            issued.asset_id.as_str(),
            250,
            &env.peer_address(0),
        ))
        .await
        .expect("Transfer should succeed");

    let source = CountingSource {
        chain: env.chain.clone(),
        lookups: AtomicUsize::new(0),
    };
    let index = ColorIndex::new();
    let txid: Txid = sent.txid.parse().expect("valid txid");

    let recipient = index
        .outpoint_colors(&source, &OutPoint { txid, vout: 0 })
        .await
        .expect("Failed to resolve colors");
    let change = index
        .outpoint_colors(&source, &OutPoint { txid, vout: 1 })
        .await
        .expect("Failed to resolve colors");

    assert_eq!(recipient.len(), 1);
    assert_eq!(recipient[0].asset_id, issued.asset_id);
    assert_eq!(recipient[0].amount, 250);
    assert_eq!(change[0].amount, 750);
    assert_eq!(
        source.lookups.load(Ordering::SeqCst),
        3,
        "Transfer, issuance and funding are each fetched once"
    );

    let tracked = env
        .chain
        .select_unspent(&UtxoSelector::Outpoint(OutPoint { txid, vout: 0 }), None)
        .await
        .expect("Failed to select");
    assert_eq!(tracked[0].assets, recipient, "Index agrees with the chain");
}

#[tokio::test]
async fn test_uncolored_outputs_resolve_empty() {
    let env = TestEnv::new();
    let funding = env.fund(0, 10_000);
    let source = CountingSource {
        chain: env.chain.clone(),
        lookups: AtomicUsize::new(0),
    };
    let index = ColorIndex::new();

    let colors = index
        .outpoint_colors(&source, &funding)
        .await
        .expect("Failed to resolve colors");
    assert!(colors.is_empty());

    let missing = OutPoint {
        txid: funding.txid,
        vout: 7,
    };
    let colors = index
        .outpoint_colors(&source, &missing)
        .await
        .expect("Cached transaction should answer");
    assert!(colors.is_empty());
    assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_walk_stops_at_transactions_without_payload() {
    let mut source = MapSource::default();
    let tip = plain_chain(&mut source, 500);
    let index = ColorIndex::new();

    let colors = index
        .outpoint_colors(&source, &OutPoint { txid: tip, vout: 0 })
        .await
        .expect("Failed to resolve colors");

    assert!(colors.is_empty());
    assert_eq!(
        source.lookups.load(Ordering::SeqCst),
        1,
        "Ancestors of a payload-less transaction are never fetched"
    );
}

#[tokio::test]
async fn test_transfer_over_plain_history_fetches_one_parent() {
    let mut source = MapSource::default();
    let parent = plain_chain(&mut source, 200);
    let payload = Payload::Transfer {
        instructions: vec![Instruction {
            output: 0,
            amount: 1,
        }],
    };
    let transfer = spend(
        OutPoint {
            txid: parent,
            vout: 0,
        },
        vec![
            plain_output(600),
            TxOut {
                value: Amount::ZERO,
                script_pubkey: payload.to_script().expect("Payload should encode"),
            },
        ],
    );
    let tip = source.add(transfer);
    let index = ColorIndex::new();

    let colors = index
        .output_colors(&source, &tip)
        .await
        .expect("Failed to resolve colors");

    assert!(
        colors.iter().all(|c| c.is_empty()),
        "Uncolored inputs cannot fund the instruction"
    );
    assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
}
