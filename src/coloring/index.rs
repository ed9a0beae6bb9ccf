//! Output color index
//!
//! Resolves the colors of arbitrary outputs by replaying the color transfer
//! rules over their ancestry. Results are memoized per transaction for the
//! lifetime of the index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::{OutPoint, Transaction, Txid};

use super::ledger::{transfer_colors, OutputColors};
use super::payload::Payload;
use super::AssetAmount;
use crate::chain::ChainError;

/// Anything that can hand out raw transactions by id
#[async_trait]
pub trait RawTransactionSource: Send + Sync {
    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError>;
}

#[derive(Debug, Default)]
pub struct ColorIndex {
    colors: Mutex<HashMap<Txid, Arc<OutputColors>>>,
}

impl ColorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output colors of a transaction computed elsewhere
    pub fn insert(&self, txid: Txid, colors: OutputColors) {
        if let Ok(mut map) = self.colors.lock() {
            map.insert(txid, Arc::new(colors));
        }
    }

    fn cached(&self, txid: &Txid) -> Option<Arc<OutputColors>> {
        self.colors.lock().ok()?.get(txid).cloned()
    }

    /// Colors of a single outpoint
    pub async fn outpoint_colors(
        &self,
        source: &dyn RawTransactionSource,
        outpoint: &OutPoint,
    ) -> Result<Vec<AssetAmount>, ChainError> {
        let colors = self.output_colors(source, &outpoint.txid).await?;
        Ok(colors
            .get(outpoint.vout as usize)
            .cloned()
            .unwrap_or_default())
    }

    /// Colors of every output of `txid`
    ///
    /// Walks the ancestry depth first without recursion, fetching each
    /// transaction at most once. The walk stops at transactions that carry
    /// no payload.
    pub async fn output_colors(
        &self,
        source: &dyn RawTransactionSource,
        txid: &Txid,
    ) -> Result<Arc<OutputColors>, ChainError> {
        if let Some(hit) = self.cached(txid) {
            return Ok(hit);
        }

        let mut fetched: HashMap<Txid, Transaction> = HashMap::new();
        let mut stack = vec![*txid];

        while let Some(current) = stack.last().copied() {
            if self.cached(&current).is_some() {
                stack.pop();
                continue;
            }

            if !fetched.contains_key(&current) {
                let tx = source.raw_transaction(&current).await?;
                fetched.insert(current, tx);
            }
            let tx = match fetched.get(&current) {
                Some(tx) => tx,
                None => return Err(ChainError::TxNotFound(current.to_string())),
            };

            // Without a readable payload every input color burns, so the
            // ancestry cannot matter
            if !matches!(Payload::find_in(tx), Some(Ok(_))) {
                self.insert(current, vec![Vec::new(); tx.output.len()]);
                stack.pop();
                continue;
            }

            let pending: Vec<Txid> = if tx.is_coinbase() {
                Vec::new()
            } else {
                tx.input
                    .iter()
                    .map(|input| input.previous_output)
                    .filter(|prev| !prev.is_null())
                    .map(|prev| prev.txid)
                    .filter(|parent| self.cached(parent).is_none())
                    .collect()
            };

            if !pending.is_empty() {
                log::debug!("Resolving {} parents of {}", pending.len(), current);
                stack.extend(pending);
                continue;
            }

            let input_colors: Vec<Vec<AssetAmount>> = if tx.is_coinbase() {
                Vec::new()
            } else {
                tx.input
                    .iter()
                    .map(|input| {
                        let prev = input.previous_output;
                        self.cached(&prev.txid)
                            .and_then(|colors| colors.get(prev.vout as usize).cloned())
                            .unwrap_or_default()
                    })
                    .collect()
            };

            let colors = transfer_colors(tx, &input_colors);
            self.insert(current, colors);
            stack.pop();
        }

        self.cached(txid)
            .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))
    }
}
