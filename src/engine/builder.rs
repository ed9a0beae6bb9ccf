//! Asset transaction builder
//!
//! Turns resolved plans into unsigned transaction skeletons. Output layout:
//!
//! ```text
//! colored outputs (request order) | colored change | OP_RETURN payload | BTC change
//! ```
//!
//! Every skeleton is replayed through the color transfer rules before it is
//! returned; a per-asset mismatch is reported as a conservation violation.

use std::collections::{HashMap, HashSet, VecDeque};

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use sha2::{Digest, Sha256};

use super::resolver::{IssuancePlan, TransferPlan};
use crate::chain::ColoredUtxo;
use crate::coloring::{
    apply_payload, color_runs, AssetAmount, AssetId, Instruction, LedgerError, MetadataRef,
    OutputColors, Payload, PayloadError,
};
use crate::metadata::IssuanceMetadata;
use crate::types::ReceivingAddress;

/// Value carried by every colored output
pub const COLORED_OUTPUT_VALUE: u64 = 600;
/// Smallest BTC change output worth creating
pub const DUST_LIMIT: u64 = 546;

const TX_OVERHEAD_VBYTES: f64 = 10.5;
const P2WPKH_INPUT_VBYTES: f64 = 68.0;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Insufficient {asset_id}: need {needed} units, have {available}")]
    InsufficientAsset {
        asset_id: AssetId,
        needed: u64,
        available: u64,
    },

    #[error("Color conservation violated: {0}")]
    ColorConservation(String),
}

impl From<PayloadError> for BuildError {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::TooLarge(_) | PayloadError::TooManyInstructions(_) => {
                BuildError::Validation(format!("too many outputs for one payload: {}", e))
            }
            other => BuildError::ColorConservation(other.to_string()),
        }
    }
}

/// Fee rate configuration
#[derive(Debug, Clone, Copy)]
pub struct FeeRateConfig {
    /// Fee rate in satoshis per virtual byte (sat/vB)
    pub sat_per_vb: f64,
}

impl FeeRateConfig {
    /// Create a new fee rate configuration
    pub fn new(sat_per_vb: f64) -> Result<Self, BuildError> {
        if !(sat_per_vb > 0.0) {
            return Err(BuildError::Validation(
                "Fee rate must be positive".to_string(),
            ));
        }

        Ok(Self { sat_per_vb })
    }

    /// Create a fee rate for low priority (1 sat/vB)
    pub fn low_priority() -> Self {
        Self { sat_per_vb: 1.0 }
    }

    /// Create a fee rate for medium priority (5 sat/vB)
    pub fn medium_priority() -> Self {
        Self { sat_per_vb: 5.0 }
    }

    /// Fee in satoshis for a transaction of `vsize` virtual bytes
    pub fn fee_for(&self, vsize: f64) -> u64 {
        (self.sat_per_vb * vsize).ceil() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkeletonKind {
    Issuance,
    Transfer,
}

/// Unsigned transaction plus everything needed to sign and report it
#[derive(Debug, Clone)]
pub struct UnsignedSkeleton {
    pub kind: SkeletonKind,
    pub tx: Transaction,
    /// Spent outputs, in input order
    pub prevouts: Vec<TxOut>,
    pub payload: Payload,
    pub payload_index: usize,
    /// Outputs carrying asset value
    pub colored_output_indexes: Vec<u32>,
    /// Colors of every output as computed by the transfer rules
    pub output_colors: OutputColors,
    pub fee: u64,
}

/// Issuance skeleton together with the derived asset identity
#[derive(Debug, Clone)]
pub struct IssuanceSkeleton {
    pub skeleton: UnsignedSkeleton,
    pub asset_id: AssetId,
    /// Outpoint the asset id is derived from
    pub issuance_utxo: OutPoint,
    pub issue_address: Address,
    pub receiving_addresses: Vec<ReceivingAddress>,
    pub metadata: Option<IssuanceMetadata>,
}

/// Builds issuance and transfer skeletons
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    fee_rate: FeeRateConfig,
}

impl TransactionBuilder {
    pub fn new(fee_rate: FeeRateConfig) -> Self {
        Self { fee_rate }
    }

    pub fn fee_rate(&self) -> FeeRateConfig {
        self.fee_rate
    }

    /// Build an issuance skeleton
    ///
    /// Recipients receive their units in request order; any remainder goes
    /// to the issue address. The asset id is derived from the first colored
    /// output of the finished transaction.
    pub fn build_issuance(&self, plan: &IssuancePlan) -> Result<IssuanceSkeleton, BuildError> {
        let request = &plan.request;
        request
            .validate()
            .map_err(|e| BuildError::Validation(e.to_string()))?;

        let mut outputs: Vec<TxOut> = Vec::new();
        let mut instructions: Vec<Instruction> = Vec::new();
        let mut receiving_addresses = Vec::new();

        let mut colored = |address: &Address, amount: u64| -> Result<(), BuildError> {
            let index = output_index(outputs.len())?;
            outputs.push(TxOut {
                value: Amount::from_sat(COLORED_OUTPUT_VALUE),
                script_pubkey: address.script_pubkey(),
            });
            instructions.push(Instruction {
                output: index,
                amount,
            });
            receiving_addresses.push(ReceivingAddress {
                address: address.to_string(),
                amount,
            });
            Ok(())
        };

        let mut assigned = 0u64;
        for (address, amount) in &plan.recipients {
            colored(address, *amount)?;
            assigned = assigned
                .checked_add(*amount)
                .filter(|total| *total <= request.amount)
                .ok_or_else(|| {
                    BuildError::Validation("recipients exceed the issued amount".to_string())
                })?;
        }
        let remainder = request.amount - assigned;
        if remainder > 0 {
            colored(&plan.issue_address, remainder)?;
        }

        let metadata = match &request.metadata {
            Some(m) => Some((m.clone(), m.canonical_bytes().map_err(validation)?)),
            None => None,
        };
        let payload = issuance_payload(
            request.amount,
            request.divisibility,
            request.reissueable,
            metadata.as_ref().map(|(_, bytes)| bytes.as_slice()),
            instructions,
        )?;

        let payload_index = outputs.len();
        outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: payload.to_script()?,
        });

        let mut tx = unsigned_tx(Vec::new(), outputs);
        let mut prevouts = Vec::new();
        let fee = self.fund(
            &mut tx,
            &mut prevouts,
            &plan.funding,
            plan.issue_address.script_pubkey(),
        )?;

        let issuance_utxo = OutPoint {
            txid: tx.compute_txid(),
            vout: 0,
        };
        let asset_id = AssetId::derive(
            &issuance_utxo.txid,
            issuance_utxo.vout,
            request.divisibility,
            request.reissueable,
        );

        let mut expected = HashMap::new();
        for (index, receiving) in receiving_addresses.iter().enumerate() {
            expected.insert((index, asset_id.clone()), receiving.amount);
        }
        let input_colors = vec![Vec::new(); tx.input.len()];
        let output_colors = verify_colors(&tx, payload_index, &payload, &input_colors, &expected)?;

        log::info!(
            "Built issuance of {} units of {} ({} outputs, fee {} sats)",
            request.amount,
            asset_id,
            tx.output.len(),
            fee
        );

        Ok(IssuanceSkeleton {
            skeleton: UnsignedSkeleton {
                kind: SkeletonKind::Issuance,
                colored_output_indexes: (0..receiving_addresses.len() as u32).collect(),
                tx,
                prevouts,
                payload,
                payload_index,
                output_colors,
                fee,
            },
            asset_id,
            issuance_utxo,
            issue_address: plan.issue_address.clone(),
            receiving_addresses,
            metadata: metadata.map(|(m, _)| m),
        })
    }

    /// Build a transfer skeleton
    ///
    /// Source colors are walked run by run and split greedily across the
    /// destinations of each asset in request order. Whatever the sources
    /// carry beyond the request, including assets not requested at all, goes
    /// to a single colored change output.
    pub fn build_transfer(&self, plan: &TransferPlan) -> Result<UnsignedSkeleton, BuildError> {
        if plan.outputs.is_empty() {
            return Err(BuildError::Validation("transfer has no outputs".to_string()));
        }
        if plan.outputs.iter().any(|o| o.amount == 0) {
            return Err(BuildError::Validation(
                "transfer amounts must be positive".to_string(),
            ));
        }

        let input_colors: Vec<Vec<AssetAmount>> =
            plan.sources.iter().map(|s| s.assets.clone()).collect();

        let overflow = |asset_id: &AssetId| {
            BuildError::Validation(format!("amounts of {} overflow", asset_id))
        };
        let mut available: HashMap<AssetId, u64> = HashMap::new();
        for asset in input_colors.iter().flatten() {
            let total = available.entry(asset.asset_id.clone()).or_default();
            *total = total
                .checked_add(asset.amount)
                .ok_or_else(|| overflow(&asset.asset_id))?;
        }
        let mut requested: Vec<(AssetId, u64)> = Vec::new();
        for output in &plan.outputs {
            match requested.iter_mut().find(|(id, _)| id == &output.asset_id) {
                Some((_, total)) => {
                    *total = total
                        .checked_add(output.amount)
                        .ok_or_else(|| overflow(&output.asset_id))?
                }
                None => requested.push((output.asset_id.clone(), output.amount)),
            }
        }
        for (asset_id, needed) in &requested {
            let have = available.get(asset_id).copied().unwrap_or(0);
            if have < *needed {
                return Err(BuildError::InsufficientAsset {
                    asset_id: asset_id.clone(),
                    needed: *needed,
                    available: have,
                });
            }
        }

        let mut outputs: Vec<TxOut> = Vec::new();
        let mut queues: HashMap<AssetId, VecDeque<(u8, u64)>> = HashMap::new();
        let mut expected: HashMap<(usize, AssetId), u64> = HashMap::new();

        for output in &plan.outputs {
            let index = output_index(outputs.len())?;
            outputs.push(TxOut {
                value: Amount::from_sat(COLORED_OUTPUT_VALUE),
                script_pubkey: output.address.script_pubkey(),
            });
            queues
                .entry(output.asset_id.clone())
                .or_default()
                .push_back((index, output.amount));
            expected.insert((index as usize, output.asset_id.clone()), output.amount);
        }

        let mut remainders: Vec<(AssetId, u64)> = Vec::new();
        for run in color_runs(&input_colors).map_err(ledger_error)? {
            if remainders.iter().all(|(id, _)| id != &run.asset_id) {
                let wanted = requested
                    .iter()
                    .find(|(id, _)| id == &run.asset_id)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                let have = available.get(&run.asset_id).copied().unwrap_or(0);
                remainders.push((run.asset_id.clone(), have - wanted));
            }
        }
        remainders.retain(|(_, left)| *left > 0);

        let mut colored_output_indexes: Vec<u32> = (0..outputs.len() as u32).collect();
        if !remainders.is_empty() {
            let change = output_index(outputs.len())?;
            outputs.push(TxOut {
                value: Amount::from_sat(COLORED_OUTPUT_VALUE),
                script_pubkey: plan.change_address.script_pubkey(),
            });
            colored_output_indexes.push(change as u32);
            for (asset_id, left) in &remainders {
                queues
                    .entry(asset_id.clone())
                    .or_default()
                    .push_back((change, *left));
                expected.insert((change as usize, asset_id.clone()), *left);
            }
        }

        let instructions = allocate(&input_colors, &mut queues)?;
        let payload = Payload::Transfer { instructions };

        let payload_index = outputs.len();
        outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: payload.to_script()?,
        });

        let inputs: Vec<TxIn> = plan.sources.iter().map(|s| input(s.outpoint)).collect();
        let mut prevouts: Vec<TxOut> = plan.sources.iter().map(prevout).collect();
        let mut tx = unsigned_tx(inputs, outputs);
        let fee = self.fund(
            &mut tx,
            &mut prevouts,
            &plan.fee_candidates,
            plan.change_address.script_pubkey(),
        )?;

        // Funding inputs are uncolored
        let mut all_input_colors = input_colors;
        all_input_colors.resize(tx.input.len(), Vec::new());
        let output_colors =
            verify_colors(&tx, payload_index, &payload, &all_input_colors, &expected)?;

        log::info!(
            "Built transfer to {} outputs ({} inputs, fee {} sats)",
            plan.outputs.len(),
            tx.input.len(),
            fee
        );

        Ok(UnsignedSkeleton {
            kind: SkeletonKind::Transfer,
            tx,
            prevouts,
            payload,
            payload_index,
            colored_output_indexes,
            output_colors,
            fee,
        })
    }

    /// Add uncolored inputs until outputs and fee are covered, then add BTC
    /// change when it clears the dust limit. Returns the fee paid.
    fn fund(
        &self,
        tx: &mut Transaction,
        prevouts: &mut Vec<TxOut>,
        candidates: &[ColoredUtxo],
        change_script: ScriptBuf,
    ) -> Result<u64, BuildError> {
        let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        let spent: HashSet<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        let mut candidates = candidates
            .iter()
            .filter(|c| !c.is_colored() && !spent.contains(&c.outpoint));

        loop {
            let input_total: u64 = prevouts.iter().map(|p| p.value.to_sat()).sum();
            let fee = self.fee_rate.fee_for(estimate_vsize(tx.input.len(), &tx.output));

            if !tx.input.is_empty() && input_total >= output_total + fee {
                let change = TxOut {
                    value: Amount::ZERO,
                    script_pubkey: change_script.clone(),
                };
                let mut with_change = tx.output.clone();
                with_change.push(change.clone());
                let fee_with_change = self
                    .fee_rate
                    .fee_for(estimate_vsize(tx.input.len(), &with_change));

                if input_total >= output_total + fee_with_change + DUST_LIMIT {
                    tx.output.push(TxOut {
                        value: Amount::from_sat(input_total - output_total - fee_with_change),
                        ..change
                    });
                    return Ok(fee_with_change);
                }
                return Ok(input_total - output_total);
            }

            match candidates.next() {
                Some(utxo) => {
                    log::debug!("Funding with {} ({} sats)", utxo.outpoint, utxo.value);
                    tx.input.push(input(utxo.outpoint));
                    prevouts.push(prevout(utxo));
                }
                None => {
                    return Err(BuildError::InsufficientFunds {
                        needed: output_total + fee,
                        available: input_total,
                    })
                }
            }
        }
    }
}

/// Issuance payload, inlining metadata when it fits and committing to it
/// otherwise
fn issuance_payload(
    amount: u64,
    divisibility: u8,
    reissueable: bool,
    metadata: Option<&[u8]>,
    instructions: Vec<Instruction>,
) -> Result<Payload, BuildError> {
    let with = |metadata: MetadataRef| Payload::Issuance {
        amount,
        divisibility,
        reissueable,
        metadata,
        instructions: instructions.clone(),
    };

    let Some(bytes) = metadata else {
        let payload = with(MetadataRef::None);
        payload.encode()?;
        return Ok(payload);
    };

    let inline = with(MetadataRef::Inline(bytes.to_vec()));
    if inline.encode().is_ok() {
        return Ok(inline);
    }

    let committed = with(MetadataRef::Commitment(Sha256::digest(bytes).into()));
    committed.encode()?;
    Ok(committed)
}

fn ledger_error(e: LedgerError) -> BuildError {
    BuildError::ColorConservation(e.to_string())
}

/// Walk input runs against per-asset allocation queues
fn allocate(
    input_colors: &[Vec<AssetAmount>],
    queues: &mut HashMap<AssetId, VecDeque<(u8, u64)>>,
) -> Result<Vec<Instruction>, BuildError> {
    let mut instructions = Vec::new();

    for run in color_runs(input_colors).map_err(ledger_error)? {
        let queue = queues.get_mut(&run.asset_id).ok_or_else(|| {
            BuildError::ColorConservation(format!("no destination for {}", run.asset_id))
        })?;

        let mut left = run.amount;
        while left > 0 {
            let (output, wanted) = queue.front_mut().ok_or_else(|| {
                BuildError::ColorConservation(format!(
                    "{} units of {} left unallocated",
                    left, run.asset_id
                ))
            })?;
            let take = left.min(*wanted);
            instructions.push(Instruction {
                output: *output,
                amount: take,
            });
            *wanted -= take;
            left -= take;
            if *wanted == 0 {
                queue.pop_front();
            }
        }
    }

    if let Some((asset_id, queue)) = queues.iter().find(|(_, q)| !q.is_empty()) {
        return Err(BuildError::ColorConservation(format!(
            "{} allocations of {} left unfunded",
            queue.len(),
            asset_id
        )));
    }
    Ok(instructions)
}

/// Replay the transfer rules over `tx` and compare with the intended colors
fn verify_colors(
    tx: &Transaction,
    payload_index: usize,
    payload: &Payload,
    input_colors: &[Vec<AssetAmount>],
    expected: &HashMap<(usize, AssetId), u64>,
) -> Result<OutputColors, BuildError> {
    let colors =
        apply_payload(tx, payload_index, payload, input_colors).map_err(ledger_error)?;

    let mut seen = 0usize;
    for (index, assets) in colors.iter().enumerate() {
        for asset in assets {
            let want = expected.get(&(index, asset.asset_id.clone())).copied();
            if want != Some(asset.amount) {
                return Err(BuildError::ColorConservation(format!(
                    "output {} carries {} {} but {:?} was intended",
                    index, asset.amount, asset.asset_id, want
                )));
            }
            seen += 1;
        }
    }
    if seen != expected.len() {
        return Err(BuildError::ColorConservation(format!(
            "{} of {} intended colored outputs were produced",
            seen,
            expected.len()
        )));
    }

    let mut totals_in: HashMap<&AssetId, u64> = HashMap::new();
    for asset in input_colors.iter().flatten() {
        *totals_in.entry(&asset.asset_id).or_default() += asset.amount;
    }
    for (asset_id, total) in totals_in {
        let out: u64 = colors
            .iter()
            .flatten()
            .filter(|a| &a.asset_id == asset_id)
            .map(|a| a.amount)
            .sum();
        if out != total {
            return Err(BuildError::ColorConservation(format!(
                "{} in {} units, out {} units",
                asset_id, total, out
            )));
        }
    }

    Ok(colors)
}

fn validation(e: impl std::fmt::Display) -> BuildError {
    BuildError::Validation(e.to_string())
}

fn output_index(len: usize) -> Result<u8, BuildError> {
    u8::try_from(len)
        .map_err(|_| BuildError::Validation(format!("too many colored outputs: {}", len + 1)))
}

fn input(outpoint: OutPoint) -> TxIn {
    TxIn {
        previous_output: outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::new(),
    }
}

fn prevout(utxo: &ColoredUtxo) -> TxOut {
    TxOut {
        value: Amount::from_sat(utxo.value),
        script_pubkey: utxo.script_pubkey.clone(),
    }
}

fn unsigned_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

/// Virtual size of a transaction with `inputs` P2WPKH inputs
pub fn estimate_vsize(inputs: usize, outputs: &[TxOut]) -> f64 {
    let outputs_size: usize = outputs
        .iter()
        .map(|o| 8 + bitcoin::VarInt(o.script_pubkey.len() as u64).size() + o.script_pubkey.len())
        .sum();
    TX_OVERHEAD_VBYTES + P2WPKH_INPUT_VBYTES * inputs as f64 + outputs_size as f64
}
