//! Color transfer rules
//!
//! Maps the colors carried by a transaction's inputs, together with its
//! payload, onto its outputs. Input colors form a FIFO queue of runs; each
//! transfer instruction takes from the head run. Whatever is left over lands
//! on the last output that is not an `OP_RETURN`. Invalid payloads burn every
//! input color.

use std::collections::VecDeque;

use bitcoin::Transaction;

use super::asset_id::{AssetId, LockStatus, MAX_DIVISIBILITY};
use super::payload::{Instruction, Payload};
use super::AssetAmount;

/// Colors of each output of a transaction, indexed by vout
pub type OutputColors = Vec<Vec<AssetAmount>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Instruction targets output {output} but the transaction has {outputs} outputs")]
    OutputOutOfRange { output: u8, outputs: usize },

    #[error("Instruction targets the payload output {0}")]
    PayloadOutput(u8),

    #[error("Instruction amount {requested} exceeds the {available} units left in the current run")]
    RunOverflow { requested: u64, available: u64 },

    #[error("Instructions assign {assigned} units but only {issued} were issued")]
    IssuanceOverflow { assigned: u64, issued: u64 },

    #[error("Divisibility {0} exceeds the maximum")]
    Divisibility(u8),

    #[error("Issuance has nowhere to place its units")]
    NoIssuanceOutput,

    #[error("Units of {0} overflow")]
    AmountOverflow(AssetId),
}

/// Flatten per-input colors into a queue of runs, merging adjacent runs of
/// the same asset
pub fn color_runs(input_colors: &[Vec<AssetAmount>]) -> Result<VecDeque<AssetAmount>, LedgerError> {
    let mut runs: VecDeque<AssetAmount> = VecDeque::new();
    for asset in input_colors.iter().flatten() {
        if asset.amount == 0 {
            continue;
        }
        match runs.back_mut() {
            Some(last) if last.asset_id == asset.asset_id => {
                last.amount = last
                    .amount
                    .checked_add(asset.amount)
                    .ok_or_else(|| LedgerError::AmountOverflow(asset.asset_id.clone()))?;
            }
            _ => runs.push_back(asset.clone()),
        }
    }
    Ok(runs)
}

/// Index of the output that receives leftover colors
pub fn leftover_output(tx: &Transaction, payload_index: Option<usize>) -> Option<usize> {
    tx.output
        .iter()
        .enumerate()
        .rev()
        .find(|(index, output)| {
            Some(*index) != payload_index && !output.script_pubkey.is_op_return()
        })
        .map(|(index, _)| index)
}

/// Output whose outpoint identifies the asset created by an issuance
pub fn issuance_output(
    tx: &Transaction,
    payload_index: usize,
    instructions: &[Instruction],
) -> Option<usize> {
    match instructions.first() {
        Some(instruction) => Some(instruction.output as usize),
        None => leftover_output(tx, Some(payload_index)),
    }
}

/// Apply a decoded payload to a transaction
///
/// `input_colors` holds the colors of each spent outpoint, in input order.
/// Fails when the payload is invalid for this transaction; callers then treat
/// every input color as burned.
pub fn apply_payload(
    tx: &Transaction,
    payload_index: usize,
    payload: &Payload,
    input_colors: &[Vec<AssetAmount>],
) -> Result<OutputColors, LedgerError> {
    let mut outputs: OutputColors = vec![Vec::new(); tx.output.len()];

    if let Payload::Issuance {
        amount,
        divisibility,
        reissueable,
        instructions,
        ..
    } = payload
    {
        if *divisibility > MAX_DIVISIBILITY {
            return Err(LedgerError::Divisibility(*divisibility));
        }
        let genesis = issuance_output(tx, payload_index, instructions)
            .ok_or(LedgerError::NoIssuanceOutput)?;
        let asset_id = AssetId::derive(&tx.compute_txid(), genesis as u32, *divisibility, *reissueable);
        let issued = AssetAmount {
            asset_id,
            amount: 0,
            divisibility: *divisibility,
            lock_status: LockStatus::from_reissueable(*reissueable),
        };

        let mut assigned: u64 = 0;
        for instruction in instructions {
            let output = check_target(tx, payload_index, instruction)?;
            assigned = assigned.saturating_add(instruction.amount);
            if assigned > *amount {
                return Err(LedgerError::IssuanceOverflow {
                    assigned,
                    issued: *amount,
                });
            }
            credit(&mut outputs[output], &issued, instruction.amount)?;
        }

        let remainder = amount - assigned;
        if remainder > 0 {
            let last = leftover_output(tx, Some(payload_index))
                .ok_or(LedgerError::NoIssuanceOutput)?;
            credit(&mut outputs[last], &issued, remainder)?;
        }

        place_leftovers(tx, Some(payload_index), color_runs(input_colors)?, &mut outputs)?;
        return Ok(outputs);
    }

    let mut runs = color_runs(input_colors)?;
    for instruction in payload.instructions() {
        let output = check_target(tx, payload_index, instruction)?;
        let head = runs.front_mut().ok_or(LedgerError::RunOverflow {
            requested: instruction.amount,
            available: 0,
        })?;
        if instruction.amount > head.amount {
            return Err(LedgerError::RunOverflow {
                requested: instruction.amount,
                available: head.amount,
            });
        }

        credit(&mut outputs[output], head, instruction.amount)?;
        head.amount -= instruction.amount;
        if head.amount == 0 {
            runs.pop_front();
        }
    }

    place_leftovers(tx, Some(payload_index), runs, &mut outputs)?;
    Ok(outputs)
}

/// Colors of every output of `tx`, given the colors of its inputs
///
/// Transactions without a payload, or with an invalid one, burn their input
/// colors.
pub fn transfer_colors(tx: &Transaction, input_colors: &[Vec<AssetAmount>]) -> OutputColors {
    let burned = || vec![Vec::new(); tx.output.len()];
    let carried = input_colors
        .iter()
        .flatten()
        .fold(0u64, |acc, a| acc.saturating_add(a.amount));

    match Payload::find_in(tx) {
        None => {
            if carried > 0 {
                log::warn!(
                    "Transaction {} spends {} colored units without a payload, burning",
                    tx.compute_txid(),
                    carried
                );
            }
            burned()
        }
        Some(Err(e)) => {
            log::warn!("Transaction {} has an unreadable payload: {}", tx.compute_txid(), e);
            burned()
        }
        Some(Ok((index, payload))) => match apply_payload(tx, index, &payload, input_colors) {
            Ok(outputs) => outputs,
            Err(e) => {
                log::warn!("Transaction {} has an invalid payload: {}", tx.compute_txid(), e);
                burned()
            }
        },
    }
}

/// Total units of `asset_id` across a set of colors
pub fn total_of<'a>(colors: impl IntoIterator<Item = &'a AssetAmount>, asset_id: &AssetId) -> u64 {
    colors
        .into_iter()
        .filter(|a| &a.asset_id == asset_id)
        .map(|a| a.amount)
        .sum()
}

fn check_target(
    tx: &Transaction,
    payload_index: usize,
    instruction: &Instruction,
) -> Result<usize, LedgerError> {
    let output = instruction.output as usize;
    if output >= tx.output.len() {
        return Err(LedgerError::OutputOutOfRange {
            output: instruction.output,
            outputs: tx.output.len(),
        });
    }
    if output == payload_index || tx.output[output].script_pubkey.is_op_return() {
        return Err(LedgerError::PayloadOutput(instruction.output));
    }
    Ok(output)
}

fn place_leftovers(
    tx: &Transaction,
    payload_index: Option<usize>,
    runs: VecDeque<AssetAmount>,
    outputs: &mut OutputColors,
) -> Result<(), LedgerError> {
    if runs.is_empty() {
        return Ok(());
    }
    match leftover_output(tx, payload_index) {
        Some(last) => {
            for run in runs {
                credit(&mut outputs[last], &run, run.amount)?;
            }
        }
        None => log::warn!(
            "Transaction {} has no output for leftover colors, burning",
            tx.compute_txid()
        ),
    }
    Ok(())
}

fn credit(output: &mut Vec<AssetAmount>, asset: &AssetAmount, amount: u64) -> Result<(), LedgerError> {
    if amount == 0 {
        return Ok(());
    }
    match output.iter_mut().find(|a| a.asset_id == asset.asset_id) {
        Some(existing) => {
            existing.amount = existing
                .amount
                .checked_add(amount)
                .ok_or_else(|| LedgerError::AmountOverflow(asset.asset_id.clone()))?;
        }
        None => output.push(AssetAmount {
            amount,
            ..asset.clone()
        }),
    }
    Ok(())
}
