//! Block unwinder
//!
//! Reverses the tip block by running the inverse of every applier step in
//! reverse order: transactions last-to-first, and within a transaction its
//! index rows, then its outputs, then its inputs.

use tally_common::error::ConsistencyError;
use tally_common::types::{ChainTip, Hash, OutPoint};
use tally_storage::{LedgerError, LedgerTxn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindOutcome {
    pub removed: ChainTip,
    pub new_tip: ChainTip,
    pub transactions: usize,
}

/// Removes the tip block. `expected` must be the stored tip, which guards
/// against unwinding a block the caller did not inspect.
pub fn unwind_tip(txn: &LedgerTxn<'_>, expected: &ChainTip) -> Result<UnwindOutcome, LedgerError> {
    let tip = txn
        .tip()?
        .ok_or(ConsistencyError::MissingBlock(expected.hash))?;
    if tip != *expected {
        return Err(ConsistencyError::TipMismatch {
            stored: tip.hash,
            expected: expected.hash,
        }
        .into());
    }
    if tip.height == 0 {
        return Err(ConsistencyError::GenesisUnwind.into());
    }

    let block = txn.remove_block(&tip.hash)?;
    for txid in block.txids.iter().rev() {
        unwind_transaction(txn, txid)?;
    }

    let parent_hash = block.previous.unwrap_or_default();
    let parent = txn
        .block(tip.height - 1)?
        .filter(|parent| parent.hash == parent_hash)
        .ok_or(ConsistencyError::MissingBlock(parent_hash))?;

    let new_tip = parent.tip();
    txn.set_tip(Some(&new_tip))?;
    Ok(UnwindOutcome {
        removed: tip,
        new_tip,
        transactions: block.txids.len(),
    })
}

fn unwind_transaction(txn: &LedgerTxn<'_>, txid: &Hash) -> Result<(), LedgerError> {
    let record = txn.remove_transaction(txid)?;

    for currency in &record.currencies {
        txn.remove_tx_index(txid, currency)?;
    }
    for n in record.outputs.iter().rev() {
        txn.remove_output(&OutPoint::new(*txid, *n))?;
    }
    for vin in record.inputs.iter().rev() {
        txn.unspend_input(&record, *vin)?;
    }
    Ok(())
}
