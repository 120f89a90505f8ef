//! Block applier
//!
//! Turns one node block plus its transactions into ledger mutations. The whole
//! block is applied inside a single [`LedgerTxn`], so either every row it
//! touches is written or none is.

use std::collections::BTreeMap;
use tally_common::error::ConsistencyError;
use tally_common::types::{
    Amount, ChainTip, Currency, NodeBlock, NodeInput, NodeTransaction, OutPoint,
};
use tally_storage::records::{BlockRecord, OutputRecord, TransactionRecord};
use tally_storage::{LedgerError, LedgerTxn};

/// A block together with the transactions that get indexed, keyed by their
/// position in the block.
#[derive(Debug, Clone)]
pub struct BlockBundle {
    pub block: NodeBlock,
    pub transactions: Vec<(u32, NodeTransaction)>,
}

impl BlockBundle {
    /// Block stored without indexing its transactions.
    pub fn header_only(block: NodeBlock) -> Self {
        Self {
            block,
            transactions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { tip: ChainTip, transactions: usize },
    /// The same block is already stored at this height; nothing was written.
    AlreadyApplied,
}

pub fn apply_block(txn: &LedgerTxn<'_>, bundle: &BlockBundle) -> Result<ApplyOutcome, LedgerError> {
    let block = &bundle.block;

    if let Some(existing) = txn.block(block.height)? {
        if existing.hash == block.hash {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        return Err(ConsistencyError::HeightConflict {
            height: block.height,
            existing: existing.hash,
        }
        .into());
    }

    match txn.tip()? {
        Some(tip) => {
            if block.height != tip.height + 1 {
                return Err(ConsistencyError::NonContiguous {
                    height: block.height,
                    tip_height: tip.height,
                }
                .into());
            }
            if block.previous != Some(tip.hash) {
                return Err(ConsistencyError::ParentMismatch {
                    block: block.hash,
                    parent: block.previous,
                    tip: tip.hash,
                }
                .into());
            }
        }
        None if block.height != 0 => {
            return Err(ConsistencyError::NonContiguous {
                height: block.height,
                tip_height: 0,
            }
            .into());
        }
        None => {}
    }

    let mut txids = Vec::with_capacity(bundle.transactions.len());
    for (position, tx) in &bundle.transactions {
        let listed = block.tx.get(*position as usize);
        if listed != Some(&tx.txid) || (block.stake && *position == 0) {
            return Err(ConsistencyError::UnexpectedTransaction {
                block: block.hash,
                txid: tx.txid,
            }
            .into());
        }
        txids.push(tx.txid);
    }

    txn.insert_block(&BlockRecord::from_node(block, txids))?;
    for (position, tx) in &bundle.transactions {
        apply_transaction(txn, block, *position, tx)?;
    }

    let tip = block.tip();
    txn.set_tip(Some(&tip))?;
    Ok(ApplyOutcome::Applied {
        tip,
        transactions: bundle.transactions.len(),
    })
}

fn apply_transaction(
    txn: &LedgerTxn<'_>,
    block: &NodeBlock,
    position: u32,
    tx: &NodeTransaction,
) -> Result<(), LedgerError> {
    let spends: Vec<(u32, OutPoint, u64)> = tx
        .inputs
        .iter()
        .enumerate()
        .filter_map(|(vin, input)| match input {
            NodeInput::Coinbase => None,
            NodeInput::Spend { prevout, sequence } => Some((vin as u32, *prevout, *sequence)),
        })
        .collect();

    let outputs: Vec<_> = tx
        .outputs
        .iter()
        .filter_map(|output| output.resolve().map(|resolved| (output, resolved)))
        .collect();

    // Per-currency totals for the transaction index.
    let mut totals: BTreeMap<Currency, Amount> = BTreeMap::new();
    for (_, resolved) in &outputs {
        let total = totals.entry(resolved.currency.clone()).or_default();
        *total = total.checked_add(resolved.amount).ok_or_else(|| ConsistencyError::AmountOverflow {
            address: resolved.address.clone(),
            currency: resolved.currency.clone(),
        })?;
    }

    let record = TransactionRecord {
        id: txn.next_id()?,
        txid: tx.txid,
        block_height: block.height,
        block_hash: block.hash,
        position,
        time: tx.time,
        locktime: tx.locktime,
        size: tx.size,
        amount: tx.amount,
        coinbase: block.is_coinbase_position(position),
        coinstake: block.is_coinstake_position(position),
        inputs: spends.iter().map(|(vin, _, _)| *vin).collect(),
        outputs: outputs.iter().map(|(output, _)| output.n).collect(),
        currencies: totals.keys().cloned().collect(),
    };
    txn.insert_transaction(&record)?;

    for (vin, prevout, sequence) in &spends {
        txn.spend_output(&record, *vin, prevout, *sequence)?;
    }

    for (output, resolved) in outputs {
        txn.create_output(&OutputRecord {
            outpoint: OutPoint::new(tx.txid, output.n),
            tx_id: record.id,
            block_height: block.height,
            address: resolved.address,
            currency: resolved.currency,
            amount: resolved.amount,
            timelock: resolved.timelock,
            script_type: output.script_type.clone(),
            script_hex: output.script_hex.clone(),
            spent_by: None,
        })?;
    }

    for (currency, amount) in &totals {
        txn.ensure_tx_index(&record, currency, *amount)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_common::types::{Hash, NodeOutput, OutputValue};
    use tally_storage::LedgerStore;
    use tempfile::TempDir;

    fn hash(b: u8) -> Hash {
        Hash([b; 32])
    }

    fn header(height: u64, previous: Option<Hash>, tx: Vec<Hash>) -> NodeBlock {
        NodeBlock {
            hash: hash(height as u8 + 1),
            height,
            previous,
            time: 1_700_000_000,
            merkleroot: String::new(),
            chainwork: String::new(),
            version: 1,
            weight: 0,
            bits: String::new(),
            nonce: 0,
            size: 0,
            reward: Amount::ZERO,
            stake: false,
            signature: None,
            tx,
        }
    }

    fn coinbase(txid: Hash, address: &str, sat: u64) -> NodeTransaction {
        NodeTransaction {
            txid,
            time: None,
            locktime: 0,
            size: 0,
            amount: Amount::ZERO,
            inputs: vec![NodeInput::Coinbase],
            outputs: vec![
                NodeOutput {
                    n: 0,
                    script_type: "pubkeyhash".to_string(),
                    script_hex: String::new(),
                    addresses: vec![address.to_string()],
                    value: OutputValue::Native { amount: Amount(sat) },
                    timelock: None,
                },
                NodeOutput {
                    n: 1,
                    script_type: "nulldata".to_string(),
                    script_hex: "6a".to_string(),
                    addresses: vec![],
                    value: OutputValue::Native { amount: Amount::ZERO },
                    timelock: None,
                },
            ],
        }
    }

    fn open() -> (TempDir, LedgerStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    fn seed(store: &LedgerStore) -> NodeBlock {
        let genesis = header(0, None, vec![]);
        let bundle = BlockBundle::header_only(genesis.clone());
        store.write(|txn| apply_block(txn, &bundle)).unwrap();
        genesis
    }

    #[test]
    fn test_first_block_must_be_genesis() {
        let (_dir, store) = open();
        let bundle = BlockBundle::header_only(header(1, Some(hash(1)), vec![]));
        let err = store.write(|txn| apply_block(txn, &bundle)).unwrap_err();
        assert_eq!(
            err.as_consistency(),
            Some(&ConsistencyError::NonContiguous { height: 1, tip_height: 0 })
        );
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_rejects_gap_and_wrong_parent() {
        let (_dir, store) = open();
        let genesis = seed(&store);

        let gap = BlockBundle::header_only(header(2, Some(genesis.hash), vec![]));
        let err = store.write(|txn| apply_block(txn, &gap)).unwrap_err();
        assert!(matches!(err.as_consistency(), Some(ConsistencyError::NonContiguous { .. })));

        let orphan = BlockBundle::header_only(header(1, Some(hash(99)), vec![]));
        let err = store.write(|txn| apply_block(txn, &orphan)).unwrap_err();
        assert!(matches!(err.as_consistency(), Some(ConsistencyError::ParentMismatch { .. })));
        assert_eq!(store.tip().unwrap(), Some(genesis.tip()));
    }

    #[test]
    fn test_other_block_at_stored_height_conflicts() {
        let (_dir, store) = open();
        seed(&store);

        let mut rival = header(0, None, vec![]);
        rival.hash = hash(200);
        let err = store
            .write(|txn| apply_block(txn, &BlockBundle::header_only(rival.clone())))
            .unwrap_err();
        assert!(matches!(err.as_consistency(), Some(ConsistencyError::HeightConflict { height: 0, .. })));
    }

    #[test]
    fn test_skips_outputs_without_value() {
        let (_dir, store) = open();
        let genesis = seed(&store);

        let tx = coinbase(hash(50), "PMiner", 1_000);
        let bundle = BlockBundle {
            block: header(1, Some(genesis.hash), vec![tx.txid]),
            transactions: vec![(0, tx)],
        };
        let outcome = store.write(|txn| apply_block(txn, &bundle)).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { transactions: 1, .. }));

        let record = store.transaction(&hash(50)).unwrap().unwrap();
        assert!(record.coinbase);
        assert_eq!(record.outputs, vec![0]);
        assert!(store.output(&OutPoint::new(hash(50), 1)).unwrap().is_none());
    }

    #[test]
    fn test_transaction_must_match_its_listed_position() {
        let (_dir, store) = open();
        let genesis = seed(&store);

        let tx = coinbase(hash(50), "PMiner", 1_000);
        let mut block = header(1, Some(genesis.hash), vec![hash(49), tx.txid]);
        let misplaced = BlockBundle {
            block: block.clone(),
            transactions: vec![(0, tx.clone())],
        };
        let err = store.write(|txn| apply_block(txn, &misplaced)).unwrap_err();
        assert!(matches!(err.as_consistency(), Some(ConsistencyError::UnexpectedTransaction { .. })));

        // Position 0 of a stake block is a placeholder and never indexed.
        block.stake = true;
        block.tx = vec![tx.txid];
        let placeholder = BlockBundle {
            block,
            transactions: vec![(0, tx)],
        };
        let err = store.write(|txn| apply_block(txn, &placeholder)).unwrap_err();
        assert!(matches!(err.as_consistency(), Some(ConsistencyError::UnexpectedTransaction { .. })));
        assert_eq!(store.tip().unwrap(), Some(genesis.tip()));
    }
}
