//! Mutation primitives available inside one atomic ledger write.
//!
//! Every forward primitive has an inverse that undoes it exactly, so a block
//! can be unwound by replaying its effects backwards:
//!
//! | forward            | inverse             |
//! |--------------------|---------------------|
//! | `insert_block`     | `remove_block`      |
//! | `insert_transaction` | `remove_transaction` |
//! | `create_output`    | `remove_output`     |
//! | `spend_output`     | `unspend_input`     |
//! | `credit_balance`   | `debit_balance`     |
//! | `ensure_tx_index`  | `remove_tx_index`   |
//! | `link_address`     | `unlink_address`    |

use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::TransactionalTree;
use tally_common::error::ConsistencyError;
use tally_common::types::{Amount, ChainTip, Currency, Hash, OutPoint};
use tally_common::utils::{codec, db_keys};

use crate::error::Result;
use crate::records::{
    AddressRecord, BalanceRecord, BlockRecord, InputRecord, OutputRecord, SpentBy, TransactionRecord,
    TxIndexRecord, UtxoEntry,
};

pub struct LedgerTxn<'a> {
    tree: &'a TransactionalTree,
}

impl<'a> LedgerTxn<'a> {
    pub(crate) fn new(tree: &'a TransactionalTree) -> Self {
        Self { tree }
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, key: Vec<u8>, value: &T) -> Result<()> {
        self.tree.insert(key, codec::encode(value)?)?;
        Ok(())
    }

    fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.tree.get(key)?.is_some())
    }

    // --- meta ---

    /// Allocates the next surrogate id. Ids are never reused.
    pub fn next_id(&self) -> Result<u64> {
        let next = self.get::<u64>(&db_keys::sequence_key())?.unwrap_or(0) + 1;
        self.put(db_keys::sequence_key(), &next)?;
        Ok(next)
    }

    pub fn tip(&self) -> Result<Option<ChainTip>> {
        self.get(&db_keys::tip_key())
    }

    pub fn set_tip(&self, tip: Option<&ChainTip>) -> Result<()> {
        match tip {
            Some(tip) => self.put(db_keys::tip_key(), tip),
            None => self.delete(db_keys::tip_key()),
        }
    }

    // --- blocks ---

    pub fn block(&self, height: u64) -> Result<Option<BlockRecord>> {
        self.get(&db_keys::block_height_key(height))
    }

    pub fn insert_block(&self, block: &BlockRecord) -> Result<()> {
        if let Some(existing) = self.block(block.height)? {
            return Err(ConsistencyError::HeightConflict {
                height: block.height,
                existing: existing.hash,
            }
            .into());
        }
        if let Some(height) = self.get::<u64>(&db_keys::block_hash_key(&block.hash))? {
            return Err(ConsistencyError::HeightConflict {
                height,
                existing: block.hash,
            }
            .into());
        }
        self.put(db_keys::block_height_key(block.height), block)?;
        self.put(db_keys::block_hash_key(&block.hash), &block.height)
    }

    pub fn remove_block(&self, hash: &Hash) -> Result<BlockRecord> {
        let height = self
            .get::<u64>(&db_keys::block_hash_key(hash))?
            .ok_or(ConsistencyError::MissingBlock(*hash))?;
        let block = self
            .block(height)?
            .ok_or(ConsistencyError::MissingBlock(*hash))?;
        self.delete(db_keys::block_height_key(height))?;
        self.delete(db_keys::block_hash_key(hash))?;
        Ok(block)
    }

    // --- transactions ---

    pub fn transaction(&self, txid: &Hash) -> Result<Option<TransactionRecord>> {
        self.get(&db_keys::tx_key(txid))
    }

    pub fn insert_transaction(&self, tx: &TransactionRecord) -> Result<()> {
        if self.contains(&db_keys::tx_key(&tx.txid))? {
            return Err(ConsistencyError::DuplicateTransaction(tx.txid).into());
        }
        self.put(db_keys::tx_key(&tx.txid), tx)
    }

    pub fn remove_transaction(&self, txid: &Hash) -> Result<TransactionRecord> {
        let tx = self
            .transaction(txid)?
            .ok_or(ConsistencyError::MissingTransaction(*txid))?;
        self.delete(db_keys::tx_key(txid))?;
        Ok(tx)
    }

    // --- outputs ---

    pub fn output(&self, outpoint: &OutPoint) -> Result<Option<OutputRecord>> {
        self.get(&db_keys::output_key(outpoint))
    }

    /// Records an unspent output and credits its owner.
    pub fn create_output(&self, output: &OutputRecord) -> Result<()> {
        let key = db_keys::output_key(&output.outpoint);
        if self.contains(&key)? {
            return Err(ConsistencyError::DuplicateOutput(output.outpoint).into());
        }
        self.put(key, output)?;
        self.put(
            db_keys::utxo_key(&output.address, &output.currency, &output.outpoint),
            &UtxoEntry::from(output),
        )?;
        self.retain_address(&output.address, output.block_height)?;
        self.retain_balance(&output.address, &output.currency)?;
        self.credit_balance(&output.address, &output.currency, output.amount)?;
        self.link_address(&output.address, output.tx_id, &output.outpoint.txid)
    }

    /// Inverse of [`create_output`](Self::create_output). The output must be unspent.
    pub fn remove_output(&self, outpoint: &OutPoint) -> Result<OutputRecord> {
        let output = self
            .output(outpoint)?
            .ok_or(ConsistencyError::MissingOutput(*outpoint))?;
        if let Some(spent_by) = output.spent_by {
            return Err(ConsistencyError::OutputStillSpent {
                outpoint: *outpoint,
                spent_by: spent_by.txid,
            }
            .into());
        }
        self.delete(db_keys::output_key(outpoint))?;
        self.delete(db_keys::utxo_key(&output.address, &output.currency, outpoint))?;
        self.debit_balance(&output.address, &output.currency, output.amount)?;
        self.release_balance(&output.address, &output.currency)?;
        self.release_address(&output.address)?;
        self.unlink_address(&output.address, output.tx_id)?;
        Ok(output)
    }

    // --- inputs ---

    /// Marks `prevout` spent by input `vin` of `spender` and debits the owner.
    /// A second spend of the same output is rejected.
    pub fn spend_output(
        &self,
        spender: &TransactionRecord,
        vin: u32,
        prevout: &OutPoint,
        sequence: u64,
    ) -> Result<InputRecord> {
        let mut output = self
            .output(prevout)?
            .ok_or(ConsistencyError::MissingOutput(*prevout))?;
        if let Some(spent_by) = output.spent_by {
            return Err(ConsistencyError::DoubleSpend {
                outpoint: *prevout,
                spent_by: spent_by.txid,
            }
            .into());
        }

        output.spent_by = Some(SpentBy {
            txid: spender.txid,
            vin,
        });
        self.put(db_keys::output_key(prevout), &output)?;
        self.delete(db_keys::utxo_key(&output.address, &output.currency, prevout))?;
        self.debit_balance(&output.address, &output.currency, output.amount)?;

        let input = InputRecord {
            txid: spender.txid,
            vin,
            prevout: *prevout,
            sequence,
            address: output.address.clone(),
            currency: output.currency.clone(),
            amount: output.amount,
        };
        self.put(db_keys::input_key(&spender.txid, vin), &input)?;
        self.link_address(&output.address, spender.id, &spender.txid)?;
        Ok(input)
    }

    /// Inverse of [`spend_output`](Self::spend_output).
    pub fn unspend_input(&self, spender: &TransactionRecord, vin: u32) -> Result<InputRecord> {
        let input: InputRecord = self
            .get(&db_keys::input_key(&spender.txid, vin))?
            .ok_or(ConsistencyError::MissingInput {
                txid: spender.txid,
                vin,
            })?;
        let mut output = self
            .output(&input.prevout)?
            .ok_or(ConsistencyError::MissingOutput(input.prevout))?;

        let expected = SpentBy {
            txid: spender.txid,
            vin,
        };
        match output.spent_by {
            Some(spent_by) if spent_by == expected => {}
            Some(spent_by) => {
                return Err(ConsistencyError::DoubleSpend {
                    outpoint: input.prevout,
                    spent_by: spent_by.txid,
                }
                .into())
            }
            None => {
                return Err(ConsistencyError::MissingInput {
                    txid: spender.txid,
                    vin,
                }
                .into())
            }
        }

        output.spent_by = None;
        self.put(db_keys::output_key(&input.prevout), &output)?;
        self.put(
            db_keys::utxo_key(&output.address, &output.currency, &input.prevout),
            &UtxoEntry::from(&output),
        )?;
        self.credit_balance(&output.address, &output.currency, output.amount)?;
        self.delete(db_keys::input_key(&spender.txid, vin))?;
        self.unlink_address(&output.address, spender.id)?;
        Ok(input)
    }

    // --- balances ---

    pub fn balance(&self, address: &str, currency: &Currency) -> Result<Option<BalanceRecord>> {
        self.get(&db_keys::balance_key(address, currency))
    }

    pub fn credit_balance(&self, address: &str, currency: &Currency, amount: Amount) -> Result<()> {
        self.update_balance(address, currency, false, |balance| {
            balance.amount = balance.amount.checked_add(amount).ok_or_else(|| {
                ConsistencyError::AmountOverflow {
                    address: address.to_string(),
                    currency: currency.clone(),
                }
            })?;
            Ok(())
        })
    }

    pub fn debit_balance(&self, address: &str, currency: &Currency, amount: Amount) -> Result<()> {
        self.update_balance(address, currency, false, |balance| {
            balance.amount = balance.amount.checked_sub(amount).ok_or_else(|| {
                ConsistencyError::BalanceUnderflow {
                    address: address.to_string(),
                    currency: currency.clone(),
                }
            })?;
            Ok(())
        })
    }

    fn retain_balance(&self, address: &str, currency: &Currency) -> Result<()> {
        self.update_balance(address, currency, true, |balance| {
            balance.outputs += 1;
            Ok(())
        })
    }

    fn release_balance(&self, address: &str, currency: &Currency) -> Result<()> {
        self.update_balance(address, currency, false, |balance| {
            balance.outputs = balance.outputs.saturating_sub(1);
            Ok(())
        })
    }

    /// Read-modify-write of one balance row, keeping the richlist entry in step.
    /// Rows with no live outputs are dropped.
    fn update_balance<F>(&self, address: &str, currency: &Currency, create: bool, f: F) -> Result<()>
    where
        F: FnOnce(&mut BalanceRecord) -> std::result::Result<(), ConsistencyError>,
    {
        let key = db_keys::balance_key(address, currency);
        let old = self.get::<BalanceRecord>(&key)?;
        let mut balance = match (&old, create) {
            (Some(old), _) => old.clone(),
            (None, true) => BalanceRecord {
                address: address.to_string(),
                currency: currency.clone(),
                amount: Amount::ZERO,
                outputs: 0,
            },
            (None, false) => {
                return Err(ConsistencyError::MissingBalance {
                    address: address.to_string(),
                    currency: currency.clone(),
                }
                .into())
            }
        };
        f(&mut balance)?;

        if let Some(old) = &old {
            if !old.amount.is_zero() {
                self.delete(db_keys::rich_key(currency, old.amount.sat(), address))?;
            }
        }
        if balance.outputs == 0 {
            return self.delete(key);
        }
        if !balance.amount.is_zero() {
            self.put(
                db_keys::rich_key(currency, balance.amount.sat(), address),
                &balance.address,
            )?;
        }
        self.put(key, &balance)
    }

    // --- addresses ---

    pub fn address(&self, address: &str) -> Result<Option<AddressRecord>> {
        self.get(&db_keys::address_key(address))
    }

    fn retain_address(&self, address: &str, height: u64) -> Result<()> {
        let mut record = self.address(address)?.unwrap_or_else(|| AddressRecord {
            address: address.to_string(),
            first_seen: height,
            outputs: 0,
        });
        record.outputs += 1;
        self.put(db_keys::address_key(address), &record)
    }

    fn release_address(&self, address: &str) -> Result<()> {
        let Some(mut record) = self.address(address)? else {
            return Err(ConsistencyError::MissingAddress(address.to_string()).into());
        };
        record.outputs = record.outputs.saturating_sub(1);
        if record.outputs == 0 {
            self.delete(db_keys::address_key(address))
        } else {
            self.put(db_keys::address_key(address), &record)
        }
    }

    /// Adds a transaction to the address's participation set. Idempotent.
    pub fn link_address(&self, address: &str, tx_id: u64, txid: &Hash) -> Result<()> {
        self.put(db_keys::address_tx_key(address, tx_id), txid)
    }

    pub fn unlink_address(&self, address: &str, tx_id: u64) -> Result<()> {
        self.delete(db_keys::address_tx_key(address, tx_id))
    }

    // --- transaction index ---

    pub fn tx_index(&self, txid: &Hash, currency: &Currency) -> Result<Option<TxIndexRecord>> {
        self.get(&db_keys::tx_index_key(txid, currency))
    }

    /// Creates the (transaction, currency) index row unless it already exists.
    /// Returns whether a row was written.
    pub fn ensure_tx_index(&self, tx: &TransactionRecord, currency: &Currency, amount: Amount) -> Result<bool> {
        let key = db_keys::tx_index_key(&tx.txid, currency);
        if self.contains(&key)? {
            return Ok(false);
        }
        let record = TxIndexRecord {
            tx_id: tx.id,
            txid: tx.txid,
            currency: currency.clone(),
            amount,
            block_height: tx.block_height,
        };
        self.put(key, &record)?;
        self.put(db_keys::currency_index_key(currency, tx.id), &tx.txid)?;
        Ok(true)
    }

    pub fn remove_tx_index(&self, txid: &Hash, currency: &Currency) -> Result<bool> {
        let Some(record) = self.tx_index(txid, currency)? else {
            return Ok(false);
        };
        self.delete(db_keys::tx_index_key(txid, currency))?;
        self.delete(db_keys::currency_index_key(currency, record.tx_id))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::ledger::LedgerStore;
    use tally_common::types::Timelock;
    use tempfile::TempDir;

    fn open_store() -> (LedgerStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn tx_record(id: u64, tag: u8) -> TransactionRecord {
        TransactionRecord {
            id,
            txid: Hash([tag; 32]),
            block_height: 1,
            block_hash: Hash([0xb1; 32]),
            position: 0,
            time: None,
            locktime: 0,
            size: 0,
            amount: Amount::ZERO,
            coinbase: false,
            coinstake: false,
            inputs: vec![],
            outputs: vec![],
            currencies: vec![],
        }
    }

    fn output(tx: &TransactionRecord, n: u32, address: &str, currency: &str, amount: u64) -> OutputRecord {
        OutputRecord {
            outpoint: OutPoint::new(tx.txid, n),
            tx_id: tx.id,
            block_height: tx.block_height,
            address: address.to_string(),
            currency: Currency::from(currency),
            amount: Amount(amount),
            timelock: Timelock::NONE,
            script_type: "pubkeyhash".to_string(),
            script_hex: String::new(),
            spent_by: None,
        }
    }

    fn consistency(err: LedgerError) -> ConsistencyError {
        match err {
            LedgerError::Consistency(err) => err,
            other => panic!("expected consistency error, got {other:?}"),
        }
    }

    #[test]
    fn test_create_then_remove_output_restores_tree() {
        let (store, _dir) = open_store();
        let funding = tx_record(1, 1);
        let before = store.entries().unwrap();

        store
            .write(|txn| txn.create_output(&output(&funding, 0, "PAlice", "X", 100)))
            .unwrap();
        let balance = store
            .write(|txn| txn.balance("PAlice", &Currency::from("X")))
            .unwrap()
            .unwrap();
        assert_eq!(balance.amount, Amount(100));
        assert_eq!(balance.outputs, 1);

        store
            .write(|txn| txn.remove_output(&OutPoint::new(funding.txid, 0)))
            .unwrap();
        assert_eq!(store.entries().unwrap(), before);
    }

    #[test]
    fn test_spend_moves_value_and_rejects_second_spend() {
        let (store, _dir) = open_store();
        let funding = tx_record(1, 1);
        let first = tx_record(2, 2);
        let second = tx_record(3, 3);
        let prevout = OutPoint::new(funding.txid, 0);

        store
            .write(|txn| txn.create_output(&output(&funding, 0, "PAlice", "X", 100)))
            .unwrap();
        let input = store.write(|txn| txn.spend_output(&first, 0, &prevout, 0)).unwrap();
        assert_eq!(input.amount, Amount(100));
        assert_eq!(input.address, "PAlice");

        let balance = store
            .write(|txn| txn.balance("PAlice", &Currency::from("X")))
            .unwrap()
            .unwrap();
        assert_eq!(balance.amount, Amount::ZERO);
        assert_eq!(balance.outputs, 1);

        let err = store
            .write(|txn| txn.spend_output(&second, 0, &prevout, 0))
            .unwrap_err();
        assert_eq!(
            consistency(err),
            ConsistencyError::DoubleSpend {
                outpoint: prevout,
                spent_by: first.txid,
            }
        );

        let spent = store.write(|txn| txn.output(&prevout)).unwrap().unwrap();
        assert_eq!(spent.spent_by.map(|s| s.txid), Some(first.txid));
    }

    #[test]
    fn test_unspend_is_inverse_of_spend() {
        let (store, _dir) = open_store();
        let funding = tx_record(1, 1);
        let spender = tx_record(2, 2);
        let prevout = OutPoint::new(funding.txid, 0);

        store
            .write(|txn| txn.create_output(&output(&funding, 0, "PAlice", "X", 100)))
            .unwrap();
        let before = store.entries().unwrap();

        store.write(|txn| txn.spend_output(&spender, 0, &prevout, 7)).unwrap();
        let err = store.write(|txn| txn.remove_output(&prevout)).unwrap_err();
        assert!(matches!(consistency(err), ConsistencyError::OutputStillSpent { .. }));

        store.write(|txn| txn.unspend_input(&spender, 0)).unwrap();
        assert_eq!(store.entries().unwrap(), before);
    }

    #[test]
    fn test_spend_of_unknown_output_is_rejected() {
        let (store, _dir) = open_store();
        let spender = tx_record(2, 2);
        let missing = OutPoint::new(Hash([9; 32]), 4);

        let err = store
            .write(|txn| txn.spend_output(&spender, 0, &missing, 0))
            .unwrap_err();
        assert_eq!(consistency(err), ConsistencyError::MissingOutput(missing));
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_leaves_no_partial_state() {
        let (store, _dir) = open_store();
        let funding = tx_record(1, 1);
        let spender = tx_record(2, 2);

        let result = store.write(|txn| {
            txn.create_output(&output(&funding, 0, "PAlice", "X", 100))?;
            txn.spend_output(&spender, 0, &OutPoint::new(Hash([9; 32]), 0), 0)
        });
        assert!(result.is_err());
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_tx_index_created_once() {
        let (store, _dir) = open_store();
        let tx = tx_record(5, 5);
        let gold = Currency::from("GOLD");

        assert!(store.write(|txn| txn.ensure_tx_index(&tx, &gold, Amount(10))).unwrap());
        assert!(!store.write(|txn| txn.ensure_tx_index(&tx, &gold, Amount(99))).unwrap());

        let row = store.write(|txn| txn.tx_index(&tx.txid, &gold)).unwrap().unwrap();
        assert_eq!(row.amount, Amount(10));

        assert!(store.write(|txn| txn.remove_tx_index(&tx.txid, &gold)).unwrap());
        assert!(!store.write(|txn| txn.remove_tx_index(&tx.txid, &gold)).unwrap());
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_debit_below_zero_is_rejected() {
        let (store, _dir) = open_store();
        let funding = tx_record(1, 1);
        let x = Currency::from("X");

        store
            .write(|txn| txn.create_output(&output(&funding, 0, "PAlice", "X", 5)))
            .unwrap();
        let err = store
            .write(|txn| txn.debit_balance("PAlice", &x, Amount(6)))
            .unwrap_err();
        assert!(matches!(consistency(err), ConsistencyError::BalanceUnderflow { .. }));

        let err = store
            .write(|txn| txn.credit_balance("PBob", &x, Amount(1)))
            .unwrap_err();
        assert!(matches!(consistency(err), ConsistencyError::MissingBalance { .. }));
    }

    #[test]
    fn test_releasing_unknown_address_is_rejected() {
        let (store, _dir) = open_store();
        let funding = tx_record(1, 1);

        store
            .write(|txn| txn.create_output(&output(&funding, 0, "PAlice", "X", 5)))
            .unwrap();
        let err = store.write(|txn| txn.release_address("PBob")).unwrap_err();
        assert!(matches!(consistency(err), ConsistencyError::MissingAddress(ref a) if a == "PBob"));

        store.write(|txn| txn.release_address("PAlice")).unwrap();
        assert!(store.write(|txn| txn.address("PAlice")).unwrap().is_none());
    }

    #[test]
    fn test_next_id_is_monotonic() {
        let (store, _dir) = open_store();
        let first = store.write(|txn| txn.next_id()).unwrap();
        let second = store.write(|txn| txn.next_id()).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }
}
