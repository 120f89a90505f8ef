use serde::de::DeserializeOwned;
use std::path::Path;
use tally_common::types::ChainTip;
use tally_common::utils::{codec, db_keys};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::txn::LedgerTxn;

const LEDGER_TREE: &str = "ledger";

/// Persistent chain-derived state.
///
/// All writes go through [`LedgerStore::write`], which runs one closure as a
/// single sled transaction: readers see either all of its effects or none.
#[derive(Clone)]
pub struct LedgerStore {
    db: sled::Db,
    pub(crate) tree: sled::Tree,
}

impl LedgerStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new().path(path.as_ref()).open()?;
        let tree = db.open_tree(LEDGER_TREE)?;
        debug!("Opened ledger at {}", path.as_ref().display());
        Ok(Self { db, tree })
    }

    /// Runs `f` atomically and flushes once it commits.
    ///
    /// sled may call `f` more than once when transactions conflict, so it must
    /// not have side effects outside the ledger.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&LedgerTxn<'_>) -> Result<T>,
    {
        let value = self
            .tree
            .transaction(|tree| f(&LedgerTxn::new(tree)).map_err(LedgerError::into_conflictable))
            .map_err(LedgerError::from_transaction)?;
        self.db.flush()?;
        Ok(value)
    }

    pub fn tip(&self) -> Result<Option<ChainTip>> {
        self.read(&db_keys::tip_key())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tip()?.is_none())
    }

    pub(crate) fn read<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decoded values of every key under `prefix`, in key order.
    pub(crate) fn scan<T: DeserializeOwned>(&self, prefix: &[u8]) -> impl DoubleEndedIterator<Item = Result<T>> {
        self.tree.scan_prefix(prefix).map(|entry| -> Result<T> {
            let (_, value) = entry?;
            Ok(codec::decode(&value)?)
        })
    }

    /// Raw contents of the ledger, excluding the id sequence.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let sequence = db_keys::sequence_key();
        let mut entries = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            if key.as_ref() != sequence.as_slice() {
                entries.push((key.to_vec(), value.to_vec()));
            }
        }
        Ok(entries)
    }
}
