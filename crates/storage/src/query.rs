//! Read-only accessors over committed ledger state.

use serde::Serialize;
use std::collections::BTreeMap;
use tally_common::error::ConsistencyError;
use tally_common::types::{Amount, Currency, Hash, OutPoint};
use tally_common::utils::db_keys;

use crate::error::Result;
use crate::ledger::LedgerStore;
use crate::records::{
    AddressRecord, BalanceRecord, BlockRecord, InputRecord, OutputRecord, TransactionRecord,
    TxIndexRecord, UtxoEntry,
};

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
}

impl PageRequest {
    /// Pages start at 1; sizes are clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: u64, size: u64) -> Self {
        Self {
            page: page.max(1),
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Saturates, so a page past the end is simply empty.
    fn offset(&self) -> usize {
        let skipped = self.page.saturating_sub(1).saturating_mul(self.size);
        usize::try_from(skipped).unwrap_or(usize::MAX)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    fn collect<I>(request: PageRequest, iter: I) -> Result<Self>
    where
        I: Iterator<Item = Result<T>>,
    {
        let mut items = Vec::with_capacity(request.size as usize);
        let mut total = 0u64;
        for (position, item) in iter.enumerate() {
            total += 1;
            if position >= request.offset() && items.len() < request.size as usize {
                items.push(item?);
            }
        }
        Ok(Self {
            items,
            page: request.page,
            total,
            total_pages: total.div_ceil(request.size),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionDetail {
    pub transaction: TransactionRecord,
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
    pub confirmations: u64,
    /// Native inputs minus native outputs; negative for value-creating transactions.
    pub fee: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressSummary {
    pub address: String,
    pub first_seen: u64,
    pub transactions: u64,
    /// Non-native currencies with a positive balance.
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub currency: Currency,
    /// Spendable part of `total`.
    pub balance: Amount,
    pub locked: Amount,
    pub total: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RichEntry {
    pub address: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub address: String,
    pub currency: Currency,
    pub recorded: Amount,
    pub expected: Amount,
}

impl LedgerStore {
    // --- blocks ---

    pub fn latest_block(&self) -> Result<Option<BlockRecord>> {
        match self.tip()? {
            Some(tip) => self.block_by_height(tip.height),
            None => Ok(None),
        }
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>> {
        self.read(&db_keys::block_height_key(height))
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Result<Option<BlockRecord>> {
        match self.read::<u64>(&db_keys::block_hash_key(hash))? {
            Some(height) => self.block_by_height(height),
            None => Ok(None),
        }
    }

    /// Blocks, highest first.
    pub fn blocks(&self, request: PageRequest) -> Result<Page<BlockRecord>> {
        Page::collect(request, self.scan(db_keys::BLOCK_PREFIX).rev())
    }

    /// Transactions of one block in block order.
    pub fn block_transactions(&self, hash: &Hash, request: PageRequest) -> Result<Option<Page<TransactionRecord>>> {
        let Some(block) = self.block_by_hash(hash)? else {
            return Ok(None);
        };
        let transactions = block.txids.iter().map(|txid| -> Result<TransactionRecord> {
            self.transaction(txid)?
                .ok_or_else(|| ConsistencyError::MissingTransaction(*txid).into())
        });
        Page::collect(request, transactions).map(Some)
    }

    // --- transactions ---

    pub fn transaction(&self, txid: &Hash) -> Result<Option<TransactionRecord>> {
        self.read(&db_keys::tx_key(txid))
    }

    pub fn output(&self, outpoint: &OutPoint) -> Result<Option<OutputRecord>> {
        self.read(&db_keys::output_key(outpoint))
    }

    pub fn transaction_detail(&self, txid: &Hash) -> Result<Option<TransactionDetail>> {
        let Some(transaction) = self.transaction(txid)? else {
            return Ok(None);
        };

        let mut inputs = Vec::with_capacity(transaction.inputs.len());
        for vin in &transaction.inputs {
            if let Some(input) = self.read::<InputRecord>(&db_keys::input_key(txid, *vin))? {
                inputs.push(input);
            }
        }
        let mut outputs = Vec::with_capacity(transaction.outputs.len());
        for n in &transaction.outputs {
            if let Some(output) = self.output(&OutPoint::new(*txid, *n))? {
                outputs.push(output);
            }
        }

        let native_in = native_sum(inputs.iter().map(|i| (&i.currency, i.amount)));
        let native_out = native_sum(outputs.iter().map(|o| (&o.currency, o.amount)));
        let confirmations = match self.tip()? {
            Some(tip) => (tip.height + 1).saturating_sub(transaction.block_height),
            None => 0,
        };

        Ok(Some(TransactionDetail {
            transaction,
            inputs,
            outputs,
            confirmations,
            fee: native_in - native_out,
        }))
    }

    /// Index rows for one currency, newest transaction first.
    pub fn transactions_by_currency(&self, currency: &Currency, request: PageRequest) -> Result<Page<TxIndexRecord>> {
        let rows = self
            .scan::<Hash>(&db_keys::currency_index_prefix(currency))
            .rev()
            .map(|txid| -> Result<TxIndexRecord> {
                let txid = txid?;
                self.read(&db_keys::tx_index_key(&txid, currency))?
                    .ok_or_else(|| ConsistencyError::MissingTransaction(txid).into())
            });
        Page::collect(request, rows)
    }

    // --- addresses ---

    pub fn address(&self, address: &str) -> Result<Option<AddressSummary>> {
        let Some(record) = self.read::<AddressRecord>(&db_keys::address_key(address))? else {
            return Ok(None);
        };
        let transactions = self.tree.scan_prefix(db_keys::address_tx_prefix(address)).count() as u64;
        let mut tokens = 0;
        for balance in self.scan::<BalanceRecord>(&db_keys::balance_prefix(address)) {
            let balance = balance?;
            if !balance.currency.is_native() && !balance.amount.is_zero() {
                tokens += 1;
            }
        }
        Ok(Some(AddressSummary {
            address: record.address,
            first_seen: record.first_seen,
            transactions,
            tokens,
        }))
    }

    /// Balances of an address with the part still under timelock at the current tip.
    /// Empty non-native balances are omitted.
    pub fn address_balances(&self, address: &str) -> Result<Vec<BalanceView>> {
        let (height, time) = self.tip_height_and_time()?;
        let mut views = Vec::new();
        for balance in self.scan::<BalanceRecord>(&db_keys::balance_prefix(address)) {
            let balance = balance?;
            if balance.amount.is_zero() && !balance.currency.is_native() {
                continue;
            }
            let locked = self.locked_amount_at(address, &balance.currency, height, time)?;
            views.push(BalanceView {
                currency: balance.currency,
                balance: balance.amount.checked_sub(locked).unwrap_or(Amount::ZERO),
                locked,
                total: balance.amount,
            });
        }
        Ok(views)
    }

    pub fn locked_amount(&self, address: &str, currency: &Currency) -> Result<Amount> {
        let (height, time) = self.tip_height_and_time()?;
        self.locked_amount_at(address, currency, height, time)
    }

    fn locked_amount_at(&self, address: &str, currency: &Currency, height: u64, time: i64) -> Result<Amount> {
        let mut locked = 0u64;
        for utxo in self.scan::<UtxoEntry>(&db_keys::utxo_currency_prefix(address, currency)) {
            let utxo = utxo?;
            if utxo.timelock.is_locked_at(height, time) {
                locked = locked.saturating_add(utxo.amount.sat());
            }
        }
        Ok(Amount(locked))
    }

    fn tip_height_and_time(&self) -> Result<(u64, i64)> {
        Ok(match self.latest_block()? {
            Some(block) => (block.height, block.time),
            None => (0, 0),
        })
    }

    pub fn unspent_outputs(&self, address: &str, currency: Option<&Currency>) -> Result<Vec<UtxoEntry>> {
        let prefix = match currency {
            Some(currency) => db_keys::utxo_currency_prefix(address, currency),
            None => db_keys::utxo_address_prefix(address),
        };
        self.scan(&prefix).collect()
    }

    /// Transactions an address took part in, newest first.
    pub fn address_transactions(&self, address: &str, request: PageRequest) -> Result<Page<TransactionRecord>> {
        let transactions = self
            .scan::<Hash>(&db_keys::address_tx_prefix(address))
            .rev()
            .map(|txid| -> Result<TransactionRecord> {
                let txid = txid?;
                self.transaction(&txid)?
                    .ok_or_else(|| ConsistencyError::MissingTransaction(txid).into())
            });
        Page::collect(request, transactions)
    }

    /// Positive balances of one currency, largest first.
    pub fn richlist(&self, currency: &Currency, request: PageRequest) -> Result<Page<RichEntry>> {
        let entries = self.scan::<String>(&db_keys::rich_prefix(currency)).map(|address| -> Result<RichEntry> {
            let address = address?;
            let amount = self
                .read::<BalanceRecord>(&db_keys::balance_key(&address, currency))?
                .map(|balance| balance.amount)
                .unwrap_or(Amount::ZERO);
            Ok(RichEntry { address, amount })
        });
        Page::collect(request, entries)
    }

    // --- audit ---

    /// Recomputes every balance from unspent outputs and reports rows that disagree.
    pub fn verify_balances(&self) -> Result<Vec<BalanceMismatch>> {
        let mut expected: BTreeMap<(String, Currency), u64> = BTreeMap::new();
        for output in self.scan::<OutputRecord>(db_keys::OUTPUT_PREFIX) {
            let output = output?;
            let sum = expected.entry((output.address, output.currency)).or_insert(0);
            if output.spent_by.is_none() {
                *sum = sum.saturating_add(output.amount.sat());
            }
        }

        let mut mismatches = Vec::new();
        for balance in self.scan::<BalanceRecord>(db_keys::BALANCE_PREFIX) {
            let balance = balance?;
            let want = expected
                .remove(&(balance.address.clone(), balance.currency.clone()))
                .unwrap_or(0);
            if balance.amount.sat() != want {
                mismatches.push(BalanceMismatch {
                    address: balance.address,
                    currency: balance.currency,
                    recorded: balance.amount,
                    expected: Amount(want),
                });
            }
        }
        // Outputs whose balance row is missing entirely.
        for ((address, currency), want) in expected {
            mismatches.push(BalanceMismatch {
                address,
                currency,
                recorded: Amount::ZERO,
                expected: Amount(want),
            });
        }
        Ok(mismatches)
    }
}

fn native_sum<'a>(items: impl Iterator<Item = (&'a Currency, Amount)>) -> i128 {
    items
        .filter(|(currency, _)| currency.is_native())
        .map(|(_, amount)| amount.sat() as i128)
        .sum()
}
