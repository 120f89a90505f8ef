//! Key layout of the ledger tree.
//!
//! Every entity lives under its own prefix. Integers are big-endian so that
//! lexicographic key order matches numeric order, and variable-length string
//! components are terminated by `SEP`.

use crate::types::{Currency, Hash, OutPoint};

pub const BLOCK_PREFIX: &[u8] = b"block#";
pub const BLOCK_HASH_PREFIX: &[u8] = b"blockhash#";
pub const TX_PREFIX: &[u8] = b"tx#";
pub const OUTPUT_PREFIX: &[u8] = b"out#";
pub const INPUT_PREFIX: &[u8] = b"in#";
pub const ADDRESS_PREFIX: &[u8] = b"addr#";
pub const ADDRESS_TX_PREFIX: &[u8] = b"addrtx#";
pub const BALANCE_PREFIX: &[u8] = b"bal#";
pub const RICH_PREFIX: &[u8] = b"rich#";
pub const UTXO_PREFIX: &[u8] = b"utxo#";
pub const TX_INDEX_PREFIX: &[u8] = b"txidx#";
pub const CURRENCY_INDEX_PREFIX: &[u8] = b"txidxc#";
pub const META_PREFIX: &[u8] = b"meta#";

pub const SEP: u8 = 0x00;

const TIP_KEY: &[u8] = b"tip";
const SEQUENCE_KEY: &[u8] = b"seq";

fn compose(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

fn outpoint_bytes(outpoint: &OutPoint) -> [u8; 36] {
    let mut bytes = [0u8; 36];
    bytes[..32].copy_from_slice(&outpoint.txid.0);
    bytes[32..].copy_from_slice(&outpoint.vout.to_be_bytes());
    bytes
}

pub fn tip_key() -> Vec<u8> {
    compose(META_PREFIX, &[TIP_KEY])
}

pub fn sequence_key() -> Vec<u8> {
    compose(META_PREFIX, &[SEQUENCE_KEY])
}

pub fn block_height_key(height: u64) -> Vec<u8> {
    compose(BLOCK_PREFIX, &[&height.to_be_bytes()])
}

pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
    compose(BLOCK_HASH_PREFIX, &[&hash.0])
}

pub fn tx_key(txid: &Hash) -> Vec<u8> {
    compose(TX_PREFIX, &[&txid.0])
}

pub fn output_key(outpoint: &OutPoint) -> Vec<u8> {
    compose(OUTPUT_PREFIX, &[&outpoint_bytes(outpoint)])
}

pub fn input_key(txid: &Hash, vin: u32) -> Vec<u8> {
    compose(INPUT_PREFIX, &[&txid.0, &vin.to_be_bytes()])
}

pub fn address_key(address: &str) -> Vec<u8> {
    compose(ADDRESS_PREFIX, &[address.as_bytes()])
}

/// Participation of `address` in the transaction with surrogate id `tx_id`.
pub fn address_tx_key(address: &str, tx_id: u64) -> Vec<u8> {
    compose(ADDRESS_TX_PREFIX, &[address.as_bytes(), &[SEP], &tx_id.to_be_bytes()])
}

pub fn address_tx_prefix(address: &str) -> Vec<u8> {
    compose(ADDRESS_TX_PREFIX, &[address.as_bytes(), &[SEP]])
}

pub fn balance_key(address: &str, currency: &Currency) -> Vec<u8> {
    compose(BALANCE_PREFIX, &[address.as_bytes(), &[SEP], currency.as_str().as_bytes()])
}

pub fn balance_prefix(address: &str) -> Vec<u8> {
    compose(BALANCE_PREFIX, &[address.as_bytes(), &[SEP]])
}

/// Richlist entry; amounts are inverted so a forward scan yields the largest first.
pub fn rich_key(currency: &Currency, amount: u64, address: &str) -> Vec<u8> {
    compose(
        RICH_PREFIX,
        &[
            currency.as_str().as_bytes(),
            &[SEP],
            &(u64::MAX - amount).to_be_bytes(),
            address.as_bytes(),
        ],
    )
}

pub fn rich_prefix(currency: &Currency) -> Vec<u8> {
    compose(RICH_PREFIX, &[currency.as_str().as_bytes(), &[SEP]])
}

pub fn utxo_key(address: &str, currency: &Currency, outpoint: &OutPoint) -> Vec<u8> {
    compose(
        UTXO_PREFIX,
        &[
            address.as_bytes(),
            &[SEP],
            currency.as_str().as_bytes(),
            &[SEP],
            &outpoint_bytes(outpoint),
        ],
    )
}

pub fn utxo_address_prefix(address: &str) -> Vec<u8> {
    compose(UTXO_PREFIX, &[address.as_bytes(), &[SEP]])
}

pub fn utxo_currency_prefix(address: &str, currency: &Currency) -> Vec<u8> {
    compose(
        UTXO_PREFIX,
        &[address.as_bytes(), &[SEP], currency.as_str().as_bytes(), &[SEP]],
    )
}

pub fn tx_index_key(txid: &Hash, currency: &Currency) -> Vec<u8> {
    compose(TX_INDEX_PREFIX, &[&txid.0, currency.as_str().as_bytes()])
}

pub fn currency_index_key(currency: &Currency, tx_id: u64) -> Vec<u8> {
    compose(
        CURRENCY_INDEX_PREFIX,
        &[currency.as_str().as_bytes(), &[SEP], &tx_id.to_be_bytes()],
    )
}

pub fn currency_index_prefix(currency: &Currency) -> Vec<u8> {
    compose(CURRENCY_INDEX_PREFIX, &[currency.as_str().as_bytes(), &[SEP]])
}
