use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const HASH_LENGTH: usize = 32;

/// Base units per whole coin (8 decimal places).
pub const COIN: u64 = 100_000_000;

/// Timelocks at or below this value are block heights, above it unix timestamps.
/// Changing it would silently reclassify every stored locked output.
pub const LOCKTIME_THRESHOLD: u64 = 500_000_000;

/// Ticker of the chain's own asset.
pub const NATIVE_CURRENCY: &str = "PLB";

/// Script types that never carry spendable value.
pub const NON_VALUE_SCRIPT_TYPES: [&str; 2] = ["nonstandard", "nulldata"];

// --- NewTypes ---

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub [u8; HASH_LENGTH]);

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HashParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {HASH_LENGTH} bytes, got {0}")]
    Length(usize),
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_LENGTH {
            return Err(HashParseError::Length(bytes.len()));
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }
}

// Hex for JSON and config, raw bytes for the on-disk codec.
impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; HASH_LENGTH]>::deserialize(deserializer).map(Hash)
        }
    }
}

/// Value in base units. Token amounts use the same 8-decimal scale as the native asset.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_sat(sat: u64) -> Self {
        Amount(sat)
    }

    /// Converts a decimal coin value as reported by the node, rounding to the nearest base unit.
    pub fn from_coins(coins: f64) -> Option<Self> {
        if !coins.is_finite() || coins < 0.0 {
            return None;
        }
        let sat = (coins * COIN as f64).round();
        if sat > u64::MAX as f64 {
            return None;
        }
        Some(Amount(sat as u64))
    }

    pub fn sat(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Signed difference, used for fee reporting.
    pub fn signed_diff(self, other: Amount) -> i128 {
        self.0 as i128 - other.0 as i128
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / COIN, self.0 % COIN)
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(name: impl Into<String>) -> Self {
        Currency(name.into())
    }

    pub fn native() -> Self {
        Currency(NATIVE_CURRENCY.to_string())
    }

    pub fn is_native(&self) -> bool {
        self.0 == NATIVE_CURRENCY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::native()
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.0)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Currency {
    fn from(name: &str) -> Self {
        Currency(name.to_string())
    }
}

/// What a timelock threshold is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Height(u64),
    Time(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timelock(pub u64);

impl Timelock {
    pub const NONE: Timelock = Timelock(0);

    pub fn kind(self) -> LockKind {
        if self.0 <= LOCKTIME_THRESHOLD {
            LockKind::Height(self.0)
        } else {
            LockKind::Time(self.0)
        }
    }

    /// True while the output must not count as spendable at the given chain tip.
    pub fn is_locked_at(self, tip_height: u64, tip_time: i64) -> bool {
        match self.kind() {
            LockKind::Height(height) => height > tip_height,
            LockKind::Time(time) => time as i128 > tip_time as i128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Height and hash of the last committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash,
}

// --- Node Data Source payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBlock {
    pub hash: Hash,
    pub height: u64,
    pub previous: Option<Hash>,
    pub time: i64,
    pub merkleroot: String,
    pub chainwork: String,
    pub version: i64,
    pub weight: u64,
    pub bits: String,
    pub nonce: u64,
    pub size: u64,
    pub reward: Amount,
    pub stake: bool,
    pub signature: Option<String>,
    pub tx: Vec<Hash>,
}

impl NodeBlock {
    /// Transactions that get indexed, with their position in the block.
    /// Stake blocks carry an empty placeholder at position 0 instead of a coinbase.
    pub fn indexed_transactions(&self) -> impl Iterator<Item = (u32, &Hash)> + '_ {
        self.tx
            .iter()
            .enumerate()
            .filter(move |(position, _)| !(self.stake && *position == 0))
            .map(|(position, txid)| (position as u32, txid))
    }

    pub fn is_coinbase_position(&self, position: u32) -> bool {
        !self.stake && position == 0
    }

    pub fn is_coinstake_position(&self, position: u32) -> bool {
        self.stake && position == 1
    }

    pub fn tip(&self) -> ChainTip {
        ChainTip {
            height: self.height,
            hash: self.hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeInput {
    /// Synthetic input of a coinbase transaction; spends nothing.
    Coinbase,
    Spend { prevout: OutPoint, sequence: u64 },
}

/// Value carried by an output, resolved once when the node payload is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputValue {
    Native { amount: Amount },
    Token { name: Currency, amount: Amount, timelock: Timelock },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub n: u32,
    pub script_type: String,
    pub script_hex: String,
    pub addresses: Vec<String>,
    pub value: OutputValue,
    /// Script-level timelock; overrides the token's own when present.
    pub timelock: Option<Timelock>,
}

/// An output reduced to what the ledger records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub address: String,
    pub currency: Currency,
    pub amount: Amount,
    pub timelock: Timelock,
}

impl NodeOutput {
    pub fn carries_value(&self) -> bool {
        !NON_VALUE_SCRIPT_TYPES.contains(&self.script_type.as_str())
    }

    /// Returns `None` for outputs that move no value to an address.
    pub fn resolve(&self) -> Option<ResolvedOutput> {
        if !self.carries_value() {
            return None;
        }
        let address = self.addresses.first()?.clone();

        let (currency, amount, token_timelock) = match &self.value {
            OutputValue::Native { amount } => (Currency::native(), *amount, Timelock::NONE),
            OutputValue::Token { name, amount, timelock } => (name.clone(), *amount, *timelock),
        };

        Some(ResolvedOutput {
            address,
            currency,
            amount,
            timelock: self.timelock.unwrap_or(token_timelock),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTransaction {
    pub txid: Hash,
    pub time: Option<i64>,
    pub locktime: u32,
    pub size: u64,
    pub amount: Amount,
    pub inputs: Vec<NodeInput>,
    pub outputs: Vec<NodeOutput>,
}
