//! Wire format of the node's JSON-RPC responses.

use serde::Deserialize;
use tally_common::error::NodeError;
use tally_common::types::{
    Amount, Currency, Hash, NodeBlock, NodeInput, NodeOutput, NodeTransaction, OutPoint,
    OutputValue, Timelock,
};

pub const GET_BLOCK: &str = "getblock";
pub const GET_RAW_TRANSACTION: &str = "getrawtransaction";

/// `getblock <hash> 1`
#[derive(Debug, Deserialize)]
pub struct RpcBlock {
    pub hash: Hash,
    pub height: u64,
    #[serde(default)]
    pub previousblockhash: Option<Hash>,
    pub time: i64,
    #[serde(default)]
    pub merkleroot: String,
    #[serde(default)]
    pub chainwork: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub bits: String,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub size: u64,
    /// Base units.
    #[serde(default)]
    pub reward: u64,
    #[serde(default)]
    pub stake: bool,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub tx: Vec<Hash>,
}

impl From<RpcBlock> for NodeBlock {
    fn from(block: RpcBlock) -> Self {
        NodeBlock {
            hash: block.hash,
            height: block.height,
            previous: block.previousblockhash,
            time: block.time,
            merkleroot: block.merkleroot,
            chainwork: block.chainwork,
            version: block.version,
            weight: block.weight,
            bits: block.bits,
            nonce: block.nonce,
            size: block.size,
            reward: Amount::from_sat(block.reward),
            stake: block.stake,
            signature: block.signature,
            tx: block.tx,
        }
    }
}

/// `getrawtransaction <txid> true`
#[derive(Debug, Deserialize)]
pub struct RpcTransaction {
    pub txid: Hash,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub locktime: u32,
    #[serde(default)]
    pub size: u64,
    /// Base units.
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub vin: Vec<RpcInput>,
    #[serde(default)]
    pub vout: Vec<RpcOutput>,
}

#[derive(Debug, Deserialize)]
pub struct RpcInput {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<Hash>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Deserialize)]
pub struct RpcOutput {
    pub n: u32,
    #[serde(rename = "valueSat", default)]
    pub value_sat: u64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScript,
}

#[derive(Debug, Deserialize)]
pub struct RpcScript {
    #[serde(rename = "type")]
    pub script_type: String,
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub token: Option<RpcToken>,
    #[serde(default)]
    pub timelock: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RpcToken {
    pub name: String,
    /// Whole coins with up to 8 decimals.
    pub amount: f64,
    #[serde(default)]
    pub timelock: u64,
}

impl TryFrom<RpcInput> for NodeInput {
    type Error = NodeError;

    fn try_from(input: RpcInput) -> Result<Self, Self::Error> {
        if input.coinbase.is_some() {
            return Ok(NodeInput::Coinbase);
        }
        match (input.txid, input.vout) {
            (Some(txid), Some(vout)) => Ok(NodeInput::Spend {
                prevout: OutPoint::new(txid, vout),
                sequence: input.sequence,
            }),
            _ => Err(NodeError::malformed(
                GET_RAW_TRANSACTION,
                "input has neither coinbase nor txid/vout",
            )),
        }
    }
}

impl TryFrom<RpcOutput> for NodeOutput {
    type Error = NodeError;

    fn try_from(output: RpcOutput) -> Result<Self, Self::Error> {
        let script = output.script_pub_key;
        let value = match script.token {
            Some(token) => {
                let amount = Amount::from_coins(token.amount).ok_or_else(|| {
                    NodeError::malformed(
                        GET_RAW_TRANSACTION,
                        format!("token {} has invalid amount {}", token.name, token.amount),
                    )
                })?;
                OutputValue::Token {
                    name: Currency::new(token.name),
                    amount,
                    timelock: Timelock(token.timelock),
                }
            }
            None => OutputValue::Native {
                amount: Amount::from_sat(output.value_sat),
            },
        };

        Ok(NodeOutput {
            n: output.n,
            script_type: script.script_type,
            script_hex: script.hex,
            addresses: script.addresses,
            value,
            timelock: script.timelock.map(Timelock),
        })
    }
}

impl TryFrom<RpcTransaction> for NodeTransaction {
    type Error = NodeError;

    fn try_from(tx: RpcTransaction) -> Result<Self, Self::Error> {
        let inputs = tx
            .vin
            .into_iter()
            .map(NodeInput::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = tx
            .vout
            .into_iter()
            .map(NodeOutput::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NodeTransaction {
            txid: tx.txid,
            time: tx.time,
            locktime: tx.locktime,
            size: tx.size,
            amount: Amount::from_sat(tx.amount),
            inputs,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hash_hex(byte: u8) -> String {
        Hash([byte; 32]).to_string()
    }

    #[test]
    fn test_parse_block() {
        let raw = json!({
            "hash": hash_hex(2),
            "height": 2,
            "previousblockhash": hash_hex(1),
            "time": 1_600_000_000,
            "merkleroot": "aa",
            "chainwork": "0000ff",
            "version": 536870912,
            "weight": 800,
            "bits": "1d00ffff",
            "nonce": 42,
            "size": 200,
            "reward": 400_000_000u64,
            "stake": true,
            "signature": "3045",
            "tx": [hash_hex(3), hash_hex(4)]
        });
        let block: NodeBlock = serde_json::from_value::<RpcBlock>(raw).unwrap().into();
        assert_eq!(block.height, 2);
        assert_eq!(block.previous, Some(Hash([1; 32])));
        assert_eq!(block.reward, Amount(400_000_000));
        assert!(block.stake);
        assert_eq!(block.signature.as_deref(), Some("3045"));
        assert_eq!(block.tx.len(), 2);
    }

    #[test]
    fn test_parse_transaction_with_token_and_coinbase() {
        let raw = json!({
            "txid": hash_hex(9),
            "time": 1_600_000_000,
            "locktime": 0,
            "size": 120,
            "amount": 150_000_000u64,
            "vin": [
                {"coinbase": "03a0860100", "sequence": 4294967295u64},
                {"txid": hash_hex(8), "vout": 1, "sequence": 4294967294u64}
            ],
            "vout": [
                {"n": 0, "valueSat": 100_000_000u64, "scriptPubKey": {
                    "type": "pubkeyhash", "hex": "76a9", "addresses": ["PAlice"]
                }},
                {"n": 1, "valueSat": 0, "scriptPubKey": {
                    "type": "transfer_token", "hex": "76a9", "addresses": ["PBob"],
                    "token": {"name": "GOLD", "amount": 2.5, "timelock": 10},
                    "timelock": 20
                }},
                {"n": 2, "valueSat": 0, "scriptPubKey": {"type": "nulldata", "hex": "6a"}}
            ]
        });
        let tx = NodeTransaction::try_from(serde_json::from_value::<RpcTransaction>(raw).unwrap()).unwrap();

        assert_eq!(tx.inputs[0], NodeInput::Coinbase);
        assert_eq!(
            tx.inputs[1],
            NodeInput::Spend {
                prevout: OutPoint::new(Hash([8; 32]), 1),
                sequence: 4294967294,
            }
        );

        let token = tx.outputs[1].resolve().unwrap();
        assert_eq!(token.currency, Currency::from("GOLD"));
        assert_eq!(token.amount, Amount(250_000_000));
        assert_eq!(token.timelock, Timelock(20));

        assert_eq!(tx.outputs[0].resolve().unwrap().amount, Amount(100_000_000));
        assert!(tx.outputs[2].resolve().is_none());
    }

    #[test]
    fn test_input_without_reference_is_malformed() {
        let input: RpcInput = serde_json::from_value(json!({"sequence": 1})).unwrap();
        assert!(matches!(
            NodeInput::try_from(input),
            Err(NodeError::Malformed { .. })
        ));
    }
}
