use bitcoin::block::Header;
use bitcoin::hex::FromHex;
use bitcoin::{Amount, BlockHash, SignedAmount, Transaction, Txid};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::DispatchError;
use crate::types::{decode_hex, BlockDetails, BlockHeight, BlockStamp, TxRawResult};

use super::notification::*;

/// Decode the params of a push notification named `method`.
///
/// Methods this client does not model become [`Notification::Unknown`];
/// known methods with unexpected params fail with `MalformedPayload`.
pub(crate) fn parse_notification(
    method: &str,
    params: Vec<Value>,
) -> Result<Notification, DispatchError> {
    let p = Params {
        method,
        params: &params,
    };
    let notification = match method {
        BLOCK_CONNECTED => Notification::BlockConnected(p.block_stamp()?),
        BLOCK_DISCONNECTED => Notification::BlockDisconnected(p.block_stamp()?),
        RESCAN_PROGRESS => Notification::RescanProgress(p.block_stamp()?),
        RESCAN_FINISHED => Notification::RescanFinished(p.block_stamp()?),
        FILTERED_BLOCK_CONNECTED => {
            p.expect_len(3)?;
            let txs = p
                .array(2)?
                .iter()
                .enumerate()
                .map(|(i, raw)| {
                    let hex = raw
                        .as_str()
                        .ok_or_else(|| p.malformed(format!("tx {i} is not a hex string")))?;
                    decode_hex::<Transaction>(hex).map_err(|e| p.malformed(format!("tx {i}: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Notification::FilteredBlockConnected {
                height: p.height(0)?,
                header: p.header(1)?,
                txs,
            }
        }
        FILTERED_BLOCK_DISCONNECTED => {
            p.expect_len(2)?;
            Notification::FilteredBlockDisconnected {
                height: p.height(0)?,
                header: p.header(1)?,
            }
        }
        RECV_TX | REDEEMING_TX => {
            if p.params.is_empty() || p.params.len() > 2 {
                return Err(p.malformed(format!("expected 1 or 2 params, got {}", p.params.len())));
            }
            let tx = p.transaction(0)?;
            let block = match p.params.get(1) {
                None | Some(Value::Null) => None,
                Some(raw) => Some(p.block_details(raw)?),
            };
            if method == RECV_TX {
                Notification::RecvTx { tx, block }
            } else {
                Notification::RedeemingTx { tx, block }
            }
        }
        RELEVANT_TX_ACCEPTED => {
            p.expect_len(1)?;
            let raw = Vec::<u8>::from_hex(p.str(0)?)
                .map_err(|e| p.malformed(format!("invalid hex: {e}")))?;
            Notification::RelevantTxAccepted { raw }
        }
        TX_ACCEPTED => {
            p.expect_len(2)?;
            let txid: Txid = p
                .str(0)?
                .parse()
                .map_err(|e| p.malformed(format!("invalid txid: {e}")))?;
            let btc = p.f64(1)?;
            let amount =
                Amount::from_btc(btc).map_err(|e| p.malformed(format!("invalid amount: {e}")))?;
            Notification::TxAccepted { txid, amount }
        }
        TX_ACCEPTED_VERBOSE => {
            p.expect_len(1)?;
            let details: TxRawResult = serde_json::from_value(p.params[0].clone())
                .map_err(|e| p.malformed(format!("invalid tx details: {e}")))?;
            Notification::TxAcceptedVerbose(Box::new(details))
        }
        BTCD_CONNECTED => {
            p.expect_len(1)?;
            Notification::BtcdConnected {
                connected: p.bool(0)?,
            }
        }
        ACCOUNT_BALANCE => {
            p.expect_len(3)?;
            let balance = SignedAmount::from_btc(p.f64(1)?)
                .map_err(|e| p.malformed(format!("invalid balance: {e}")))?;
            Notification::AccountBalance {
                account: p.str(0)?.to_owned(),
                balance,
                confirmed: p.bool(2)?,
            }
        }
        WALLET_LOCK_STATE => {
            p.expect_len(1)?;
            Notification::WalletLockState { locked: p.bool(0)? }
        }
        _ => Notification::Unknown {
            method: method.to_owned(),
            params,
        },
    };
    Ok(notification)
}

struct Params<'a> {
    method: &'a str,
    params: &'a [Value],
}

impl<'a> Params<'a> {
    fn malformed(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::malformed(self.method, reason)
    }

    fn expect_len(&self, n: usize) -> Result<(), DispatchError> {
        if self.params.len() == n {
            Ok(())
        } else {
            Err(self.malformed(format!(
                "expected {n} params, got {}",
                self.params.len()
            )))
        }
    }

    fn get(&self, i: usize) -> Result<&'a Value, DispatchError> {
        self.params
            .get(i)
            .ok_or_else(|| self.malformed(format!("missing param {i}")))
    }

    fn str(&self, i: usize) -> Result<&'a str, DispatchError> {
        self.get(i)?
            .as_str()
            .ok_or_else(|| self.malformed(format!("param {i} is not a string")))
    }

    fn bool(&self, i: usize) -> Result<bool, DispatchError> {
        self.get(i)?
            .as_bool()
            .ok_or_else(|| self.malformed(format!("param {i} is not a bool")))
    }

    fn f64(&self, i: usize) -> Result<f64, DispatchError> {
        self.get(i)?
            .as_f64()
            .ok_or_else(|| self.malformed(format!("param {i} is not a number")))
    }

    fn array(&self, i: usize) -> Result<&'a Vec<Value>, DispatchError> {
        match self.get(i)? {
            Value::Array(items) => Ok(items),
            // btcd encodes an empty slice as null.
            Value::Null => Ok(&EMPTY),
            _ => Err(self.malformed(format!("param {i} is not an array"))),
        }
    }

    fn height(&self, i: usize) -> Result<BlockHeight, DispatchError> {
        let raw = self.get(i)?;
        height_from(raw).ok_or_else(|| self.malformed(format!("param {i} is not a block height")))
    }

    fn header(&self, i: usize) -> Result<Header, DispatchError> {
        decode_hex::<Header>(self.str(i)?).map_err(|e| self.malformed(format!("header: {e}")))
    }

    fn transaction(&self, i: usize) -> Result<Transaction, DispatchError> {
        decode_hex::<Transaction>(self.str(i)?)
            .map_err(|e| self.malformed(format!("transaction: {e}")))
    }

    /// `[hash, height, unix time]`
    fn block_stamp(&self) -> Result<BlockStamp, DispatchError> {
        self.expect_len(3)?;
        let hash: BlockHash = self
            .str(0)?
            .parse()
            .map_err(|e| self.malformed(format!("invalid block hash: {e}")))?;
        let time = self.unix_time(self.get(2)?)?;
        Ok(BlockStamp {
            hash,
            height: self.height(1)?,
            time,
        })
    }

    /// `{"height": .., "hash": .., "index": .., "time": ..}`
    fn block_details(&self, raw: &Value) -> Result<BlockDetails, DispatchError> {
        let field = |name: &str| {
            raw.get(name)
                .ok_or_else(|| self.malformed(format!("block details missing `{name}`")))
        };
        let height = height_from(field("height")?)
            .ok_or_else(|| self.malformed("block details height out of range"))?;
        let hash: BlockHash = field("hash")?
            .as_str()
            .ok_or_else(|| self.malformed("block details hash is not a string"))?
            .parse()
            .map_err(|e| self.malformed(format!("invalid block details hash: {e}")))?;
        let index = field("index")?
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| self.malformed("block details index out of range"))?;
        Ok(BlockDetails {
            height,
            hash,
            index,
            time: self.unix_time(field("time")?)?,
        })
    }

    fn unix_time(&self, raw: &Value) -> Result<OffsetDateTime, DispatchError> {
        let secs = raw
            .as_i64()
            .ok_or_else(|| self.malformed("timestamp is not an integer"))?;
        OffsetDateTime::from_unix_timestamp(secs)
            .map_err(|e| self.malformed(format!("timestamp out of range: {e}")))
    }
}

static EMPTY: Vec<Value> = Vec::new();

fn height_from(raw: &Value) -> Option<BlockHeight> {
    raw.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .map(BlockHeight)
}
