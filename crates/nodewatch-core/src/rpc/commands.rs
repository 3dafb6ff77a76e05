//! Method names and result decoding for the commands this client issues.

use std::collections::HashMap;

use bitcoin::{BlockHash, SignedAmount};

use crate::error::{CoreError, RpcError};
use crate::types::BlockHeight;

use super::types::ChainInfo;

pub const GET_BLOCK_COUNT: &str = "getblockcount";
pub const GET_BEST_BLOCK_HASH: &str = "getbestblockhash";
pub const GET_BLOCKCHAIN_INFO: &str = "getblockchaininfo";
pub const LIST_ACCOUNTS: &str = "listaccounts";
pub const SESSION: &str = "session";
pub const NOTIFY_BLOCKS: &str = "notifyblocks";
pub const STOP_NOTIFY_BLOCKS: &str = "stopnotifyblocks";
pub const NOTIFY_NEW_TRANSACTIONS: &str = "notifynewtransactions";
pub const STOP_NOTIFY_NEW_TRANSACTIONS: &str = "stopnotifynewtransactions";
pub const LOAD_TX_FILTER: &str = "loadtxfilter";
pub const RESCAN_BLOCKS: &str = "rescanblocks";

/// Commands btcd only accepts on a websocket connection.
const WEBSOCKET_ONLY: &[&str] = &[
    SESSION,
    NOTIFY_BLOCKS,
    STOP_NOTIFY_BLOCKS,
    NOTIFY_NEW_TRANSACTIONS,
    STOP_NOTIFY_NEW_TRANSACTIONS,
    LOAD_TX_FILTER,
    RESCAN_BLOCKS,
    "notifyreceived",
    "stopnotifyreceived",
    "notifyspent",
    "stopnotifyspent",
    "rescan",
];

pub(crate) fn requires_websocket(method: &str) -> bool {
    WEBSOCKET_ONLY.contains(&method)
}

pub(crate) fn parse_block_count(raw: serde_json::Value) -> Result<BlockHeight, CoreError> {
    let n = raw.as_u64().ok_or_else(|| invalid(GET_BLOCK_COUNT, &raw))?;
    u32::try_from(n)
        .map(BlockHeight)
        .map_err(|_| RpcError::InvalidResponse(format!("block count out of range: {n}")).into())
}

pub(crate) fn parse_block_hash(raw: serde_json::Value) -> Result<BlockHash, CoreError> {
    let s = raw.as_str().ok_or_else(|| invalid(GET_BEST_BLOCK_HASH, &raw))?;
    s.parse()
        .map_err(|e| RpcError::InvalidResponse(format!("invalid block hash `{s}`: {e}")).into())
}

pub(crate) fn parse_chain_info(raw: serde_json::Value) -> Result<ChainInfo, CoreError> {
    serde_json::from_value(raw).map_err(|e| {
        RpcError::InvalidResponse(format!("invalid {GET_BLOCKCHAIN_INFO} result: {e}")).into()
    })
}

/// `listaccounts` returns `{"label": <BTC float>, ...}`; balances may be
/// negative for accounts that moved funds internally.
pub(crate) fn parse_accounts(
    raw: serde_json::Value,
) -> Result<HashMap<String, SignedAmount>, CoreError> {
    let map = raw.as_object().ok_or_else(|| invalid(LIST_ACCOUNTS, &raw))?;
    map.iter()
        .map(|(label, value)| {
            let btc = value.as_f64().ok_or_else(|| invalid(LIST_ACCOUNTS, value))?;
            let amount = SignedAmount::from_btc(btc).map_err(|e| {
                RpcError::InvalidResponse(format!("invalid balance for `{label}`: {e}"))
            })?;
            Ok((label.clone(), amount))
        })
        .collect()
}

pub(crate) fn parse_session_id(raw: serde_json::Value) -> Result<u64, CoreError> {
    raw.get("sessionid")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| invalid(SESSION, &raw))
}

fn invalid(method: &str, raw: &serde_json::Value) -> CoreError {
    RpcError::InvalidResponse(format!("unexpected {method} result: {raw}")).into()
}
