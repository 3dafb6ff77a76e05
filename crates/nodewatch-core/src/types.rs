//! Domain types shared by the RPC engine, the notification dispatcher, and
//! the session controller.
//!
//! Contains block stamps and block details carried by notifications, the
//! verbose transaction result pushed by `txacceptedverbose`, and the
//! transaction filter loaded with `loadtxfilter`.

use std::collections::HashSet;

use bitcoin::consensus::encode;
use bitcoin::hex::FromHex;
use bitcoin::{Address, BlockHash, OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ==============================================================================
// Block Height
// ==============================================================================

/// A block height, wrapped for type safety.
///
/// `#[serde(transparent)]` keeps the JSON representation a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u32);

impl From<u32> for BlockHeight {
    fn from(h: u32) -> Self {
        Self(h)
    }
}

impl From<BlockHeight> for u32 {
    fn from(h: BlockHeight) -> Self {
        h.0
    }
}

impl std::ops::Deref for BlockHeight {
    type Target = u32;
    fn deref(&self) -> &u32 {
        &self.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// Block Stamps
// ==============================================================================

/// Hash, height, and timestamp of a block, as carried by `blockconnected`,
/// `blockdisconnected`, `rescanprogress`, and `rescanfinished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStamp {
    pub hash: BlockHash,
    pub height: BlockHeight,
    pub time: OffsetDateTime,
}

/// Where a relevant transaction was mined. Absent for mempool transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDetails {
    pub height: BlockHeight,
    pub hash: BlockHash,
    /// Position of the transaction within the block.
    pub index: u32,
    pub time: OffsetDateTime,
}

// ==============================================================================
// Verbose Transactions
// ==============================================================================

/// Verbose transaction description pushed by `txacceptedverbose`.
///
/// Inputs and outputs are kept as raw JSON; the serialized transaction in
/// `hex` is the authoritative form and decodes via [`TxRawResult::transaction`].
#[derive(Debug, Clone, Deserialize)]
pub struct TxRawResult {
    pub hex: String,
    pub txid: Txid,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub vsize: u64,
    #[serde(default)]
    pub weight: u64,
    pub version: i32,
    pub locktime: u32,
    #[serde(default)]
    pub vin: Vec<serde_json::Value>,
    #[serde(default)]
    pub vout: Vec<serde_json::Value>,
    #[serde(default)]
    pub blockhash: Option<BlockHash>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub blocktime: Option<i64>,
}

impl TxRawResult {
    pub fn transaction(&self) -> Result<Transaction, String> {
        decode_hex(&self.hex)
    }
}

/// Decode a hex-encoded, consensus-serialized bitcoin object.
pub(crate) fn decode_hex<T: encode::Decodable>(hex: &str) -> Result<T, String> {
    let bytes = Vec::<u8>::from_hex(hex).map_err(|e| format!("invalid hex: {e}"))?;
    encode::deserialize(&bytes).map_err(|e| format!("invalid encoding: {e}"))
}

// ==============================================================================
// Transaction Filter
// ==============================================================================

/// Addresses and outpoints the node watches on behalf of this client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxFilter {
    pub addresses: Vec<Address>,
    pub outpoints: Vec<OutPoint>,
}

impl TxFilter {
    pub fn new(addresses: Vec<Address>, outpoints: Vec<OutPoint>) -> Self {
        Self {
            addresses,
            outpoints,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.outpoints.is_empty()
    }

    /// Union with `other`, keeping first-seen order and dropping duplicates.
    pub fn merge(&mut self, other: &TxFilter) {
        let known: HashSet<String> = self.addresses.iter().map(ToString::to_string).collect();
        for addr in &other.addresses {
            if !known.contains(&addr.to_string()) {
                self.addresses.push(addr.clone());
            }
        }

        let known: HashSet<OutPoint> = self.outpoints.iter().copied().collect();
        self.outpoints
            .extend(other.outpoints.iter().filter(|op| !known.contains(op)).copied());
    }

    /// `loadtxfilter` params: `[reload, [address...], [{hash, index}...]]`.
    pub(crate) fn to_params(&self, reload: bool) -> Vec<serde_json::Value> {
        let addresses: Vec<String> = self.addresses.iter().map(ToString::to_string).collect();
        let outpoints: Vec<serde_json::Value> = self
            .outpoints
            .iter()
            .map(|op| serde_json::json!({ "hash": op.txid.to_string(), "index": op.vout }))
            .collect();
        vec![
            serde_json::json!(reload),
            serde_json::json!(addresses),
            serde_json::json!(outpoints),
        ]
    }
}
