//! JSON-RPC layer shared by the websocket session and HTTP POST mode.
//!
//! Defines the [`NodeRpc`] trait, the request/response engine that backs
//! websocket calls, and an HTTP POST implementation ([`HttpPostClient`]).

pub mod commands;
pub(crate) mod engine;
mod http;
pub(crate) mod pending;
pub(crate) mod protocol;
pub mod types;

pub use http::HttpPostClient;
pub use types::ChainInfo;

use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::{BlockHash, SignedAmount};

use crate::error::CoreError;
use crate::types::BlockHeight;

/// Request/response access to a btcd-compatible node.
///
/// Implementations handle framing, authentication, and correlation; typed
/// helpers decode results of the handful of commands this client needs.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Issue `method` with positional `params` and return the raw result.
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError>;

    async fn get_block_count(&self) -> Result<BlockHeight, CoreError> {
        let raw = self.call(commands::GET_BLOCK_COUNT, Vec::new()).await?;
        commands::parse_block_count(raw)
    }

    async fn get_best_block_hash(&self) -> Result<BlockHash, CoreError> {
        let raw = self.call(commands::GET_BEST_BLOCK_HASH, Vec::new()).await?;
        commands::parse_block_hash(raw)
    }

    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        let raw = self.call(commands::GET_BLOCKCHAIN_INFO, Vec::new()).await?;
        commands::parse_chain_info(raw)
    }

    /// Account balances from the wallet attached to the node.
    async fn list_accounts(&self) -> Result<HashMap<String, SignedAmount>, CoreError> {
        let raw = self.call(commands::LIST_ACCOUNTS, Vec::new()).await?;
        commands::parse_accounts(raw)
    }
}
