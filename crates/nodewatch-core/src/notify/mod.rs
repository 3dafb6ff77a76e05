//! Push notification decoding and delivery.
//!
//! Frames without a correlation id are decoded into [`Notification`]s and
//! handed to the caller's [`NotificationHandlers`] implementation. Callers
//! override only the methods for the kinds they care about; every other
//! kind falls through to a no-op default.

pub(crate) mod dispatcher;
mod notification;
mod parse;

pub use notification::{Notification, NotificationKind};
pub use notification::{
    ACCOUNT_BALANCE, BLOCK_CONNECTED, BLOCK_DISCONNECTED, BTCD_CONNECTED,
    FILTERED_BLOCK_CONNECTED, FILTERED_BLOCK_DISCONNECTED, RECV_TX, REDEEMING_TX,
    RELEVANT_TX_ACCEPTED, RESCAN_FINISHED, RESCAN_PROGRESS, TX_ACCEPTED, TX_ACCEPTED_VERBOSE,
    WALLET_LOCK_STATE,
};

use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::{Amount, SignedAmount, Transaction, Txid};

use crate::types::{BlockDetails, BlockHeight, BlockStamp, TxRawResult};

/// Callbacks for node notifications, one method per kind.
///
/// Handlers run on dispatcher-owned tasks, never on the socket read loop.
/// Calls for the same kind are serialized in arrival order; calls for
/// different kinds may run concurrently.
///
/// Most kinds only arrive after the matching subscription call:
/// block kinds after `notify_blocks`, `txaccepted*` after
/// `notify_new_transactions`, and `relevanttxaccepted` plus the filtered
/// block kinds after `load_tx_filter`.
#[async_trait]
pub trait NotificationHandlers: Send + Sync + 'static {
    /// The websocket (re)connected and subscriptions were replayed.
    async fn on_client_connected(&self) {}

    async fn on_block_connected(&self, _block: &BlockStamp) {}

    async fn on_block_disconnected(&self, _block: &BlockStamp) {}

    async fn on_filtered_block_connected(
        &self,
        _height: BlockHeight,
        _header: &Header,
        _txs: &[Transaction],
    ) {
    }

    async fn on_filtered_block_disconnected(&self, _height: BlockHeight, _header: &Header) {}

    /// A transaction paid to a watched address.
    async fn on_recv_tx(&self, _tx: &Transaction, _block: Option<&BlockDetails>) {}

    /// A transaction spent a watched outpoint.
    async fn on_redeeming_tx(&self, _tx: &Transaction, _block: Option<&BlockDetails>) {}

    /// A mempool transaction matched the loaded filter. Raw consensus bytes.
    async fn on_relevant_tx_accepted(&self, _raw: &[u8]) {}

    async fn on_tx_accepted(&self, _txid: &Txid, _amount: Amount) {}

    async fn on_tx_accepted_verbose(&self, _details: &TxRawResult) {}

    async fn on_rescan_progress(&self, _block: &BlockStamp) {}

    async fn on_rescan_finished(&self, _block: &BlockStamp) {}

    /// Wallet-server only: whether the wallet is connected to its node.
    async fn on_btcd_connected(&self, _connected: bool) {}

    async fn on_account_balance(&self, _account: &str, _balance: SignedAmount, _confirmed: bool) {}

    async fn on_wallet_lock_state(&self, _locked: bool) {}

    /// Catch-all for methods this client does not model.
    async fn on_unknown_notification(&self, _method: &str, _params: &[serde_json::Value]) {}
}

/// A handler set that ignores everything.
pub struct NoopHandlers;

impl NotificationHandlers for NoopHandlers {}

pub(crate) async fn deliver(handlers: &dyn NotificationHandlers, notification: Notification) {
    match notification {
        Notification::ClientConnected => handlers.on_client_connected().await,
        Notification::BlockConnected(block) => handlers.on_block_connected(&block).await,
        Notification::BlockDisconnected(block) => handlers.on_block_disconnected(&block).await,
        Notification::FilteredBlockConnected {
            height,
            header,
            txs,
        } => {
            handlers
                .on_filtered_block_connected(height, &header, &txs)
                .await
        }
        Notification::FilteredBlockDisconnected { height, header } => {
            handlers.on_filtered_block_disconnected(height, &header).await
        }
        Notification::RecvTx { tx, block } => handlers.on_recv_tx(&tx, block.as_ref()).await,
        Notification::RedeemingTx { tx, block } => {
            handlers.on_redeeming_tx(&tx, block.as_ref()).await
        }
        Notification::RelevantTxAccepted { raw } => handlers.on_relevant_tx_accepted(&raw).await,
        Notification::TxAccepted { txid, amount } => handlers.on_tx_accepted(&txid, amount).await,
        Notification::TxAcceptedVerbose(details) => {
            handlers.on_tx_accepted_verbose(&details).await
        }
        Notification::RescanProgress(block) => handlers.on_rescan_progress(&block).await,
        Notification::RescanFinished(block) => handlers.on_rescan_finished(&block).await,
        Notification::BtcdConnected { connected } => handlers.on_btcd_connected(connected).await,
        Notification::AccountBalance {
            account,
            balance,
            confirmed,
        } => {
            handlers
                .on_account_balance(&account, balance, confirmed)
                .await
        }
        Notification::WalletLockState { locked } => handlers.on_wallet_lock_state(locked).await,
        Notification::Unknown { method, params } => {
            handlers.on_unknown_notification(&method, &params).await
        }
    }
}
