use bitcoin::block::Header;
use bitcoin::{Amount, SignedAmount, Transaction, Txid};

use crate::types::{BlockDetails, BlockHeight, BlockStamp, TxRawResult};

pub const BLOCK_CONNECTED: &str = "blockconnected";
pub const BLOCK_DISCONNECTED: &str = "blockdisconnected";
pub const FILTERED_BLOCK_CONNECTED: &str = "filteredblockconnected";
pub const FILTERED_BLOCK_DISCONNECTED: &str = "filteredblockdisconnected";
pub const RECV_TX: &str = "recvtx";
pub const REDEEMING_TX: &str = "redeemingtx";
pub const RELEVANT_TX_ACCEPTED: &str = "relevanttxaccepted";
pub const TX_ACCEPTED: &str = "txaccepted";
pub const TX_ACCEPTED_VERBOSE: &str = "txacceptedverbose";
pub const RESCAN_PROGRESS: &str = "rescanprogress";
pub const RESCAN_FINISHED: &str = "rescanfinished";
pub const BTCD_CONNECTED: &str = "btcdconnected";
pub const ACCOUNT_BALANCE: &str = "accountbalance";
pub const WALLET_LOCK_STATE: &str = "walletlockstate";

/// A decoded push notification.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Emitted locally after every successful (re)connect.
    ClientConnected,
    BlockConnected(BlockStamp),
    BlockDisconnected(BlockStamp),
    FilteredBlockConnected {
        height: BlockHeight,
        header: Header,
        /// Transactions in the block matching the loaded filter.
        txs: Vec<Transaction>,
    },
    FilteredBlockDisconnected {
        height: BlockHeight,
        header: Header,
    },
    RecvTx {
        tx: Transaction,
        block: Option<BlockDetails>,
    },
    RedeemingTx {
        tx: Transaction,
        block: Option<BlockDetails>,
    },
    RelevantTxAccepted {
        raw: Vec<u8>,
    },
    TxAccepted {
        txid: Txid,
        amount: Amount,
    },
    TxAcceptedVerbose(Box<TxRawResult>),
    RescanProgress(BlockStamp),
    RescanFinished(BlockStamp),
    BtcdConnected {
        connected: bool,
    },
    AccountBalance {
        account: String,
        balance: SignedAmount,
        confirmed: bool,
    },
    WalletLockState {
        locked: bool,
    },
    Unknown {
        method: String,
        params: Vec<serde_json::Value>,
    },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::ClientConnected => NotificationKind::ClientConnected,
            Self::BlockConnected(_) => NotificationKind::BlockConnected,
            Self::BlockDisconnected(_) => NotificationKind::BlockDisconnected,
            Self::FilteredBlockConnected { .. } => NotificationKind::FilteredBlockConnected,
            Self::FilteredBlockDisconnected { .. } => NotificationKind::FilteredBlockDisconnected,
            Self::RecvTx { .. } => NotificationKind::RecvTx,
            Self::RedeemingTx { .. } => NotificationKind::RedeemingTx,
            Self::RelevantTxAccepted { .. } => NotificationKind::RelevantTxAccepted,
            Self::TxAccepted { .. } => NotificationKind::TxAccepted,
            Self::TxAcceptedVerbose(_) => NotificationKind::TxAcceptedVerbose,
            Self::RescanProgress(_) => NotificationKind::RescanProgress,
            Self::RescanFinished(_) => NotificationKind::RescanFinished,
            Self::BtcdConnected { .. } => NotificationKind::BtcdConnected,
            Self::AccountBalance { .. } => NotificationKind::AccountBalance,
            Self::WalletLockState { .. } => NotificationKind::WalletLockState,
            Self::Unknown { .. } => NotificationKind::Unknown,
        }
    }
}

/// Event kinds, each delivered through its own ordered queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    ClientConnected,
    BlockConnected,
    BlockDisconnected,
    FilteredBlockConnected,
    FilteredBlockDisconnected,
    RecvTx,
    RedeemingTx,
    RelevantTxAccepted,
    TxAccepted,
    TxAcceptedVerbose,
    RescanProgress,
    RescanFinished,
    BtcdConnected,
    AccountBalance,
    WalletLockState,
    Unknown,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ClientConnected => "clientconnected",
            Self::BlockConnected => BLOCK_CONNECTED,
            Self::BlockDisconnected => BLOCK_DISCONNECTED,
            Self::FilteredBlockConnected => FILTERED_BLOCK_CONNECTED,
            Self::FilteredBlockDisconnected => FILTERED_BLOCK_DISCONNECTED,
            Self::RecvTx => RECV_TX,
            Self::RedeemingTx => REDEEMING_TX,
            Self::RelevantTxAccepted => RELEVANT_TX_ACCEPTED,
            Self::TxAccepted => TX_ACCEPTED,
            Self::TxAcceptedVerbose => TX_ACCEPTED_VERBOSE,
            Self::RescanProgress => RESCAN_PROGRESS,
            Self::RescanFinished => RESCAN_FINISHED,
            Self::BtcdConnected => BTCD_CONNECTED,
            Self::AccountBalance => ACCOUNT_BALANCE,
            Self::WalletLockState => WALLET_LOCK_STATE,
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
