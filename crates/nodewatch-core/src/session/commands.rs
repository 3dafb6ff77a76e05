use tracing::info;

use crate::error::CoreError;
use crate::rpc::commands::{self, parse_session_id};
use crate::rpc::NodeRpc;
use crate::types::TxFilter;

use super::{Client, Subscription};

/// Notification subscriptions. Each method records the subscription only
/// after the node accepts it, so a reconnect replays exactly what the node
/// agreed to.
impl Client {
    /// Replace the node-side transaction filter with `filter`.
    ///
    /// Enables `relevanttxaccepted` and the filtered block notifications.
    /// Loading the same filter twice leaves the node in the same state.
    pub async fn load_tx_filter(&self, filter: TxFilter) -> Result<(), CoreError> {
        self.call(commands::LOAD_TX_FILTER, filter.to_params(true))
            .await?;
        info!(
            addresses = filter.addresses.len(),
            outpoints = filter.outpoints.len(),
            "transaction filter loaded"
        );
        self.update_subscription(|sub| sub.replace_filter(filter));
        Ok(())
    }

    /// Add addresses and outpoints to the existing filter.
    pub async fn extend_tx_filter(&self, filter: TxFilter) -> Result<(), CoreError> {
        self.call(commands::LOAD_TX_FILTER, filter.to_params(false))
            .await?;
        self.update_subscription(|sub| sub.extend_filter(&filter));
        Ok(())
    }

    pub async fn notify_blocks(&self) -> Result<(), CoreError> {
        self.call(commands::NOTIFY_BLOCKS, Vec::new()).await?;
        self.update_subscription(|sub| sub.blocks = true);
        Ok(())
    }

    pub async fn stop_notify_blocks(&self) -> Result<(), CoreError> {
        self.call(commands::STOP_NOTIFY_BLOCKS, Vec::new()).await?;
        self.update_subscription(|sub| sub.blocks = false);
        Ok(())
    }

    /// Subscribe to every transaction entering the mempool. `verbose`
    /// selects `txacceptedverbose` over `txaccepted`.
    pub async fn notify_new_transactions(&self, verbose: bool) -> Result<(), CoreError> {
        self.call(
            commands::NOTIFY_NEW_TRANSACTIONS,
            vec![serde_json::json!(verbose)],
        )
        .await?;
        self.update_subscription(|sub| sub.new_transactions = Some(verbose));
        Ok(())
    }

    pub async fn stop_notify_new_transactions(&self) -> Result<(), CoreError> {
        self.call(commands::STOP_NOTIFY_NEW_TRANSACTIONS, Vec::new())
            .await?;
        self.update_subscription(|sub| sub.new_transactions = None);
        Ok(())
    }

    /// The node's id for this websocket session. Changes after a reconnect.
    pub async fn session_id(&self) -> Result<u64, CoreError> {
        let raw = self.call(commands::SESSION, Vec::new()).await?;
        parse_session_id(raw)
    }

    fn update_subscription(&self, apply: impl FnOnce(&mut Subscription)) {
        let mut sub = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        apply(&mut sub);
    }
}
