use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::{Amount, SignedAmount, Transaction, Txid};
use time::format_description::well_known::Rfc3339;

use nodewatch_core::{BlockDetails, BlockHeight, BlockStamp, NotificationHandlers, TxRawResult};

/// Logs one line per notification.
pub struct LoggingHandlers;

fn timestamp(block: &BlockStamp) -> String {
    block
        .time
        .format(&Rfc3339)
        .unwrap_or_else(|_| block.time.unix_timestamp().to_string())
}

#[async_trait]
impl NotificationHandlers for LoggingHandlers {
    async fn on_client_connected(&self) {
        tracing::info!("client connected");
    }

    async fn on_block_connected(&self, block: &BlockStamp) {
        tracing::info!(hash = %block.hash, height = %block.height, time = %timestamp(block), "block connected");
    }

    async fn on_block_disconnected(&self, block: &BlockStamp) {
        tracing::info!(hash = %block.hash, height = %block.height, time = %timestamp(block), "block disconnected");
    }

    async fn on_filtered_block_connected(
        &self,
        height: BlockHeight,
        header: &Header,
        txs: &[Transaction],
    ) {
        let txids: Vec<Txid> = txs.iter().map(Transaction::compute_txid).collect();
        tracing::info!(
            %height,
            hash = %header.block_hash(),
            ?txids,
            "filtered block connected"
        );
    }

    async fn on_filtered_block_disconnected(&self, height: BlockHeight, header: &Header) {
        tracing::info!(%height, hash = %header.block_hash(), "filtered block disconnected");
    }

    async fn on_recv_tx(&self, tx: &Transaction, block: Option<&BlockDetails>) {
        tracing::info!(
            txid = %tx.compute_txid(),
            height = ?block.map(|b| b.height.0),
            "received transaction"
        );
    }

    async fn on_redeeming_tx(&self, tx: &Transaction, block: Option<&BlockDetails>) {
        tracing::info!(
            txid = %tx.compute_txid(),
            height = ?block.map(|b| b.height.0),
            "redeeming transaction"
        );
    }

    async fn on_relevant_tx_accepted(&self, raw: &[u8]) {
        tracing::info!(bytes = raw.len(), "relevant transaction accepted");
    }

    async fn on_tx_accepted(&self, txid: &Txid, amount: Amount) {
        tracing::info!(%txid, %amount, "transaction accepted");
    }

    async fn on_tx_accepted_verbose(&self, details: &TxRawResult) {
        tracing::info!(
            txid = %details.txid,
            vsize = details.vsize,
            outputs = details.vout.len(),
            "transaction accepted (verbose)"
        );
    }

    async fn on_rescan_progress(&self, block: &BlockStamp) {
        tracing::info!(hash = %block.hash, height = %block.height, "rescan progress");
    }

    async fn on_rescan_finished(&self, block: &BlockStamp) {
        tracing::info!(hash = %block.hash, height = %block.height, "rescan finished");
    }

    async fn on_btcd_connected(&self, connected: bool) {
        tracing::info!(connected, "btcd connection state");
    }

    async fn on_account_balance(&self, account: &str, balance: SignedAmount, confirmed: bool) {
        tracing::info!(account, %balance, confirmed, "account balance");
    }

    async fn on_wallet_lock_state(&self, locked: bool) {
        tracing::info!(locked, "wallet lock state");
    }

    async fn on_unknown_notification(&self, method: &str, params: &[serde_json::Value]) {
        tracing::info!(method, params = params.len(), "unknown notification");
    }
}
