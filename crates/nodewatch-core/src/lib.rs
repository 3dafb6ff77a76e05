pub mod config;
pub mod error;
pub mod notify;
pub mod rpc;
pub mod session;
pub(crate) mod transport;
pub mod types;

#[cfg(test)]
mod test_util;

pub use config::{ConnectionConfig, ReconnectPolicy};
pub use error::{ConnectError, CoreError, DispatchError, RpcError};
pub use notify::{NoopHandlers, Notification, NotificationHandlers, NotificationKind};
pub use rpc::{HttpPostClient, NodeRpc};
pub use session::{Client, SessionState, Subscription};
pub use types::{BlockDetails, BlockHeight, BlockStamp, TxFilter, TxRawResult};
