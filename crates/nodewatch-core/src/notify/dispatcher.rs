use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::notification::{Notification, NotificationKind};
use super::parse::parse_notification;
use super::{deliver, NotificationHandlers};

tokio::task_local! {
    static DELIVERING: NotificationKind;
}

/// Whether the current task is a dispatcher worker running a handler.
pub(crate) fn in_handler() -> bool {
    DELIVERING.try_with(|_| ()).is_ok()
}

/// Routes decoded notifications to the registered handlers.
///
/// Each kind gets its own unbounded queue drained by a dedicated task, so
/// delivery is ordered within a kind and a slow handler only delays its own
/// kind. Enqueueing never awaits, which keeps the read loop free of
/// head-of-line blocking.
pub(crate) struct Dispatcher {
    handlers: Arc<dyn NotificationHandlers>,
    /// `None` once closed.
    queues: Mutex<Option<HashMap<NotificationKind, mpsc::UnboundedSender<Notification>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub(crate) fn new(handlers: Arc<dyn NotificationHandlers>) -> Self {
        Self {
            handlers,
            queues: Mutex::new(Some(HashMap::new())),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Decode and enqueue a raw push frame. Malformed payloads are logged
    /// and dropped.
    pub(crate) fn dispatch_raw(&self, method: &str, params: Vec<serde_json::Value>) {
        match parse_notification(method, params) {
            Ok(notification) => self.dispatch(notification),
            Err(e) => warn!(notification.method = method, error = %e, "dropping notification"),
        }
    }

    pub(crate) fn dispatch(&self, notification: Notification) {
        let kind = notification.kind();
        // Workers are spawned under this lock, so `close` sees every one.
        let mut guard = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        let Some(queues) = guard.as_mut() else {
            debug!(notification.kind = %kind, "dispatcher closed; dropping");
            return;
        };
        let sender = queues.entry(kind).or_insert_with(|| self.spawn_worker(kind));
        if sender.send(notification).is_err() {
            warn!(notification.kind = %kind, "notification worker is gone; dropping");
        }
    }

    fn spawn_worker(&self, kind: NotificationKind) -> mpsc::UnboundedSender<Notification> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let handlers = Arc::clone(&self.handlers);
        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                debug!(notification.kind = %kind, "delivering notification");
                let delivery = AssertUnwindSafe(deliver(handlers.as_ref(), notification));
                if DELIVERING.scope(kind, delivery.catch_unwind()).await.is_err() {
                    error!(notification.kind = %kind, "notification handler panicked");
                }
            }
        });
        self.workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
        tx
    }

    /// Stop accepting notifications and wait until every queued delivery,
    /// including in-flight handler calls, has finished.
    ///
    /// Must not be awaited from inside a handler: the worker running that
    /// handler would wait on itself.
    pub(crate) async fn close(&self) {
        // Dropping the senders ends each worker once its queue drains.
        self.queues
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "notification worker failed");
            }
        }
    }
}
