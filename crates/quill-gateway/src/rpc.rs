//! Request/response correlation.
//!
//! Every outgoing request gets a strictly increasing numeric id (sent as a
//! string) and a pending entry holding the caller's reply channel and a
//! timeout timer. Whoever removes the entry from the table (a response, the
//! timer, or a connection close) is the one that resolves the call, so each
//! call resolves exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quill_proto::{ErrorCode, ResponseFrame};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::GatewayError;

type Reply = oneshot::Sender<Result<Value, GatewayError>>;
type PendingTable = Arc<Mutex<HashMap<String, PendingCall>>>;

struct PendingCall {
    method: String,
    reply: Reply,
    timer: AbortHandle,
}

/// Tracks in-flight requests.
pub struct RpcCorrelator {
    next_id: AtomicU64,
    pending: PendingTable,
}

impl Default for RpcCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcCorrelator {
    /// Create an empty correlator; the first id handed out is `"1"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Register a pending call and start its timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(&self, id: &str, method: &str, timeout: Duration) -> PendingReply {
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock();
        let table = Arc::clone(&self.pending);
        let timer_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = table.lock().remove(&timer_id);
            if let Some(call) = expired {
                debug!(id = %timer_id, method = %call.method, "request timed out");
                let _ = call.reply.send(Err(GatewayError::Timeout {
                    method: call.method,
                    timeout,
                }));
            }
        })
        .abort_handle();

        if let Some(stale) = pending.insert(
            id.to_string(),
            PendingCall {
                method: method.to_string(),
                reply: tx,
                timer,
            },
        ) {
            warn!(id, "duplicate request id; dropping older call");
            stale.timer.abort();
        }

        PendingReply {
            id: id.to_string(),
            rx,
        }
    }

    /// Resolve the call matching `response`.
    ///
    /// Returns `false` when no call with that id is pending (never issued,
    /// already timed out, or already answered).
    pub fn complete(&self, response: ResponseFrame) -> bool {
        let Some(call) = self.pending.lock().remove(&response.id) else {
            return false;
        };
        call.timer.abort();

        let result = if response.ok {
            Ok(response.payload.unwrap_or(Value::Null))
        } else {
            let error = response.error;
            Err(GatewayError::Rpc {
                code: error
                    .as_ref()
                    .map_or_else(|| ErrorCode::from("UNKNOWN"), |e| e.code.clone()),
                message: error
                    .as_ref()
                    .map_or_else(|| "request failed".to_string(), |e| e.message.clone()),
                data: error.and_then(|e| e.data),
            })
        };

        debug!(id = %response.id, method = %call.method, ok = response.ok, "request completed");
        let _ = call.reply.send(result);
        true
    }

    /// Drop a pending call without resolving it (the caller already has an
    /// error in hand).
    pub fn cancel(&self, id: &str) -> bool {
        match self.pending.lock().remove(id) {
            Some(call) => {
                call.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Reject every pending call with a connection-closed error.
    ///
    /// Returns how many calls were rejected.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingCall)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            call.timer.abort();
            debug!(%id, method = %call.method, "rejecting pending request");
            let _ = call
                .reply
                .send(Err(GatewayError::ConnectionClosed(reason.to_string())));
        }
        count
    }

    /// Whether a call with this id is pending.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no calls are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// The caller's side of a pending call.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<Result<Value, GatewayError>>,
}

impl PendingReply {
    /// Request id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the call to resolve.
    pub async fn wait(self) -> Result<Value, GatewayError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(GatewayError::ConnectionClosed("client dropped".to_string())))
    }
}
