//! Pending-request table — multiplexes concurrent requests over one
//! stdio channel.
//!
//! Every in-flight request owns a oneshot slot keyed by its id. The
//! handle's reader task resolves slots as response lines arrive, so
//! responses may come back in any order — correlation is strictly by id,
//! never by arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{oneshot, Mutex};

use super::errors::ToolServerError;
use super::types::RpcResponse;

/// The value delivered to a waiting caller.
pub type PendingResult = Result<RpcResponse, ToolServerError>;

/// Per-handle table of in-flight requests.
///
/// Ids are allocated from a counter owned by this table, so they are
/// unique for the lifetime of the process and start fresh after a full
/// restart (a restart builds a new table).
pub struct PendingRequests {
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, oneshot::Sender<PendingResult>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh request id.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a slot for `id` and return the receiver to await.
    pub async fn register(&self, id: u64) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().await;
        slots.insert(id, tx);
        rx
    }

    /// Resolve the slot matching `response.id`.
    ///
    /// Returns `false` if no slot is registered for that id — a late
    /// response racing a timeout or cancellation, discarded by the caller.
    pub async fn complete(&self, response: RpcResponse) -> bool {
        let sender = {
            let mut slots = self.slots.lock().await;
            slots.remove(&response.id)
        };
        match sender {
            Some(tx) => {
                // A dropped receiver (caller gave up) is not an error.
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Remove a slot without resolving it (timeout/cancellation path).
    /// Safe to race against a late-arriving response.
    pub async fn remove(&self, id: u64) {
        let mut slots = self.slots.lock().await;
        slots.remove(&id);
    }

    /// Fail every pending slot. `make_err` builds one error per slot.
    pub async fn fail_all(&self, make_err: impl Fn() -> ToolServerError) {
        let drained: Vec<_> = {
            let mut slots = self.slots.lock().await;
            slots.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(make_err()));
        }
    }

    /// Number of requests currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.slots.lock().await.len()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: u64, payload: &str) -> RpcResponse {
        serde_json::from_str(&format!(
            r#"{{"jsonrpc":"2.0","id":{id},"result":{{"value":"{payload}"}}}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn ids_are_monotonic_from_one() {
        let pending = PendingRequests::new();
        assert_eq!(pending.allocate_id(), 1);
        assert_eq!(pending.allocate_id(), 2);
        assert_eq!(pending.allocate_id(), 3);
    }

    #[tokio::test]
    async fn out_of_order_responses_resolve_matching_callers() {
        let pending = PendingRequests::new();
        let id1 = pending.allocate_id();
        let id2 = pending.allocate_id();
        let rx1 = pending.register(id1).await;
        let rx2 = pending.register(id2).await;

        // Respond to id 2 before id 1.
        assert!(pending.complete(response(id2, "second")).await);
        assert!(pending.complete(response(id1, "first")).await);

        let got1 = rx1.await.unwrap().unwrap();
        let got2 = rx2.await.unwrap().unwrap();
        assert_eq!(got1.id, id1);
        assert_eq!(got1.result.unwrap()["value"], "first");
        assert_eq!(got2.id, id2);
        assert_eq!(got2.result.unwrap()["value"], "second");
    }

    #[tokio::test]
    async fn late_response_for_unknown_id_is_discarded() {
        let pending = PendingRequests::new();
        assert!(!pending.complete(response(99, "ghost")).await);
    }

    #[tokio::test]
    async fn slot_is_removed_after_completion() {
        let pending = PendingRequests::new();
        let id = pending.allocate_id();
        let _rx = pending.register(id).await;
        assert_eq!(pending.in_flight().await, 1);
        pending.complete(response(id, "done")).await;
        assert_eq!(pending.in_flight().await, 0);
    }

    #[tokio::test]
    async fn remove_races_safely_with_late_response() {
        let pending = PendingRequests::new();
        let id = pending.allocate_id();
        let _rx = pending.register(id).await;
        pending.remove(id).await;
        // The response arrives after the caller timed out — discarded.
        assert!(!pending.complete(response(id, "late")).await);
    }

    #[tokio::test]
    async fn fail_all_drains_every_slot() {
        let pending = PendingRequests::new();
        let id1 = pending.allocate_id();
        let id2 = pending.allocate_id();
        let rx1 = pending.register(id1).await;
        let rx2 = pending.register(id2).await;

        pending
            .fail_all(|| ToolServerError::Cancelled {
                name: "docs".into(),
                reason: "stopping all servers".into(),
            })
            .await;

        assert_eq!(pending.in_flight().await, 0);
        assert!(matches!(
            rx1.await.unwrap(),
            Err(ToolServerError::Cancelled { .. })
        ));
        assert!(matches!(
            rx2.await.unwrap(),
            Err(ToolServerError::Cancelled { .. })
        ));
    }
}
