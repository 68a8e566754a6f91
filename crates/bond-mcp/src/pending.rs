//! Pending-request table: correlates in-flight request ids with the callers
//! waiting on them.
//!
//! Every entry is removed exactly once: by the dispatcher delivering a
//! response, by the caller's [`PendingGuard`] dropping (timeout, write
//! failure, cancellation), or by [`PendingTable::close_all`] when the
//! connection goes away. Removal is idempotent, so whichever path loses the
//! race is a no-op.

use crate::error::McpError;
use crate::jsonrpc::{RequestId, Response};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;

/// What a waiting caller eventually receives.
pub(crate) type Delivery = Result<Response, McpError>;

struct Slot {
    method: String,
    tx: oneshot::Sender<Delivery>,
}

struct Inner {
    open: bool,
    slots: HashMap<RequestId, Slot>,
}

/// Shared map from request id to a single-use response slot.
#[derive(Clone)]
pub(crate) struct PendingTable {
    inner: Arc<RwLock<Inner>>,
}

impl PendingTable {
    /// A closed table. Registration fails until [`open`](Self::open) is called.
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                open: false,
                slots: HashMap::new(),
            })),
        }
    }

    /// Accept registrations again (on connect).
    pub(crate) fn open(&self) {
        self.inner.write().unwrap().open = true;
    }

    /// Register a slot for `id`. Returns `None` when the table is closed.
    ///
    /// The returned guard removes the entry when dropped.
    pub(crate) fn register(
        &self,
        id: RequestId,
        method: &str,
    ) -> Option<(PendingGuard, oneshot::Receiver<Delivery>)> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.write().unwrap();
        if !inner.open {
            return None;
        }
        inner.slots.insert(
            id.clone(),
            Slot {
                method: method.to_string(),
                tx,
            },
        );
        let guard = PendingGuard {
            table: self.clone(),
            id,
        };
        Some((guard, rx))
    }

    /// Hand a response to its waiting caller.
    ///
    /// Returns the response back when no caller is waiting for its id.
    pub(crate) fn deliver(&self, response: Response) -> Option<Response> {
        let Some(id) = response.id.as_ref() else {
            return Some(response);
        };
        let slot = self.inner.write().unwrap().slots.remove(id);
        match slot {
            Some(slot) => {
                // The receiver may already be gone if the caller was cancelled
                // between our removal and its guard dropping.
                let _ = slot.tx.send(Ok(response));
                None
            }
            None => Some(response),
        }
    }

    /// Remove an entry. Returns `true` if it was still present.
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        self.inner.write().unwrap().slots.remove(id).is_some()
    }

    /// Close the table and fail every waiting caller.
    ///
    /// `make_error` receives the method of each failed request. Returns how
    /// many callers were failed.
    pub(crate) fn close_all(&self, make_error: impl Fn(&str) -> McpError) -> usize {
        let drained: Vec<Slot> = {
            let mut inner = self.inner.write().unwrap();
            inner.open = false;
            inner.slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for slot in drained {
            let _ = slot.tx.send(Err(make_error(&slot.method)));
        }
        count
    }

    pub(crate) fn contains(&self, id: &RequestId) -> bool {
        self.inner.read().unwrap().slots.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().unwrap().slots.len()
    }

    /// Ids currently awaiting a response, in ascending order.
    pub(crate) fn ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.inner.read().unwrap().slots.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Removes its entry from the table on drop.
pub(crate) struct PendingGuard {
    table: PendingTable,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_table() -> PendingTable {
        let table = PendingTable::new();
        table.open();
        table
    }

    #[test]
    fn closed_table_rejects_registration() {
        let table = PendingTable::new();
        assert!(table.register(RequestId::Number(1), "ping").is_none());
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn deliver_resolves_waiter_and_removes_entry() {
        let table = open_table();
        let (_guard, rx) = table.register(RequestId::Number(1), "ping").unwrap();
        assert!(table.contains(&RequestId::Number(1)));

        let unmatched = table.deliver(Response::success(RequestId::Number(1), json!({"pong": true})));
        assert!(unmatched.is_none());
        assert!(!table.contains(&RequestId::Number(1)));

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.result().unwrap()["pong"], true);
    }

    #[test]
    fn unknown_id_is_returned() {
        let table = open_table();
        let response = Response::success(RequestId::Number(99), json!(null));
        let unmatched = table.deliver(response.clone());
        assert_eq!(unmatched, Some(response));
    }

    #[test]
    fn guard_drop_removes_entry() {
        let table = open_table();
        let (guard, _rx) = table.register(RequestId::Number(5), "slow").unwrap();
        assert_eq!(table.len(), 1);
        drop(guard);
        assert_eq!(table.len(), 0);
        // A late response for the dropped entry is unmatched.
        assert!(table
            .deliver(Response::success(RequestId::Number(5), json!(1)))
            .is_some());
    }

    #[test]
    fn removal_is_idempotent() {
        let table = open_table();
        let (guard, _rx) = table.register(RequestId::Number(2), "x").unwrap();
        assert!(table.remove(&RequestId::Number(2)));
        assert!(!table.remove(&RequestId::Number(2)));
        drop(guard);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn close_all_fails_every_waiter() {
        let table = open_table();
        let (_g1, rx1) = table.register(RequestId::Number(1), "a").unwrap();
        let (_g2, rx2) = table.register(RequestId::Number(2), "b").unwrap();

        let failed = table.close_all(|method| McpError::ProcessExited {
            name: "mock".into(),
            reason: format!("{method} abandoned"),
        });
        assert_eq!(failed, 2);
        assert!(table.register(RequestId::Number(3), "c").is_none());

        match rx1.await.unwrap() {
            Err(McpError::ProcessExited { reason, .. }) => assert_eq!(reason, "a abandoned"),
            other => panic!("Expected ProcessExited, got: {other:?}"),
        }
        assert!(rx2.await.unwrap().is_err());
    }

    #[test]
    fn ids_are_sorted() {
        let table = open_table();
        let _a = table.register(RequestId::Number(3), "x").unwrap();
        let _b = table.register(RequestId::Number(1), "x").unwrap();
        let _c = table.register(RequestId::Number(2), "x").unwrap();
        assert_eq!(
            table.ids(),
            vec![
                RequestId::Number(1),
                RequestId::Number(2),
                RequestId::Number(3)
            ]
        );
    }
}
