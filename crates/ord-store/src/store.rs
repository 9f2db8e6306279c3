use std::sync::Arc;

use ord_kv::{KvBackend, KvError, WriteBatch};
use ord_types::{Order, OrderId};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::keys::{order_key, parse_order_key, ORDER_INDEX_KEY};
use crate::page::{FindAllPage, FindResult, Pages};

/// Order persistence over a shared key-value backend.
///
/// Stateless apart from the backend handle; clones share the backend and
/// may be used from any number of threads. Each order lives at its primary
/// key and is listed in the index set. Insert and delete touch both in one
/// atomic batch; update replaces the record only.
#[derive(Clone)]
pub struct OrderStore {
    backend: Arc<dyn KvBackend>,
}

impl OrderStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// The underlying backend handle.
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Persist a new order.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if an order with the same id
    /// is present. On any failure nothing is written.
    pub fn insert(&self, order: &Order) -> StoreResult<()> {
        let id = order.order_id;
        let key = order_key(id);
        let payload = encode(order)?;

        let mut batch = self.backend.batch();
        if let Err(source) = queue_insert(&mut batch, &key, payload) {
            warn!(order_id = %id, error = %source, "insert batch discarded");
            batch.discard();
            return Err(StoreError::Backend {
                op: "insert",
                source,
            });
        }

        match self.backend.commit(batch) {
            Ok(()) => {
                debug!(order_id = %id, "order inserted");
                Ok(())
            }
            Err(KvError::Aborted { index: 0, .. }) => Err(StoreError::AlreadyExists(id)),
            Err(e) => Err(commit_error("insert", e)),
        }
    }

    /// Fetch an order by id.
    ///
    /// Returns `Ok(None)` if no such order exists. Bytes that do not decode
    /// into an order are reported as [`StoreError::CorruptRecord`].
    pub fn get_by_id(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let key = order_key(id);
        let bytes = match self.backend.get(&key) {
            Ok(bytes) => bytes,
            Err(KvError::WrongType { .. }) => return Err(set_at_primary_key(key)),
            Err(source) => {
                return Err(StoreError::Backend {
                    op: "get_by_id",
                    source,
                })
            }
        };

        let Some(bytes) = bytes else {
            debug!(order_id = %id, "order not found");
            return Ok(None);
        };
        let order = decode(&key, &bytes)?;
        check_identity(&key, id, &order)?;
        Ok(Some(order))
    }

    /// Replace an existing order's record.
    ///
    /// The whole record is overwritten; no status rule is enforced here.
    /// Fails with [`StoreError::NotFound`] if the order is absent.
    pub fn update(&self, order: &Order) -> StoreResult<()> {
        let id = order.order_id;
        let key = order_key(id);
        let payload = encode(order)?;

        let written = match self.backend.set_if_present(&key, &payload) {
            Ok(written) => written,
            Err(KvError::WrongType { .. }) => return Err(set_at_primary_key(key)),
            Err(source) => {
                return Err(StoreError::Backend {
                    op: "update",
                    source,
                })
            }
        };
        if !written {
            return Err(StoreError::NotFound(id));
        }
        debug!(order_id = %id, status = %order.status(), "order updated");
        Ok(())
    }

    /// Remove an order and its index entry.
    ///
    /// Fails with [`StoreError::NotFound`] if the order is absent, in which
    /// case the index is left untouched.
    pub fn delete_by_id(&self, id: OrderId) -> StoreResult<()> {
        let key = order_key(id);

        let mut batch = self.backend.batch();
        if let Err(source) = queue_delete(&mut batch, &key) {
            warn!(order_id = %id, error = %source, "delete batch discarded");
            batch.discard();
            return Err(StoreError::Backend {
                op: "delete_by_id",
                source,
            });
        }

        match self.backend.commit(batch) {
            Ok(()) => {
                debug!(order_id = %id, "order deleted");
                Ok(())
            }
            Err(KvError::Aborted { index: 0, .. }) => Err(StoreError::NotFound(id)),
            Err(e) => Err(commit_error("delete_by_id", e)),
        }
    }

    /// Fetch one page of orders.
    ///
    /// Orders come back in index scan order. Keys whose record vanished
    /// between the scan and the read are skipped. A page may be empty while
    /// its cursor is non-zero; only a cursor of `0` ends the listing.
    pub fn find_all(&self, page: FindAllPage) -> StoreResult<FindResult> {
        let scan = self
            .backend
            .scan_set_members(ORDER_INDEX_KEY, page.offset, "*", page.size)
            .map_err(|source| StoreError::Backend {
                op: "find_all",
                source,
            })?;

        if scan.members.is_empty() {
            return Ok(FindResult {
                orders: Vec::new(),
                cursor: scan.cursor,
            });
        }

        let values = self
            .backend
            .multi_get(&scan.members)
            .map_err(|source| StoreError::Backend {
                op: "find_all",
                source,
            })?;

        let mut orders = Vec::with_capacity(values.len());
        for (key, value) in scan.members.iter().zip(values) {
            let Some(bytes) = value else {
                debug!(key = %key, "indexed order vanished before read");
                continue;
            };
            let order = decode(key, &bytes)?;
            if let Some(id) = parse_order_key(key) {
                check_identity(key, id, &order)?;
            }
            orders.push(order);
        }

        debug!(
            offset = page.offset,
            returned = orders.len(),
            cursor = scan.cursor,
            "orders page read"
        );
        Ok(FindResult {
            orders,
            cursor: scan.cursor,
        })
    }

    /// Iterate over every page of the listing, `size` index members at a
    /// time.
    pub fn pages(&self, size: usize) -> Pages<'_> {
        Pages::new(self, size)
    }

    /// Collect every order by following cursors to the end.
    pub fn find_all_orders(&self, size: usize) -> StoreResult<Vec<Order>> {
        let mut all = Vec::new();
        for page in self.pages(size) {
            all.extend(page?);
        }
        Ok(all)
    }
}

impl std::fmt::Debug for OrderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderStore")
            .field("index", &ORDER_INDEX_KEY)
            .finish_non_exhaustive()
    }
}

fn queue_insert(batch: &mut WriteBatch, key: &str, payload: Vec<u8>) -> Result<(), KvError> {
    batch.set_if_absent(key, payload)?;
    batch.set_add(ORDER_INDEX_KEY, key)
}

fn queue_delete(batch: &mut WriteBatch, key: &str) -> Result<(), KvError> {
    batch.delete(key, true)?;
    batch.set_remove(ORDER_INDEX_KEY, key)
}

/// Classify a commit failure: transport problems stay backend errors, every
/// other refusal is a failed transaction.
fn commit_error(op: &'static str, source: KvError) -> StoreError {
    match source {
        KvError::Closed | KvError::Io(_) => StoreError::Backend { op, source },
        source => StoreError::Transaction { op, source },
    }
}

fn encode(order: &Order) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(order).map_err(|e| StoreError::Serialization {
        id: order.order_id,
        reason: e.to_string(),
    })
}

fn decode(key: &str, bytes: &[u8]) -> StoreResult<Order> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn set_at_primary_key(key: String) -> StoreError {
    StoreError::CorruptRecord {
        key,
        reason: "primary key holds a set".into(),
    }
}

fn check_identity(key: &str, id: OrderId, order: &Order) -> StoreResult<()> {
    if order.order_id != id {
        return Err(StoreError::CorruptRecord {
            key: key.to_string(),
            reason: format!("record holds order {}", order.order_id),
        });
    }
    Ok(())
}
