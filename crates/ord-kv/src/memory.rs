use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::batch::{WriteBatch, WriteOp};
use crate::error::{KvError, KvResult};
use crate::keyspace::Keyspace;
use crate::traits::{KvBackend, ScanPage};

/// In-memory, HashMap-based key-value backend.
///
/// Intended for tests and embedding. The keyspace lives behind a `RwLock`;
/// batches take the write lock for the whole check-then-apply step, so
/// concurrent readers never observe half a batch.
pub struct InMemoryKv {
    keyspace: RwLock<Keyspace>,
    closed: AtomicBool,
}

impl InMemoryKv {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            keyspace: RwLock::new(Keyspace::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of keys currently stored (values and sets).
    pub fn len(&self) -> usize {
        self.read().map(|ks| ks.len()).unwrap_or(0)
    }

    /// Returns `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of members in the set at `key` (`0` if absent).
    pub fn set_len(&self, key: &str) -> KvResult<usize> {
        self.read()?.set_len(key)
    }

    fn ensure_open(&self) -> KvResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }

    fn read(&self) -> KvResult<RwLockReadGuard<'_, Keyspace>> {
        self.keyspace
            .read()
            .map_err(|e| KvError::Internal(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> KvResult<RwLockWriteGuard<'_, Keyspace>> {
        self.keyspace
            .write()
            .map_err(|e| KvError::Internal(format!("lock poisoned: {e}")))
    }

    fn execute(&self, op: WriteOp) -> KvResult<bool> {
        self.ensure_open()?;
        op.validate()?;
        let mut ks = self.write()?;
        if !ks.would_change(&op)? {
            return Ok(false);
        }
        ks.apply(&op);
        Ok(true)
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for InMemoryKv {
    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.read()?.get(key)
    }

    fn set_if_absent(&self, key: &str, value: &[u8]) -> KvResult<bool> {
        self.execute(WriteOp::SetIfAbsent {
            key: key.to_string(),
            value: value.to_vec(),
        })
    }

    fn set_if_present(&self, key: &str, value: &[u8]) -> KvResult<bool> {
        self.execute(WriteOp::SetIfPresent {
            key: key.to_string(),
            value: value.to_vec(),
        })
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        self.execute(WriteOp::Delete {
            key: key.to_string(),
            strict: false,
        })
    }

    fn multi_get(&self, keys: &[String]) -> KvResult<Vec<Option<Vec<u8>>>> {
        self.ensure_open()?;
        let ks = self.read()?;
        Ok(keys.iter().map(|key| ks.get_lenient(key)).collect())
    }

    fn set_add(&self, set_key: &str, member: &str) -> KvResult<bool> {
        self.execute(WriteOp::SetAdd {
            set: set_key.to_string(),
            member: member.to_string(),
        })
    }

    fn set_remove(&self, set_key: &str, member: &str) -> KvResult<bool> {
        self.execute(WriteOp::SetRemove {
            set: set_key.to_string(),
            member: member.to_string(),
        })
    }

    fn scan_set_members(
        &self,
        set_key: &str,
        cursor: u64,
        pattern: &str,
        limit: usize,
    ) -> KvResult<ScanPage> {
        self.ensure_open()?;
        self.read()?.scan(set_key, cursor, pattern, limit)
    }

    fn commit(&self, batch: WriteBatch) -> KvResult<()> {
        self.ensure_open()?;
        let ops = batch.into_ops();
        self.write()?.commit(&ops)?;
        debug!(ops = ops.len(), "batch committed");
        Ok(())
    }

    fn ping(&self) -> KvResult<()> {
        self.ensure_open()
    }

    fn close(&self) -> KvResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKv")
            .field("key_count", &self.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
