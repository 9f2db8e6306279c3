use crate::batch::WriteBatch;
use crate::error::KvResult;

/// One page of a set scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Members returned by this call, in scan order.
    pub members: Vec<String>,
    /// Continuation cursor. `0` means the scan is complete.
    pub cursor: u64,
}

impl ScanPage {
    /// `true` when no members remain past this page.
    pub fn is_final(&self) -> bool {
        self.cursor == 0
    }
}

/// Key-value backend consumed by the order store.
///
/// All implementations must satisfy these invariants:
/// - A key holds either a byte value or a set. Operations on the wrong kind
///   fail with `WrongType`, except `multi_get` which reports them as absent.
/// - `commit` checks every precondition in the batch before applying any
///   write; a failed precondition applies nothing.
/// - `scan_set_members` returns cursor `0` only when no members remain, and
///   returns every member present for the whole iteration exactly once.
/// - After `close`, every operation except `close` itself fails with `Closed`.
pub trait KvBackend: Send + Sync {
    /// Read the byte value at `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Store `value` only if `key` does not exist. Returns `true` if written.
    fn set_if_absent(&self, key: &str, value: &[u8]) -> KvResult<bool>;

    /// Replace the value only if `key` exists. Returns `true` if written.
    fn set_if_present(&self, key: &str, value: &[u8]) -> KvResult<bool>;

    /// Remove `key`. Returns `true` if it existed.
    fn delete(&self, key: &str) -> KvResult<bool>;

    /// Read several keys in one call, preserving order.
    ///
    /// Default implementation calls `get()` for each key. Backends may
    /// override for better performance (e.g., a single lock acquisition).
    fn multi_get(&self, keys: &[String]) -> KvResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Add `member` to the set at `set_key`. Returns `true` if newly added.
    fn set_add(&self, set_key: &str, member: &str) -> KvResult<bool>;

    /// Remove `member` from the set at `set_key`. Returns `true` if removed.
    fn set_remove(&self, set_key: &str, member: &str) -> KvResult<bool>;

    /// Scan set members starting at `cursor`, examining at most `limit`
    /// members and returning those matching the glob `pattern`.
    ///
    /// A `limit` of `0` uses [`DEFAULT_SCAN_COUNT`](crate::DEFAULT_SCAN_COUNT).
    fn scan_set_members(
        &self,
        set_key: &str,
        cursor: u64,
        pattern: &str,
        limit: usize,
    ) -> KvResult<ScanPage>;

    /// Start an empty atomic batch.
    fn batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Apply every op in `batch` or none of them.
    fn commit(&self, batch: WriteBatch) -> KvResult<()>;

    /// Check that the backend is reachable and open.
    fn ping(&self) -> KvResult<()>;

    /// Flush and close the backend. Closing twice is a no-op.
    fn close(&self) -> KvResult<()>;
}
