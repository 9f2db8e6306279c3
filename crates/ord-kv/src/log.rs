use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::{WriteBatch, WriteOp};
use crate::error::{KvError, KvResult};
use crate::keyspace::Keyspace;
use crate::traits::{KvBackend, ScanPage};

/// Flush/sync strategy for the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write group (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for the log backend.
#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct LogWriter {
    writer: BufWriter<File>,
    /// Current end of the valid log.
    offset: u64,
}

/// Durable key-value backend backed by an append-only log.
///
/// Every successful single write and every committed batch becomes one log
/// frame:
///
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized Vec<WriteOp>)]
/// ```
///
/// Because a batch is a single frame, it is recovered entirely or not at all.
/// On open the log is replayed front-to-back into an in-memory keyspace;
/// recovery stops at the first torn or corrupt frame and the file is cut back
/// to the last good frame so later appends stay readable.
pub struct LogKv {
    path: PathBuf,
    keyspace: RwLock<Keyspace>,
    writer: Mutex<LogWriter>,
    config: LogConfig,
    closed: AtomicBool,
}

impl LogKv {
    /// Open (or create) the log at `path` and replay it.
    pub fn open(path: &Path, config: LogConfig) -> KvResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let (groups, mut valid_len) = read_frames(path)?;

        let mut keyspace = Keyspace::new();
        let mut replayed = 0usize;
        for (offset, ops) in &groups {
            // Groups apply all-or-nothing; a conflict leaves state untouched.
            if let Err(e) = keyspace.commit(ops) {
                warn!(offset, error = %e, "log frame conflicts with replayed state; stopping recovery");
                valid_len = *offset;
                break;
            }
            replayed += 1;
        }

        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "discarding unreadable log tail"
            );
            file.set_len(valid_len)?;
        }

        info!(
            path = %path.display(),
            groups = replayed,
            keys = keyspace.len(),
            "log replayed"
        );

        Ok(Self {
            path: path.to_path_buf(),
            keyspace: RwLock::new(keyspace),
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                offset: valid_len,
            }),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end offset of the log.
    pub fn offset(&self) -> KvResult<u64> {
        Ok(self.lock_writer()?.offset)
    }

    /// Number of keys currently stored (values and sets).
    pub fn len(&self) -> usize {
        self.read().map(|ks| ks.len()).unwrap_or(0)
    }

    /// Returns `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite the log as a snapshot of the current keyspace.
    ///
    /// Writers are blocked for the duration. The snapshot is written to a
    /// sibling file, synced, and renamed over the log.
    pub fn compact(&self) -> KvResult<()> {
        self.ensure_open()?;
        let ks = self.write()?;
        let mut w = self.lock_writer()?;
        let before = w.offset;

        let tmp = self.path.with_extension("compact");
        let mut snapshot_len = 0u64;
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for group in ks.snapshot_groups() {
                snapshot_len += write_frame(&mut out, &group)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        w.writer.flush()?;
        fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = snapshot_len;

        info!(before, after = snapshot_len, "log compacted");
        Ok(())
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

    fn lock_writer(&self) -> KvResult<MutexGuard<'_, LogWriter>> {
        self.writer
            .lock()
            .map_err(|e| KvError::Internal(format!("log mutex poisoned: {e}")))
    }

    /// Append one write group. Callers hold the keyspace write lock so log
    /// order matches apply order.
    fn append(&self, ops: &[WriteOp]) -> KvResult<u64> {
        let mut w = self.lock_writer()?;
        let entry_offset = w.offset;
        // On any failure, a failed sync included, the frame is cut back off.
        let written = match write_group(&mut w, ops, self.config.sync_mode) {
            Ok(n) => n,
            Err(e) => {
                warn!(offset = entry_offset, error = %e, "log append failed; cutting partial frame");
                rewind(&mut w, entry_offset)?;
                return Err(e);
            }
        };
        w.offset += written;

        debug!(offset = entry_offset, ops = ops.len(), "log append");
        Ok(entry_offset)
    }

    fn execute(&self, op: WriteOp) -> KvResult<bool> {
        self.ensure_open()?;
        op.validate()?;
        let mut ks = self.write()?;
        if !ks.would_change(&op)? {
            return Ok(false);
        }
        self.append(std::slice::from_ref(&op))?;
        ks.apply(&op);
        Ok(true)
    }
}

impl KvBackend for LogKv {
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
        let mut ks = self.write()?;
        ks.precheck(&ops)?;
        self.append(&ops)?;
        for op in &ops {
            ks.apply(op);
        }
        Ok(())
    }

    fn ping(&self) -> KvResult<()> {
        self.ensure_open()?;
        self.lock_writer().map(|_| ())
    }

    fn close(&self) -> KvResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut w = self.lock_writer()?;
        w.writer.flush()?;
        w.writer.get_ref().sync_all()?;
        info!(path = %self.path.display(), offset = w.offset, "log closed");
        Ok(())
    }
}

impl std::fmt::Debug for LogKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKv")
            .field("path", &self.path)
            .field("key_count", &self.len())
            .field("sync_mode", &self.config.sync_mode)
            .finish()
    }
}

/// Write, flush and (per `sync_mode`) sync one framed group.
fn write_group(w: &mut LogWriter, ops: &[WriteOp], sync_mode: SyncMode) -> KvResult<u64> {
    let written = write_frame(&mut w.writer, ops)?;
    w.writer.flush()?;
    if sync_mode == SyncMode::EveryWrite {
        w.writer.get_ref().sync_all()?;
    }
    Ok(written)
}

/// Drop buffered bytes and cut the file back to `offset`.
fn rewind(w: &mut LogWriter, offset: u64) -> KvResult<()> {
    let file = w.writer.get_ref().try_clone()?;
    let stale = std::mem::replace(&mut w.writer, BufWriter::new(file));
    // `into_parts` drops the buffer without flushing it.
    let _ = stale.into_parts();
    w.writer.get_ref().set_len(offset)?;
    Ok(())
}

/// Write one framed group; returns the number of bytes written.
fn write_frame<W: Write>(out: &mut W, ops: &[WriteOp]) -> KvResult<u64> {
    let payload = bincode::serialize(ops).map_err(|e| KvError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| KvError::Serialization(format!("frame too large: {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    out.write_all(&length.to_le_bytes())?;
    out.write_all(&crc.to_le_bytes())?;
    out.write_all(&payload)?;
    Ok(HEADER_SIZE as u64 + payload.len() as u64)
}

/// Read every valid frame. Returns the groups with their offsets and the
/// length of the valid prefix of the file.
fn read_frames(path: &Path) -> KvResult<(Vec<(u64, Vec<WriteOp>)>, u64)> {
    let data = fs::read(path)?;
    let mut groups = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if offset + HEADER_SIZE > data.len() {
            warn!(offset, "truncated log header; stopping recovery");
            break;
        }
        let header = &data[offset..offset + HEADER_SIZE];
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let start = offset + HEADER_SIZE;
        if length == 0 || start + length > data.len() {
            warn!(offset, length, file_len = data.len(), "invalid log frame length; stopping recovery");
            break;
        }

        let payload = &data[start..start + length];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; stopping recovery"
            );
            break;
        }

        match bincode::deserialize::<Vec<WriteOp>>(payload) {
            Ok(ops) => groups.push((offset as u64, ops)),
            Err(e) => {
                warn!(offset, error = %e, "undecodable log frame; stopping recovery");
                break;
            }
        }
        offset = start + length;
    }

    debug!(recovered = groups.len(), "log recovery complete");
    Ok((groups, offset as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    fn open(path: &Path) -> LogKv {
        LogKv::open(path, LogConfig::default()).unwrap()
    }

    fn insert(kv: &LogKv, id: u32) {
        let key = format!("order:{id}");
        let mut batch = kv.batch();
        batch.set_if_absent(&key, format!("payload-{id}").into_bytes()).unwrap();
        batch.set_add("orders", &key).unwrap();
        kv.commit(batch).unwrap();
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.log");
        {
            let kv = open(&path);
            insert(&kv, 1);
            insert(&kv, 2);
            kv.set_if_present("order:2", b"updated").unwrap();
            kv.close().unwrap();
        }
        let kv = open(&path);
        assert_eq!(kv.get("order:1").unwrap(), Some(b"payload-1".to_vec()));
        assert_eq!(kv.get("order:2").unwrap(), Some(b"updated".to_vec()));
        let page = kv.scan_set_members("orders", 0, "*", 10).unwrap();
        assert_eq!(page.members.len(), 2);
        assert!(page.is_final());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("orders.log");
        let kv = open(&path);
        assert!(kv.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn no_op_writes_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let kv = open(&dir.path().join("noop.log"));
        assert!(!kv.set_if_present("missing", b"v").unwrap());
        assert!(!kv.delete("missing").unwrap());
        assert_eq!(kv.offset().unwrap(), 0);
    }

    #[test]
    fn aborted_batch_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abort.log");
        let kv = open(&path);
        insert(&kv, 1);
        let offset = kv.offset().unwrap();

        let mut batch = kv.batch();
        batch.set_if_absent("order:1", b"dup".to_vec()).unwrap();
        batch.set_add("orders", "order:1").unwrap();
        assert!(matches!(kv.commit(batch), Err(KvError::Aborted { .. })));
        assert_eq!(kv.offset().unwrap(), offset);
    }

    #[test]
    fn torn_tail_is_cut_and_later_writes_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.log");
        let total_len = {
            let kv = open(&path);
            insert(&kv, 1);
            insert(&kv, 2);
            kv.offset().unwrap()
        };

        // Drop the last 4 bytes, mid-frame.
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(total_len - 4).unwrap();
        }

        {
            let kv = open(&path);
            assert!(kv.get("order:1").unwrap().is_some());
            assert!(kv.get("order:2").unwrap().is_none());
            insert(&kv, 3);
        }

        let kv = open(&path);
        assert!(kv.get("order:1").unwrap().is_some());
        assert!(kv.get("order:3").unwrap().is_some());
        let page = kv.scan_set_members("orders", 0, "*", 10).unwrap();
        assert_eq!(page.members.len(), 2);
    }

    #[test]
    fn crc_mismatch_stops_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.log");
        let second_offset = {
            let kv = open(&path);
            insert(&kv, 1);
            let second = kv.offset().unwrap();
            insert(&kv, 2);
            second
        };

        // Flip the first payload byte of the second frame.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            let at = second_offset + HEADER_SIZE as u64;
            file.seek(SeekFrom::Start(at)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(at)).unwrap();
            file.write_all(&buf).unwrap();
            file.sync_all().unwrap();
        }

        let kv = open(&path);
        assert!(kv.get("order:1").unwrap().is_some());
        assert!(kv.get("order:2").unwrap().is_none());
        assert_eq!(kv.offset().unwrap(), second_offset);
    }

    #[test]
    fn conflicting_frame_stops_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conflict.log");
        let first_len = {
            let kv = open(&path);
            insert(&kv, 1);
            kv.offset().unwrap()
        };

        // The same insert logged twice: replaying the second must not apply.
        {
            let group = vec![
                WriteOp::SetIfAbsent {
                    key: "order:1".into(),
                    value: b"again".to_vec(),
                },
                WriteOp::SetAdd {
                    set: "orders".into(),
                    member: "order:1".into(),
                },
            ];
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            write_frame(&mut file, &group).unwrap();
            file.sync_all().unwrap();
        }

        {
            let kv = open(&path);
            assert_eq!(kv.get("order:1").unwrap(), Some(b"payload-1".to_vec()));
            assert_eq!(kv.offset().unwrap(), first_len);
            assert_eq!(std::fs::metadata(&path).unwrap().len(), first_len);
            insert(&kv, 2);
        }

        let kv = open(&path);
        assert!(kv.get("order:1").unwrap().is_some());
        assert!(kv.get("order:2").unwrap().is_some());
    }

    #[test]
    fn rewind_drops_flushed_but_unacknowledged_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.log");
        let kv = open(&path);
        insert(&kv, 1);
        let acknowledged = kv.offset().unwrap();

        // A frame that reached the file but whose sync failed.
        {
            let mut w = kv.lock_writer().unwrap();
            let ops = [WriteOp::SetIfAbsent {
                key: "order:2".into(),
                value: b"lost".to_vec(),
            }];
            write_group(&mut w, &ops, SyncMode::OsDefault).unwrap();
            assert!(std::fs::metadata(&path).unwrap().len() > acknowledged);
            rewind(&mut w, acknowledged).unwrap();
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), acknowledged);
        assert!(kv.get("order:2").unwrap().is_none());

        // The retried insert is logged once and the log still opens.
        insert(&kv, 2);
        insert(&kv, 3);
        kv.close().unwrap();

        let reopened = open(&path);
        assert_eq!(reopened.get("order:2").unwrap(), Some(b"payload-2".to_vec()));
        assert!(reopened.get("order:3").unwrap().is_some());
        let page = reopened.scan_set_members("orders", 0, "*", 10).unwrap();
        assert_eq!(page.members.len(), 3);
    }

    #[test]
    fn compact_preserves_state_and_shrinks_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.log");
        let kv = open(&path);
        for i in 0..10 {
            insert(&kv, i);
        }
        for i in 0..10 {
            kv.set_if_present(&format!("order:{i}"), b"v2").unwrap();
        }
        for i in 0..5 {
            let key = format!("order:{i}");
            let mut batch = kv.batch();
            batch.delete(&key, true).unwrap();
            batch.set_remove("orders", &key).unwrap();
            kv.commit(batch).unwrap();
        }
        let before = kv.offset().unwrap();
        kv.compact().unwrap();
        let after = kv.offset().unwrap();
        assert!(after < before);

        // Appends after compaction land on the new file.
        insert(&kv, 42);
        kv.close().unwrap();

        let reopened = open(&path);
        assert!(reopened.get("order:0").unwrap().is_none());
        assert_eq!(reopened.get("order:7").unwrap(), Some(b"v2".to_vec()));
        assert!(reopened.get("order:42").unwrap().is_some());
        let page = reopened.scan_set_members("orders", 0, "*", 100).unwrap();
        assert_eq!(page.members.len(), 6);
    }

    #[test]
    fn closed_log_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let kv = open(&dir.path().join("closed.log"));
        kv.close().unwrap();
        assert!(matches!(kv.ping(), Err(KvError::Closed)));
        assert!(matches!(kv.set_add("s", "m"), Err(KvError::Closed)));
        assert!(matches!(kv.compact(), Err(KvError::Closed)));
        kv.close().unwrap();
    }

    #[test]
    fn sync_every_write_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");
        let config = LogConfig {
            sync_mode: SyncMode::EveryWrite,
        };
        let kv = LogKv::open(&path, config).unwrap();
        insert(&kv, 1);
        drop(kv);
        assert!(open(&path).get("order:1").unwrap().is_some());
    }
}
