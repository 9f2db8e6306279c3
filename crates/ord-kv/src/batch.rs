use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KvError, KvResult};

/// A single write, either queued in a [`WriteBatch`] or executed on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Store `value` at `key` only if the key does not exist.
    SetIfAbsent { key: String, value: Vec<u8> },
    /// Replace the byte value at `key` only if it already exists.
    SetIfPresent { key: String, value: Vec<u8> },
    /// Remove `key`. When `strict`, the key must exist.
    Delete { key: String, strict: bool },
    /// Add `member` to the set at `set`, creating the set if needed.
    SetAdd { set: String, member: String },
    /// Remove `member` from the set at `set`.
    SetRemove { set: String, member: String },
}

impl WriteOp {
    /// Short operation name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetIfAbsent { .. } => "set_if_absent",
            Self::SetIfPresent { .. } => "set_if_present",
            Self::Delete { .. } => "delete",
            Self::SetAdd { .. } => "set_add",
            Self::SetRemove { .. } => "set_remove",
        }
    }

    /// The key this op writes to.
    pub fn key(&self) -> &str {
        match self {
            Self::SetIfAbsent { key, .. }
            | Self::SetIfPresent { key, .. }
            | Self::Delete { key, .. } => key,
            Self::SetAdd { set, .. } | Self::SetRemove { set, .. } => set,
        }
    }

    pub(crate) fn validate(&self) -> KvResult<()> {
        if self.key().is_empty() {
            return Err(KvError::InvalidKey(self.key().to_string()));
        }
        match self {
            Self::SetAdd { member, .. } | Self::SetRemove { member, .. } if member.is_empty() => {
                Err(KvError::InvalidKey(member.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// An ordered group of writes that commit together or not at all.
///
/// Queueing validates each op; committing is done by
/// [`KvBackend::commit`](crate::KvBackend::commit). A batch that is not
/// committed should be dropped through [`WriteBatch::discard`] so the abort
/// path shows up in the logs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an op after validating it.
    pub fn push(&mut self, op: WriteOp) -> KvResult<()> {
        op.validate()?;
        self.ops.push(op);
        Ok(())
    }

    pub fn set_if_absent(&mut self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.push(WriteOp::SetIfAbsent {
            key: key.to_string(),
            value,
        })
    }

    pub fn set_if_present(&mut self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.push(WriteOp::SetIfPresent {
            key: key.to_string(),
            value,
        })
    }

    pub fn delete(&mut self, key: &str, strict: bool) -> KvResult<()> {
        self.push(WriteOp::Delete {
            key: key.to_string(),
            strict,
        })
    }

    pub fn set_add(&mut self, set: &str, member: &str) -> KvResult<()> {
        self.push(WriteOp::SetAdd {
            set: set.to_string(),
            member: member.to_string(),
        })
    }

    pub fn set_remove(&mut self, set: &str, member: &str) -> KvResult<()> {
        self.push(WriteOp::SetRemove {
            set: set.to_string(),
            member: member.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Drop the batch without applying anything.
    pub fn discard(self) {
        debug!(ops = self.ops.len(), "write batch discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_order() {
        let mut batch = WriteBatch::new();
        batch.set_if_absent("order:1", b"{}".to_vec()).unwrap();
        batch.set_add("orders", "order:1").unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops()[0].name(), "set_if_absent");
        assert_eq!(batch.ops()[1].name(), "set_add");
        assert_eq!(batch.ops()[1].key(), "orders");
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut batch = WriteBatch::new();
        let err = batch.set_if_absent("", vec![]).unwrap_err();
        assert!(matches!(err, KvError::InvalidKey(_)));
        assert!(batch.is_empty());
    }

    #[test]
    fn empty_member_is_rejected() {
        let mut batch = WriteBatch::new();
        assert!(batch.set_add("orders", "").is_err());
        assert!(batch.set_remove("orders", "").is_err());
        assert!(batch.is_empty());
    }

    #[test]
    fn ops_serialize_with_bincode() {
        let op = WriteOp::Delete {
            key: "order:9".into(),
            strict: true,
        };
        let bytes = bincode::serialize(&op).unwrap();
        let back: WriteOp = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, op);
    }
}
