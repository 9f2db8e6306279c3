//! The shared keyspace state machine behind every backend.
//!
//! [`Keyspace`] holds byte values and hash-ordered sets in one namespace and
//! knows how to check and apply [`WriteOp`]s. Backends add locking and, for
//! the log backend, durability on top.

use std::collections::{BTreeSet, HashMap};

use crate::batch::WriteOp;
use crate::error::{KvError, KvResult};
use crate::traits::ScanPage;

/// Members examined per scan call when the caller passes a limit of `0`.
pub const DEFAULT_SCAN_COUNT: usize = 10;

/// Set members are ordered by a stable 64-bit hash, then by the member itself.
/// The hash component is what scan cursors point at.
type SetEntry = (u64, String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Bytes,
    Set,
}

#[derive(Clone, Debug)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<SetEntry>),
}

impl Value {
    fn kind(&self) -> Kind {
        match self {
            Self::Bytes(_) => Kind::Bytes,
            Self::Set(_) => Kind::Set,
        }
    }
}

/// Scan position of a set member.
pub(crate) fn member_hash(member: &str) -> u64 {
    let hash = blake3::hash(member.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Redis-style glob match supporting `*` (any run) and `?` (any one char).
/// Every other character matches itself.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = candidate.chars().collect();
    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || (p[pi] != '*' && p[pi] == s[si])) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((star_pi, star_si)) = star {
            pi = star_pi + 1;
            si = star_si + 1;
            star = Some((star_pi, star_si + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// In-memory keyspace: byte values and sets under one namespace.
#[derive(Clone, Debug, Default)]
pub(crate) struct Keyspace {
    entries: HashMap<String, Value>,
}

impl Keyspace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn kind(&self, key: &str) -> Option<Kind> {
        self.entries.get(key).map(Value::kind)
    }

    pub(crate) fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::Set(_)) => Err(wrong_type(key, "bytes")),
        }
    }

    /// Like `get`, but a set-valued key reads as absent.
    pub(crate) fn get_lenient(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(Value::Bytes(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub(crate) fn set_len(&self, key: &str) -> KvResult<usize> {
        match self.entries.get(key) {
            None => Ok(0),
            Some(Value::Set(members)) => Ok(members.len()),
            Some(Value::Bytes(_)) => Err(wrong_type(key, "set")),
        }
    }

    /// Whether applying `op` on its own would change the keyspace.
    ///
    /// A failed precondition reads as "no change"; a kind mismatch is an
    /// error.
    pub(crate) fn would_change(&self, op: &WriteOp) -> KvResult<bool> {
        match op {
            WriteOp::SetIfAbsent { key, .. } => Ok(self.kind(key).is_none()),
            WriteOp::SetIfPresent { key, .. } => match self.kind(key) {
                None => Ok(false),
                Some(Kind::Bytes) => Ok(true),
                Some(Kind::Set) => Err(wrong_type(key, "bytes")),
            },
            WriteOp::Delete { key, .. } => Ok(self.kind(key).is_some()),
            WriteOp::SetAdd { set, member } => match self.entries.get(set) {
                None => Ok(true),
                Some(Value::Set(members)) => {
                    Ok(!members.contains(&(member_hash(member), member.clone())))
                }
                Some(Value::Bytes(_)) => Err(wrong_type(set, "set")),
            },
            WriteOp::SetRemove { set, member } => match self.entries.get(set) {
                None => Ok(false),
                Some(Value::Set(members)) => {
                    Ok(members.contains(&(member_hash(member), member.clone())))
                }
                Some(Value::Bytes(_)) => Err(wrong_type(set, "set")),
            },
        }
    }

    /// Check every precondition in `ops` as if they were applied in order.
    ///
    /// Returns `Aborted` with the index of the first failing op.
    pub(crate) fn precheck(&self, ops: &[WriteOp]) -> KvResult<()> {
        if ops.is_empty() {
            return Err(KvError::EmptyBatch);
        }
        let mut staged: HashMap<&str, Option<Kind>> = HashMap::new();
        for (index, op) in ops.iter().enumerate() {
            let key = op.key();
            let current = match staged.get(key) {
                Some(kind) => *kind,
                None => self.kind(key),
            };
            let aborted = KvError::Aborted {
                index,
                op: op.name(),
            };
            let next = match op {
                WriteOp::SetIfAbsent { .. } => {
                    if current.is_some() {
                        return Err(aborted);
                    }
                    Some(Kind::Bytes)
                }
                WriteOp::SetIfPresent { .. } => match current {
                    None => return Err(aborted),
                    Some(Kind::Set) => return Err(wrong_type(key, "bytes")),
                    Some(Kind::Bytes) => Some(Kind::Bytes),
                },
                WriteOp::Delete { strict, .. } => {
                    if *strict && current.is_none() {
                        return Err(aborted);
                    }
                    None
                }
                WriteOp::SetAdd { .. } => match current {
                    Some(Kind::Bytes) => return Err(wrong_type(key, "set")),
                    _ => Some(Kind::Set),
                },
                WriteOp::SetRemove { .. } => match current {
                    Some(Kind::Bytes) => return Err(wrong_type(key, "set")),
                    other => other,
                },
            };
            staged.insert(key, next);
        }
        Ok(())
    }

    /// Apply a single op whose preconditions have already been checked.
    pub(crate) fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::SetIfAbsent { key, value } | WriteOp::SetIfPresent { key, value } => {
                self.entries
                    .insert(key.clone(), Value::Bytes(value.clone()));
            }
            WriteOp::Delete { key, .. } => {
                self.entries.remove(key);
            }
            WriteOp::SetAdd { set, member } => {
                let entry = self
                    .entries
                    .entry(set.clone())
                    .or_insert_with(|| Value::Set(BTreeSet::new()));
                if let Value::Set(members) = entry {
                    members.insert((member_hash(member), member.clone()));
                }
            }
            WriteOp::SetRemove { set, member } => {
                let emptied = match self.entries.get_mut(set) {
                    Some(Value::Set(members)) => {
                        members.remove(&(member_hash(member), member.clone()));
                        members.is_empty()
                    }
                    _ => false,
                };
                if emptied {
                    self.entries.remove(set);
                }
            }
        }
    }

    /// Check then apply a whole group of ops.
    pub(crate) fn commit(&mut self, ops: &[WriteOp]) -> KvResult<()> {
        self.precheck(ops)?;
        for op in ops {
            self.apply(op);
        }
        Ok(())
    }

    /// Scan a set from `cursor`.
    ///
    /// Examines up to `limit` members in hash order, then finishes the last
    /// hash bucket so a cursor never splits members that share a hash. The
    /// returned cursor is the hash of the first unexamined member, or `0`
    /// when none remain.
    pub(crate) fn scan(
        &self,
        set_key: &str,
        cursor: u64,
        pattern: &str,
        limit: usize,
    ) -> KvResult<ScanPage> {
        let members = match self.entries.get(set_key) {
            None => return Ok(ScanPage::default()),
            Some(Value::Set(members)) => members,
            Some(Value::Bytes(_)) => return Err(wrong_type(set_key, "set")),
        };
        let limit = if limit == 0 { DEFAULT_SCAN_COUNT } else { limit };

        let mut page = ScanPage::default();
        let mut examined = 0usize;
        let mut last_hash: Option<u64> = None;

        for (hash, member) in members.range((cursor, String::new())..) {
            if examined >= limit && last_hash != Some(*hash) {
                page.cursor = *hash;
                return Ok(page);
            }
            examined += 1;
            last_hash = Some(*hash);
            if glob_match(pattern, member) {
                page.members.push(member.clone());
            }
        }
        Ok(page)
    }

    /// Ops that rebuild this keyspace from empty, one group per key.
    pub(crate) fn snapshot_groups(&self) -> Vec<Vec<WriteOp>> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| match self.entries.get(key)? {
                Value::Bytes(bytes) => Some(vec![WriteOp::SetIfAbsent {
                    key: key.clone(),
                    value: bytes.clone(),
                }]),
                Value::Set(members) => Some(
                    members
                        .iter()
                        .map(|(_, member)| WriteOp::SetAdd {
                            set: key.clone(),
                            member: member.clone(),
                        })
                        .collect(),
                ),
            })
            .collect()
    }
}

fn wrong_type(key: &str, expected: &'static str) -> KvError {
    KvError::WrongType {
        key: key.to_string(),
        expected,
    }
}
