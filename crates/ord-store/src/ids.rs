//! Order identifier generation.
//!
//! The store never invents ids; the request layer draws them from an
//! [`IdGenerator`] and relies on `insert` failing with `AlreadyExists` to
//! detect a collision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use ord_types::OrderId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of fresh order ids.
pub trait IdGenerator: Send + Sync {
    /// The next candidate id.
    fn next_id(&self) -> OrderId;
}

/// Strictly increasing ids starting from a seed.
///
/// Seeded from the wall clock in microseconds, so a restarted process does
/// not hand out ids issued by its predecessor unless the clock moved back.
#[derive(Debug)]
pub struct MonotonicIds {
    next: AtomicU64,
}

impl MonotonicIds {
    /// Ids starting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Ids starting at the current Unix time in microseconds.
    pub fn from_clock() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self::starting_at(micros.max(1))
    }
}

impl Default for MonotonicIds {
    fn default() -> Self {
        Self::from_clock()
    }
}

impl IdGenerator for MonotonicIds {
    fn next_id(&self) -> OrderId {
        OrderId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Uniformly random ids in `1..=max`.
///
/// Collisions are possible; callers retry on `AlreadyExists`.
#[derive(Debug)]
pub struct RandomIds {
    rng: Mutex<StdRng>,
    max: u64,
}

impl RandomIds {
    /// Random ids in `1..=max`. A `max` of `0` is treated as `u64::MAX`.
    pub fn new(max: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            max: if max == 0 { u64::MAX } else { max },
        }
    }

    /// Deterministic sequence, for tests.
    pub fn seeded(seed: u64, max: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max: if max == 0 { u64::MAX } else { max },
        }
    }
}

impl IdGenerator for RandomIds {
    fn next_id(&self) -> OrderId {
        let id = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(1..=self.max),
            // A poisoned lock still holds a usable generator state.
            Err(poisoned) => poisoned.into_inner().gen_range(1..=self.max),
        };
        OrderId::new(id)
    }
}
