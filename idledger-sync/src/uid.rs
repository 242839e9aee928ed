//! UID allocation.
//!
//! A uid is a 64-bit value whose *random part* — everything above the low
//! byte, below the sign bit — must be non-zero. Freshly allocated uids are
//! masked to a zero low byte, which reserves every value below 256 for
//! sentinels (`0` unassigned, `1` rename-assist request) without any risk
//! of colliding with a real uid.
//!
//! Randomness is an injected strategy so tests can run against a
//! deterministic sequence instead of a global switch.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use std::collections::HashSet;

/// Annotation uid meaning "not assigned yet".
pub const UID_UNASSIGNED: i64 = 0;

/// Annotation uid requesting a rename-assist suggestion.
pub const UID_REQUEST: i64 = 1;

/// The bits a valid uid must populate: low byte and sign bit excluded.
pub const RANDOM_PART_MASK: i64 = 0x7FFF_FFFF_FFFF_FF00;

/// How many fresh candidates the allocator tries before giving up.
const MAX_ATTEMPTS: u32 = 1000;

/// Source of raw 64-bit values for the allocator, pre-masking.
pub trait UidGenerator {
    fn raw_uid(&mut self) -> i64;
}

/// Production strategy: uniformly random positive values.
#[derive(Debug, Default)]
pub struct RandomUids;

impl UidGenerator for RandomUids {
    fn raw_uid(&mut self) -> i64 {
        rand::thread_rng().gen_range(1..=i64::MAX)
    }
}

/// Deterministic strategy for reproducible test fixtures: a stepping
/// counter whose masked values are strictly increasing and collision-free.
#[derive(Debug)]
pub struct SequentialUids {
    next: i64,
}

impl SequentialUids {
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self { next: start }
    }
}

impl Default for SequentialUids {
    fn default() -> Self {
        Self::new(0x1000)
    }
}

impl UidGenerator for SequentialUids {
    fn raw_uid(&mut self) -> i64 {
        self.next += 999;
        self.next
    }
}

/// Generates fresh, collision-free uids and validates caller-supplied ones.
///
/// The seen-set is seeded at engine startup with every active and retired
/// uid in the ledger, so a regenerated engine never reissues a retired uid.
pub struct UidAllocator {
    seen: HashSet<i64>,
    generator: Box<dyn UidGenerator>,
}

impl UidAllocator {
    /// Allocator with the production random strategy.
    #[must_use]
    pub fn random() -> Self {
        Self::new(Box::new(RandomUids))
    }

    /// Allocator with an injected generation strategy.
    #[must_use]
    pub fn new(generator: Box<dyn UidGenerator>) -> Self {
        Self {
            seen: HashSet::new(),
            generator,
        }
    }

    /// Checks that a caller-supplied uid is well formed: non-negative with
    /// a non-zero random part.
    pub fn verify(uid: i64) -> SyncResult<()> {
        if uid < 0 || uid & RANDOM_PART_MASK == 0 {
            return Err(SyncError::UidOutOfRange(uid));
        }
        Ok(())
    }

    /// Registers a uid already present in the ledger. Fails on malformed or
    /// duplicate uids — both indicate a corrupted ledger.
    pub fn add_existing(&mut self, uid: i64) -> SyncResult<()> {
        Self::verify(uid)?;
        if !self.seen.insert(uid) {
            return Err(SyncError::DuplicateUid(uid));
        }
        Ok(())
    }

    /// Registers a batch of existing uids.
    pub fn add_existing_all<I: IntoIterator<Item = i64>>(&mut self, uids: I) -> SyncResult<()> {
        for uid in uids {
            self.add_existing(uid)?;
        }
        Ok(())
    }

    /// Whether a uid is already registered or allocated.
    #[must_use]
    pub fn contains(&self, uid: i64) -> bool {
        self.seen.contains(&uid)
    }

    /// Draws a fresh uid, retrying on collisions up to a fixed bound.
    pub fn create(&mut self) -> SyncResult<i64> {
        for _ in 0..MAX_ATTEMPTS {
            let uid = self.generator.raw_uid() & RANDOM_PART_MASK;
            if uid != 0 && self.seen.insert(uid) {
                return Ok(uid);
            }
        }
        Err(SyncError::OutOfUids)
    }
}
