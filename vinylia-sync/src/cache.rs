//! Local interaction cache
//!
//! In-memory snapshot of which stories the current user has resonated with,
//! shared by every view that renders story cards. Writes are whole-set
//! replacements published through `tokio::sync::watch`, so each write wakes
//! every subscribed view exactly like a re-render trigger.
//!
//! Views receive a [`CacheReader`]; only the coordinator holds the cache
//! itself and writes to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use vinylia_common::{Membership, StoryId};

/// Latest known resonance count per story
pub type ResonanceCounts = BTreeMap<StoryId, u64>;

/// Shared store for the session's resonance membership
#[derive(Debug)]
pub struct ResonanceCache {
    membership: watch::Sender<Membership>,
    counts: watch::Sender<ResonanceCounts>,
}

impl Default for ResonanceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResonanceCache {
    /// Empty cache, as at session start
    pub fn new() -> Self {
        let (membership, _) = watch::channel(Membership::new());
        let (counts, _) = watch::channel(ResonanceCounts::new());
        Self { membership, counts }
    }

    /// Current membership snapshot
    pub fn get(&self) -> Membership {
        self.membership.borrow().clone()
    }

    pub fn contains(&self, story_id: &str) -> bool {
        self.membership.borrow().contains(story_id)
    }

    /// Replace membership wholesale and notify all subscribers
    ///
    /// There is no merge API; every write is a full replacement.
    pub fn set(&self, membership: Membership) {
        tracing::debug!(size = membership.len(), "Replacing resonance membership");
        self.membership.send_replace(membership);
    }

    /// Compute a full replacement from the current membership and publish it
    ///
    /// Read and write happen under the channel's lock, so concurrent writers
    /// cannot interleave between them. Returns the membership that was
    /// replaced.
    pub fn replace_with(&self, f: impl FnOnce(&Membership) -> Membership) -> Membership {
        let mut previous = Membership::new();
        self.membership.send_modify(|current| {
            let next = f(current);
            previous = std::mem::replace(current, next);
        });
        previous
    }

    /// Receiver that wakes on every membership write
    pub fn subscribe(&self) -> watch::Receiver<Membership> {
        self.membership.subscribe()
    }

    pub fn count(&self, story_id: &str) -> Option<u64> {
        self.counts.borrow().get(story_id).copied()
    }

    pub fn counts(&self) -> ResonanceCounts {
        self.counts.borrow().clone()
    }

    /// Record a fresh aggregate count for one story
    pub fn set_count(&self, story_id: &str, count: u64) {
        self.counts.send_modify(|counts| {
            counts.insert(story_id.to_string(), count);
        });
    }

    pub fn subscribe_counts(&self) -> watch::Receiver<ResonanceCounts> {
        self.counts.subscribe()
    }

    /// Discard all session state (sign-out)
    pub fn clear(&self) {
        self.set(Membership::new());
        self.counts.send_replace(ResonanceCounts::new());
    }
}

/// Read-only handle to the cache, handed to views
#[derive(Debug, Clone)]
pub struct CacheReader {
    cache: Arc<ResonanceCache>,
}

impl CacheReader {
    pub fn new(cache: Arc<ResonanceCache>) -> Self {
        Self { cache }
    }

    pub fn get(&self) -> Membership {
        self.cache.get()
    }

    pub fn contains(&self, story_id: &str) -> bool {
        self.cache.contains(story_id)
    }

    pub fn count(&self, story_id: &str) -> Option<u64> {
        self.cache.count(story_id)
    }

    pub fn counts(&self) -> ResonanceCounts {
        self.cache.counts()
    }

    pub fn subscribe(&self) -> watch::Receiver<Membership> {
        self.cache.subscribe()
    }

    pub fn subscribe_counts(&self) -> watch::Receiver<ResonanceCounts> {
        self.cache.subscribe_counts()
    }
}
