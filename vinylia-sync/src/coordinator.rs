//! Optimistic mutation coordinator for story resonances
//!
//! A toggle is applied to the local cache before any network activity, then
//! confirmed against the backend:
//!
//! 1. Snapshot membership and write the desired membership (synchronous,
//!    before the first `.await`).
//! 2. Create or delete the resonance record remotely.
//! 3. On success, replace the cache with the authoritative list from the
//!    backend and refresh the story's aggregate count.
//! 4. On failure, roll the cache back and emit one `ResonanceFailed`
//!    notification.
//!
//! At most one mutation per story is in flight; a second toggle for the same
//! story is rejected until the first settles. Mutations on different stories
//! are independent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use vinylia_common::events::{EventBus, SyncEvent};
use vinylia_common::{Error, Membership, Result, StoryId};

use crate::cache::ResonanceCache;
use crate::gateway::InteractionGateway;
use crate::session::{Session, SessionProvider};

/// Settled result of a successful toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResonanceOutcome {
    pub story_id: StoryId,
    /// Membership for the story after settling (server state when reconciled)
    pub resonated: bool,
    /// False when the authoritative refresh failed and the confirmed
    /// optimistic value was kept
    pub reconciled: bool,
    /// Fresh aggregate count, when it could be fetched
    pub resonance_count: Option<u64>,
}

/// One in-flight toggle
#[derive(Debug)]
struct PendingMutation {
    story_id: StoryId,
    previous_membership: Membership,
    optimistic_membership: Membership,
    desired_state: bool,
    epoch: u64,
}

/// Remote call outstanding for one story
#[derive(Debug, Clone, Copy)]
struct Flight {
    desired_state: bool,
    epoch: u64,
}

/// Flights of the current session, keyed by story
type InFlight = HashMap<StoryId, Flight>;

/// Clears the story's in-flight entry when the toggle settles or is dropped
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<InFlight>,
    story_id: StoryId,
    epoch: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = lock(self.in_flight);
        // a newer session may have claimed the story since sign-out
        if in_flight.get(&self.story_id).is_some_and(|f| f.epoch == self.epoch) {
            in_flight.remove(&self.story_id);
        }
    }
}

fn lock(in_flight: &Mutex<InFlight>) -> MutexGuard<'_, InFlight> {
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}

fn with_state(mut membership: Membership, story_id: &str, resonated: bool) -> Membership {
    if resonated {
        membership.insert(story_id.to_string());
    } else {
        membership.remove(story_id);
    }
    membership
}

/// Sole writer of the resonance cache
///
/// Lock order is `in_flight` then the cache's watch lock. Every cache write
/// that depends on the session happens with `in_flight` held and the epoch
/// checked, so sign-out cannot interleave with it.
pub struct ResonanceCoordinator {
    cache: Arc<ResonanceCache>,
    gateway: Arc<dyn InteractionGateway>,
    session: Arc<dyn SessionProvider>,
    event_bus: EventBus,
    in_flight: Mutex<InFlight>,
    /// Bumped on sign-out so calls from the old session cannot write back
    epoch: AtomicU64,
    /// Issued before every server list request
    list_seq: AtomicU64,
    /// Sequence of the list currently installed; older lists are dropped
    installed_seq: AtomicU64,
}

impl ResonanceCoordinator {
    pub fn new(
        cache: Arc<ResonanceCache>,
        gateway: Arc<dyn InteractionGateway>,
        session: Arc<dyn SessionProvider>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            cache,
            gateway,
            session,
            event_bus,
            in_flight: Mutex::new(InFlight::new()),
            epoch: AtomicU64::new(0),
            list_seq: AtomicU64::new(0),
            installed_seq: AtomicU64::new(0),
        }
    }

    /// Populate the cache from the backend (session start)
    pub async fn load_membership(&self) -> Result<Membership> {
        let session = self.require_session()?;
        let epoch = self.epoch.load(Ordering::SeqCst);
        let seq = self.next_list_seq();

        let membership = self.gateway.list_resonances(&session).await?;
        if !self.install_server_membership(&membership, None, epoch, seq) {
            debug!("Membership superseded or session ended, discarding");
            return Ok(membership);
        }

        info!(count = membership.len(), "Loaded resonance membership");
        self.event_bus.emit_lossy(SyncEvent::MembershipLoaded {
            count: membership.len(),
            timestamp: Utc::now(),
        });
        Ok(membership)
    }

    /// Toggle using the cache's own view of the story
    pub async fn toggle(&self, story_id: &str) -> Result<ResonanceOutcome> {
        let currently_resonated = self.cache.contains(story_id);
        self.toggle_resonance(story_id, currently_resonated).await
    }

    /// Flip the user's resonance on a story, optimistically
    ///
    /// `currently_resonated` must match the cache; callers read it right
    /// before calling.
    ///
    /// # Errors
    /// * `Unauthenticated` - no session; the cache is untouched
    /// * `StaleMutation` - a toggle for this story is in flight, or
    ///   `currently_resonated` disagrees with the cache; the cache is untouched
    /// * any gateway error - the cache was rolled back
    pub async fn toggle_resonance(&self, story_id: &str, currently_resonated: bool) -> Result<ResonanceOutcome> {
        let Some(session) = self.session.current() else {
            warn!(story_id = %story_id, "Resonance toggle without a session");
            return Err(Error::Unauthenticated);
        };

        let (_guard, pending) = self.apply_optimistic(story_id, !currently_resonated)?;

        let remote = if pending.desired_state {
            match self.gateway.create_resonance(&session, story_id).await {
                Ok(_) | Err(Error::AlreadyExists(_)) => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            match self.gateway.delete_resonance(&session, story_id).await {
                Ok(()) | Err(Error::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        };

        match remote {
            Ok(()) => Ok(self.reconcile(&session, pending).await),
            Err(e) => {
                if self.rollback(&pending) {
                    warn!(story_id = %story_id, error = %e, "Resonance toggle failed, rolled back");
                    self.event_bus.emit_lossy(SyncEvent::ResonanceFailed {
                        story_id: story_id.to_string(),
                        message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                } else {
                    debug!(story_id = %story_id, error = %e, "Toggle from ended session failed");
                }
                Err(e)
            }
        }
    }

    /// Discard session state; in-flight calls settle without touching the cache
    pub fn sign_out(&self) {
        {
            let mut in_flight = lock(&self.in_flight);
            self.epoch.fetch_add(1, Ordering::SeqCst);
            in_flight.clear();
            self.cache.clear();
        }
        self.event_bus.emit_lossy(SyncEvent::SessionEnded { timestamp: Utc::now() });
    }

    /// Whether a remote call for the story is outstanding in this session
    pub fn is_pending(&self, story_id: &str) -> bool {
        lock(&self.in_flight).contains_key(story_id)
    }

    fn require_session(&self) -> Result<Session> {
        self.session.current().ok_or(Error::Unauthenticated)
    }

    fn reject(&self, story_id: &str, reason: String) -> Error {
        debug!(story_id = %story_id, reason = %reason, "Resonance toggle rejected");
        self.event_bus.emit_lossy(SyncEvent::MutationRejected {
            story_id: story_id.to_string(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        Error::StaleMutation(reason)
    }

    /// Check, claim and write the optimistic value under one `in_flight` lock
    fn apply_optimistic(&self, story_id: &str, desired_state: bool) -> Result<(InFlightGuard<'_>, PendingMutation)> {
        let claimed = {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.contains_key(story_id) {
                Err(format!("a resonance change for story {story_id} is already pending"))
            } else if self.cache.contains(story_id) == desired_state {
                Err(format!(
                    "story {story_id} is not in the expected state (resonated = {})",
                    !desired_state
                ))
            } else {
                let epoch = self.epoch.load(Ordering::SeqCst);
                in_flight.insert(story_id.to_string(), Flight { desired_state, epoch });

                let mut optimistic_membership = Membership::new();
                let previous_membership = self.cache.replace_with(|current| {
                    optimistic_membership = with_state(current.clone(), story_id, desired_state);
                    optimistic_membership.clone()
                });

                let guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    story_id: story_id.to_string(),
                    epoch,
                };
                let pending = PendingMutation {
                    story_id: story_id.to_string(),
                    previous_membership,
                    optimistic_membership,
                    desired_state,
                    epoch,
                };
                Ok((guard, pending))
            }
        };
        let (guard, pending) = claimed.map_err(|reason| self.reject(story_id, reason))?;

        debug!(story_id = %story_id, resonated = desired_state, "Applied optimistic resonance");
        self.event_bus.emit_lossy(SyncEvent::ResonanceApplied {
            story_id: story_id.to_string(),
            resonated: desired_state,
            timestamp: Utc::now(),
        });
        Ok((guard, pending))
    }

    /// Run `f` with `in_flight` held, only if the session of `epoch` is
    /// still current
    fn in_session<R>(&self, epoch: u64, f: impl FnOnce(&InFlight) -> R) -> Option<R> {
        let in_flight = lock(&self.in_flight);
        (self.epoch.load(Ordering::SeqCst) == epoch).then(|| f(&in_flight))
    }

    /// Restore the snapshot verbatim if nothing else wrote since the
    /// optimistic write; otherwise revert only this story's entry
    ///
    /// Returns false when the session ended in the meantime.
    fn rollback(&self, pending: &PendingMutation) -> bool {
        self.in_session(pending.epoch, |_| {
            self.cache.replace_with(|current| {
                if *current == pending.optimistic_membership {
                    pending.previous_membership.clone()
                } else {
                    let was_resonated = pending.previous_membership.contains(&pending.story_id);
                    with_state(current.clone(), &pending.story_id, was_resonated)
                }
            });
        })
        .is_some()
    }

    async fn reconcile(&self, session: &Session, pending: PendingMutation) -> ResonanceOutcome {
        let story_id = pending.story_id.as_str();
        let seq = self.next_list_seq();
        let (listed, counted) = tokio::join!(
            self.gateway.list_resonances(session),
            self.gateway.count_resonances(session, story_id),
        );

        let (resonated, reconciled) = match listed {
            Ok(server) => {
                self.install_server_membership(&server, Some(story_id), pending.epoch, seq);
                (server.contains(story_id), true)
            }
            Err(e) => {
                warn!(story_id = %story_id, error = %e, "Resonance refresh failed, keeping confirmed value");
                (pending.desired_state, false)
            }
        };

        let resonance_count = match counted {
            Ok(count) => {
                self.in_session(pending.epoch, |_| self.cache.set_count(story_id, count));
                Some(count)
            }
            Err(e) => {
                warn!(story_id = %story_id, error = %e, "Resonance count refresh failed");
                None
            }
        };

        if self.epoch.load(Ordering::SeqCst) == pending.epoch {
            info!(story_id = %story_id, resonated, reconciled, "Resonance settled");
            self.event_bus.emit_lossy(SyncEvent::ResonanceReconciled {
                story_id: story_id.to_string(),
                resonated,
                resonance_count,
                timestamp: Utc::now(),
            });
        }

        ResonanceOutcome {
            story_id: pending.story_id,
            resonated,
            reconciled,
            resonance_count,
        }
    }

    fn next_list_seq(&self) -> u64 {
        self.list_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the cache with server state, re-layering the optimistic delta
    /// of every other story still in flight
    ///
    /// Writes nothing and returns false when the session of `epoch` ended or
    /// a list requested after `seq` is already installed.
    fn install_server_membership(&self, server: &Membership, settling: Option<&str>, epoch: u64, seq: u64) -> bool {
        self.in_session(epoch, |in_flight| {
            if seq < self.installed_seq.load(Ordering::SeqCst) {
                return false;
            }
            self.installed_seq.store(seq, Ordering::SeqCst);
            self.cache.replace_with(|_| {
                in_flight
                    .iter()
                    .filter(|(id, flight)| Some(id.as_str()) != settling && flight.epoch == epoch)
                    .fold(server.clone(), |membership, (id, flight)| {
                        with_state(membership, id, flight.desired_state)
                    })
            });
            true
        })
        .unwrap_or(false)
    }
}
