//! Remote gateways
//!
//! Narrow request/response contracts over the hosted backend. The
//! coordinator and auto-saver depend on these traits only; the PostgREST
//! implementation lives in [`postgrest`], test doubles live with the tests.

use async_trait::async_trait;
use vinylia_common::models::{ResonanceRecord, Story, StoryUpdate};
use vinylia_common::{Membership, Result};

use crate::session::Session;

pub mod postgrest;

pub use postgrest::PostgrestGateway;

/// Resonance records for (user, story) pairs
///
/// Each pair has at most one record on the backend.
#[async_trait]
pub trait InteractionGateway: Send + Sync {
    /// Create the record for the session's user
    ///
    /// # Errors
    /// * `AlreadyExists` - the user already resonated with the story
    /// * `Unauthenticated` - the backend refused the session
    async fn create_resonance(&self, session: &Session, story_id: &str) -> Result<ResonanceRecord>;

    /// Delete the record for the session's user
    ///
    /// # Errors
    /// * `NotFound` - there was no record to delete
    /// * `Unauthenticated` - the backend refused the session
    async fn delete_resonance(&self, session: &Session, story_id: &str) -> Result<()>;

    /// Every story the session's user has resonated with (authoritative)
    async fn list_resonances(&self, session: &Session) -> Result<Membership>;

    /// Number of users who resonated with a story
    async fn count_resonances(&self, session: &Session, story_id: &str) -> Result<u64>;
}

/// Story reads and writes used by feeds and the auto-saver
#[async_trait]
pub trait StoryGateway: Send + Sync {
    /// Apply a partial update and return the stored story
    async fn update_story(&self, session: &Session, story_id: &str, update: &StoryUpdate) -> Result<Story>;

    /// Public stories, newest first; `page` is 1-based
    async fn discover_feed(&self, session: &Session, page: u32, limit: u32) -> Result<Vec<Story>>;
}
