//! vinylia-sync library - client-side social synchronizer
//!
//! Keeps the current user's story resonances ("likes") in a local cache that
//! views render from, applies toggles optimistically and reconciles them with
//! the hosted backend, and debounces story text persistence.

use std::sync::Arc;

use tokio::sync::broadcast;
use vinylia_common::config::BackendConfig;
use vinylia_common::events::{EventBus, SyncEvent};
use vinylia_common::{Membership, Result, StoryId};

pub mod autosave;
pub mod cache;
pub mod coordinator;
pub mod debounce;
pub mod feed;
pub mod gateway;
pub mod session;

use autosave::StoryAutosave;
use cache::{CacheReader, ResonanceCache};
use coordinator::ResonanceCoordinator;
use feed::FeedView;
use gateway::{InteractionGateway, PostgrestGateway, StoryGateway};
use session::{Session, SessionProvider, StaticSession};

/// Composition root owning the shared cache and everything that writes it
///
/// Views get read handles ([`CacheReader`], event subscriptions) and the
/// narrow mutation interface on [`ResonanceCoordinator`].
#[derive(Clone)]
pub struct SyncContext {
    config: BackendConfig,
    event_bus: EventBus,
    session: Arc<StaticSession>,
    cache: Arc<ResonanceCache>,
    coordinator: Arc<ResonanceCoordinator>,
    stories: Arc<dyn StoryGateway>,
}

impl SyncContext {
    /// Wire the synchronizer against any gateway implementation
    pub fn new<G>(config: BackendConfig, gateway: Arc<G>) -> Self
    where
        G: InteractionGateway + StoryGateway + 'static,
    {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let session = Arc::new(StaticSession::signed_out());
        let cache = Arc::new(ResonanceCache::new());
        let coordinator = Arc::new(ResonanceCoordinator::new(
            cache.clone(),
            gateway.clone(),
            session.clone(),
            event_bus.clone(),
        ));

        Self {
            config,
            event_bus,
            session,
            cache,
            coordinator,
            stories: gateway,
        }
    }

    /// Wire the synchronizer against the hosted backend
    pub fn connect(config: BackendConfig) -> Result<Self> {
        let gateway = Arc::new(PostgrestGateway::new(&config)?);
        Ok(Self::new(config, gateway))
    }

    /// Start a session and populate the resonance cache
    pub async fn sign_in(&self, session: Session) -> Result<Membership> {
        self.session.sign_in(session);
        self.coordinator.load_membership().await
    }

    /// End the session and discard membership
    pub fn sign_out(&self) {
        self.session.sign_out();
        self.coordinator.sign_out();
    }

    pub fn coordinator(&self) -> &ResonanceCoordinator {
        &self.coordinator
    }

    pub fn cache_reader(&self) -> CacheReader {
        CacheReader::new(self.cache.clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_bus.subscribe()
    }

    pub fn feed(&self) -> FeedView {
        FeedView::new(
            self.stories.clone(),
            self.session.clone(),
            self.cache_reader(),
            self.config.feed_page_size,
        )
    }

    /// Auto-saver for one story's editor; drop it when the editor closes
    pub fn story_autosave(&self, story_id: impl Into<StoryId>) -> StoryAutosave {
        StoryAutosave::new(
            story_id,
            self.stories.clone(),
            self.session.clone() as Arc<dyn SessionProvider>,
            self.event_bus.clone(),
            self.config.autosave_delay(),
        )
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}
