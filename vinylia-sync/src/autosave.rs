//! Story auto-save
//!
//! Binds a debounced persister to one story's narrative text. The editor
//! calls [`StoryAutosave::edit`] on every change; the latest text is written
//! once typing pauses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use vinylia_common::events::{EventBus, SyncEvent};
use vinylia_common::models::StoryUpdate;
use vinylia_common::{Error, StoryId};

use crate::debounce::DebouncedPersister;
use crate::gateway::StoryGateway;
use crate::session::SessionProvider;

pub struct StoryAutosave {
    story_id: StoryId,
    persister: DebouncedPersister<String>,
}

impl StoryAutosave {
    pub fn new(
        story_id: impl Into<StoryId>,
        gateway: Arc<dyn StoryGateway>,
        session: Arc<dyn SessionProvider>,
        event_bus: EventBus,
        delay: Duration,
    ) -> Self {
        let story_id = story_id.into();
        let target = story_id.clone();

        let persister = DebouncedPersister::new(delay, move |content: String| {
            let gateway = gateway.clone();
            let session = session.clone();
            let event_bus = event_bus.clone();
            let story_id = target.clone();
            async move {
                let result = match session.current() {
                    Some(session) => gateway
                        .update_story(&session, &story_id, &StoryUpdate::content(content.as_str()))
                        .await
                        .map(|_| ()),
                    None => Err(Error::Unauthenticated),
                };

                match &result {
                    Ok(()) => {
                        let length = content.chars().count();
                        info!(story_id = %story_id, length, "Story auto-saved");
                        event_bus.emit_lossy(SyncEvent::StoryAutosaved {
                            story_id,
                            length,
                            timestamp: Utc::now(),
                        });
                    }
                    Err(e) => {
                        event_bus.emit_lossy(SyncEvent::StoryAutosaveFailed {
                            story_id,
                            message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
                result
            }
        });

        Self { story_id, persister }
    }

    /// Record the editor's current text
    pub fn edit(&self, content: impl Into<String>) {
        self.persister.schedule_persist(content.into());
    }

    /// Save pending text now (explicit save / leaving the editor normally)
    pub fn flush(&self) {
        self.persister.flush();
    }

    /// Drop any unsaved text without persisting it
    pub fn cancel(&self) {
        self.persister.cancel();
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, StaticSession};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vinylia_common::models::Story;
    use vinylia_common::Result;

    /// Records every update; fails when the content is "reject"
    #[derive(Default)]
    struct RecordingStories {
        saved: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl StoryGateway for RecordingStories {
        async fn update_story(&self, _: &Session, story_id: &str, update: &StoryUpdate) -> Result<Story> {
            if update.content.as_deref() == Some("reject") {
                return Err(Error::RemoteRejected {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            self.saved
                .lock()
                .unwrap()
                .push((story_id.to_string(), update.content.clone()));
            let story = serde_json::from_value(serde_json::json!({
                "id": story_id,
                "user_id": "u1",
                "user_vinyl_id": "uv1",
                "content": update.content.clone().unwrap_or_default(),
                "created_at": "2024-05-01T12:00:00Z",
            }))?;
            Ok(story)
        }

        async fn discover_feed(&self, _: &Session, _: u32, _: u32) -> Result<Vec<Story>> {
            Ok(Vec::new())
        }
    }

    fn autosave(gateway: Arc<RecordingStories>, bus: &EventBus) -> StoryAutosave {
        StoryAutosave::new(
            "s1",
            gateway,
            Arc::new(StaticSession::signed_in(Session::new("u1", "token"))),
            bus.clone(),
            Duration::from_millis(2000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_burst_saves_last_text_once() {
        let gateway = Arc::new(RecordingStories::default());
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let saver = autosave(gateway.clone(), &bus);

        saver.edit("M");
        saver.edit("My");
        saver.edit("My dad");
        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(
            *gateway.saved.lock().unwrap(),
            vec![("s1".to_string(), Some("My dad".to_string()))]
        );
        match events.recv().await.unwrap() {
            SyncEvent::StoryAutosaved { story_id, length, .. } => {
                assert_eq!(story_id, "s1");
                assert_eq!(length, 6);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_editor_discards_pending_text() {
        let gateway = Arc::new(RecordingStories::default());
        let bus = EventBus::new(16);
        let saver = autosave(gateway.clone(), &bus);

        saver.edit("half a thought");
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(saver);
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert!(gateway.saved.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let gateway = Arc::new(RecordingStories::default());
        let bus = EventBus::new(16);
        let saver = autosave(gateway.clone(), &bus);

        saver.edit("done");
        saver.flush();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(gateway.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_emits_failure() {
        let gateway = Arc::new(RecordingStories::default());
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let saver = autosave(gateway.clone(), &bus);

        saver.edit("reject");
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type(), "StoryAutosaveFailed");
        assert_eq!(event.story_id(), Some("s1"));
        assert!(gateway.saved.lock().unwrap().is_empty());
    }
}
