//! Discover feed projection
//!
//! Holds the stories loaded so far and derives story cards from them and the
//! current resonance membership. Cards are recomputed on every call, so a
//! view re-rendering after a cache notification always sees fresh state.

use std::sync::Arc;

use vinylia_common::models::{Story, StoryCard};
use vinylia_common::{Error, Result};

use crate::cache::CacheReader;
use crate::gateway::StoryGateway;
use crate::session::SessionProvider;

pub struct FeedView {
    gateway: Arc<dyn StoryGateway>,
    session: Arc<dyn SessionProvider>,
    cache: CacheReader,
    page_size: u32,
    stories: Vec<Story>,
    next_page: u32,
    /// Number of stories the most recent load appended
    last_loaded: usize,
}

impl FeedView {
    pub fn new(
        gateway: Arc<dyn StoryGateway>,
        session: Arc<dyn SessionProvider>,
        cache: CacheReader,
        page_size: u32,
    ) -> Self {
        Self {
            gateway,
            session,
            cache,
            page_size,
            stories: Vec::new(),
            next_page: 1,
            last_loaded: 0,
        }
    }

    /// Reload from the first page
    pub async fn refresh(&mut self) -> Result<usize> {
        self.stories.clear();
        self.next_page = 1;
        self.last_loaded = 0;
        self.load_more().await
    }

    /// Append the next page; returns how many stories it held
    pub async fn load_more(&mut self) -> Result<usize> {
        let session = self.session.current().ok_or(Error::Unauthenticated)?;
        let page = self
            .gateway
            .discover_feed(&session, self.next_page, self.page_size)
            .await?;

        let loaded = page.len();
        self.stories.extend(page);
        self.next_page += 1;
        self.last_loaded = loaded;
        Ok(loaded)
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    /// Story cards projected against the current membership and counts
    pub fn cards(&self) -> Vec<StoryCard> {
        self.project(&self.stories)
    }

    /// Cards for the stories the most recent load appended
    pub fn last_page_cards(&self) -> Vec<StoryCard> {
        self.project(&self.stories[self.stories.len() - self.last_loaded..])
    }

    fn project(&self, stories: &[Story]) -> Vec<StoryCard> {
        let membership = self.cache.get();
        let counts = self.cache.counts();
        stories
            .iter()
            .map(|story| StoryCard::project(story, &membership, counts.get(&story.id).copied()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResonanceCache;
    use crate::session::{Session, StaticSession};
    use async_trait::async_trait;
    use chrono::Utc;
    use vinylia_common::models::StoryUpdate;

    /// Serves `total` stories, newest first
    struct PagedStories {
        total: u32,
    }

    fn story(n: u32) -> Story {
        Story {
            id: format!("s{n}"),
            user_id: "u2".to_string(),
            user_vinyl_id: "uv1".to_string(),
            title: None,
            content: format!("story {n}"),
            mood: None,
            is_public: true,
            created_at: Utc::now(),
            updated_at: None,
            user: None,
            user_vinyl: None,
            like_count: Some(4),
            comment_count: None,
        }
    }

    #[async_trait]
    impl StoryGateway for PagedStories {
        async fn update_story(&self, _: &Session, story_id: &str, _: &StoryUpdate) -> Result<Story> {
            Err(Error::NotFound(story_id.to_string()))
        }

        async fn discover_feed(&self, _: &Session, page: u32, limit: u32) -> Result<Vec<Story>> {
            let start = (page - 1) * limit + 1;
            let end = (start + limit).min(self.total + 1);
            Ok((start..end).map(story).collect())
        }
    }

    fn view(total: u32, cache: Arc<ResonanceCache>) -> FeedView {
        FeedView::new(
            Arc::new(PagedStories { total }),
            Arc::new(StaticSession::signed_in(Session::new("u1", "token"))),
            CacheReader::new(cache),
            2,
        )
    }

    #[tokio::test]
    async fn test_paging_and_refresh() {
        let mut feed = view(3, Arc::new(ResonanceCache::new()));

        assert_eq!(feed.refresh().await.unwrap(), 2);
        assert_eq!(feed.load_more().await.unwrap(), 1);
        assert_eq!(feed.load_more().await.unwrap(), 0);
        assert_eq!(feed.stories().len(), 3);

        assert_eq!(feed.refresh().await.unwrap(), 2);
        assert_eq!(feed.stories()[0].id, "s1");
    }

    #[tokio::test]
    async fn test_last_page_cards_after_short_page() {
        let mut feed = view(3, Arc::new(ResonanceCache::new()));
        assert!(feed.last_page_cards().is_empty());

        feed.refresh().await.unwrap();
        feed.load_more().await.unwrap();
        let ids: Vec<_> = feed.last_page_cards().into_iter().map(|c| c.story_id).collect();
        assert_eq!(ids, vec!["s3"]);

        // a page past the end shows nothing rather than earlier stories
        feed.load_more().await.unwrap();
        assert!(feed.last_page_cards().is_empty());
    }

    #[tokio::test]
    async fn test_cards_follow_cache() {
        let cache = Arc::new(ResonanceCache::new());
        let mut feed = view(2, cache.clone());
        feed.refresh().await.unwrap();

        assert!(feed.cards().iter().all(|card| !card.resonated));

        cache.set(["s2".to_string()].into_iter().collect());
        cache.set_count("s2", 5);
        let cards = feed.cards();
        assert!(!cards[0].resonated);
        assert_eq!(cards[0].resonance_count, 4);
        assert!(cards[1].resonated);
        assert_eq!(cards[1].resonance_count, 5);
    }

    #[tokio::test]
    async fn test_signed_out_feed() {
        let mut feed = FeedView::new(
            Arc::new(PagedStories { total: 3 }),
            Arc::new(StaticSession::signed_out()),
            CacheReader::new(Arc::new(ResonanceCache::new())),
            2,
        );
        assert_eq!(feed.refresh().await, Err(Error::Unauthenticated));
        assert!(feed.stories().is_empty());
    }
}
