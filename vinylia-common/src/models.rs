//! Domain records as stored by the hosted backend, plus the story card
//! projection rendered by feed views.
//!
//! Field names follow the backend's snake_case column names so the records
//! deserialize straight from REST responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Story identifier (backend UUID as text)
pub type StoryId = String;

/// Set of story IDs the current user has resonated with
pub type Membership = BTreeSet<StoryId>;

/// Public user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

/// Catalog entry for a pressing, shared across users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vinyl {
    pub id: String,
    pub artist: String,
    pub album: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub musicbrainz_id: Option<String>,
    #[serde(default)]
    pub discogs_id: Option<i64>,
    #[serde(default)]
    pub cover_art_url: Option<String>,
    #[serde(default)]
    pub cover_art_thumb_url: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// A vinyl in one user's library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserVinyl {
    pub id: String,
    pub user_id: String,
    pub vinyl_id: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub play_count: u32,
    #[serde(default)]
    pub vinyl: Option<Vinyl>,
}

/// Mood attached to a story
///
/// Unknown values coming from the backend are preserved rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Warm,
    Nostalgic,
    Night,
    Calm,
    Energy,
    #[serde(untagged)]
    Other(String),
}

impl Mood {
    pub fn as_str(&self) -> &str {
        match self {
            Mood::Warm => "warm",
            Mood::Nostalgic => "nostalgic",
            Mood::Night => "night",
            Mood::Calm => "calm",
            Mood::Energy => "energy",
            Mood::Other(other) => other,
        }
    }
}

/// Personal narrative attached to a vinyl in a user's library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub user_id: String,
    pub user_vinyl_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub mood: Option<Mood>,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Author, when the query embedded `user:profiles(*)`
    #[serde(default)]
    pub user: Option<Profile>,
    /// Library entry, when the query embedded `user_vinyl:user_vinyls(*, vinyl:vinyls(*))`
    #[serde(default)]
    pub user_vinyl: Option<UserVinyl>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub comment_count: Option<u64>,
}

/// Partial story update; only populated fields are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<Mood>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl StoryUpdate {
    /// Update touching only the narrative text
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// Row in the resonances table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub user_id: String,
    pub story_id: StoryId,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Read-only view model for one story in a feed
///
/// Always recomputed from the story and the current membership; never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryCard {
    pub story_id: StoryId,
    pub author_id: String,
    pub author_name: String,
    pub author_handle: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub cover_art_url: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub mood: Option<Mood>,
    pub resonance_count: u64,
    pub comment_count: u64,
    pub resonated: bool,
}

const FALLBACK_AUTHOR_NAME: &str = "Vinyl Collector";

impl StoryCard {
    /// Project a story against the current user's membership
    ///
    /// `resonance_count` overrides the story's embedded like count when a
    /// fresher aggregate is known.
    pub fn project(story: &Story, membership: &Membership, resonance_count: Option<u64>) -> Self {
        let author = story.user.as_ref();
        let vinyl = story.user_vinyl.as_ref().and_then(|uv| uv.vinyl.as_ref());

        Self {
            story_id: story.id.clone(),
            author_id: story.user_id.clone(),
            author_name: author
                .and_then(|p| p.display_name.clone())
                .unwrap_or_else(|| FALLBACK_AUTHOR_NAME.to_string()),
            author_handle: author.and_then(|p| p.username.as_ref()).map(|u| format!("@{u}")),
            artist: vinyl.map(|v| v.artist.clone()),
            album: vinyl.map(|v| v.album.clone()),
            cover_art_url: vinyl.and_then(|v| v.cover_art_url.clone()),
            title: story.title.clone(),
            content: story.content.clone(),
            mood: story.mood.clone(),
            resonance_count: resonance_count.or(story.like_count).unwrap_or(0),
            comment_count: story.comment_count.unwrap_or(0),
            resonated: membership.contains(&story.id),
        }
    }
}
