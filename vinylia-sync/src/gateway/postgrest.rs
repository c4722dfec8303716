//! PostgREST gateway for the hosted backend
//!
//! Talks to `{supabase_url}/rest/v1/<table>` with the project's anon key and
//! the session's bearer token; row-level security on the backend scopes
//! every request to that user.

use std::future::Future;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use vinylia_common::config::BackendConfig;
use vinylia_common::models::{ResonanceRecord, Story, StoryUpdate};
use vinylia_common::{Error, Membership, Result};

use super::{InteractionGateway, StoryGateway};
use crate::session::Session;

const RESONANCES_TABLE: &str = "story_resonances";
/// Older deployments store resonances in `likes`
const LEGACY_LIKES_TABLE: &str = "likes";
const STORIES_TABLE: &str = "stories";
const COMMENTS_TABLE: &str = "comments";
const STORY_EMBED: &str = "*,user:profiles(*),user_vinyl:user_vinyls(*,vinyl:vinyls(*))";
const USER_AGENT: &str = concat!("vinylia-sync/", env!("CARGO_PKG_VERSION"));

// Postgres / PostgREST error codes
const UNIQUE_VIOLATION: &str = "23505";
const UNDEFINED_TABLE: &str = "42P01";
const SCHEMA_CACHE_MISS: &str = "PGRST205";
const JWT_EXPIRED: &str = "PGRST301";
const JWT_INVALID: &str = "PGRST302";

/// Error body returned by PostgREST
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Non-success response, kept raw until the caller decides what it means
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: Option<String>,
    message: String,
}

impl ApiError {
    async fn from_response(response: Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
        Self {
            status,
            code: body.code,
            message: body.message.unwrap_or(text),
        }
    }

    fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    fn is_missing_table(&self) -> bool {
        self.has_code(UNDEFINED_TABLE) || self.has_code(SCHEMA_CACHE_MISS)
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        if e.status == StatusCode::UNAUTHORIZED || e.has_code(JWT_EXPIRED) || e.has_code(JWT_INVALID) {
            Error::Unauthenticated
        } else if e.status == StatusCode::CONFLICT || e.has_code(UNIQUE_VIOLATION) {
            Error::AlreadyExists(e.message)
        } else {
            Error::RemoteRejected {
                status: e.status.as_u16(),
                message: e.message,
            }
        }
    }
}

/// Request outcome before table fallback has been decided
#[derive(Debug)]
enum Failure {
    Api(ApiError),
    Error(Error),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Failure::Error(e)
    }
}

impl From<Failure> for Error {
    fn from(f: Failure) -> Self {
        match f {
            Failure::Api(e) => e.into(),
            Failure::Error(e) => e,
        }
    }
}

type Attempt<T> = std::result::Result<T, Failure>;

/// Gateway backed by the hosted PostgREST API
pub struct PostgrestGateway {
    http_client: reqwest::Client,
    rest_url: String,
    anon_key: String,
}

impl PostgrestGateway {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::NetworkFailure(e.to_string()))?;

        Ok(Self {
            http_client,
            rest_url: format!("{}/rest/v1", config.base_url()),
            anon_key: config.anon_key.clone(),
        })
    }

    fn request(&self, method: Method, table: &str, session: &Session) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
    }

    async fn execute(&self, request: RequestBuilder) -> Attempt<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::NetworkFailure(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Failure::Api(ApiError::from_response(response).await))
        }
    }

    async fn rows<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Attempt<Vec<T>> {
        let response = self.execute(request).await?;
        let rows = response
            .json::<Vec<T>>()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(rows)
    }

    /// Run `op` against the resonances table, retrying on the legacy table
    /// when the backend does not know the new one
    async fn on_resonance_table<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(&'static str) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        match op(RESONANCES_TABLE).await {
            Err(Failure::Api(e)) if e.is_missing_table() => {
                warn!(
                    table = RESONANCES_TABLE,
                    fallback = LEGACY_LIKES_TABLE,
                    "Resonances table missing, using legacy table"
                );
                op(LEGACY_LIKES_TABLE).await.map_err(Error::from)
            }
            other => other.map_err(Error::from),
        }
    }

    async fn insert_resonance(&self, table: &str, session: &Session, story_id: &str) -> Attempt<ResonanceRecord> {
        let request = self
            .request(Method::POST, table, session)
            .header("Prefer", "return=representation")
            .json(&json!({ "user_id": session.user_id, "story_id": story_id }));

        self.rows::<ResonanceRecord>(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Failure::Error(Error::Parse("insert returned no row".to_string())))
    }

    async fn remove_resonance(&self, table: &str, session: &Session, story_id: &str) -> Attempt<()> {
        let request = self
            .request(Method::DELETE, table, session)
            .header("Prefer", "return=representation")
            .query(&[
                ("user_id", format!("eq.{}", session.user_id)),
                ("story_id", format!("eq.{story_id}")),
            ]);

        let deleted = self.rows::<serde_json::Value>(request).await?;
        if deleted.is_empty() {
            return Err(Failure::Error(Error::NotFound(format!("resonance on story {story_id}"))));
        }
        Ok(())
    }

    async fn select_resonances(&self, table: &str, session: &Session) -> Attempt<Membership> {
        #[derive(Deserialize)]
        struct Row {
            story_id: String,
        }

        let request = self
            .request(Method::GET, table, session)
            .query(&[("select", "story_id".to_string()), ("user_id", format!("eq.{}", session.user_id))]);

        let rows = self.rows::<Row>(request).await?;
        Ok(rows.into_iter().map(|row| row.story_id).collect())
    }

    async fn exact_count(&self, table: &str, session: &Session, story_id: &str) -> Attempt<u64> {
        let request = self
            .request(Method::HEAD, table, session)
            .header("Prefer", "count=exact")
            .query(&[("select", "story_id".to_string()), ("story_id", format!("eq.{story_id}"))]);

        let response = self.execute(request).await?;
        let range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Parse("count response without Content-Range".to_string()))?;

        Ok(parse_content_range_total(range)?)
    }

    /// Fill each story's resonance and comment counts with one exact-count
    /// pair per story, all stories concurrently
    ///
    /// A failed count leaves the field unset rather than failing the page.
    async fn with_counts(&self, session: &Session, stories: Vec<Story>) -> Vec<Story> {
        join_all(stories.into_iter().map(|mut story| async move {
            let (likes, comments) = tokio::join!(
                self.count_resonances(session, &story.id),
                self.exact_count(COMMENTS_TABLE, session, &story.id),
            );

            match likes {
                Ok(count) => story.like_count = Some(count),
                Err(e) => warn!(story_id = %story.id, error = %e, "Resonance count unavailable"),
            }
            match comments.map_err(Error::from) {
                Ok(count) => story.comment_count = Some(count),
                Err(e) => warn!(story_id = %story.id, error = %e, "Comment count unavailable"),
            }
            story
        }))
        .await
    }
}

/// Total from a PostgREST `Content-Range` header (`0-9/42` or `*/0`)
fn parse_content_range_total(value: &str) -> Result<u64> {
    value
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
        .ok_or_else(|| Error::Parse(format!("invalid Content-Range: {value}")))
}

#[async_trait]
impl InteractionGateway for PostgrestGateway {
    async fn create_resonance(&self, session: &Session, story_id: &str) -> Result<ResonanceRecord> {
        debug!(story_id = %story_id, "Creating resonance");
        let record = self
            .on_resonance_table(|table| self.insert_resonance(table, session, story_id))
            .await?;
        info!(story_id = %story_id, "Resonance created");
        Ok(record)
    }

    async fn delete_resonance(&self, session: &Session, story_id: &str) -> Result<()> {
        debug!(story_id = %story_id, "Deleting resonance");
        self.on_resonance_table(|table| self.remove_resonance(table, session, story_id))
            .await?;
        info!(story_id = %story_id, "Resonance deleted");
        Ok(())
    }

    async fn list_resonances(&self, session: &Session) -> Result<Membership> {
        let membership = self
            .on_resonance_table(|table| self.select_resonances(table, session))
            .await?;
        debug!(count = membership.len(), "Fetched resonance membership");
        Ok(membership)
    }

    async fn count_resonances(&self, session: &Session, story_id: &str) -> Result<u64> {
        self.on_resonance_table(|table| self.exact_count(table, session, story_id))
            .await
    }
}

#[async_trait]
impl StoryGateway for PostgrestGateway {
    async fn update_story(&self, session: &Session, story_id: &str, update: &StoryUpdate) -> Result<Story> {
        let request = self
            .request(Method::PATCH, STORIES_TABLE, session)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{story_id}"))])
            .json(update);

        let story = self
            .rows::<Story>(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("story {story_id}")))?;

        debug!(story_id = %story_id, "Story updated");
        Ok(story)
    }

    async fn discover_feed(&self, session: &Session, page: u32, limit: u32) -> Result<Vec<Story>> {
        let offset = page.saturating_sub(1).saturating_mul(limit);
        let request = self.request(Method::GET, STORIES_TABLE, session).query(&[
            ("select", STORY_EMBED.to_string()),
            ("is_public", "eq.true".to_string()),
            ("order", "created_at.desc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);

        let stories = self.rows::<Story>(request).await?;
        let stories = self.with_counts(session, stories).await;
        info!(page, count = stories.len(), "Loaded discover feed");
        Ok(stories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-9/42").unwrap(), 42);
        assert_eq!(parse_content_range_total("*/0").unwrap(), 0);
        assert!(parse_content_range_total("0-9/*").is_err());
        assert!(parse_content_range_total("garbage").is_err());
    }

    fn api_error(status: u16, code: Option<&str>) -> ApiError {
        ApiError {
            status: StatusCode::from_u16(status).unwrap(),
            code: code.map(str::to_string),
            message: "msg".to_string(),
        }
    }

    #[test]
    fn test_api_error_mapping() {
        assert_eq!(Error::from(api_error(401, None)), Error::Unauthenticated);
        assert_eq!(Error::from(api_error(403, Some(JWT_EXPIRED))), Error::Unauthenticated);
        assert!(matches!(Error::from(api_error(409, Some(UNIQUE_VIOLATION))), Error::AlreadyExists(_)));
        assert!(matches!(
            Error::from(api_error(500, None)),
            Error::RemoteRejected { status: 500, .. }
        ));
    }

    #[test]
    fn test_missing_table_detection() {
        assert!(api_error(404, Some(UNDEFINED_TABLE)).is_missing_table());
        assert!(api_error(404, Some(SCHEMA_CACHE_MISS)).is_missing_table());
        assert!(!api_error(404, None).is_missing_table());
    }

    #[test]
    fn test_gateway_creation() {
        let config = BackendConfig {
            supabase_url: "https://demo.supabase.co/".to_string(),
            anon_key: "anon".to_string(),
            ..BackendConfig::default()
        };
        let gateway = PostgrestGateway::new(&config).unwrap();
        assert_eq!(gateway.rest_url, "https://demo.supabase.co/rest/v1");
    }
}
