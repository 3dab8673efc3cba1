//! Remote API access.
//!
//! [`RemoteGateway`] is the seam between the sync engine and the REST API;
//! [`HttpGateway`] implements it over reqwest. Records come back exactly as
//! the server sends them, so message content is still ciphertext.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crypter_shared::{Conversation, Message, Participant, SyncPayload};

use crate::config::ClientConfig;
use crate::error::{Result, SyncError};

/// Which way a page extends from its cursor timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Strictly before the timestamp, newest first on the wire.
    Old,
    /// Strictly after the timestamp, oldest first on the wire.
    New,
    /// Every unread record after the timestamp; `limit` is advisory.
    Unread,
}

impl Direction {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
            Self::Unread => "unread",
        }
    }
}

/// A page request: direction, anchor timestamp and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub direction: Direction,
    pub timestamp: i64,
    pub limit: usize,
}

impl Cursor {
    pub fn old(timestamp: i64, limit: usize) -> Self {
        Self {
            direction: Direction::Old,
            timestamp,
            limit,
        }
    }

    pub fn new(timestamp: i64, limit: usize) -> Self {
        Self {
            direction: Direction::New,
            timestamp,
            limit,
        }
    }

    pub fn unread(timestamp: i64, limit: usize) -> Self {
        Self {
            direction: Direction::Unread,
            timestamp,
            limit,
        }
    }

    /// The newest page: old direction from now.
    pub fn latest(limit: usize) -> Self {
        Self::old(crypter_shared::types::now(), limit)
    }

    /// The oldest page: new direction from the epoch.
    pub fn earliest(limit: usize) -> Self {
        Self::new(0, limit)
    }

    /// Same direction, moved to `timestamp` and shrunk to `limit`.
    pub fn continue_at(self, timestamp: i64, limit: usize) -> Self {
        Self {
            timestamp,
            limit,
            ..self
        }
    }
}

/// What a message page is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Conference(Uuid),
    Participant(Uuid),
}

/// Remote source of truth.
///
/// Timeouts surface as `SyncError::Http { status: 408 | 504 }` or a timed-out
/// `SyncError::Transport`; callers decide whether to fall back.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// `None` when the server does not know the user.
    async fn user(&self, id: Uuid) -> Result<Option<Participant>>;

    /// Conferences ordered on `updated_at` relative to the cursor.
    async fn conferences(&self, cursor: Cursor) -> Result<Vec<Conversation>>;

    /// `None` when the local user has no conference with `participant`.
    async fn conference_by_participant(&self, participant: Uuid) -> Result<Option<Conversation>>;

    /// Messages of a scope ordered on `date` relative to the cursor.
    async fn messages(&self, scope: Scope, cursor: Cursor) -> Result<Vec<Message>>;

    /// Changes after `max_timestamp` plus every unread message dated at or
    /// after `min_timestamp`.
    async fn synchronize(&self, min_timestamp: i64, max_timestamp: i64) -> Result<SyncPayload>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`RemoteGateway`] over the REST API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "remote request failed");
            return Err(SyncError::Http {
                status: status.as_u16(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        match self.get(path, query).await {
            Ok(value) => Ok(Some(value)),
            Err(SyncError::Http { status: 404 }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn cursor_query(cursor: Cursor) -> [(&'static str, String); 2] {
    [
        ("timestamp", cursor.timestamp.to_string()),
        ("limit", cursor.limit.to_string()),
    ]
}

fn messages_path(scope: Scope, direction: Direction) -> String {
    match scope {
        Scope::Conference(id) => format!("/api/messenger/{}_messages/{id}", direction.prefix()),
        Scope::Participant(id) => format!(
            "/api/messenger/{}_messages_by_participant/{id}",
            direction.prefix()
        ),
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn user(&self, id: Uuid) -> Result<Option<Participant>> {
        self.get_optional(&format!("/api/users/{id}"), &[]).await
    }

    async fn conferences(&self, cursor: Cursor) -> Result<Vec<Conversation>> {
        let path = format!("/api/messenger/{}_conferences", cursor.direction.prefix());
        self.get(&path, &cursor_query(cursor)).await
    }

    async fn conference_by_participant(&self, participant: Uuid) -> Result<Option<Conversation>> {
        self.get_optional(
            &format!("/api/messenger/conference_by_participant/{participant}"),
            &[],
        )
        .await
    }

    async fn messages(&self, scope: Scope, cursor: Cursor) -> Result<Vec<Message>> {
        self.get(&messages_path(scope, cursor.direction), &cursor_query(cursor))
            .await
    }

    async fn synchronize(&self, min_timestamp: i64, max_timestamp: i64) -> Result<SyncPayload> {
        self.get(
            "/api/messenger/synchronize",
            &[
                ("min_timestamp", min_timestamp.to_string()),
                ("max_timestamp", max_timestamp.to_string()),
            ],
        )
        .await
    }
}
