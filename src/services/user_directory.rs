//! Profile lookups for participant validation and view enrichment.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::UserSummary;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Summaries of the ids that exist; unknown ids are absent from the map.
    async fn lookup_many(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, UserSummary>>;
}

/// Best-effort enrichment: a directory failure degrades to no summaries.
pub async fn summaries_or_empty(
    directory: &dyn UserDirectory,
    ids: &[Uuid],
) -> HashMap<Uuid, UserSummary> {
    if ids.is_empty() {
        return HashMap::new();
    }
    match directory.lookup_many(ids).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(error = %e, count = ids.len(), "user enrichment skipped");
            HashMap::new()
        }
    }
}

#[derive(Serialize)]
struct BatchLookupRequest<'a> {
    ids: &'a [Uuid],
}

/// Calls `POST {base_url}/internal/users/batch` on the user service.
pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("user directory client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn lookup_many(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, UserSummary>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/internal/users/batch", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&BatchLookupRequest { ids })
            .send()
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("user directory: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::StorageUnavailable(format!(
                "user directory returned {}",
                response.status()
            )));
        }

        let users = response
            .json::<Vec<UserSummary>>()
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("user directory body: {e}")))?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }
}

/// In-process directory for single-node runs and tests.
///
/// In open mode every id resolves, with a generated summary for ids never inserted.
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Uuid, UserSummary>>,
    accept_unknown: bool,
}

impl InMemoryUserDirectory {
    pub fn open() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            accept_unknown: true,
        }
    }

    pub fn with_users(users: impl IntoIterator<Item = UserSummary>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.id, u)).collect()),
            accept_unknown: false,
        }
    }

    pub async fn insert(&self, user: UserSummary) {
        self.users.write().await.insert(user.id, user);
    }
}

fn generated_summary(id: Uuid) -> UserSummary {
    let simple = id.simple().to_string();
    UserSummary {
        id,
        username: format!("user-{}", &simple[..8]),
        display_name: None,
        avatar_url: None,
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn lookup_many(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, UserSummary>> {
        let users = self.users.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| match users.get(id) {
                Some(user) => Some((*id, user.clone())),
                None if self.accept_unknown => Some((*id, generated_summary(*id))),
                None => None,
            })
            .collect())
    }
}
