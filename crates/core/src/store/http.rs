//! `SessionStore` backed by the duet-api REST service.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use super::{SessionFilter, SessionPatch, SessionStore, StoreError};
use crate::session::{NewSession, PracticeSession};

/// Wire body for the guarded update route.
#[derive(Serialize)]
struct UpdateBody<'a> {
    expected_version: i64,
    #[serde(flatten)]
    patch: &'a SessionPatch,
}

/// HTTP client for the record-store service.
///
/// Maps the service's status codes back onto [`StoreError`]: 404 is
/// `NotFound`, 409 is `VersionConflict`, 422 is `InvalidTransition`.
/// Transport failures and unexpected statuses become `Unavailable`.
pub struct HttpSessionStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/sessions", self.base_url)
    }

    fn session_url(&self, id: Uuid) -> String {
        format!("{}/sessions/{}", self.base_url, id)
    }

    async fn parse_session(response: reqwest::Response) -> Result<PracticeSession, StoreError> {
        response
            .json::<PracticeSession>()
            .await
            .map_err(|e| StoreError::Unavailable(format!("malformed session body: {}", e)))
    }

    async fn error_for(id: Uuid, response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(id),
            _ => StoreError::Unavailable(format!("unexpected status {}: {}", status, body)),
        }
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn create(&self, new: NewSession) -> Result<PracticeSession, StoreError> {
        let response = self
            .client
            .post(self.sessions_url())
            .json(&new)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if response.status() == StatusCode::CREATED {
            Self::parse_session(response).await
        } else {
            Err(Self::error_for(Uuid::nil(), response).await)
        }
    }

    async fn get(&self, id: Uuid) -> Result<PracticeSession, StoreError> {
        let response = self
            .client
            .get(self.session_url(id))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            Self::parse_session(response).await
        } else {
            Err(Self::error_for(id, response).await)
        }
    }

    async fn query(&self, filter: &SessionFilter) -> Result<Vec<PracticeSession>, StoreError> {
        let response = self
            .client
            .get(self.sessions_url())
            .query(filter)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            response
                .json::<Vec<PracticeSession>>()
                .await
                .map_err(|e| StoreError::Unavailable(format!("malformed query body: {}", e)))
        } else {
            Err(Self::error_for(Uuid::nil(), response).await)
        }
    }

    async fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<PracticeSession, StoreError> {
        let body = UpdateBody {
            expected_version,
            patch: &patch,
        };
        let response = self
            .client
            .patch(self.session_url(id))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Self::parse_session(response).await,
            StatusCode::CONFLICT => Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
            }),
            StatusCode::UNPROCESSABLE_ENTITY => {
                // The service rejected a status regression. We cannot recover
                // the exact pair from the body without refetching; report the
                // stored side as authoritative.
                let current = self.get(id).await?;
                Err(StoreError::InvalidTransition {
                    from: current.status,
                    to: patch.status.unwrap_or(current.status),
                })
            }
            _ => Err(Self::error_for(id, response).await),
        }
    }
}
