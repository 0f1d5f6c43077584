//! In-process session store with the same CAS semantics as the real service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{SessionFilter, SessionPatch, SessionStore, StoreError};
use crate::session::{NewSession, PracticeSession, SessionStatus};

/// A store backed by a `HashMap` behind an async `RwLock`.
///
/// The version check and merge happen under a single write lock, so its
/// compare-and-swap behavior matches the service's atomic UPDATE. Cloning
/// shares the underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<Uuid, PracticeSession>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes never-completed sessions whose last update predates `cutoff`.
    /// Returns how many were dropped. Mirrors the api-side sweeper for tests.
    pub async fn purge_stale(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.status == SessionStatus::Completed || s.updated_at >= cutoff);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, new: NewSession) -> Result<PracticeSession, StoreError> {
        let session = new.into_session();
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> Result<PracticeSession, StoreError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn query(&self, filter: &SessionFilter) -> Result<Vec<PracticeSession>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut matches: Vec<PracticeSession> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<PracticeSession, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if session.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
            });
        }
        patch.validate_against(session)?;
        patch.apply(session);
        session.version += 1;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }
}
