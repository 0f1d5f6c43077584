//! Typed access to the shared session record store.
//!
//! The store is a dumb document service: create, query, and a shallow-merge
//! update guarded by an expected version. All arbitration logic lives above
//! it. Two backends ship here: an in-process [`MemoryStore`] for tests and
//! local development, and [`HttpSessionStore`] speaking to the duet-api
//! service. Both implement the same compare-and-swap semantics, which is what
//! the retry loops in the arbiter and aggregator rely on.

mod http;
mod memory;

pub use http::HttpSessionStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::module::ModuleKind;
use crate::session::{JoinRequest, NewSession, Participant, PracticeSession, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error("version conflict on session {id}: expected {expected}")]
    VersionConflict { id: Uuid, expected: i64 },
    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Query filter for session discovery. All fields are conjunctive.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_type: Option<ModuleKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_code: Option<String>,
}

impl SessionFilter {
    /// The discovery filter: open sessions of one module.
    pub fn open(module: ModuleKind) -> Self {
        Self {
            module_type: Some(module),
            status: Some(SessionStatus::Waiting),
            session_code: None,
        }
    }

    /// Lookup by share code.
    pub fn by_code(code: impl Into<String>) -> Self {
        Self {
            module_type: None,
            status: None,
            session_code: Some(code.into()),
        }
    }

    pub fn matches(&self, session: &PracticeSession) -> bool {
        self.module_type.is_none_or(|m| session.module_type == m)
            && self.status.is_none_or(|s| session.status == s)
            && self
                .session_code
                .as_deref()
                .is_none_or(|c| session.session_code == c)
    }
}

/// A shallow-merge partial update. `None` fields are left untouched; `Some`
/// fields replace the stored value wholesale, so callers must build list and
/// map fields from a freshly fetched snapshot.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_participants: Option<Vec<JoinRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.participants.is_none()
            && self.pending_participants.is_none()
            && self.feedback.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
    }

    /// Rejects patches that would move status backwards (or sideways).
    pub fn validate_against(&self, current: &PracticeSession) -> Result<(), StoreError> {
        if let Some(next) = self.status {
            if !current.status.can_advance_to(next) {
                return Err(StoreError::InvalidTransition {
                    from: current.status,
                    to: next,
                });
            }
        }
        Ok(())
    }

    /// Applies the merge onto `session`. Callers validate first.
    pub fn apply(&self, session: &mut PracticeSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(participants) = &self.participants {
            session.participants = participants.clone();
        }
        if let Some(pending) = &self.pending_participants {
            session.pending_participants = pending.clone();
        }
        if let Some(feedback) = &self.feedback {
            session.feedback = feedback.clone();
        }
        if let Some(started_at) = self.started_at {
            session.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            session.completed_at = Some(completed_at);
        }
    }
}

/// CRUD contract against the shared record store.
///
/// `update` is the only mutation primitive: a shallow merge that commits iff
/// the stored version still equals `expected_version`. A conflict means
/// another principal won the race; the caller refetches and rebuilds.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, new: NewSession) -> Result<PracticeSession, StoreError>;

    async fn get(&self, id: Uuid) -> Result<PracticeSession, StoreError>;

    async fn query(&self, filter: &SessionFilter) -> Result<Vec<PracticeSession>, StoreError>;

    async fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<PracticeSession, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> PracticeSession {
        NewSession {
            module_type: ModuleKind::Interview,
            creator_email: "a@x.com".into(),
            creator_name: "Ada".into(),
            creator_role: "interviewer".into(),
            max_participants: 2,
            context: Value::Null,
            scenario: Value::Null,
        }
        .into_session()
    }

    #[test]
    fn patch_rejects_status_regression() {
        let mut s = session();
        s.status = SessionStatus::Active;

        let patch = SessionPatch {
            status: Some(SessionStatus::Waiting),
            ..Default::default()
        };
        assert!(matches!(
            patch.validate_against(&s),
            Err(StoreError::InvalidTransition { .. })
        ));

        let forward = SessionPatch {
            status: Some(SessionStatus::Completed),
            ..Default::default()
        };
        assert!(forward.validate_against(&s).is_ok());
    }

    #[test]
    fn patch_merges_shallowly() {
        let mut s = session();
        let mut feedback = HashMap::new();
        feedback.insert("a@x.com".to_string(), json!({"score": 70}));

        let patch = SessionPatch {
            status: Some(SessionStatus::Active),
            feedback: Some(feedback),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        patch.apply(&mut s);

        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.started_at.is_some());
        assert_eq!(s.feedback.len(), 1);
        // Untouched fields survive.
        assert!(s.participants.is_empty());
        assert!(s.completed_at.is_none());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(SessionPatch::default().is_empty());
        let patch = SessionPatch {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn filter_matches_conjunctively() {
        let s = session();
        assert!(SessionFilter::default().matches(&s));
        assert!(SessionFilter::open(ModuleKind::Interview).matches(&s));
        assert!(!SessionFilter::open(ModuleKind::SalesCall).matches(&s));
        assert!(SessionFilter::by_code(s.session_code.clone()).matches(&s));
        assert!(!SessionFilter::by_code("ZZZZZZ").matches(&s));

        let mut active = s.clone();
        active.status = SessionStatus::Active;
        assert!(!SessionFilter::open(ModuleKind::Interview).matches(&active));
    }
}
