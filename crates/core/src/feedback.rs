//! Dual-feedback aggregation: one report per principal, completion on the
//! last submission.
//!
//! The submitter that fills the final missing entry also flips the session to
//! `completed` and stamps `completed_at` in the same guarded write, so the
//! completion invariant (completed iff every principal has feedback) can
//! never be observed half-true. Concurrent submissions are serialized by the
//! store's version check; the loser of a race rebuilds its merge from the
//! winner's snapshot and both entries survive.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::session::{PracticeSession, SessionStatus};
use crate::store::{SessionPatch, SessionStore, StoreError};

const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0} is not a principal of this session")]
    NotPrincipal(String),
    #[error("refusing to record an empty feedback report")]
    EmptyReport,
    #[error("session has not started; feedback is not open yet")]
    NotStarted,
    #[error("gave up after {attempts} contended write attempts")]
    ContentionExhausted { attempts: usize },
}

/// What a successful submission did to the session.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Recorded, but at least one principal is still missing.
    AwaitingPeers(PracticeSession),
    /// This submission completed the map; the session is now `completed`.
    Completed(PracticeSession),
}

impl SubmitOutcome {
    pub fn session(&self) -> &PracticeSession {
        match self {
            SubmitOutcome::AwaitingPeers(s) | SubmitOutcome::Completed(s) => s,
        }
    }
}

pub struct FeedbackAggregator {
    store: Arc<dyn SessionStore>,
    max_attempts: usize,
}

impl FeedbackAggregator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// True iff every principal email has an entry in the feedback map.
    pub fn is_complete(session: &PracticeSession) -> bool {
        session.feedback_complete()
    }

    /// Merges `report` under `email` and, when that fills the map, completes
    /// the session in the same write.
    ///
    /// Callers must only submit fully formed reports: a failed analysis run
    /// is retried or abandoned upstream, never written as a placeholder.
    /// Null reports are rejected here as a last line of defense.
    pub async fn submit(
        &self,
        session_id: Uuid,
        email: &str,
        report: Value,
    ) -> Result<SubmitOutcome, FeedbackError> {
        if report.is_null() {
            return Err(FeedbackError::EmptyReport);
        }

        for attempt in 1..=self.max_attempts {
            let latest = self.store.get(session_id).await?;
            if !latest.is_principal(email) {
                return Err(FeedbackError::NotPrincipal(email.to_string()));
            }
            if latest.status == SessionStatus::Waiting {
                return Err(FeedbackError::NotStarted);
            }

            let mut feedback = latest.feedback.clone();
            feedback.insert(email.to_string(), report.clone());

            let fills_map = latest
                .principals()
                .iter()
                .all(|p| feedback.contains_key(*p));
            let completes = fills_map && latest.status != SessionStatus::Completed;

            let patch = SessionPatch {
                feedback: Some(feedback),
                status: completes.then_some(SessionStatus::Completed),
                completed_at: completes.then(Utc::now),
                ..Default::default()
            };

            match self.store.update(session_id, patch, latest.version).await {
                Ok(updated) => {
                    return Ok(if updated.status == SessionStatus::Completed {
                        SubmitOutcome::Completed(updated)
                    } else {
                        SubmitOutcome::AwaitingPeers(updated)
                    });
                }
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(%session_id, attempt, "feedback write contended, refetching");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(FeedbackError::ContentionExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::JoinArbiter;
    use crate::module::ModuleKind;
    use crate::session::{Identity, NewSession};
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn active_session() -> (Arc<MemoryStore>, FeedbackAggregator, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let arbiter = JoinArbiter::new(store.clone());
        let session = store
            .create(NewSession {
                module_type: ModuleKind::Interview,
                creator_email: "a@x.com".into(),
                creator_name: "Ada".into(),
                creator_role: "interviewer".into(),
                max_participants: 2,
                context: Value::Null,
                scenario: Value::Null,
            })
            .await
            .unwrap();
        arbiter
            .direct_join(session.id, &Identity::new("b@x.com", "Bea"), "candidate")
            .await
            .unwrap();
        let aggregator = FeedbackAggregator::new(store.clone());
        (store, aggregator, session.id)
    }

    #[tokio::test]
    async fn first_submission_waits_for_peer() {
        let (_, aggregator, id) = active_session().await;

        let outcome = aggregator
            .submit(id, "a@x.com", json!({"score": 82}))
            .await
            .unwrap();
        let session = match outcome {
            SubmitOutcome::AwaitingPeers(s) => s,
            other => panic!("expected AwaitingPeers, got {:?}", other),
        };
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.feedback.len(), 1);
        assert!(session.completed_at.is_none());
    }

    #[tokio::test]
    async fn last_submission_completes_the_session() {
        let (_, aggregator, id) = active_session().await;

        aggregator
            .submit(id, "a@x.com", json!({"score": 82}))
            .await
            .unwrap();
        let outcome = aggregator
            .submit(id, "b@x.com", json!({"score": 77}))
            .await
            .unwrap();

        let session = match outcome {
            SubmitOutcome::Completed(s) => s,
            other => panic!("expected Completed, got {:?}", other),
        };
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.completed_at.is_some());
        assert_eq!(session.feedback.len(), 2);
        assert!(FeedbackAggregator::is_complete(&session));
    }

    #[tokio::test]
    async fn concurrent_submissions_both_survive() {
        let (store, aggregator, id) = active_session().await;

        let (a, b) = tokio::join!(
            aggregator.submit(id, "a@x.com", json!({"score": 82})),
            aggregator.submit(id, "b@x.com", json!({"score": 77})),
        );
        a.unwrap();
        b.unwrap();

        let final_state = store.get(id).await.unwrap();
        assert_eq!(final_state.feedback.len(), 2);
        assert!(final_state.feedback.contains_key("a@x.com"));
        assert!(final_state.feedback.contains_key("b@x.com"));
        assert_eq!(final_state.status, SessionStatus::Completed);
        assert!(final_state.completed_at.is_some());
    }

    #[tokio::test]
    async fn non_principal_is_refused() {
        let (_, aggregator, id) = active_session().await;
        let err = aggregator
            .submit(id, "intruder@x.com", json!({"score": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::NotPrincipal(_)));
    }

    #[tokio::test]
    async fn null_report_is_refused() {
        let (_, aggregator, id) = active_session().await;
        let err = aggregator.submit(id, "a@x.com", Value::Null).await.unwrap_err();
        assert!(matches!(err, FeedbackError::EmptyReport));
    }

    #[tokio::test]
    async fn waiting_session_rejects_feedback() {
        let store = Arc::new(MemoryStore::new());
        let session = store
            .create(NewSession {
                module_type: ModuleKind::Interview,
                creator_email: "a@x.com".into(),
                creator_name: "Ada".into(),
                creator_role: "interviewer".into(),
                max_participants: 2,
                context: Value::Null,
                scenario: Value::Null,
            })
            .await
            .unwrap();
        let aggregator = FeedbackAggregator::new(store);

        let err = aggregator
            .submit(session.id, "a@x.com", json!({"score": 50}))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::NotStarted));
    }

    #[tokio::test]
    async fn resubmission_overwrites_without_unsettling_status() {
        let (store, aggregator, id) = active_session().await;
        aggregator
            .submit(id, "a@x.com", json!({"score": 60}))
            .await
            .unwrap();
        aggregator
            .submit(id, "b@x.com", json!({"score": 70}))
            .await
            .unwrap();

        // Completed already; a resubmission replaces the entry and leaves
        // the status untouched.
        aggregator
            .submit(id, "a@x.com", json!({"score": 65}))
            .await
            .unwrap();
        let session = store.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.feedback["a@x.com"], json!({"score": 65}));
    }
}
