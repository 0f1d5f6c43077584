//! Join arbitration: pending requests, creator decisions, direct self-joins.
//!
//! Every mutation here is a read-modify-write built from a freshly fetched
//! snapshot and committed with that snapshot's version. A version conflict
//! means the other principal wrote in between; the whole closure re-runs
//! against the new snapshot, so concurrent joins and approvals converge
//! without losing entries.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::session::{Identity, JoinRequest, Participant, PracticeSession, SessionStatus};
use crate::store::{SessionPatch, SessionStore, StoreError};

/// Bound on CAS retries before giving up. Two writers per session means a
/// handful of rounds is already generous.
const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session is full ({capacity} principals)")]
    SessionFull { capacity: u32 },
    #[error("no pending join request for {0}")]
    NotPending(String),
    #[error("session is {status}, join operations are closed")]
    JoinClosed { status: SessionStatus },
    #[error("gave up after {attempts} contended write attempts")]
    ContentionExhausted { attempts: usize },
}

/// Outcome of one arbitration closure: either nothing to write (the intent
/// is already satisfied) or a patch to commit.
enum Decision {
    AlreadySatisfied,
    Write(SessionPatch),
}

pub struct JoinArbiter {
    store: Arc<dyn SessionStore>,
    max_attempts: usize,
}

impl JoinArbiter {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Files a join request for `who`. Idempotent: an email already pending
    /// or already a participant is a successful no-op, so repeated clicks
    /// never duplicate intent.
    pub async fn request_join(
        &self,
        session_id: Uuid,
        who: &Identity,
        role: &str,
    ) -> Result<PracticeSession, ArbiterError> {
        let who = who.clone();
        let role = role.to_string();
        self.with_retry(session_id, move |session| {
            if session.participant(&who.email).is_some() || session.pending(&who.email).is_some() {
                return Ok(Decision::AlreadySatisfied);
            }
            if session.status != SessionStatus::Waiting {
                return Err(ArbiterError::JoinClosed {
                    status: session.status,
                });
            }
            let mut pending = session.pending_participants.clone();
            pending.push(JoinRequest {
                email: who.email.clone(),
                name: who.name.clone(),
                role: role.clone(),
                requested_at: Utc::now(),
            });
            Ok(Decision::Write(SessionPatch {
                pending_participants: Some(pending),
                ..Default::default()
            }))
        })
        .await
    }

    /// Creator decision: admits the pending entry for `email`. The first
    /// approval also activates the session and stamps `started_at`. Fails
    /// once the session is at capacity.
    pub async fn approve(
        &self,
        session_id: Uuid,
        email: &str,
    ) -> Result<PracticeSession, ArbiterError> {
        let email = email.to_string();
        self.with_retry(session_id, move |session| {
            if session.participant(&email).is_some() {
                return Ok(Decision::AlreadySatisfied);
            }
            let Some(request) = session.pending(&email).cloned() else {
                return Err(ArbiterError::NotPending(email.clone()));
            };
            if session.at_capacity() {
                return Err(ArbiterError::SessionFull {
                    capacity: session.max_participants,
                });
            }

            let mut pending = session.pending_participants.clone();
            pending.retain(|p| p.email != email);
            let mut participants = session.participants.clone();
            participants.push(Participant {
                email: request.email,
                name: request.name,
                role: request.role,
                joined_at: Utc::now(),
            });

            let first_approval = session.status == SessionStatus::Waiting;
            Ok(Decision::Write(SessionPatch {
                pending_participants: Some(pending),
                participants: Some(participants),
                status: first_approval.then_some(SessionStatus::Active),
                started_at: first_approval.then(Utc::now),
                ..Default::default()
            }))
        })
        .await
    }

    /// Creator decision: drops the pending entry for `email`. Participants
    /// are untouched. Rejecting an email that is not pending is a no-op.
    pub async fn reject(
        &self,
        session_id: Uuid,
        email: &str,
    ) -> Result<PracticeSession, ArbiterError> {
        let email = email.to_string();
        self.with_retry(session_id, move |session| {
            if session.pending(&email).is_none() {
                return Ok(Decision::AlreadySatisfied);
            }
            let mut pending = session.pending_participants.clone();
            pending.retain(|p| p.email != email);
            Ok(Decision::Write(SessionPatch {
                pending_participants: Some(pending),
                ..Default::default()
            }))
        })
        .await
    }

    /// Direct-join mode: `who` inserts itself as a participant and activates
    /// the session in the same write, with no approval round trip.
    pub async fn direct_join(
        &self,
        session_id: Uuid,
        who: &Identity,
        role: &str,
    ) -> Result<PracticeSession, ArbiterError> {
        let who = who.clone();
        let role = role.to_string();
        self.with_retry(session_id, move |session| {
            if session.participant(&who.email).is_some() {
                return Ok(Decision::AlreadySatisfied);
            }
            if session.status == SessionStatus::Completed {
                return Err(ArbiterError::JoinClosed {
                    status: session.status,
                });
            }
            if session.at_capacity() {
                return Err(ArbiterError::SessionFull {
                    capacity: session.max_participants,
                });
            }

            let mut participants = session.participants.clone();
            participants.push(Participant {
                email: who.email.clone(),
                name: who.name.clone(),
                role: role.clone(),
                joined_at: Utc::now(),
            });

            let activates = session.status == SessionStatus::Waiting;
            Ok(Decision::Write(SessionPatch {
                participants: Some(participants),
                status: activates.then_some(SessionStatus::Active),
                started_at: activates.then(Utc::now),
                ..Default::default()
            }))
        })
        .await
    }

    /// Retracts `email`'s footprint from the session: removed from pending
    /// requests and from the participant list. Status is left alone; a
    /// session stranded this way is eventually swept by the store service.
    pub async fn leave(
        &self,
        session_id: Uuid,
        email: &str,
    ) -> Result<PracticeSession, ArbiterError> {
        let email = email.to_string();
        self.with_retry(session_id, move |session| {
            let in_pending = session.pending(&email).is_some();
            let in_participants = session.participant(&email).is_some();
            if !in_pending && !in_participants {
                return Ok(Decision::AlreadySatisfied);
            }

            let mut patch = SessionPatch::default();
            if in_pending {
                let mut pending = session.pending_participants.clone();
                pending.retain(|p| p.email != email);
                patch.pending_participants = Some(pending);
            }
            if in_participants {
                let mut participants = session.participants.clone();
                participants.retain(|p| p.email != email);
                patch.participants = Some(participants);
            }
            Ok(Decision::Write(patch))
        })
        .await
    }

    /// Fetch-decide-commit loop. The closure sees the latest snapshot and
    /// either declares the intent satisfied or produces a patch, which is
    /// committed against that snapshot's version.
    async fn with_retry<F>(&self, id: Uuid, mut decide: F) -> Result<PracticeSession, ArbiterError>
    where
        F: FnMut(&PracticeSession) -> Result<Decision, ArbiterError>,
    {
        for attempt in 1..=self.max_attempts {
            let latest = self.store.get(id).await?;
            let patch = match decide(&latest)? {
                Decision::AlreadySatisfied => return Ok(latest),
                Decision::Write(patch) => patch,
            };
            match self.store.update(id, patch, latest.version).await {
                Ok(updated) => return Ok(updated),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(session_id = %id, attempt, "write contended, refetching");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ArbiterError::ContentionExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleKind;
    use crate::session::NewSession;
    use crate::store::MemoryStore;
    use serde_json::Value;

    fn new_session(max_participants: u32) -> NewSession {
        NewSession {
            module_type: ModuleKind::SalesCall,
            creator_email: "a@x.com".into(),
            creator_name: "Ada".into(),
            creator_role: "seller".into(),
            max_participants,
            context: Value::Null,
            scenario: Value::Null,
        }
    }

    fn bea() -> Identity {
        Identity::new("b@x.com", "Bea")
    }

    async fn setup(max: u32) -> (Arc<MemoryStore>, JoinArbiter, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let arbiter = JoinArbiter::new(store.clone());
        let session = store.create(new_session(max)).await.unwrap();
        (store, arbiter, session.id)
    }

    #[tokio::test]
    async fn request_then_approve_admits_and_activates() {
        let (_, arbiter, id) = setup(2).await;

        let after_request = arbiter.request_join(id, &bea(), "prospect").await.unwrap();
        assert_eq!(after_request.pending_participants.len(), 1);
        assert_eq!(after_request.status, SessionStatus::Waiting);

        let after_approve = arbiter.approve(id, "b@x.com").await.unwrap();
        assert!(after_approve.pending_participants.is_empty());
        assert_eq!(after_approve.participants.len(), 1);
        assert_eq!(after_approve.participants[0].email, "b@x.com");
        assert_eq!(after_approve.status, SessionStatus::Active);
        assert!(after_approve.started_at.is_some());
    }

    #[tokio::test]
    async fn request_join_is_idempotent() {
        let (_, arbiter, id) = setup(2).await;

        arbiter.request_join(id, &bea(), "prospect").await.unwrap();
        let second = arbiter.request_join(id, &bea(), "prospect").await.unwrap();
        assert_eq!(second.pending_participants.len(), 1);

        // Once approved, a re-request is also a no-op: no new pending entry,
        // no duplicate participant.
        arbiter.approve(id, "b@x.com").await.unwrap();
        let third = arbiter.request_join(id, &bea(), "prospect").await.unwrap();
        assert!(third.pending_participants.is_empty());
        assert_eq!(third.participants.len(), 1);
    }

    #[tokio::test]
    async fn approve_is_idempotent_and_never_duplicates() {
        let (_, arbiter, id) = setup(3).await;
        arbiter.request_join(id, &bea(), "prospect").await.unwrap();

        arbiter.approve(id, "b@x.com").await.unwrap();
        let again = arbiter.approve(id, "b@x.com").await.unwrap();
        assert_eq!(again.participants.len(), 1);
    }

    #[tokio::test]
    async fn approve_without_request_fails() {
        let (_, arbiter, id) = setup(2).await;
        let err = arbiter.approve(id, "b@x.com").await.unwrap_err();
        assert!(matches!(err, ArbiterError::NotPending(_)));
    }

    #[tokio::test]
    async fn reject_drops_pending_only() {
        let (_, arbiter, id) = setup(2).await;
        arbiter.request_join(id, &bea(), "prospect").await.unwrap();

        let after = arbiter.reject(id, "b@x.com").await.unwrap();
        assert!(after.pending_participants.is_empty());
        assert!(after.participants.is_empty());
        assert_eq!(after.status, SessionStatus::Waiting);

        // Rejecting again is a quiet no-op.
        arbiter.reject(id, "b@x.com").await.unwrap();
    }

    #[tokio::test]
    async fn direct_join_admits_and_activates_in_one_write() {
        let (store, arbiter, id) = setup(2).await;
        let before = store.get(id).await.unwrap();

        let after = arbiter.direct_join(id, &bea(), "candidate").await.unwrap();
        assert_eq!(after.participants.len(), 1);
        assert_eq!(after.status, SessionStatus::Active);
        assert!(after.started_at.is_some());
        assert!(after.pending_participants.is_empty());
        // Exactly one store write happened.
        assert_eq!(after.version, before.version + 1);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let (_, arbiter, id) = setup(2).await;
        arbiter.direct_join(id, &bea(), "candidate").await.unwrap();

        let late = Identity::new("c@x.com", "Cam");
        let err = arbiter.direct_join(id, &late, "candidate").await.unwrap_err();
        assert!(matches!(err, ArbiterError::SessionFull { capacity: 2 }));

        // The moderated path enforces it too.
        let err = arbiter.request_join(id, &late, "candidate").await.unwrap_err();
        assert!(matches!(
            err,
            ArbiterError::JoinClosed {
                status: SessionStatus::Active
            }
        ));
    }

    #[tokio::test]
    async fn approve_respects_capacity() {
        let (_, arbiter, id) = setup(2).await;
        let cam = Identity::new("c@x.com", "Cam");
        arbiter.request_join(id, &bea(), "prospect").await.unwrap();
        arbiter.request_join(id, &cam, "prospect").await.unwrap();

        arbiter.approve(id, "b@x.com").await.unwrap();
        let err = arbiter.approve(id, "c@x.com").await.unwrap_err();
        assert!(matches!(err, ArbiterError::SessionFull { .. }));
    }

    #[tokio::test]
    async fn concurrent_requests_both_land() {
        let (_, arbiter, id) = setup(3).await;
        let cam = Identity::new("c@x.com", "Cam");
        let bea = bea();

        let (r1, r2) = tokio::join!(
            arbiter.request_join(id, &bea, "prospect"),
            arbiter.request_join(id, &cam, "prospect"),
        );
        r1.unwrap();
        r2.unwrap();

        let final_state = arbiter.store.get(id).await.unwrap();
        assert_eq!(final_state.pending_participants.len(), 2);
    }

    #[tokio::test]
    async fn leave_retracts_footprint() {
        let (store, arbiter, id) = setup(2).await;
        arbiter.direct_join(id, &bea(), "candidate").await.unwrap();

        let after = arbiter.leave(id, "b@x.com").await.unwrap();
        assert!(after.participants.is_empty());
        // Status is not rewound; the sweeper owns stranded sessions.
        assert_eq!(after.status, SessionStatus::Active);

        let noop = arbiter.leave(id, "b@x.com").await.unwrap();
        assert_eq!(noop.version, store.get(id).await.unwrap().version);
    }
}
