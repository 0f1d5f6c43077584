//! Per-client session lifecycle state machine.
//!
//! One coordinator instance lives on each side of a practice session. UI
//! events call the explicit operations (create, join, approve, run the room,
//! submit feedback); polled snapshots flow into [`SessionCoordinator::observe`],
//! which is the single transition function for everything the peer does
//! remotely. Rendering is a pure function of [`Phase`]; nothing here knows
//! about screens.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisClient, AnalysisError, AnalysisRequest};
use crate::arbiter::{ArbiterError, JoinArbiter};
use crate::feedback::{FeedbackAggregator, FeedbackError, SubmitOutcome};
use crate::module::{JoinPolicy, ModuleProfile};
use crate::room::{RoomArtifacts, RoomError, RoomService};
use crate::session::{Identity, NewSession, PracticeSession, SessionStatus};
use crate::store::{SessionFilter, SessionStore, StoreError};

/// Where this client currently is in the session lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// Mode/role selection; no session yet.
    Idle,
    /// A create call is in flight.
    Creating,
    /// Browsing open sessions.
    Discovering,
    /// Creator side: session exists, no peer yet.
    WaitingForPeer { session_id: Uuid },
    /// Joiner side, moderated mode: request filed, creator undecided.
    /// `seen_pending` records that a read has confirmed the request, which
    /// is what lets a later disappearance mean rejection rather than lag.
    AwaitingApproval { session_id: Uuid, seen_pending: bool },
    /// Both principals are in; the room collaborator owns the experience.
    InSession { session_id: Uuid },
    /// Room ended; local artifacts captured, feedback not yet recorded.
    SubmittingFeedback { session_id: Uuid },
    /// Local feedback recorded; at least one principal still missing.
    AwaitingPeerFeedback { session_id: Uuid },
    /// Terminal: both reports present, dual reveal can render.
    SessionComplete { session_id: Uuid },
    /// Terminal: user reset, rejection, or a fatal protocol violation.
    Abandoned,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Creating => "creating",
            Phase::Discovering => "discovering",
            Phase::WaitingForPeer { .. } => "waiting_for_peer",
            Phase::AwaitingApproval { .. } => "awaiting_approval",
            Phase::InSession { .. } => "in_session",
            Phase::SubmittingFeedback { .. } => "submitting_feedback",
            Phase::AwaitingPeerFeedback { .. } => "awaiting_peer_feedback",
            Phase::SessionComplete { .. } => "session_complete",
            Phase::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::SessionComplete { .. } | Phase::Abandoned)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Phase::WaitingForPeer { session_id }
            | Phase::AwaitingApproval { session_id, .. }
            | Phase::InSession { session_id }
            | Phase::SubmittingFeedback { session_id }
            | Phase::AwaitingPeerFeedback { session_id }
            | Phase::SessionComplete { session_id } => Some(*session_id),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Arbiter(#[from] ArbiterError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error("operation '{op}' is not valid in phase '{phase}'")]
    InvalidPhase { op: &'static str, phase: &'static str },
    #[error("session status regressed from {from} to {to}")]
    StatusRegression {
        from: SessionStatus,
        to: SessionStatus,
    },
}

pub struct SessionCoordinator {
    profile: &'static ModuleProfile,
    identity: Identity,
    store: Arc<dyn SessionStore>,
    arbiter: JoinArbiter,
    aggregator: FeedbackAggregator,
    analysis: Arc<dyn AnalysisClient>,
    room: Arc<dyn RoomService>,
    phase: Phase,
    local_role: String,
    last_status: Option<SessionStatus>,
    artifacts: Option<RoomArtifacts>,
}

impl SessionCoordinator {
    pub fn new(
        profile: &'static ModuleProfile,
        identity: Identity,
        store: Arc<dyn SessionStore>,
        analysis: Arc<dyn AnalysisClient>,
        room: Arc<dyn RoomService>,
    ) -> Self {
        Self {
            profile,
            identity,
            arbiter: JoinArbiter::new(store.clone()),
            aggregator: FeedbackAggregator::new(store.clone()),
            store,
            analysis,
            room,
            phase: Phase::Idle,
            local_role: String::new(),
            last_status: None,
            artifacts: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.phase.session_id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn require(&self, op: &'static str, ok: bool) -> Result<(), CoordinatorError> {
        if ok {
            Ok(())
        } else {
            Err(CoordinatorError::InvalidPhase {
                op,
                phase: self.phase.name(),
            })
        }
    }

    /// Opens a new session with this client as creator and starts waiting
    /// for a peer.
    pub async fn create_session(
        &mut self,
        context: serde_json::Value,
        scenario: serde_json::Value,
        max_participants: u32,
    ) -> Result<PracticeSession, CoordinatorError> {
        self.require(
            "create_session",
            matches!(self.phase, Phase::Idle | Phase::Discovering),
        )?;

        self.phase = Phase::Creating;
        let created = self
            .store
            .create(NewSession {
                module_type: self.profile.kind,
                creator_email: self.identity.email.clone(),
                creator_name: self.identity.name.clone(),
                creator_role: self.profile.creator_role.to_string(),
                max_participants,
                context,
                scenario,
            })
            .await;

        match created {
            Ok(session) => {
                info!(session_id = %session.id, code = %session.session_code, "session created");
                self.local_role = self.profile.creator_role.to_string();
                self.last_status = Some(session.status);
                self.phase = Phase::WaitingForPeer {
                    session_id: session.id,
                };
                Ok(session)
            }
            Err(e) => {
                self.phase = Phase::Idle;
                Err(e.into())
            }
        }
    }

    /// Lists open sessions of this module for the discovery screen.
    pub async fn discover(&mut self) -> Result<Vec<PracticeSession>, CoordinatorError> {
        self.require(
            "discover",
            matches!(self.phase, Phase::Idle | Phase::Discovering),
        )?;
        self.phase = Phase::Discovering;
        Ok(self
            .store
            .query(&SessionFilter::open(self.profile.kind))
            .await?)
    }

    /// Looks a session up by its share code.
    pub async fn find_by_code(
        &self,
        code: &str,
    ) -> Result<Option<PracticeSession>, CoordinatorError> {
        let mut matches = self.store.query(&SessionFilter::by_code(code)).await?;
        Ok(matches.pop().filter(|s| s.module_type == self.profile.kind))
    }

    /// Joins a session as the counterpart role, using the module's join
    /// policy: moderated modules file a pending request, direct modules
    /// self-insert and activate.
    pub async fn join(&mut self, session_id: Uuid) -> Result<(), CoordinatorError> {
        self.require(
            "join",
            matches!(self.phase, Phase::Idle | Phase::Discovering),
        )?;
        let role = self.profile.counterpart_role.to_string();

        match self.profile.join_policy {
            JoinPolicy::Moderated => {
                let session = self
                    .arbiter
                    .request_join(session_id, &self.identity, &role)
                    .await?;
                self.local_role = role;
                self.last_status = Some(session.status);
                self.phase = if session.participant(&self.identity.email).is_some() {
                    Phase::InSession { session_id }
                } else {
                    Phase::AwaitingApproval {
                        session_id,
                        seen_pending: session.pending(&self.identity.email).is_some(),
                    }
                };
            }
            JoinPolicy::Direct => {
                let session = self
                    .arbiter
                    .direct_join(session_id, &self.identity, &role)
                    .await?;
                self.local_role = role;
                self.last_status = Some(session.status);
                self.phase = Phase::InSession { session_id };
            }
        }
        Ok(())
    }

    /// Creator decision: admit a pending request.
    pub async fn approve(&mut self, email: &str) -> Result<PracticeSession, CoordinatorError> {
        let session_id = self
            .require_session("approve", |p| {
                matches!(p, Phase::WaitingForPeer { .. } | Phase::InSession { .. })
            })?;
        let session = self.arbiter.approve(session_id, email).await?;
        self.last_status = Some(session.status);
        Ok(session)
    }

    /// Creator decision: drop a pending request.
    pub async fn reject(&mut self, email: &str) -> Result<PracticeSession, CoordinatorError> {
        let session_id = self
            .require_session("reject", |p| {
                matches!(p, Phase::WaitingForPeer { .. } | Phase::InSession { .. })
            })?;
        Ok(self.arbiter.reject(session_id, email).await?)
    }

    /// Applies one polled snapshot. This is the only place remote changes
    /// move the state machine; it performs no I/O and is fully testable with
    /// hand-built snapshots. Returns the new phase when one was entered.
    pub fn observe(
        &mut self,
        snapshot: &PracticeSession,
    ) -> Result<Option<Phase>, CoordinatorError> {
        match self.session_id() {
            Some(id) if id == snapshot.id => {}
            _ => return Ok(None),
        }

        if let Some(prev) = self.last_status {
            if snapshot.status < prev {
                warn!(session_id = %snapshot.id, from = %prev, to = %snapshot.status,
                      "status regressed; abandoning session locally");
                self.phase = Phase::Abandoned;
                return Err(CoordinatorError::StatusRegression {
                    from: prev,
                    to: snapshot.status,
                });
            }
        }
        self.last_status = Some(snapshot.status);

        let next = match &self.phase {
            Phase::WaitingForPeer { session_id } if !snapshot.participants.is_empty() => {
                Some(Phase::InSession {
                    session_id: *session_id,
                })
            }
            Phase::AwaitingApproval {
                session_id,
                seen_pending,
            } => {
                let me = self.identity.email.as_str();
                if snapshot.participant(me).is_some() {
                    Some(Phase::InSession {
                        session_id: *session_id,
                    })
                } else if snapshot.pending(me).is_some() {
                    if !seen_pending {
                        Some(Phase::AwaitingApproval {
                            session_id: *session_id,
                            seen_pending: true,
                        })
                    } else {
                        None
                    }
                } else if *seen_pending {
                    // We were pending and now we are nowhere: dropped.
                    info!(session_id = %snapshot.id, "join request rejected");
                    Some(Phase::Abandoned)
                } else {
                    None
                }
            }
            Phase::AwaitingPeerFeedback { session_id }
                if snapshot.status == SessionStatus::Completed =>
            {
                Some(Phase::SessionComplete {
                    session_id: *session_id,
                })
            }
            _ => None,
        };

        if let Some(next) = next {
            if next != self.phase {
                info!(from = self.phase.name(), to = next.name(), "phase transition");
                self.phase = next.clone();
                return Ok(Some(next));
            }
        }
        Ok(None)
    }

    /// Hands control to the room collaborator and captures the local
    /// artifacts when the live session ends.
    pub async fn run_room(&mut self) -> Result<(), CoordinatorError> {
        let session_id =
            self.require_session("run_room", |p| matches!(p, Phase::InSession { .. }))?;
        let session = self.store.get(session_id).await?;
        let artifacts = self.room.run(&session, &self.local_role).await?;
        info!(session_id = %session_id,
              transcript_lines = artifacts.transcript.len(),
              screenshots = artifacts.screenshots.len(),
              "room ended, artifacts captured");
        self.artifacts = Some(artifacts);
        self.phase = Phase::SubmittingFeedback { session_id };
        Ok(())
    }

    /// Runs analysis over the captured artifacts and records the result.
    ///
    /// If analysis fails nothing is written and the phase is unchanged, so
    /// the call can be retried or the session reset; a half-written report
    /// is never possible.
    pub async fn submit_feedback(&mut self) -> Result<Phase, CoordinatorError> {
        let session_id = self.require_session("submit_feedback", |p| {
            matches!(p, Phase::SubmittingFeedback { .. })
        })?;
        let artifacts = self.artifacts.clone().ok_or(CoordinatorError::InvalidPhase {
            op: "submit_feedback",
            phase: "submitting_feedback (no artifacts)",
        })?;

        let session = self.store.get(session_id).await?;
        let request = AnalysisRequest {
            module: self.profile.kind,
            role: self.local_role.clone(),
            context: session.context.clone(),
            scenario: session.scenario.clone(),
            transcript: artifacts.transcript.clone(),
            screenshot_count: artifacts.screenshots.len(),
        };
        let report = self.analysis.analyze(&request).await?;

        let outcome = self
            .aggregator
            .submit(session_id, &self.identity.email, report)
            .await?;
        self.artifacts = None;
        self.last_status = Some(outcome.session().status);
        self.phase = match outcome {
            SubmitOutcome::Completed(_) => Phase::SessionComplete { session_id },
            SubmitOutcome::AwaitingPeers(_) => Phase::AwaitingPeerFeedback { session_id },
        };
        Ok(self.phase.clone())
    }

    /// Retracts this client's footprint from the shared record and abandons
    /// locally.
    pub async fn leave(&mut self) -> Result<(), CoordinatorError> {
        if let Some(session_id) = self.session_id() {
            self.arbiter.leave(session_id, &self.identity.email).await?;
        }
        self.reset();
        Ok(())
    }

    /// Local-only abandonment from any state. Does not touch the shared
    /// record; see [`Self::leave`] for the retracting variant.
    pub fn reset(&mut self) {
        self.phase = Phase::Abandoned;
        self.artifacts = None;
    }

    fn require_session(
        &self,
        op: &'static str,
        ok: impl Fn(&Phase) -> bool,
    ) -> Result<Uuid, CoordinatorError> {
        if ok(&self.phase) {
            self.phase.session_id().ok_or(CoordinatorError::InvalidPhase {
                op,
                phase: self.phase.name(),
            })
        } else {
            Err(CoordinatorError::InvalidPhase {
                op,
                phase: self.phase.name(),
            })
        }
    }
}
