//! API Models
//!
//! Request and response shapes for the record-store routes, annotated for
//! OpenAPI generation with `utoipa`. `SessionRecord` serializes exactly like
//! `duet_core::session::PracticeSession`, so protocol clients deserialize
//! responses straight into their own session type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use duet_core::module::ModuleKind;
use duet_core::session::{JoinRequest, NewSession, Participant, PracticeSession, SessionStatus};
use duet_core::store::{SessionFilter, SessionPatch};

/// Payload for opening a new session. The server assigns the id, share code,
/// timestamps and initial version.
#[derive(Deserialize, ToSchema)]
pub struct CreateSessionPayload {
    #[schema(value_type = String, example = "interview")]
    pub module_type: ModuleKind,
    #[schema(example = "a@x.com")]
    pub creator_email: String,
    #[schema(example = "Ada")]
    pub creator_name: String,
    #[schema(example = "interviewer")]
    pub creator_role: String,
    #[schema(example = 2)]
    pub max_participants: u32,
    /// Opaque content payload, passed through to clients untouched.
    #[schema(value_type = Object)]
    pub context: Value,
    #[schema(value_type = Object)]
    pub scenario: Value,
}

impl From<CreateSessionPayload> for NewSession {
    fn from(payload: CreateSessionPayload) -> Self {
        NewSession {
            module_type: payload.module_type,
            creator_email: payload.creator_email,
            creator_name: payload.creator_name,
            creator_role: payload.creator_role,
            max_participants: payload.max_participants,
            context: payload.context,
            scenario: payload.scenario,
        }
    }
}

/// Payload for the guarded shallow-merge update. The patch fields arrive
/// flattened next to `expected_version`.
#[derive(Deserialize, ToSchema)]
pub struct UpdateSessionPayload {
    /// The version the caller last read. The update commits only if the
    /// stored version still matches.
    #[schema(example = 3)]
    pub expected_version: i64,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub patch: SessionPatch,
}

/// Query parameters for session discovery. All filters are optional and
/// conjunctive.
#[derive(Deserialize, IntoParams, Default)]
pub struct ListSessionsQuery {
    /// e.g. "interview", "sales_call"
    pub module_type: Option<String>,
    /// "waiting", "active" or "completed"
    pub status: Option<String>,
    pub session_code: Option<String>,
}

impl ListSessionsQuery {
    /// Parses the raw string filters into the typed store filter.
    pub fn into_filter(self) -> Result<SessionFilter, String> {
        let module_type = self
            .module_type
            .as_deref()
            .map(str::parse::<ModuleKind>)
            .transpose()?;
        let status = self
            .status
            .as_deref()
            .map(str::parse::<SessionStatus>)
            .transpose()?;
        Ok(SessionFilter {
            module_type,
            status,
            session_code: self.session_code,
        })
    }
}

/// The stored session document as returned by every route.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct SessionRecord {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "ABC123")]
    pub session_code: String,
    #[schema(value_type = String, example = "interview")]
    pub module_type: ModuleKind,
    pub creator_email: String,
    pub creator_name: String,
    pub creator_role: String,
    pub max_participants: u32,
    #[schema(value_type = String, example = "waiting")]
    pub status: SessionStatus,
    #[schema(value_type = Object)]
    pub context: Value,
    #[schema(value_type = Object)]
    pub scenario: Value,
    #[schema(value_type = Vec<Object>)]
    pub participants: Vec<Participant>,
    #[schema(value_type = Vec<Object>)]
    pub pending_participants: Vec<JoinRequest>,
    #[schema(value_type = Object)]
    pub feedback: HashMap<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl From<PracticeSession> for SessionRecord {
    fn from(s: PracticeSession) -> Self {
        SessionRecord {
            id: s.id,
            session_code: s.session_code,
            module_type: s.module_type,
            creator_email: s.creator_email,
            creator_name: s.creator_name,
            creator_role: s.creator_role,
            max_participants: s.max_participants,
            status: s.status,
            context: s.context,
            scenario: s.scenario,
            participants: s.participants,
            pending_participants: s.pending_participants,
            feedback: s.feedback,
            started_at: s.started_at,
            completed_at: s.completed_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
            version: s.version,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
