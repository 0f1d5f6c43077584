//! The shared practice-session record and its lifecycle rules.
//!
//! A `PracticeSession` is the single document both peers read and write while
//! coordinating a practice run: who created it, who asked to join, who is in,
//! and which principals have submitted feedback. Every mutation goes through
//! the store's versioned update, so the `version` field on a snapshot is the
//! handle for optimistic concurrency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::module::ModuleKind;

/// Lifecycle status of a session. Strictly monotonic:
/// `waiting -> active -> completed`, never backwards.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Completed,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Waiting, SessionStatus::Active)
                | (SessionStatus::Active, SessionStatus::Completed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// Who a client is, as far as the protocol cares.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub name: String,
}

impl Identity {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }
}

/// An approved member of the session. Unique by `email`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Participant {
    pub email: String,
    pub name: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

/// A join request awaiting the creator's decision.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JoinRequest {
    pub email: String,
    pub name: String,
    pub role: String,
    pub requested_at: DateTime<Utc>,
}

/// Creation fields for a session. The store assigns `id`, `session_code`,
/// timestamps and the initial version.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewSession {
    pub module_type: ModuleKind,
    pub creator_email: String,
    pub creator_name: String,
    pub creator_role: String,
    pub max_participants: u32,
    pub context: Value,
    pub scenario: Value,
}

impl NewSession {
    /// Materializes the stored record: fresh id and share code, `waiting`
    /// status, empty membership and feedback, version 1.
    ///
    /// `max_participants` counts every principal including the creator, so
    /// anything below 2 could never host a peer and is clamped up.
    pub fn into_session(self) -> PracticeSession {
        let now = Utc::now();
        PracticeSession {
            id: Uuid::new_v4(),
            session_code: generate_session_code(),
            module_type: self.module_type,
            creator_email: self.creator_email,
            creator_name: self.creator_name,
            creator_role: self.creator_role,
            max_participants: self.max_participants.max(2),
            status: SessionStatus::Waiting,
            context: self.context,
            scenario: self.scenario,
            participants: Vec::new(),
            pending_participants: Vec::new(),
            feedback: HashMap::new(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}

/// The session document as stored and polled.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PracticeSession {
    pub id: Uuid,
    /// Short human-shareable token, unique per session.
    pub session_code: String,
    pub module_type: ModuleKind,
    pub creator_email: String,
    pub creator_name: String,
    pub creator_role: String,
    /// Capacity bound counting all principals, creator included.
    pub max_participants: u32,
    pub status: SessionStatus,
    /// Opaque content payload for the generative collaborator.
    pub context: Value,
    /// Opaque scenario payload for the generative collaborator.
    pub scenario: Value,
    pub participants: Vec<Participant>,
    pub pending_participants: Vec<JoinRequest>,
    /// One opaque feedback report per principal email.
    pub feedback: HashMap<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store revision, incremented on every successful update.
    pub version: i64,
}

impl PracticeSession {
    /// Emails whose feedback is required for completion: the creator plus
    /// every approved participant.
    pub fn principals(&self) -> Vec<&str> {
        std::iter::once(self.creator_email.as_str())
            .chain(self.participants.iter().map(|p| p.email.as_str()))
            .collect()
    }

    pub fn is_principal(&self, email: &str) -> bool {
        self.creator_email == email || self.participant(email).is_some()
    }

    pub fn participant(&self, email: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.email == email)
    }

    pub fn pending(&self, email: &str) -> Option<&JoinRequest> {
        self.pending_participants.iter().find(|p| p.email == email)
    }

    /// True once every principal has a feedback entry.
    pub fn feedback_complete(&self) -> bool {
        self.principals()
            .iter()
            .all(|email| self.feedback.contains_key(*email))
    }

    /// Whether another participant can still be admitted.
    pub fn at_capacity(&self) -> bool {
        self.participants.len() as u32 + 1 >= self.max_participants
    }
}

/// Alphabet for share codes. Skips 0/O/1/I/L to keep codes readable aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of generated share codes, e.g. "ABC123".
const CODE_LEN: usize = 6;

/// Generates a short share code for a new session.
pub fn generate_session_code() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_session() -> PracticeSession {
        NewSession {
            module_type: ModuleKind::Interview,
            creator_email: "a@x.com".to_string(),
            creator_name: "Ada".to_string(),
            creator_role: "interviewer".to_string(),
            max_participants: 2,
            context: json!({"position": "backend engineer"}),
            scenario: json!({"difficulty": "senior"}),
        }
        .into_session()
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Waiting).unwrap(),
            "\"waiting\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::Completed).unwrap(),
            "\"completed\""
        );
        let parsed: SessionStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(parsed, SessionStatus::Active);
    }

    #[test]
    fn status_only_advances_forward() {
        use SessionStatus::*;
        assert!(Waiting.can_advance_to(Active));
        assert!(Active.can_advance_to(Completed));
        assert!(!Waiting.can_advance_to(Completed));
        assert!(!Active.can_advance_to(Waiting));
        assert!(!Completed.can_advance_to(Active));
        assert!(!Completed.can_advance_to(Waiting));
        assert!(!Active.can_advance_to(Active));
    }

    #[test]
    fn status_ordering_matches_lifecycle() {
        assert!(SessionStatus::Waiting < SessionStatus::Active);
        assert!(SessionStatus::Active < SessionStatus::Completed);
    }

    #[test]
    fn new_session_starts_empty_and_waiting() {
        let session = sample_session();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(session.participants.is_empty());
        assert!(session.pending_participants.is_empty());
        assert!(session.feedback.is_empty());
        assert_eq!(session.version, 1);
        assert!(session.started_at.is_none());
        assert!(session.completed_at.is_none());
        assert_eq!(session.session_code.len(), 6);
    }

    #[test]
    fn max_participants_clamped_to_two() {
        let mut new = NewSession {
            module_type: ModuleKind::SalesCall,
            creator_email: "a@x.com".into(),
            creator_name: "Ada".into(),
            creator_role: "seller".into(),
            max_participants: 0,
            context: Value::Null,
            scenario: Value::Null,
        };
        assert_eq!(new.clone().into_session().max_participants, 2);
        new.max_participants = 4;
        assert_eq!(new.into_session().max_participants, 4);
    }

    #[test]
    fn principals_are_creator_plus_participants() {
        let mut session = sample_session();
        assert_eq!(session.principals(), vec!["a@x.com"]);

        session.participants.push(Participant {
            email: "b@x.com".to_string(),
            name: "Bea".to_string(),
            role: "candidate".to_string(),
            joined_at: Utc::now(),
        });
        assert_eq!(session.principals(), vec!["a@x.com", "b@x.com"]);
        assert!(session.is_principal("a@x.com"));
        assert!(session.is_principal("b@x.com"));
        assert!(!session.is_principal("c@x.com"));
    }

    #[test]
    fn feedback_complete_requires_every_principal() {
        let mut session = sample_session();
        session.participants.push(Participant {
            email: "b@x.com".to_string(),
            name: "Bea".to_string(),
            role: "candidate".to_string(),
            joined_at: Utc::now(),
        });
        assert!(!session.feedback_complete());

        session
            .feedback
            .insert("a@x.com".to_string(), json!({"score": 80}));
        assert!(!session.feedback_complete());

        session
            .feedback
            .insert("b@x.com".to_string(), json!({"score": 75}));
        assert!(session.feedback_complete());
    }

    #[test]
    fn capacity_counts_the_creator() {
        let mut session = sample_session();
        assert_eq!(session.max_participants, 2);
        assert!(!session.at_capacity());

        session.participants.push(Participant {
            email: "b@x.com".to_string(),
            name: "Bea".to_string(),
            role: "candidate".to_string(),
            joined_at: Utc::now(),
        });
        assert!(session.at_capacity());
    }

    #[test]
    fn session_round_trips_through_json() {
        let mut session = sample_session();
        session
            .feedback
            .insert("a@x.com".to_string(), json!({"score": 91}));

        let json = serde_json::to_string(&session).unwrap();
        let back: PracticeSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.session_code, session.session_code);
        assert_eq!(back.status, session.status);
        assert_eq!(back.feedback, session.feedback);
        assert_eq!(back.version, session.version);
    }

    #[test]
    fn session_codes_use_the_restricted_alphabet() {
        for _ in 0..50 {
            let code = generate_session_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }
}
