//! Practice modules and their coordination profiles.
//!
//! Every practice surface (interview drill, sales call, ...) runs the same
//! session protocol; the only per-module differences that matter to
//! coordination are captured here: how the counterpart gets in (moderated
//! approval vs direct self-join), what the two roles are called, and which
//! prompt template the analysis collaborator uses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag identifying which practice content generator owns a session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Interview,
    SalesCall,
    ObjectionHandling,
    PublicSpeaking,
    LanguageLesson,
    DocumentReview,
    MeetingFacilitation,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 7] = [
        ModuleKind::Interview,
        ModuleKind::SalesCall,
        ModuleKind::ObjectionHandling,
        ModuleKind::PublicSpeaking,
        ModuleKind::LanguageLesson,
        ModuleKind::DocumentReview,
        ModuleKind::MeetingFacilitation,
    ];

    /// The static coordination profile for this module.
    pub fn profile(self) -> &'static ModuleProfile {
        match self {
            ModuleKind::Interview => &INTERVIEW,
            ModuleKind::SalesCall => &SALES_CALL,
            ModuleKind::ObjectionHandling => &OBJECTION_HANDLING,
            ModuleKind::PublicSpeaking => &PUBLIC_SPEAKING,
            ModuleKind::LanguageLesson => &LANGUAGE_LESSON,
            ModuleKind::DocumentReview => &DOCUMENT_REVIEW,
            ModuleKind::MeetingFacilitation => &MEETING_FACILITATION,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleKind::Interview => "interview",
            ModuleKind::SalesCall => "sales_call",
            ModuleKind::ObjectionHandling => "objection_handling",
            ModuleKind::PublicSpeaking => "public_speaking",
            ModuleKind::LanguageLesson => "language_lesson",
            ModuleKind::DocumentReview => "document_review",
            ModuleKind::MeetingFacilitation => "meeting_facilitation",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interview" => Ok(ModuleKind::Interview),
            "sales_call" => Ok(ModuleKind::SalesCall),
            "objection_handling" => Ok(ModuleKind::ObjectionHandling),
            "public_speaking" => Ok(ModuleKind::PublicSpeaking),
            "language_lesson" => Ok(ModuleKind::LanguageLesson),
            "document_review" => Ok(ModuleKind::DocumentReview),
            "meeting_facilitation" => Ok(ModuleKind::MeetingFacilitation),
            other => Err(format!("unknown module '{}'", other)),
        }
    }
}

/// How the counterpart enters a session. Fixed per module, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Join requests go to `pending_participants` and wait for the creator.
    Moderated,
    /// The counterpart inserts itself as a participant and activates the
    /// session in one write, with no approval round trip.
    Direct,
}

/// Per-module coordination parameters.
#[derive(Debug, Clone, Copy)]
pub struct ModuleProfile {
    pub kind: ModuleKind,
    pub join_policy: JoinPolicy,
    pub creator_role: &'static str,
    pub counterpart_role: &'static str,
    /// Key into the analysis prompt template map.
    pub analysis_prompt_key: &'static str,
}

static INTERVIEW: ModuleProfile = ModuleProfile {
    kind: ModuleKind::Interview,
    join_policy: JoinPolicy::Direct,
    creator_role: "interviewer",
    counterpart_role: "candidate",
    analysis_prompt_key: "interview_feedback",
};

static SALES_CALL: ModuleProfile = ModuleProfile {
    kind: ModuleKind::SalesCall,
    join_policy: JoinPolicy::Moderated,
    creator_role: "seller",
    counterpart_role: "prospect",
    analysis_prompt_key: "sales_call_feedback",
};

static OBJECTION_HANDLING: ModuleProfile = ModuleProfile {
    kind: ModuleKind::ObjectionHandling,
    join_policy: JoinPolicy::Moderated,
    creator_role: "rep",
    counterpart_role: "objector",
    analysis_prompt_key: "objection_feedback",
};

static PUBLIC_SPEAKING: ModuleProfile = ModuleProfile {
    kind: ModuleKind::PublicSpeaking,
    join_policy: JoinPolicy::Moderated,
    creator_role: "speaker",
    counterpart_role: "audience",
    analysis_prompt_key: "speaking_feedback",
};

static LANGUAGE_LESSON: ModuleProfile = ModuleProfile {
    kind: ModuleKind::LanguageLesson,
    join_policy: JoinPolicy::Direct,
    creator_role: "tutor",
    counterpart_role: "learner",
    analysis_prompt_key: "language_feedback",
};

static DOCUMENT_REVIEW: ModuleProfile = ModuleProfile {
    kind: ModuleKind::DocumentReview,
    join_policy: JoinPolicy::Direct,
    creator_role: "author",
    counterpart_role: "reviewer",
    analysis_prompt_key: "document_feedback",
};

static MEETING_FACILITATION: ModuleProfile = ModuleProfile {
    kind: ModuleKind::MeetingFacilitation,
    join_policy: JoinPolicy::Moderated,
    creator_role: "facilitator",
    counterpart_role: "attendee",
    analysis_prompt_key: "meeting_feedback",
};
