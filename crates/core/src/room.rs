//! Seam to the live audio/video room collaborator.
//!
//! The room provider is external; coordination only cares that running a
//! room eventually yields the local participant's captured artifacts. The
//! transcript and screenshots here are scoped to the local side only: each
//! principal analyzes its own capture.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::PracticeSession;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room provider unavailable: {0}")]
    Unavailable(String),
    #[error("room connection lost: {0}")]
    Disconnected(String),
}

/// One utterance from the local capture.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the room hands back when the session ends, local side only.
#[derive(Debug, Default, Clone)]
pub struct RoomArtifacts {
    pub screenshots: Vec<Bytes>,
    pub transcript: Vec<TranscriptEntry>,
}

/// Establishes live audio/video between the principals and resolves with the
/// local artifacts once the session ends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomService: Send + Sync {
    async fn run(
        &self,
        session: &PracticeSession,
        local_role: &str,
    ) -> Result<RoomArtifacts, RoomError>;
}
