//! duet-core: peer practice-session coordination.
//!
//! Two remote participants rehearse together (an interview drill, a sales
//! call, a language lesson) and each receives AI-generated feedback. The
//! shared state is a single [`session::PracticeSession`] record in a dumb
//! document store; everything else (join arbitration, the per-client
//! lifecycle, dual-feedback aggregation, and the polling that stands in for
//! push) lives in this crate, once, parameterized by practice module.
//!
//! Flow: a creator opens a session and waits; a counterpart discovers it and
//! joins (moderated or direct, per module); the live room runs externally;
//! both sides analyze their own capture and submit feedback; the submission
//! that completes the map flips the session to `completed`, and both clients
//! observe the dual reveal on their next poll.

pub mod analysis;
pub mod arbiter;
pub mod coordinator;
pub mod feedback;
pub mod module;
pub mod reconciler;
pub mod room;
pub mod session;
pub mod store;
