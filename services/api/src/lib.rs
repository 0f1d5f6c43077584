//! Duet Record-Store Service
//!
//! The shared store that practice-session clients coordinate through:
//! versioned session documents with create/query/guarded-update routes.
//! The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod sweeper;
