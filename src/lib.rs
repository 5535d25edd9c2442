//! Patchwright library crate
//!
//! Turns free-form model responses into validated edits on real files:
//! extraction (`extract`), diff sanitizing and application (`diff`), the
//! structured envelope protocol (`protocol`), and the orchestrator that
//! applies them and drives the repair loop (`orchestrator`).

pub mod analyzer;
pub mod config;
pub mod diff;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod protocol;
pub mod util;
pub mod workspace;
