//! Core domain types
//!
//! These types are shared between the orchestrator (which persists them) and
//! the analysis backends (which produce reports).

pub mod job;
pub mod report;
