//! Clipcheck Core
//!
//! Core types shared by the clipcheck services.
//!
//! This crate contains:
//! - Domain types: jobs, fact-check reports and their scoring
//! - DTOs: request/response bodies of the HTTP API
//! - URL canonicalization used for job deduplication
//! - The table of supported report languages

pub mod domain;
pub mod dto;
pub mod language;
pub mod url;
