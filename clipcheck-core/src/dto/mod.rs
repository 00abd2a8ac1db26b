//! Data Transfer Objects for the HTTP API

pub mod job;
pub mod service;
