//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own write-transaction boundaries for multi-row mutations.

pub mod progression_service;
pub mod task_service;
