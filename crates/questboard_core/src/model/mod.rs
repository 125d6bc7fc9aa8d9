//! Domain model for tasks, users and skill progress.
//!
//! # Responsibility
//! - Define canonical data structures used by the engine, repos and sync.
//!
//! # Invariants
//! - Every task is identified by a stable `TaskId` and owned by one user.
//! - Recycling is a soft-delete flag; only purge removes rows.

pub mod skill;
pub mod task;
pub mod user;
