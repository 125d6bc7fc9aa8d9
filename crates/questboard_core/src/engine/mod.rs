//! Reward and progression arithmetic.
//!
//! # Responsibility
//! - Compute gold for a completed task.
//! - Advance per-skill experience, levels and milestones.
//!
//! # Invariants
//! - Everything here is pure: no I/O, no clock reads, no suspension points.

pub mod progression;
pub mod reward;
