//! External source import.
//!
//! # Responsibility
//! - Define the adapter contract and the two concrete sources.
//! - Normalize remote due values and reconcile records into tasks.

pub mod adapter;
pub mod calendar;
pub mod date;
pub mod notion;
pub mod provider_registry;
pub mod reconciler;
