//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service and sync orchestration.
//!
//! # Invariants
//! - Repositories borrow a `Connection` (or a `Transaction` through deref);
//!   transaction boundaries belong to the caller.
//! - Repository APIs return semantic errors (`NotFound`,
//!   `DuplicateExternalId`) in addition to DB transport errors.

pub mod skill_repo;
pub mod source_status_repo;
pub mod task_repo;
pub mod user_repo;
