//! User record as seen by the engine.
//!
//! Authentication lives outside core; this model only carries what reward
//! accounting and date normalization need.

use crate::model::task::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Zone assigned to users that never picked one.
pub const DEFAULT_TIME_ZONE: &str = "UTC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// IANA zone name used to interpret date-only values.
    pub time_zone: String,
    pub gold_balance: i64,
}

impl User {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            gold_balance: 0,
        }
    }
}
