//! Gold reward arithmetic.
//!
//! # Responsibility
//! - Turn a task's importance tier and duration into a gold amount.
//!
//! # Invariants
//! - Pure and deterministic: the save-time preview and the completion-time
//!   award always agree for the same inputs.
//! - Rounding is half-away-from-zero (`f64::round`).
//! - Result is never negative.

use crate::model::task::ImportanceTier;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Gold earned by a `TIME_DIVISOR`-minute task with no bonus.
pub const BASE_GOLD: f64 = 20.0;
/// Minutes that make up one unit of time weight.
pub const TIME_DIVISOR: f64 = 20.0;

/// Tier used when a task has no tier or an unrecognized label.
pub const FALLBACK_TIER: ImportanceTier = ImportanceTier::Medium;

/// Reward input validation errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RewardError {
    NonFiniteDuration,
    NegativeDuration(f64),
}

impl Display for RewardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteDuration => write!(f, "task duration must be a finite number"),
            Self::NegativeDuration(value) => {
                write!(f, "task duration must not be negative, got {value}")
            }
        }
    }
}

impl Error for RewardError {}

/// Bonus multiplier addend for a tier.
pub fn importance_bonus(tier: ImportanceTier) -> f64 {
    match tier {
        ImportanceTier::Low => 0.0,
        ImportanceTier::MedLow => 0.03,
        ImportanceTier::Medium => 0.05,
        ImportanceTier::MedHigh => 0.07,
        ImportanceTier::High => 0.10,
        ImportanceTier::Pareto => 0.15,
    }
}

/// Computes gold for a task.
///
/// `None` falls back to [`FALLBACK_TIER`]. Zero duration yields zero gold.
///
/// # Errors
/// - [`RewardError::NonFiniteDuration`] for NaN or infinite input.
/// - [`RewardError::NegativeDuration`] for negative input.
pub fn compute_gold(
    tier: Option<ImportanceTier>,
    duration_minutes: f64,
) -> Result<u64, RewardError> {
    if !duration_minutes.is_finite() {
        return Err(RewardError::NonFiniteDuration);
    }
    if duration_minutes < 0.0 {
        return Err(RewardError::NegativeDuration(duration_minutes));
    }

    let bonus = importance_bonus(tier.unwrap_or(FALLBACK_TIER));
    let time_weight = duration_minutes / TIME_DIVISOR;
    let gold = (BASE_GOLD * time_weight * (1.0 + bonus)).round();

    // Float-to-int casts saturate, so absurd durations clamp to u64::MAX.
    Ok(gold as u64)
}

/// Computes gold from a raw tier label as stored by older clients.
///
/// Unknown or missing labels use [`FALLBACK_TIER`].
pub fn compute_gold_for_label(
    label: Option<&str>,
    duration_minutes: f64,
) -> Result<u64, RewardError> {
    compute_gold(label.and_then(ImportanceTier::parse), duration_minutes)
}

#[cfg(test)]
mod tests {
    use super::{compute_gold, compute_gold_for_label, importance_bonus, RewardError};
    use crate::model::task::ImportanceTier;

    #[test]
    fn medium_twenty_minutes_is_twenty_one() {
        assert_eq!(compute_gold(Some(ImportanceTier::Medium), 20.0), Ok(21));
    }

    #[test]
    fn pareto_forty_minutes_is_forty_six() {
        assert_eq!(compute_gold(Some(ImportanceTier::Pareto), 40.0), Ok(46));
    }

    #[test]
    fn missing_or_unknown_tier_falls_back_to_medium() {
        assert_eq!(compute_gold(None, 20.0), Ok(21));
        assert_eq!(compute_gold_for_label(Some("urgent!!"), 20.0), Ok(21));
        assert_eq!(compute_gold_for_label(None, 20.0), Ok(21));
    }

    #[test]
    fn low_tier_has_no_bonus() {
        assert_eq!(compute_gold(Some(ImportanceTier::Low), 60.0), Ok(60));
    }

    #[test]
    fn zero_duration_yields_zero() {
        for tier in ImportanceTier::ALL {
            assert_eq!(compute_gold(Some(tier), 0.0), Ok(0));
        }
    }

    #[test]
    fn rounds_half_away_from_zero() {
        // 20 * (10/20) * 1.05 = 10.5
        assert_eq!(compute_gold(Some(ImportanceTier::Medium), 10.0), Ok(11));
    }

    #[test]
    fn rejects_negative_and_non_finite_durations() {
        assert_eq!(
            compute_gold(Some(ImportanceTier::High), -5.0),
            Err(RewardError::NegativeDuration(-5.0))
        );
        assert_eq!(
            compute_gold(None, f64::NAN),
            Err(RewardError::NonFiniteDuration)
        );
        assert_eq!(
            compute_gold(None, f64::INFINITY),
            Err(RewardError::NonFiniteDuration)
        );
    }

    #[test]
    fn bonus_table_is_strictly_increasing() {
        for pair in ImportanceTier::ALL.windows(2) {
            assert!(importance_bonus(pair[0]) < importance_bonus(pair[1]));
        }
    }

    #[test]
    fn repeated_calls_agree() {
        let preview = compute_gold(Some(ImportanceTier::MedHigh), 37.0);
        let award = compute_gold(Some(ImportanceTier::MedHigh), 37.0);
        assert_eq!(preview, award);
    }
}
