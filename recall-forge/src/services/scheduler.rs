//! SM-2 review scheduler
//!
//! Pure computation, no I/O. `now` is passed in explicitly.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{ForgeError, ForgeResult};
use crate::models::{SchedulingState, MIN_EASE};

/// Recall quality, 0 (blackout) to 5 (perfect)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Rating(u8);

impl Rating {
    pub const MAX: u8 = 5;

    /// Validate a raw rating
    pub fn new(value: i64) -> ForgeResult<Self> {
        if (0..=Self::MAX as i64).contains(&value) {
            Ok(Rating(value as u8))
        } else {
            Err(ForgeError::InvalidRating(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Ratings of 3 and above count as successful recall
    pub fn is_success(self) -> bool {
        self.0 >= 3
    }
}

/// Next scheduling state after one review
pub fn compute_next_review(
    rating: Rating,
    prior: SchedulingState,
    now: DateTime<Utc>,
) -> SchedulingState {
    let (repetitions, interval_days) = if rating.is_success() {
        let interval = match prior.repetitions {
            0 => 1,
            1 => 6,
            _ => saturating_round(prior.interval_days as f64 * prior.ease).max(1),
        };
        (prior.repetitions.saturating_add(1), interval)
    } else {
        (0, 1)
    };

    let q = (Rating::MAX - rating.value()) as f64;
    let ease = (prior.ease + (0.1 - q * (0.08 + q * 0.02))).max(MIN_EASE);

    SchedulingState {
        ease,
        interval_days,
        repetitions,
        next_review_at: now
            .checked_add_signed(Duration::days(interval_days as i64))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
}

fn saturating_round(value: f64) -> u32 {
    let rounded = value.round();
    if rounded <= 0.0 {
        0
    } else if rounded >= u32::MAX as f64 {
        u32::MAX
    } else {
        rounded as u32
    }
}
