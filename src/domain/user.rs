//! Users and their learning preferences.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::PoolKey;

/// Daily goal applied when a user has none or stored a non-positive value.
pub const DEFAULT_DAILY_GOAL: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub language: String,
    pub level: String,
    pub ai_enabled: bool,
    pub ai_provider: Option<String>,
    pub last_active_at: Option<DateTime<Utc>>,
    /// IANA zone name; calendar days are planned in this zone.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl User {
    /// The pool this user currently studies from.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.id, &self.language, &self.level)
    }

    /// Whether the user was seen within `window_days` of `now`.
    pub fn active_within(&self, window_days: u32, now: DateTime<Utc>) -> bool {
        self.last_active_at
            .map(|at| now - at <= Duration::days(i64::from(window_days)))
            .unwrap_or(false)
    }

    /// The user's calendar date at `now`. Unset or unknown zones use UTC.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        let Some(name) = self.timezone.as_deref().map(str::trim).filter(|tz| !tz.is_empty()) else {
            return now.date_naive();
        };
        match name.parse::<Tz>() {
            Ok(tz) => now.with_timezone(&tz).date_naive(),
            Err(_) => {
                tracing::warn!(user_id = %self.id, timezone = %name, "Invalid timezone, using UTC");
                now.date_naive()
            }
        }
    }
}

/// Per-user knobs that shape priority scoring and daily assignment size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPreferences {
    pub focus_on_weak_areas: bool,
    pub fresh_question_ratio: f64,
    pub weak_area_boost: f64,
    pub known_question_penalty: f64,
    pub review_interval_days: u32,
    pub daily_goal: i64,
}

impl Default for LearningPreferences {
    fn default() -> Self {
        Self {
            focus_on_weak_areas: true,
            fresh_question_ratio: 0.3,
            weak_area_boost: 1.5,
            known_question_penalty: 0.1,
            review_interval_days: 7,
            daily_goal: DEFAULT_DAILY_GOAL,
        }
    }
}

impl LearningPreferences {
    /// Clamp values into their documented ranges. Applied at write time.
    pub fn normalized(mut self) -> Self {
        if self.daily_goal <= 0 {
            self.daily_goal = DEFAULT_DAILY_GOAL;
        }
        self.fresh_question_ratio = self.fresh_question_ratio.clamp(0.0, 1.0);
        self.weak_area_boost = self.weak_area_boost.max(0.0);
        self.known_question_penalty = self.known_question_penalty.max(0.0);
        self
    }

    /// Daily goal as a row count.
    pub fn goal(&self) -> usize {
        if self.daily_goal <= 0 {
            DEFAULT_DAILY_GOAL as usize
        } else {
            self.daily_goal as usize
        }
    }
}
