//! Lifecycle policy configuration

use crate::{ConfigError, Timestamp, Track};
use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};

/// Tunable lifecycle policy shared by every engine component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Hours a designated picker has before the slot is auto-filled
    pub picker_timeout_hours: i64,
    /// Scheduling buffer for slots provisioned on the daily track
    pub fastest_lead_time_hours: i64,
    /// Tables a track played within this many days are excluded from random picks
    pub exclusion_window_days: i64,
    /// Attempts for a transient ranked-results fetch
    pub result_fetch_attempts: u32,
    pub result_fetch_backoff_ms: u64,
    /// Tracks the timeout escalator never touches
    pub timeout_exempt_tracks: Vec<Track>,
    /// Whether a repeat winner must nominate instead of picking
    pub dynasty_rule: bool,
    pub default_pause_hours: i64,
    /// Local time used by the cadences, as minutes east of UTC
    pub schedule_utc_offset_minutes: i32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            picker_timeout_hours: 18,
            fastest_lead_time_hours: 48,
            exclusion_window_days: 21,
            result_fetch_attempts: 3,
            result_fetch_backoff_ms: 500,
            timeout_exempt_tracks: vec![Track::MonthlyGrind],
            dynasty_rule: true,
            default_pause_hours: 24,
            schedule_utc_offset_minutes: -360,
        }
    }
}

impl PolicyConfig {
    /// Validate the policy.
    ///
    /// Validates:
    /// - every hour/day window is positive
    /// - at least one result fetch attempt
    /// - the UTC offset is within a day
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("picker_timeout_hours", self.picker_timeout_hours),
            ("exclusion_window_days", self.exclusion_window_days),
            ("default_pause_hours", self.default_pause_hours),
        ];
        for (field, value) in positive {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: format!("{} must be greater than 0", field),
                });
            }
        }

        if self.fastest_lead_time_hours < 0 {
            return Err(ConfigError::InvalidValue {
                field: "fastest_lead_time_hours".to_string(),
                value: self.fastest_lead_time_hours.to_string(),
                reason: "fastest_lead_time_hours must be non-negative".to_string(),
            });
        }

        if self.result_fetch_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "result_fetch_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        self.schedule_offset()?;
        Ok(())
    }

    pub fn schedule_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.schedule_utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "schedule_utc_offset_minutes".to_string(),
                value: self.schedule_utc_offset_minutes.to_string(),
                reason: "offset must be strictly within +/- 24 hours".to_string(),
            }
        })
    }

    pub fn picker_timeout(&self) -> Duration {
        Duration::hours(self.picker_timeout_hours)
    }

    pub fn exclusion_window(&self) -> Duration {
        Duration::days(self.exclusion_window_days)
    }

    pub fn is_timeout_exempt(&self, track: Track) -> bool {
        self.timeout_exempt_tracks.contains(&track)
    }

    /// Scheduled-activation time for a slot provisioned now.
    ///
    /// The daily track runs behind by the lead-time buffer; the rest activate immediately.
    pub fn activation_time(&self, track: Track, now: Timestamp) -> Timestamp {
        match track {
            Track::DailyGrind => now + Duration::hours(self.fastest_lead_time_hours),
            _ => now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_default_policy_is_valid() {
        let policy = PolicyConfig::default();
        assert!(policy.validate().is_ok());
        assert!(policy.is_timeout_exempt(Track::MonthlyGrind));
        assert!(!policy.is_timeout_exempt(Track::DailyGrind));
        assert_eq!(policy.picker_timeout(), Duration::hours(18));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let policy = PolicyConfig {
            picker_timeout_hours: 0,
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "picker_timeout_hours"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_offset() {
        let policy = PolicyConfig {
            schedule_utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_activation_time_buffers_daily_track_only() {
        let policy = PolicyConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        assert_eq!(policy.activation_time(Track::DailyGrind, now), now + Duration::hours(48));
        assert_eq!(policy.activation_time(Track::WeeklyVr, now), now);
        assert_eq!(policy.activation_time(Track::MonthlyGrind, now), now);
    }

    #[test]
    fn test_policy_parses_from_partial_toml() {
        let policy: PolicyConfig = toml::from_str(
            r#"
            picker_timeout_hours = 12
            timeout_exempt_tracks = ["MG", "WG-VR"]
            "#,
        )
        .unwrap();
        assert_eq!(policy.picker_timeout_hours, 12);
        assert_eq!(policy.exclusion_window_days, 21);
        assert!(policy.is_timeout_exempt(Track::WeeklyVr));
    }

    #[test]
    fn test_policy_rejects_unknown_fields() {
        let result: Result<PolicyConfig, _> = toml::from_str("picker_timeout = 5");
        assert!(result.is_err());
    }
}
