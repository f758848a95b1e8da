//! Enum types for Flipper entities

use crate::schedule::Cadence;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TRACK
// ============================================================================

/// One of the four independent tournament cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Track {
    /// Daily Grind, the fastest track
    #[serde(rename = "DG")]
    DailyGrind,
    /// Weekly Grind on the VPXS platform
    #[serde(rename = "WG-VPXS")]
    WeeklyVpxs,
    /// Weekly Grind on the VR platform
    #[serde(rename = "WG-VR")]
    WeeklyVr,
    /// Monthly Grind, the slowest track
    #[serde(rename = "MG")]
    MonthlyGrind,
}

impl Track {
    /// Every track, in the order maintenance visits them.
    pub const ALL: [Track; 4] = [
        Track::DailyGrind,
        Track::WeeklyVpxs,
        Track::WeeklyVr,
        Track::MonthlyGrind,
    ];

    /// Short code used in entry names, tags and storage.
    pub fn code(&self) -> &'static str {
        match self {
            Track::DailyGrind => "DG",
            Track::WeeklyVpxs => "WG-VPXS",
            Track::WeeklyVr => "WG-VR",
            Track::MonthlyGrind => "MG",
        }
    }

    /// Parse a track code, ignoring case.
    pub fn from_code(s: &str) -> Result<Self, TrackParseError> {
        match s.trim().to_uppercase().as_str() {
            "DG" => Ok(Track::DailyGrind),
            "WG-VPXS" => Ok(Track::WeeklyVpxs),
            "WG-VR" => Ok(Track::WeeklyVr),
            "MG" => Ok(Track::MonthlyGrind),
            _ => Err(TrackParseError(s.to_string())),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Track::DailyGrind => "Daily Grind",
            Track::WeeklyVpxs => "Weekly Grind (VPXS)",
            Track::WeeklyVr => "Weekly Grind (VR)",
            Track::MonthlyGrind => "Monthly Grind",
        }
    }

    /// Platform whose compatibility flag governs table choices on this track.
    pub fn platform(&self) -> Platform {
        match self {
            Track::DailyGrind | Track::MonthlyGrind => Platform::AtGames,
            Track::WeeklyVpxs => Platform::Vpxs,
            Track::WeeklyVr => Platform::Vr,
        }
    }

    pub fn cadence(&self) -> Cadence {
        match self {
            Track::DailyGrind => Cadence::Daily,
            Track::WeeklyVpxs | Track::WeeklyVr => Cadence::Weekly,
            Track::MonthlyGrind => Cadence::Monthly,
        }
    }

    /// Name of the remote entry for a table played on this track.
    pub fn entry_name(&self, table: &str) -> String {
        format!("{} {}", table.trim(), self.code())
    }

    /// Strip any track suffix from an entry name, yielding the bare table name.
    pub fn strip_suffix(name: &str) -> &str {
        let trimmed = name.trim();
        for track in Self::ALL {
            let suffix = format!(" {}", track.code());
            let Some(split) = trimmed.len().checked_sub(suffix.len()).filter(|&at| at > 0) else {
                continue;
            };
            if let (Some(head), Some(tail)) = (trimmed.get(..split), trimmed.get(split..)) {
                if tail.eq_ignore_ascii_case(&suffix) {
                    return head.trim_end();
                }
            }
        }
        trimmed
    }

    /// Decide which track an observed remote entry belongs to.
    ///
    /// Tags win over names; a name matches when it ends with the track code.
    pub fn classify(name: &str, tags: &[String]) -> Option<Track> {
        for tag in tags {
            if let Ok(track) = Track::from_code(tag) {
                return Some(track);
            }
        }
        let upper = name.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|track| upper.ends_with(&format!(" {}", track.code())))
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Track {
    type Err = TrackParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

/// Error when parsing an invalid track code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackParseError(pub String);

impl fmt::Display for TrackParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid track: {} (expected DG, WG-VPXS, WG-VR or MG)", self.0)
    }
}

impl std::error::Error for TrackParseError {}

// ============================================================================
// PLATFORM
// ============================================================================

/// Hardware platform a catalog table may be compatible with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    AtGames,
    Vr,
    Vpxs,
}

impl Platform {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Platform::AtGames => "atgames",
            Platform::Vr => "vr",
            Platform::Vpxs => "vpxs",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// ============================================================================
// SLOT STATUS
// ============================================================================

/// Lifecycle status of a Game Slot.
///
/// ```text
/// QUEUED ── promote ──→ ACTIVE ── complete ──→ COMPLETED
///    └──────────── reconciliation ───────────→ HIDDEN
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Queued,
    Active,
    Completed,
    /// Tracked locally but absent from the external lineup
    Hidden,
}

impl SlotStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SlotStatus::Queued => "QUEUED",
            SlotStatus::Active => "ACTIVE",
            SlotStatus::Completed => "COMPLETED",
            SlotStatus::Hidden => "HIDDEN",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SlotStatusParseError> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(SlotStatus::Queued),
            "ACTIVE" => Ok(SlotStatus::Active),
            "COMPLETED" => Ok(SlotStatus::Completed),
            "HIDDEN" => Ok(SlotStatus::Hidden),
            _ => Err(SlotStatusParseError(s.to_string())),
        }
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// Reconciliation bypasses this; it mirrors whatever the lineup shows.
    pub fn can_advance_to(&self, next: SlotStatus) -> bool {
        matches!(
            (self, next),
            (SlotStatus::Queued, SlotStatus::Active)
                | (SlotStatus::Active, SlotStatus::Completed)
                | (_, SlotStatus::Hidden)
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for SlotStatus {
    type Err = SlotStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid slot status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatusParseError(pub String);

impl fmt::Display for SlotStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid slot status: {}", self.0)
    }
}

impl std::error::Error for SlotStatusParseError {}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Slot,
    ScoreRecord,
    WinnerRecord,
    PauseState,
    CatalogEntry,
    IdentityLink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_code_round_trip() {
        for track in Track::ALL {
            assert_eq!(Track::from_code(track.code()), Ok(track));
        }
        assert_eq!(Track::from_code("wg-vr"), Ok(Track::WeeklyVr));
        assert!(Track::from_code("XX").is_err());
    }

    #[test]
    fn test_track_serializes_as_code() {
        let value = toml_value(Track::WeeklyVpxs);
        assert_eq!(value, "\"WG-VPXS\"");
    }

    fn toml_value(track: Track) -> String {
        #[derive(Serialize)]
        struct Wrapper {
            track: Track,
        }
        let toml = toml::to_string(&Wrapper { track }).expect("serializes");
        toml.trim().trim_start_matches("track = ").to_string()
    }

    #[test]
    fn test_strip_suffix() {
        assert_eq!(Track::strip_suffix("Medieval Madness DG"), "Medieval Madness");
        assert_eq!(Track::strip_suffix("Attack from Mars WG-VPXS"), "Attack from Mars");
        assert_eq!(Track::strip_suffix("Twilight Zone wg-vr"), "Twilight Zone");
        assert_eq!(Track::strip_suffix("Plain Name"), "Plain Name");
    }

    #[test]
    fn test_classify_prefers_tags() {
        let tags = vec!["MG".to_string()];
        assert_eq!(Track::classify("Anything DG", &tags), Some(Track::MonthlyGrind));
        assert_eq!(Track::classify("Anything DG", &[]), Some(Track::DailyGrind));
        assert_eq!(Track::classify("Black Knight WG-VR", &[]), Some(Track::WeeklyVr));
        assert_eq!(Track::classify("Charity Night", &[]), None);
    }

    #[test]
    fn test_platform_mapping() {
        assert_eq!(Track::DailyGrind.platform(), Platform::AtGames);
        assert_eq!(Track::WeeklyVpxs.platform(), Platform::Vpxs);
        assert_eq!(Track::WeeklyVr.platform(), Platform::Vr);
        assert_eq!(Track::MonthlyGrind.platform(), Platform::AtGames);
    }

    #[test]
    fn test_slot_status_db_round_trip() {
        for status in [
            SlotStatus::Queued,
            SlotStatus::Active,
            SlotStatus::Completed,
            SlotStatus::Hidden,
        ] {
            assert_eq!(SlotStatus::from_db_str(status.as_db_str()), Ok(status));
        }
        assert!(SlotStatus::from_db_str("ARCHIVED").is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(SlotStatus::Queued.can_advance_to(SlotStatus::Active));
        assert!(SlotStatus::Active.can_advance_to(SlotStatus::Completed));
        assert!(SlotStatus::Completed.can_advance_to(SlotStatus::Hidden));
        assert!(!SlotStatus::Completed.can_advance_to(SlotStatus::Active));
        assert!(!SlotStatus::Queued.can_advance_to(SlotStatus::Completed));
    }
}
