//! Ledger entity types

use crate::{ExternalId, Platform, SlotId, SlotStatus, Timestamp, Track, UserId};
use serde::{Deserialize, Serialize};

/// Display-name prefix marking a slot whose table has not been chosen.
pub const PLACEHOLDER_PREFIX: &str = "TBD";

// ============================================================================
// GAME SLOT
// ============================================================================

/// One scheduled tournament game on a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSlot {
    pub slot_id: SlotId,
    /// `None` until the entry exists on the external lineup
    pub external_id: Option<ExternalId>,
    pub track: Track,
    pub name: String,
    pub status: SlotStatus,
    pub picker: Option<UserId>,
    pub nominator: Option<UserId>,
    pub assigned_at: Option<Timestamp>,
    pub scheduled_at: Timestamp,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    /// Injected by a pause override; never targeted by pickers or timeouts
    #[serde(default)]
    pub priority: bool,
}

impl GameSlot {
    /// A fresh QUEUED slot with no remote entry yet.
    pub fn queued(track: Track, name: impl Into<String>, scheduled_at: Timestamp, now: Timestamp) -> Self {
        Self {
            slot_id: SlotId::now_v7(),
            external_id: None,
            track,
            name: name.into(),
            status: SlotStatus::Queued,
            picker: None,
            nominator: None,
            assigned_at: None,
            scheduled_at,
            created_at: now,
            completed_at: None,
            priority: false,
        }
    }

    /// A QUEUED slot awaiting a table choice.
    pub fn placeholder(track: Track, scheduled_at: Timestamp, now: Timestamp) -> Self {
        Self::queued(track, placeholder_name(track, scheduled_at), scheduled_at, now)
    }

    pub fn is_placeholder(&self) -> bool {
        is_placeholder_name(&self.name)
    }

    /// Table name without the track suffix.
    pub fn table_name(&self) -> &str {
        Track::strip_suffix(&self.name)
    }

    /// Set the status, stamping or clearing the completion time.
    pub fn apply_status(&mut self, status: SlotStatus, now: Timestamp) {
        match status {
            SlotStatus::Completed if self.status != SlotStatus::Completed => {
                self.completed_at = Some(now);
            }
            SlotStatus::Active => self.completed_at = None,
            _ => {}
        }
        self.status = status;
    }

    /// Record a picker (and optional nominator), stamping the assignment time.
    pub fn assign_picker(&mut self, picker: UserId, nominator: Option<UserId>, now: Timestamp) {
        self.picker = Some(picker);
        self.nominator = nominator;
        self.assigned_at = Some(now);
    }

    pub fn clear_picker(&mut self) {
        self.picker = None;
        self.nominator = None;
        self.assigned_at = None;
    }

    /// Whether a picker may be designated for this slot.
    pub fn is_open_for_picker(&self) -> bool {
        self.status == SlotStatus::Queued && !self.priority && self.picker.is_none()
    }
}

/// Placeholder display name for a slot scheduled at `scheduled_at`.
pub fn placeholder_name(track: Track, scheduled_at: Timestamp) -> String {
    format!(
        "{} {} {}",
        PLACEHOLDER_PREFIX,
        track.code(),
        scheduled_at.format("%Y-%m-%d")
    )
}

pub fn is_placeholder_name(name: &str) -> bool {
    name.trim_start().starts_with(PLACEHOLDER_PREFIX)
}

// ============================================================================
// SCORES AND WINNERS
// ============================================================================

/// One ranked result captured when a slot closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub slot_id: SlotId,
    pub rank: u32,
    pub username: String,
    /// Score exactly as the scoreboard displayed it
    pub score: String,
    pub recorded_at: Timestamp,
}

/// Winner of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub track: Track,
    pub slot_id: SlotId,
    pub external_id: Option<ExternalId>,
    /// Resolved chat identity, when the username is linked
    pub user_id: Option<UserId>,
    pub username: String,
    pub score: String,
    pub table_name: String,
    pub won_at: Timestamp,
}

/// Parse a displayed score, dropping thousands separators.
pub fn parse_score(score: &str) -> Option<u64> {
    let digits: String = score
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    digits.parse().ok()
}

// ============================================================================
// PAUSE / OVERRIDE
// ============================================================================

/// Singleton override state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseState {
    pub paused: bool,
    pub track: Option<Track>,
    pub slot_name: Option<String>,
    pub expires_at: Option<Timestamp>,
}

impl PauseState {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.paused && self.expires_at.is_some_and(|at| at <= now)
    }

    /// The override slot name, if a live pause targets `track`.
    pub fn override_for(&self, track: Track, now: Timestamp) -> Option<&str> {
        if !self.paused || self.is_expired(now) || self.track != Some(track) {
            return None;
        }
        self.slot_name.as_deref()
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// A playable table known to the league.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub atgames: bool,
    #[serde(default)]
    pub vr: bool,
    #[serde(default)]
    pub vpxs: bool,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            atgames: false,
            vr: false,
            vpxs: false,
            manufacturer: None,
            year: None,
            notes: None,
        }
    }

    pub fn supports(&self, platform: Platform) -> bool {
        match platform {
            Platform::AtGames => self.atgames,
            Platform::Vr => self.vr,
            Platform::Vpxs => self.vpxs,
        }
    }

    /// Exact match on the name or any alias, ignoring case.
    pub fn is_named(&self, query: &str) -> bool {
        let query = query.trim();
        self.name.eq_ignore_ascii_case(query)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(query))
    }

    /// Fold an incoming import over the stored row.
    ///
    /// Compatibility flags always take the incoming values; aliases and
    /// presentation metadata are kept when the import leaves them empty.
    pub fn merged_over(self, existing: &CatalogEntry) -> CatalogEntry {
        CatalogEntry {
            name: existing.name.clone(),
            aliases: if self.aliases.is_empty() {
                existing.aliases.clone()
            } else {
                self.aliases
            },
            atgames: self.atgames,
            vr: self.vr,
            vpxs: self.vpxs,
            manufacturer: self.manufacturer.or_else(|| existing.manufacturer.clone()),
            year: self.year.or(existing.year),
            notes: self.notes.or_else(|| existing.notes.clone()),
        }
    }

    /// Case-insensitive substring match on the name or any alias.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.aliases.iter().any(|a| a.to_lowercase().contains(&query))
    }
}

// ============================================================================
// IDENTITY LINK
// ============================================================================

/// Maps a scoreboard username to a chat identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub username: String,
    pub user_id: UserId,
    pub linked_at: Timestamp,
}
