//! Pause/Override: priority slot injection

use crate::{announce, EngineContext};
use chrono::Duration;
use flipper_core::{
    ConfigError, FlipperResult, GameSlot, PauseState, SlotStatus, Timestamp, Track,
};
use std::sync::Arc;

/// Administrative override that puts a named slot ahead of a track's queue.
#[derive(Debug, Clone)]
pub struct PauseControl {
    ctx: Arc<EngineContext>,
}

impl PauseControl {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Start an override on `track` that lasts `duration_hours` (policy default when `None`).
    ///
    /// The picker of the track's earliest queued slot forfeits, and a priority
    /// QUEUED slot named `name` is injected, reusing a queued slot of that
    /// name when one exists.
    pub async fn set_pause(
        &self,
        track: Track,
        name: &str,
        duration_hours: Option<i64>,
        now: Timestamp,
    ) -> FlipperResult<PauseState> {
        let ledger = &*self.ctx.ledger;
        let hours = duration_hours.unwrap_or(self.ctx.policy.default_pause_hours);
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "name".to_string(),
            }
            .into());
        }
        if hours <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "duration_hours".to_string(),
                value: hours.to_string(),
                reason: "pause duration must be positive".to_string(),
            }
            .into());
        }

        if let Some(earliest) = ledger.slot_get_next_queued(track)? {
            if earliest.picker.is_some() || earliest.nominator.is_some() {
                ledger.slot_set_picker(earliest.slot_id, None, None, now)?;
                tracing::info!(
                    track = %track,
                    slot_id = %earliest.slot_id,
                    picker = ?earliest.picker,
                    "Picker forfeited to pause override"
                );
            }
        }

        let existing = ledger
            .slot_list_by_status(track, SlotStatus::Queued)?
            .into_iter()
            .find(|s| s.name.trim().eq_ignore_ascii_case(name));
        let slot = match existing {
            Some(existing) => {
                let mut slot = existing.clone();
                slot.priority = true;
                slot.clear_picker();
                ledger.slot_replace(&existing, &slot)?;
                slot
            }
            None => {
                let mut slot = GameSlot::queued(track, name, now, now);
                slot.priority = true;
                ledger.slot_insert(&slot)?;
                slot
            }
        };

        let state = PauseState {
            paused: true,
            track: Some(track),
            slot_name: Some(slot.name.clone()),
            expires_at: Some(now + Duration::hours(hours)),
        };
        ledger.pause_put(&state)?;
        tracing::info!(
            track = %track,
            slot_id = %slot.slot_id,
            name = %slot.name,
            hours,
            "Pause override set"
        );
        announce(
            self.ctx.notifier.as_ref(),
            &format!(
                "{} is paused for {} hours: \"{}\" plays next.",
                track.display_name(),
                hours,
                slot.name
            ),
        )
        .await;
        Ok(state)
    }

    /// End the current pause early. Returns the state that was cleared.
    pub fn clear_pause(&self) -> FlipperResult<PauseState> {
        let previous = self.ctx.ledger.pause_get()?;
        self.ctx.ledger.pause_put(&PauseState::inactive())?;
        if previous.paused {
            tracing::info!(track = ?previous.track, name = ?previous.slot_name, "Pause cleared");
        }
        Ok(previous)
    }

    /// Clear the pause if its expiry has passed. Returns whether it expired.
    pub fn expire_if_due(&self, now: Timestamp) -> FlipperResult<bool> {
        let state = self.ctx.ledger.pause_get()?;
        if !state.is_expired(now) {
            return Ok(false);
        }
        self.ctx.ledger.pause_put(&PauseState::inactive())?;
        tracing::info!(track = ?state.track, name = ?state.slot_name, "Pause expired");
        Ok(true)
    }

    pub fn status(&self) -> FlipperResult<PauseState> {
        self.ctx.ledger.pause_get()
    }
}
