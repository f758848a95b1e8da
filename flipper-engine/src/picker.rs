//! Picker Workflow
//!
//! The only authority on who may choose a track's next table. Every
//! operation here touches the ledger alone; remote entries for accepted
//! choices are created later by [`CycleController::materialize`] or at
//! promotion.
//!
//! [`CycleController::materialize`]: crate::CycleController::materialize

use crate::EngineContext;
use flipper_core::{
    same_username, ConfigError, FlipperResult, GameSlot, Platform, SlotId, SlotStatus, Timestamp,
    Track, UserId, WorkflowError,
};
use std::sync::Arc;

/// Why a table choice needs an explicit confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmReason {
    /// No catalog entry carries that name or alias
    NotInCatalog,
    /// The catalog entry is not flagged for the track's platform
    Incompatible(Platform),
}

/// Outcome of a table selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The pending slot now carries the table.
    Accepted(GameSlot),
    /// Nothing was changed; repeat with `confirmed = true` to accept.
    NeedsConfirmation { table: String, reason: ConfirmReason },
}

#[derive(Debug, Clone)]
pub struct PickerWorkflow {
    ctx: Arc<EngineContext>,
}

impl PickerWorkflow {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Earliest non-priority QUEUED slot of `track` still without a picker.
    pub fn open_slot(&self, track: Track) -> FlipperResult<Option<GameSlot>> {
        Ok(self
            .ctx
            .ledger
            .slot_list_by_status(track, SlotStatus::Queued)?
            .into_iter()
            .find(GameSlot::is_open_for_picker))
    }

    /// Placeholder slot of `track` waiting on its designated picker.
    pub fn pending_pick(&self, track: Track) -> FlipperResult<Option<GameSlot>> {
        Ok(self
            .ctx
            .ledger
            .slot_list_by_status(track, SlotStatus::Queued)?
            .into_iter()
            .find(|s| !s.priority && s.is_placeholder() && s.picker.is_some()))
    }

    /// Make `user` the picker of `slot_id`, which must be the track's open slot.
    pub fn assign(
        &self,
        track: Track,
        slot_id: SlotId,
        user: UserId,
        now: Timestamp,
    ) -> FlipperResult<GameSlot> {
        let open = self
            .open_slot(track)?
            .ok_or(WorkflowError::NoOpenSlot { track })?;
        if open.slot_id != slot_id {
            let reason = match self.ctx.ledger.slot_get(slot_id)? {
                None => "no such slot".to_string(),
                Some(slot) if slot.track != track => format!("slot belongs to {}", slot.track),
                Some(slot) if slot.picker.is_some() => "slot already has a picker".to_string(),
                Some(_) => format!("only the earliest open slot ({}) may be assigned", open.name),
            };
            return Err(WorkflowError::NotAssignable {
                track,
                slot: slot_id.to_string(),
                reason,
            }
            .into());
        }

        let slot = self
            .ctx
            .ledger
            .slot_set_picker(slot_id, Some(user.clone()), None, now)?;
        tracing::info!(track = %track, slot_id = %slot_id, picker = %user, "Picker assigned");
        Ok(slot)
    }

    /// Assign `user` to whichever slot is currently open.
    pub fn assign_next(&self, track: Track, user: UserId, now: Timestamp) -> FlipperResult<GameSlot> {
        let open = self
            .open_slot(track)?
            .ok_or(WorkflowError::NoOpenSlot { track })?;
        self.assign(track, open.slot_id, user, now)
    }

    /// Hand the pick to `nominee` on behalf of the track's last winner.
    pub fn nominate(
        &self,
        track: Track,
        nominator: &UserId,
        nominee: UserId,
        now: Timestamp,
    ) -> FlipperResult<GameSlot> {
        let ledger = &*self.ctx.ledger;
        let not_winner = || WorkflowError::NotLastWinner {
            track,
            user: nominator.to_string(),
        };
        let last = ledger.winner_last(track)?.ok_or_else(not_winner)?;
        let is_winner = last.user_id.as_ref() == Some(nominator)
            || ledger
                .identity_for_user(nominator)?
                .is_some_and(|link| same_username(&link.username, &last.username));
        if !is_winner {
            return Err(not_winner().into());
        }

        if let Some(designated) = ledger
            .slot_list_by_status(track, SlotStatus::Queued)?
            .into_iter()
            .filter(|s| !s.priority)
            .find_map(|s| s.picker)
        {
            return Err(WorkflowError::PickerAlreadyDesignated {
                track,
                picker: designated.to_string(),
            }
            .into());
        }

        let target = self
            .open_slot(track)?
            .ok_or(WorkflowError::NoOpenSlot { track })?;
        let slot = ledger.slot_set_picker(
            target.slot_id,
            Some(nominee.clone()),
            Some(nominator.clone()),
            now,
        )?;
        tracing::info!(
            track = %track,
            slot_id = %slot.slot_id,
            nominator = %nominator,
            nominee = %nominee,
            "Picker nominated"
        );
        Ok(slot)
    }

    /// Record `user`'s table choice on their pending slot.
    ///
    /// A table missing from the catalog or not flagged for the track's
    /// platform is only accepted with `confirmed`.
    pub fn select_table(
        &self,
        track: Track,
        user: &UserId,
        table: &str,
        confirmed: bool,
    ) -> FlipperResult<Selection> {
        let pending = self.designated_slot(track, user)?;
        let table = table.trim();
        if table.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "table".to_string(),
            }
            .into());
        }

        let platform = track.platform();
        let entry = self.ctx.ledger.catalog_get(table)?;
        let concern = match &entry {
            None => Some(ConfirmReason::NotInCatalog),
            Some(entry) if !entry.supports(platform) => Some(ConfirmReason::Incompatible(platform)),
            Some(_) => None,
        };
        if let (Some(reason), false) = (concern, confirmed) {
            tracing::info!(track = %track, table = %table, reason = ?reason, "Table choice needs confirmation");
            return Ok(Selection::NeedsConfirmation {
                table: table.to_string(),
                reason,
            });
        }

        let name = entry.map(|e| e.name).unwrap_or_else(|| table.to_string());
        let slot = self.rename_pending(pending, &name)?;
        tracing::info!(track = %track, slot_id = %slot.slot_id, picker = %user, table = %name, "Table selected");
        Ok(Selection::Accepted(slot))
    }

    /// Let the designated picker defer to a random compatible table.
    pub fn random_pick(&self, track: Track, user: &UserId, now: Timestamp) -> FlipperResult<GameSlot> {
        let pending = self.designated_slot(track, user)?;
        let table = self
            .ctx
            .draw
            .draw(&*self.ctx.ledger, &self.ctx.policy, track, now)?;
        let slot = self.rename_pending(pending, &table.name)?;
        tracing::info!(track = %track, slot_id = %slot.slot_id, picker = %user, table = %table.name, "Random table picked");
        Ok(slot)
    }

    fn designated_slot(&self, track: Track, user: &UserId) -> FlipperResult<GameSlot> {
        match self.pending_pick(track)? {
            Some(slot) if slot.picker.as_ref() == Some(user) => Ok(slot),
            _ => Err(WorkflowError::NotDesignatedPicker {
                track,
                user: user.to_string(),
            }
            .into()),
        }
    }

    /// Name the pending slot, failing if it changed since it was read.
    fn rename_pending(&self, pending: GameSlot, table: &str) -> FlipperResult<GameSlot> {
        let mut slot = pending.clone();
        slot.name = slot.track.entry_name(table);
        self.ctx.ledger.slot_replace(&pending, &slot)?;
        Ok(slot)
    }
}
