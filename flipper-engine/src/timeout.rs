//! Timeout Escalator: auto-fill a pick the designated picker sat on.

use crate::adapter::Session;
use crate::{announce, EngineContext};
use flipper_core::{
    FlipperError, FlipperResult, GameSlot, SlotStatus, Timestamp, Track, UserId, WorkflowError,
};
use std::sync::Arc;

/// One auto-filled slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub track: Track,
    pub slot: GameSlot,
    /// Catalog name of the drawn table
    pub table: String,
    /// Picker who forfeited
    pub forfeited: Option<UserId>,
}

/// Result of one hourly check.
#[derive(Debug, Default)]
pub struct TimeoutReport {
    pub escalated: Vec<Escalation>,
    pub skipped_tracks: Vec<Track>,
    /// Tracks whose check failed; the others still ran
    pub failures: Vec<(Track, FlipperError)>,
}

#[derive(Debug, Clone)]
pub struct TimeoutEscalator {
    ctx: Arc<EngineContext>,
}

impl TimeoutEscalator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Queued placeholder slots whose picker has held them past the threshold.
    pub fn overdue(&self, track: Track, now: Timestamp) -> FlipperResult<Vec<GameSlot>> {
        let threshold = self.ctx.policy.picker_timeout();
        Ok(self
            .ctx
            .ledger
            .slot_list_by_status(track, SlotStatus::Queued)?
            .into_iter()
            .filter(|s| !s.priority && s.is_placeholder() && s.picker.is_some())
            .filter(|s| s.assigned_at.is_some_and(|at| now - at > threshold))
            .collect())
    }

    /// Check every non-exempt track once.
    pub async fn run(&self, now: Timestamp) -> TimeoutReport {
        let mut report = TimeoutReport::default();
        let mut session: Option<Session> = None;

        for track in Track::ALL {
            if self.ctx.policy.is_timeout_exempt(track) {
                report.skipped_tracks.push(track);
                continue;
            }
            match self.run_track(&mut session, track, now).await {
                Ok(mut escalated) => report.escalated.append(&mut escalated),
                Err(e) => {
                    tracing::error!(track = %track, error = %e, "Timeout check failed");
                    report.failures.push((track, e));
                }
            }
        }

        if let Some(session) = session {
            session.close().await;
        }
        tracing::info!(
            escalated = report.escalated.len(),
            failures = report.failures.len(),
            "Timeout check finished"
        );
        report
    }

    async fn run_track(
        &self,
        session: &mut Option<Session>,
        track: Track,
        now: Timestamp,
    ) -> FlipperResult<Vec<Escalation>> {
        let overdue = self.overdue(track, now)?;
        let mut escalated = Vec::with_capacity(overdue.len());

        for slot in overdue {
            if session.is_none() {
                *session = Some(Session::open(self.ctx.adapter.as_ref()).await?);
            }
            let Some(open) = session.as_mut() else {
                continue;
            };
            if let Some(escalation) = self.escalate(open, slot, now).await? {
                escalated.push(escalation);
            }
        }
        Ok(escalated)
    }

    /// Auto-fill one overdue slot. `None` when the slot moved on after it
    /// was found overdue (picked, promoted or reassigned).
    async fn escalate(
        &self,
        session: &mut Session,
        slot: GameSlot,
        now: Timestamp,
    ) -> FlipperResult<Option<Escalation>> {
        let ledger = &*self.ctx.ledger;
        let track = slot.track;
        if ledger.slot_get(slot.slot_id)?.as_ref() != Some(&slot) {
            tracing::info!(track = %track, slot_id = %slot.slot_id, "Overdue slot changed; skipping");
            return Ok(None);
        }
        let table = self.ctx.draw.draw(ledger, &self.ctx.policy, track, now)?;
        let name = track.entry_name(&table.name);

        let external_id = session.create_hidden_tagged(&name, track.code()).await?;
        let filled = match ledger.slot_overwrite_if(
            slot.slot_id,
            slot.picker.as_ref(),
            &name,
            Some(external_id.clone()),
        ) {
            Ok(filled) => filled,
            Err(FlipperError::Workflow(WorkflowError::SlotChanged { .. })) => {
                tracing::info!(
                    track = %track,
                    slot_id = %slot.slot_id,
                    external_id = %external_id,
                    "Overdue slot changed during escalation; removing drawn entry"
                );
                if let Err(e) = session.delete(&external_id).await {
                    tracing::warn!(external_id = %external_id, error = %e, "Failed to remove drawn entry");
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        tracing::info!(
            track = %track,
            slot_id = %slot.slot_id,
            external_id = %external_id,
            table = %table.name,
            picker = ?slot.picker,
            "Picker timed out; table auto-selected"
        );

        let who = slot
            .picker
            .as_ref()
            .map(|p| format!(" {} did not pick in time.", p))
            .unwrap_or_default();
        announce(
            self.ctx.notifier.as_ref(),
            &format!(
                "{}:{} Automatically selected {}.",
                track.display_name(),
                who,
                table.name
            ),
        )
        .await;

        Ok(Some(Escalation {
            track,
            slot: filled,
            table: table.name,
            forfeited: slot.picker,
        }))
    }
}
