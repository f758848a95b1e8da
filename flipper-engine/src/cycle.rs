//! Cycle Controller: per-track close, provision and promote.
//!
//! One invocation handles one track:
//!
//! ```text
//! ACTIVE slot ── results ── scores ── lock ── COMPLETED ── winner history
//!                                                              │
//!                    provision new QUEUED slot (picker = winner unless dynasty)
//!                                                              │
//!             promote override slot (pause) or earliest QUEUED ── ACTIVE
//! ```
//!
//! Every step is guarded by a status or existence check, so a re-run after a
//! crash repeats nothing that already happened. A run that closes nothing
//! only provisions when the queue would otherwise be empty after promotion,
//! so retrying a failed promotion never grows the queue.

use crate::adapter::{remote_missing, ResultsFetch, Session};
use crate::{announce, EngineContext, PauseControl};
use flipper_core::{
    same_username, ExternalId, FlipperError, FlipperResult, GameSlot, ScoreRecord, SlotId, SlotStatus,
    Timestamp, Track, UserId, WinnerRecord, WorkflowError,
};
use std::sync::Arc;
use std::time::Duration;

/// How the previously active slot was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseResult {
    Winner {
        username: String,
        score: String,
        /// Resolved identity of the winner, if linked
        user_id: Option<UserId>,
        /// Repeat winner: must nominate instead of picking
        dynasty: bool,
    },
    /// The results view was empty
    NoResults,
    /// Results could not be fetched after every retry
    ResultsUnavailable,
    /// The remote entry no longer exists; the slot was hidden
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSlot {
    pub slot_id: SlotId,
    pub table: String,
    pub result: CloseResult,
}

/// Summary of one track's maintenance run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub track: Track,
    pub closed: Option<ClosedSlot>,
    /// `None` when the queue already held a slot behind the promoted one
    pub provisioned: Option<SlotId>,
    /// Picker assigned to the provisioned slot
    pub picker: Option<UserId>,
    pub promoted: Option<GameSlot>,
    /// Whether the promoted slot came from a pause override
    pub override_used: bool,
}

/// Runs the per-track lifecycle.
#[derive(Debug, Clone)]
pub struct CycleController {
    ctx: Arc<EngineContext>,
}

impl CycleController {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Expire the pause if due, then maintain every track independently.
    ///
    /// A failing track is logged and reported; the others still run.
    pub async fn maintain_all(&self, now: Timestamp) -> Vec<(Track, FlipperResult<CycleReport>)> {
        if let Err(e) = PauseControl::new(Arc::clone(&self.ctx)).expire_if_due(now) {
            tracing::error!(error = %e, "Failed to check pause expiry");
        }
        let mut results = Vec::with_capacity(Track::ALL.len());
        for track in Track::ALL {
            let result = self.maintain(track, now).await;
            if let Err(e) = &result {
                tracing::error!(track = %track, error = %e, "Track maintenance failed");
            }
            results.push((track, result));
        }
        results
    }

    /// Run one maintenance cycle for `track`.
    pub async fn maintain(&self, track: Track, now: Timestamp) -> FlipperResult<CycleReport> {
        if let Err(e) = PauseControl::new(Arc::clone(&self.ctx)).expire_if_due(now) {
            tracing::warn!(track = %track, error = %e, "Failed to check pause expiry");
        }
        tracing::info!(track = %track, "Maintenance started");
        let mut session = Session::open(self.ctx.adapter.as_ref()).await?;
        let result = self.maintain_in(&mut session, track, now).await;
        session.close().await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    track = %track,
                    provisioned = ?report.provisioned,
                    promoted = ?report.promoted.as_ref().map(|s| s.name.as_str()),
                    "Maintenance finished"
                );
                announce(self.ctx.notifier.as_ref(), &describe(report)).await;
            }
            Err(e) => tracing::warn!(track = %track, error = %e, "Maintenance aborted"),
        }
        result
    }

    async fn maintain_in(
        &self,
        session: &mut Session,
        track: Track,
        now: Timestamp,
    ) -> FlipperResult<CycleReport> {
        let ledger = &*self.ctx.ledger;
        let active = ledger.slot_get_active(track)?;
        let queued = ledger.slot_get_next_queued(track)?;
        let queued_count = ledger.slot_list_by_status(track, SlotStatus::Queued)?.len();

        let closed = match active {
            Some(slot) => Some(self.close_active(session, &slot, now).await?),
            None => None,
        };

        let picker = match &closed {
            Some(ClosedSlot {
                result:
                    CloseResult::Winner {
                        user_id: Some(user_id),
                        dynasty: false,
                        ..
                    },
                ..
            }) => Some(user_id.clone()),
            _ => None,
        };

        let provisioned = if closed.is_some() || queued_count <= 1 {
            let slot = ledger.slot_create_queued(track, None, &self.ctx.policy, now)?;
            if let Some(picker) = &picker {
                ledger.slot_set_picker(slot.slot_id, Some(picker.clone()), None, now)?;
            }
            tracing::info!(
                track = %track,
                slot_id = %slot.slot_id,
                picker = ?picker,
                "Provisioned next slot"
            );
            Some(slot.slot_id)
        } else {
            tracing::info!(
                track = %track,
                queued = queued_count,
                "Nothing closed and the queue is stocked; not provisioning"
            );
            None
        };

        let mut override_used = false;
        let promoted = match queued {
            Some(earliest) => {
                let chosen = match self.override_slot(track, now)? {
                    Some(slot) => {
                        override_used = true;
                        slot
                    }
                    None => earliest,
                };
                Some(self.promote(session, chosen, now).await?)
            }
            None => None,
        };

        Ok(CycleReport {
            track,
            closed,
            provisioned,
            picker,
            promoted,
            override_used,
        })
    }

    /// The queued slot named by a live pause on this track.
    fn override_slot(&self, track: Track, now: Timestamp) -> FlipperResult<Option<GameSlot>> {
        let pause = self.ctx.ledger.pause_get()?;
        let Some(name) = pause.override_for(track, now) else {
            return Ok(None);
        };
        let queued = self.ctx.ledger.slot_list_by_status(track, SlotStatus::Queued)?;
        let found = queued
            .iter()
            .find(|s| s.priority && s.name.trim().eq_ignore_ascii_case(name.trim()))
            .or_else(|| queued.iter().find(|s| s.name.trim().eq_ignore_ascii_case(name.trim())))
            .cloned();
        if found.is_none() {
            tracing::warn!(track = %track, name = %name, "Pause override slot not queued; using normal order");
        }
        Ok(found)
    }

    async fn close_active(
        &self,
        session: &mut Session,
        slot: &GameSlot,
        now: Timestamp,
    ) -> FlipperResult<ClosedSlot> {
        let ledger = &*self.ctx.ledger;
        let policy = &self.ctx.policy;
        let table = slot.table_name().to_string();
        let closed = |result| ClosedSlot {
            slot_id: slot.slot_id,
            table: table.clone(),
            result,
        };

        let Some(external_id) = slot.external_id.clone() else {
            tracing::warn!(track = %slot.track, slot_id = %slot.slot_id, "Active slot has no remote entry");
            ledger.slot_transition(slot.slot_id, SlotStatus::Hidden, now)?;
            return Ok(closed(CloseResult::Missing));
        };

        let fetch = session
            .fetch_results(
                &external_id,
                policy.result_fetch_attempts,
                Duration::from_millis(policy.result_fetch_backoff_ms),
            )
            .await?;
        let (results, unavailable) = match fetch {
            ResultsFetch::Results(results) => (results, false),
            ResultsFetch::NotFound => return self.demote_missing(slot, &external_id, now).map(closed),
            ResultsFetch::Unavailable => {
                tracing::warn!(
                    track = %slot.track,
                    slot_id = %slot.slot_id,
                    external_id = %external_id,
                    "Results unavailable; closing without a winner"
                );
                (Vec::new(), true)
            }
        };

        if !results.is_empty() && !ledger.scores_exist(slot.slot_id)? {
            let records: Vec<ScoreRecord> = results
                .iter()
                .map(|r| ScoreRecord {
                    slot_id: slot.slot_id,
                    rank: r.rank,
                    username: r.username.trim().to_string(),
                    score: r.score.trim().to_string(),
                    recorded_at: now,
                })
                .collect();
            ledger.scores_append(&records)?;
            tracing::info!(slot_id = %slot.slot_id, count = records.len(), "Recorded scores");
        }

        match session.lock(&external_id).await {
            Ok(()) => {}
            Err(e) if remote_missing(&e) => {
                return self.demote_missing(slot, &external_id, now).map(closed);
            }
            Err(e) => return Err(e),
        }
        if !slot.status.can_advance_to(SlotStatus::Completed) {
            return Err(WorkflowError::InvalidTransition {
                slot: slot.slot_id.to_string(),
                from: slot.status,
                to: SlotStatus::Completed,
            }
            .into());
        }

        let Some(top) = results.iter().find(|r| r.rank == 1).or(results.first()) else {
            let result = if unavailable {
                CloseResult::ResultsUnavailable
            } else {
                CloseResult::NoResults
            };
            ledger.slot_transition(slot.slot_id, SlotStatus::Completed, now)?;
            tracing::info!(track = %slot.track, slot_id = %slot.slot_id, "Slot closed without a winner");
            return Ok(closed(result));
        };
        let username = top.username.trim().to_string();
        let score = top.score.trim().to_string();

        // Last winner is read before this slot's record is appended; on a
        // re-run the record already exists, so compare against the one before it.
        let history = ledger.winner_list(Some(slot.track))?;
        let recorded = history.iter().position(|w| w.slot_id == slot.slot_id);
        let previous = match recorded {
            Some(i) => i.checked_sub(1).and_then(|j| history.get(j)),
            None => history.last(),
        };
        let dynasty = policy.dynasty_rule
            && previous.is_some_and(|p| same_username(&p.username, &username));

        let user_id = match recorded {
            Some(i) => history[i].user_id.clone(),
            None => {
                let user_id = ledger.identity_by_username(&username)?.map(|l| l.user_id);
                ledger.winner_append(&WinnerRecord {
                    track: slot.track,
                    slot_id: slot.slot_id,
                    external_id: Some(external_id.clone()),
                    user_id: user_id.clone(),
                    username: username.clone(),
                    score: score.clone(),
                    table_name: table.clone(),
                    won_at: now,
                })?;
                user_id
            }
        };
        // History is written before COMPLETED so an interrupted close is
        // picked up again as ACTIVE on the next run.
        ledger.slot_transition(slot.slot_id, SlotStatus::Completed, now)?;
        tracing::info!(
            track = %slot.track,
            slot_id = %slot.slot_id,
            winner = %username,
            score = %score,
            dynasty,
            linked = user_id.is_some(),
            "Slot closed with winner"
        );

        Ok(closed(CloseResult::Winner {
            username,
            score,
            user_id,
            dynasty,
        }))
    }

    fn demote_missing(
        &self,
        slot: &GameSlot,
        external_id: &ExternalId,
        now: Timestamp,
    ) -> FlipperResult<CloseResult> {
        tracing::warn!(
            track = %slot.track,
            slot_id = %slot.slot_id,
            external_id = %external_id,
            "Remote entry missing; hiding active slot"
        );
        self.ctx
            .ledger
            .slot_transition(slot.slot_id, SlotStatus::Hidden, now)?;
        Ok(CloseResult::Missing)
    }

    /// Make `slot` the track's single ACTIVE slot, locally and remotely.
    async fn promote(
        &self,
        session: &mut Session,
        slot: GameSlot,
        now: Timestamp,
    ) -> FlipperResult<GameSlot> {
        let ledger = &*self.ctx.ledger;
        let track = slot.track;
        if !slot.status.can_advance_to(SlotStatus::Active) {
            return Err(WorkflowError::InvalidTransition {
                slot: slot.slot_id.to_string(),
                from: slot.status,
                to: SlotStatus::Active,
            }
            .into());
        }

        // Demote before promote: never two ACTIVE rows on a track.
        for other in ledger.slot_list_by_status(track, SlotStatus::Active)? {
            if other.slot_id == slot.slot_id {
                continue;
            }
            tracing::warn!(track = %track, slot_id = %other.slot_id, "Demoting leftover active slot");
            ledger.slot_transition(other.slot_id, SlotStatus::Hidden, now)?;
            if let Some(external_id) = &other.external_id {
                if let Err(e) = session.hide(external_id).await {
                    tracing::warn!(external_id = %external_id, error = %e, "Failed to hide leftover entry");
                }
            }
        }

        let mut slot = slot;
        if slot.is_placeholder() {
            slot = self.fill_placeholder(session, slot, now).await?;
        }

        let listed = match &slot.external_id {
            Some(id) => session.list_entries().await?.iter().any(|e| &e.external_id == id),
            None => false,
        };
        let external_id = match (&slot.external_id, listed) {
            (Some(id), true) => id.clone(),
            (stale, _) => {
                if let Some(stale) = stale {
                    tracing::warn!(track = %track, external_id = %stale, "Queued entry missing remotely; recreating");
                }
                self.create_remote(session, &slot).await?
            }
        };
        session.show(&external_id).await?;
        session.unlock(&external_id).await?;

        let promoted = ledger.slot_transition(slot.slot_id, SlotStatus::Active, now)?;
        tracing::info!(
            track = %track,
            slot_id = %promoted.slot_id,
            external_id = %external_id,
            name = %promoted.name,
            "Promoted slot"
        );
        Ok(promoted)
    }

    /// Draw a table for a placeholder about to be promoted.
    ///
    /// A picker who chose a table in the meantime wins: the fresh row is
    /// used as it is.
    async fn fill_placeholder(
        &self,
        session: &mut Session,
        slot: GameSlot,
        now: Timestamp,
    ) -> FlipperResult<GameSlot> {
        let ledger = &*self.ctx.ledger;
        let track = slot.track;
        let table = self.ctx.draw.draw(ledger, &self.ctx.policy, track, now)?;
        let name = track.entry_name(&table.name);

        let filled = match ledger.slot_overwrite_if(
            slot.slot_id,
            slot.picker.as_ref(),
            &name,
            slot.external_id.clone(),
        ) {
            Ok(filled) => filled,
            Err(FlipperError::Workflow(WorkflowError::SlotChanged { .. })) => {
                let fresh = ledger.slot_require(slot.slot_id)?;
                if fresh.status != SlotStatus::Queued || fresh.is_placeholder() {
                    return Err(WorkflowError::SlotChanged {
                        slot: slot.slot_id.to_string(),
                    }
                    .into());
                }
                tracing::info!(track = %track, slot_id = %slot.slot_id, name = %fresh.name, "Placeholder was picked meanwhile");
                return Ok(fresh);
            }
            Err(e) => return Err(e),
        };
        if let Some(external_id) = &filled.external_id {
            session.rename(external_id, &name).await?;
        }
        tracing::info!(track = %track, slot_id = %slot.slot_id, table = %table.name, "Auto-filled placeholder at promotion");
        Ok(filled)
    }

    async fn create_remote(&self, session: &mut Session, slot: &GameSlot) -> FlipperResult<ExternalId> {
        let external_id = session.create_entry(&slot.name).await?;
        session.tag(&external_id, slot.track.code()).await?;
        self.ctx
            .ledger
            .slot_attach_external(slot.slot_id, external_id.clone())?;
        Ok(external_id)
    }

    /// Create hidden remote entries for named queued slots that have none.
    ///
    /// Runs after a table selection so the lineup holds the entry before its
    /// promotion.
    pub async fn materialize(&self, track: Track) -> FlipperResult<Vec<GameSlot>> {
        let pending: Vec<GameSlot> = self
            .ctx
            .ledger
            .slot_list_by_status(track, SlotStatus::Queued)?
            .into_iter()
            .filter(|s| s.external_id.is_none() && !s.is_placeholder())
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut session = Session::open(self.ctx.adapter.as_ref()).await?;
        let result = self.materialize_in(&mut session, pending).await;
        session.close().await;
        result
    }

    async fn materialize_in(
        &self,
        session: &mut Session,
        pending: Vec<GameSlot>,
    ) -> FlipperResult<Vec<GameSlot>> {
        let mut created = Vec::with_capacity(pending.len());
        for slot in pending {
            let external_id = session
                .create_hidden_tagged(&slot.name, slot.track.code())
                .await?;
            let slot = self
                .ctx
                .ledger
                .slot_attach_external(slot.slot_id, external_id)?;
            tracing::info!(track = %slot.track, slot_id = %slot.slot_id, name = %slot.name, "Materialized queued slot");
            created.push(slot);
        }
        Ok(created)
    }
}

/// Plain-text announcement of a maintenance run.
pub fn describe(report: &CycleReport) -> String {
    let mut text = String::new();
    let track = report.track.display_name();
    match &report.closed {
        Some(closed) => match &closed.result {
            CloseResult::Winner {
                username,
                score,
                user_id,
                dynasty,
            } => {
                text.push_str(&format!(
                    "{}: {} won {} with {}.",
                    track, username, closed.table, score
                ));
                if *dynasty {
                    text.push_str(&format!(
                        " Back-to-back win! {} must nominate the next picker.",
                        username
                    ));
                } else if user_id.is_some() {
                    text.push_str(&format!(" {} picks the next table.", username));
                } else {
                    text.push_str(" The winner has no linked account, so the next pick is open.");
                }
            }
            CloseResult::NoResults => {
                text.push_str(&format!("{}: {} closed with no scores.", track, closed.table));
            }
            CloseResult::ResultsUnavailable => {
                text.push_str(&format!(
                    "{}: {} closed but its results could not be retrieved.",
                    track, closed.table
                ));
            }
            CloseResult::Missing => {
                text.push_str(&format!(
                    "{}: {} is no longer on the scoreboard and was set aside.",
                    track, closed.table
                ));
            }
        },
        None => text.push_str(&format!("{}: no game was running.", track)),
    }
    match &report.promoted {
        Some(slot) => text.push_str(&format!(" Now playing: {}.", slot.table_name())),
        None => text.push_str(" No game is queued yet."),
    }
    text
}
