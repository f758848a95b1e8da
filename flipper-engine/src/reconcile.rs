//! Reconciliation Engine
//!
//! The lineup is authoritative for whether an entry still exists; the
//! ledger is authoritative for history. A sweep reads the lineup once and
//! rewrites ledger status to match, then demotes rows whose entry is gone.

use crate::adapter::{RemoteEntry, Session};
use crate::EngineContext;
use flipper_core::{ExternalId, FlipperResult, GameSlot, SlotStatus, Timestamp, Track};
use std::collections::HashSet;
use std::sync::Arc;

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows created for entries the ledger did not know
    pub created: usize,
    /// Rows whose status, name or external id changed
    pub updated: usize,
    /// Rows moved to HIDDEN
    pub demoted: usize,
    /// Entries matching no track
    pub ignored: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    ctx: Arc<EngineContext>,
}

impl Reconciler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Sweep every track against the observed lineup.
    pub async fn reconcile(&self, now: Timestamp) -> FlipperResult<ReconcileReport> {
        let mut session = Session::open(self.ctx.adapter.as_ref()).await?;
        let listed = session.list_entries().await;
        session.close().await;
        let entries = listed?;
        tracing::info!(entries = entries.len(), "Reconciliation started");

        let report = self.apply(&entries, now)?;
        tracing::info!(
            created = report.created,
            updated = report.updated,
            demoted = report.demoted,
            ignored = report.ignored,
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Rewrite the ledger from an already listed lineup.
    pub fn apply(&self, entries: &[RemoteEntry], now: Timestamp) -> FlipperResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let observed: HashSet<&ExternalId> = entries.iter().map(|e| &e.external_id).collect();

        for entry in entries {
            if Track::classify(&entry.name, &entry.tags).is_none() {
                tracing::debug!(external_id = %entry.external_id, name = %entry.name, "Ignoring unclassified entry");
                report.ignored += 1;
            }
        }

        for track in Track::ALL {
            let (active, rest): (Vec<&RemoteEntry>, Vec<&RemoteEntry>) = entries
                .iter()
                .filter(|e| Track::classify(&e.name, &e.tags) == Some(track))
                .partition(|e| e.observed_status() == SlotStatus::Active);

            for entry in &rest {
                self.upsert(track, entry, entry.observed_status(), now, &mut report)?;
            }
            for (i, entry) in active.iter().enumerate() {
                let status = if i == 0 {
                    self.demote_other_active(track, &entry.external_id, now, &mut report)?;
                    SlotStatus::Active
                } else {
                    tracing::warn!(
                        track = %track,
                        external_id = %entry.external_id,
                        name = %entry.name,
                        "Extra active entry observed; recording as hidden"
                    );
                    SlotStatus::Hidden
                };
                self.upsert(track, entry, status, now, &mut report)?;
            }
        }

        for track in Track::ALL {
            for slot in self.ctx.ledger.slot_list(track)? {
                let live = matches!(slot.status, SlotStatus::Active | SlotStatus::Completed);
                let seen = slot.external_id.as_ref().is_some_and(|id| observed.contains(id));
                if live && !seen {
                    self.demote(&slot, now, &mut report)?;
                }
            }
        }
        Ok(report)
    }

    /// Demote every ACTIVE row of `track` except the one for `keep`.
    fn demote_other_active(
        &self,
        track: Track,
        keep: &ExternalId,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> FlipperResult<()> {
        for slot in self.ctx.ledger.slot_list_by_status(track, SlotStatus::Active)? {
            if slot.external_id.as_ref() != Some(keep) {
                self.demote(&slot, now, report)?;
            }
        }
        Ok(())
    }

    fn demote(&self, slot: &GameSlot, now: Timestamp, report: &mut ReconcileReport) -> FlipperResult<()> {
        tracing::warn!(
            track = %slot.track,
            slot_id = %slot.slot_id,
            external_id = ?slot.external_id,
            from = %slot.status,
            "Entry absent from lineup; hiding slot"
        );
        self.ctx
            .ledger
            .slot_transition(slot.slot_id, SlotStatus::Hidden, now)?;
        report.demoted += 1;
        Ok(())
    }

    fn upsert(
        &self,
        track: Track,
        entry: &RemoteEntry,
        status: SlotStatus,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> FlipperResult<()> {
        let ledger = &*self.ctx.ledger;
        let name = entry.name.trim();

        if let Some(stored) = ledger.slot_get_by_external(&entry.external_id)? {
            let mut slot = stored.clone();
            // A hidden entry of a finished slot is archived, not re-queued.
            let status = if slot.status == SlotStatus::Completed && status == SlotStatus::Queued {
                SlotStatus::Completed
            } else {
                status
            };
            if slot.status == status && slot.name == name {
                return Ok(());
            }
            tracing::info!(
                track = %track,
                slot_id = %slot.slot_id,
                external_id = %entry.external_id,
                from = %slot.status,
                to = %status,
                "Updating slot from lineup"
            );
            slot.name = name.to_string();
            if slot.status != status {
                slot.apply_status(status, now);
            }
            ledger.slot_replace(&stored, &slot)?;
            report.updated += 1;
            return Ok(());
        }

        let pending = ledger
            .slot_list(track)?
            .into_iter()
            .find(|s| s.external_id.is_none() && s.name.trim().eq_ignore_ascii_case(name));
        if let Some(stored) = pending {
            let mut slot = stored.clone();
            tracing::info!(
                track = %track,
                slot_id = %slot.slot_id,
                external_id = %entry.external_id,
                "Attaching observed entry to pending slot"
            );
            slot.external_id = Some(entry.external_id.clone());
            if slot.status != status {
                slot.apply_status(status, now);
            }
            ledger.slot_replace(&stored, &slot)?;
            report.updated += 1;
            return Ok(());
        }

        let mut slot = GameSlot::queued(track, name, now, now);
        slot.external_id = Some(entry.external_id.clone());
        slot.apply_status(status, now);
        ledger.slot_insert(&slot)?;
        tracing::info!(
            track = %track,
            slot_id = %slot.slot_id,
            external_id = %entry.external_id,
            status = %status,
            "Imported slot from lineup"
        );
        report.created += 1;
        Ok(())
    }
}
