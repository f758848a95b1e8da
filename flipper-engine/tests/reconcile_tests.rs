//! Reconciliation against an independently changed lineup.

use flipper_core::{SlotStatus, Track};
use flipper_engine::{ReconcileReport, Reconciler};
use flipper_storage::LedgerStore;
use flipper_test_utils::assertions::assert_single_active;
use flipper_test_utils::fixtures::{base_time, hours_after, Harness};

fn reconciler(harness: &Harness) -> Reconciler {
    Reconciler::new(harness.ctx.clone())
}

#[tokio::test]
async fn test_absent_active_row_becomes_hidden() {
    let harness = Harness::new();
    let start = base_time();
    let active = harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    harness.lineup.remove_entry(active.external_id.as_ref().unwrap());

    let report = reconciler(&harness).reconcile(start).await.unwrap();

    assert_eq!(report.demoted, 1);
    let slot = harness.ledger.slot_get(active.slot_id).unwrap().unwrap();
    assert_eq!(slot.status, SlotStatus::Hidden);
    assert_eq!(harness.lineup.sessions_closed(), 1);
}

#[tokio::test]
async fn test_unknown_entries_are_imported() {
    let harness = Harness::new();
    let start = base_time();
    harness.lineup.add_entry("Fish Tales WG-VR", false, false, &[]);
    harness.lineup.add_entry("Monster Bash", true, false, &["WG-VPXS"]);
    harness.lineup.add_entry("Twilight Zone MG", false, true, &[]);
    harness.lineup.add_entry("Practice table", false, false, &[]);

    let report = reconciler(&harness).reconcile(start).await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            created: 3,
            updated: 0,
            demoted: 0,
            ignored: 1,
        }
    );
    assert_eq!(harness.slots_with(Track::WeeklyVr, SlotStatus::Active).len(), 1);
    assert_eq!(harness.slots_with(Track::WeeklyVpxs, SlotStatus::Queued).len(), 1);
    let completed = harness.slots_with(Track::MonthlyGrind, SlotStatus::Completed);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].completed_at, Some(start));
}

#[tokio::test]
async fn test_status_follows_lineup() {
    let harness = Harness::new();
    let start = base_time();
    let active = harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    let queued = harness.queued_slot(Track::DailyGrind, "Attack from Mars", hours_after(start, -12));
    // Someone rotated the lineup by hand.
    let mut session = flipper_engine::Session::open(&harness.lineup).await.unwrap();
    session.lock(active.external_id.as_ref().unwrap()).await.unwrap();
    session.show(queued.external_id.as_ref().unwrap()).await.unwrap();
    session.close().await;

    let report = reconciler(&harness).reconcile(start).await.unwrap();

    assert_eq!(report.updated, 2);
    assert_eq!(
        harness.ledger.slot_get(active.slot_id).unwrap().unwrap().status,
        SlotStatus::Completed
    );
    assert_eq!(
        harness.ledger.slot_get(queued.slot_id).unwrap().unwrap().status,
        SlotStatus::Active
    );
    assert_single_active(harness.ledger.as_ref());
}

#[tokio::test]
async fn test_extra_active_entries_are_hidden() {
    let harness = Harness::new();
    let start = base_time();
    harness.lineup.add_entry("Medieval Madness DG", false, false, &["DG"]);
    harness.lineup.add_entry("Attack from Mars DG", false, false, &["DG"]);

    reconciler(&harness).reconcile(start).await.unwrap();

    assert_eq!(harness.slots_with(Track::DailyGrind, SlotStatus::Active).len(), 1);
    assert_eq!(harness.slots_with(Track::DailyGrind, SlotStatus::Hidden).len(), 1);
    assert_single_active(harness.ledger.as_ref());
}

#[tokio::test]
async fn test_pending_row_takes_observed_id() {
    let harness = Harness::new();
    let start = base_time();
    let pending = harness
        .ledger
        .slot_create_queued(Track::WeeklyVr, Some("Fish Tales WG-VR"), &harness.ctx.policy, start)
        .unwrap();
    let id = harness.lineup.add_entry("fish tales WG-VR", true, false, &["WG-VR"]);

    let report = reconciler(&harness).reconcile(start).await.unwrap();

    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 1);
    let slot = harness.ledger.slot_get(pending.slot_id).unwrap().unwrap();
    assert_eq!(slot.external_id, Some(id));
    assert_eq!(slot.status, SlotStatus::Queued);
}

#[tokio::test]
async fn test_hidden_completed_entry_stays_completed() {
    let harness = Harness::new();
    let start = base_time();
    let slot = harness.queued_slot(Track::WeeklyVpxs, "Monster Bash", hours_after(start, -200));
    harness
        .ledger
        .slot_transition(slot.slot_id, SlotStatus::Completed, hours_after(start, -24))
        .unwrap();

    let report = reconciler(&harness).reconcile(start).await.unwrap();

    assert_eq!(report, ReconcileReport::default());
    assert_eq!(
        harness.ledger.slot_get(slot.slot_id).unwrap().unwrap().status,
        SlotStatus::Completed
    );
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let harness = Harness::new();
    let start = base_time();
    harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    harness.lineup.add_entry("Twilight Zone WG-VPXS", false, false, &[]);

    let first = reconciler(&harness).reconcile(start).await.unwrap();
    let second = reconciler(&harness).reconcile(hours_after(start, 1)).await.unwrap();

    assert_eq!(first.created, 1);
    assert_eq!(second, ReconcileReport::default());
}
