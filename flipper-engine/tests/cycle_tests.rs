//! Cycle Controller scenarios against the fake lineup.

use flipper_core::{CatalogEntry, ScoreRecord, SlotStatus, Track, UserId, WinnerRecord};
use flipper_engine::{CloseResult, CycleController, PauseControl, PickerWorkflow, Selection};
use flipper_storage::LedgerStore;
use flipper_test_utils::assertions::assert_single_active;
use flipper_test_utils::fixtures::{base_time, hours_after, link, Harness};

fn controller(harness: &Harness) -> CycleController {
    CycleController::new(harness.ctx.clone())
}

/// Mark every VR table as recently played so no VR placeholder can be drawn.
fn exhaust_vr_tables(harness: &Harness) {
    let start = base_time();
    for table in ["Medieval Madness", "Attack from Mars", "Fish Tales"] {
        let slot = harness.queued_slot(Track::WeeklyVr, table, hours_after(start, -48));
        harness
            .ledger
            .slot_transition(slot.slot_id, SlotStatus::Completed, hours_after(start, -24))
            .unwrap();
    }
}

#[tokio::test]
async fn test_winner_becomes_picker_of_provisioned_slot() {
    let harness = Harness::new();
    let start = base_time();
    let alice = link(harness.ledger.as_ref(), "alice", "u-alice");
    let active = harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    let queued = harness.queued_slot(Track::DailyGrind, "Attack from Mars", hours_after(start, -12));
    let remote_id = active.external_id.clone().unwrap();
    harness.lineup.set_results(&remote_id, &[("alice", "500")]);

    let report = controller(&harness)
        .maintain(Track::DailyGrind, start)
        .await
        .unwrap();

    let closed = harness.ledger.slot_get(active.slot_id).unwrap().unwrap();
    assert_eq!(closed.status, SlotStatus::Completed);
    assert_eq!(closed.completed_at, Some(start));
    assert!(harness.lineup.entry(&remote_id).unwrap().locked);

    let winners = harness.ledger.winner_list(Some(Track::DailyGrind)).unwrap();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].username, "alice");
    assert_eq!(winners[0].score, "500");
    assert_eq!(winners[0].table_name, "Medieval Madness");
    assert_eq!(winners[0].user_id, Some(alice.clone()));

    let waiting = harness.slots_with(Track::DailyGrind, SlotStatus::Queued);
    assert_eq!(waiting.len(), 1);
    assert!(waiting[0].is_placeholder());
    assert_eq!(waiting[0].picker, Some(alice.clone()));
    assert_eq!(report.picker, Some(alice));
    assert_eq!(report.provisioned, Some(waiting[0].slot_id));

    let promoted = harness.ledger.slot_get(queued.slot_id).unwrap().unwrap();
    assert_eq!(promoted.status, SlotStatus::Active);
    let remote = harness.lineup.entry(promoted.external_id.as_ref().unwrap()).unwrap();
    assert!(!remote.hidden);
    assert!(!remote.locked);

    assert!(harness.notifier.saw("alice won Medieval Madness with 500"));
    assert!(harness.notifier.saw("Now playing: Attack from Mars"));
    assert_single_active(harness.ledger.as_ref());
}

#[tokio::test]
async fn test_repeat_winner_gets_no_picker() {
    let harness = Harness::new();
    let start = base_time();
    link(harness.ledger.as_ref(), "alice", "u-alice");
    harness
        .ledger
        .winner_append(&WinnerRecord {
            track: Track::DailyGrind,
            slot_id: flipper_core::SlotId::now_v7(),
            external_id: None,
            user_id: Some(UserId::new("u-alice")),
            username: "Alice".to_string(),
            score: "300".to_string(),
            table_name: "Twilight Zone".to_string(),
            won_at: hours_after(start, -48),
        })
        .unwrap();
    let active = harness.active_slot(Track::DailyGrind, "Theatre of Magic", hours_after(start, -24));
    harness
        .lineup
        .set_results(active.external_id.as_ref().unwrap(), &[("alice", "800")]);

    let report = controller(&harness).maintain(Track::DailyGrind, start).await.unwrap();

    match report.closed.map(|c| c.result) {
        Some(CloseResult::Winner { dynasty, .. }) => assert!(dynasty),
        other => panic!("expected a winner, got {:?}", other),
    }
    assert_eq!(report.picker, None);
    let provisioned = harness.ledger.slot_get(report.provisioned.unwrap()).unwrap().unwrap();
    assert_eq!(provisioned.picker, None);
    assert!(harness.notifier.saw("must nominate"));
    assert_eq!(harness.ledger.winner_list(Some(Track::DailyGrind)).unwrap().len(), 2);
}

#[tokio::test]
async fn test_different_winner_is_assigned() {
    let harness = Harness::new();
    let start = base_time();
    let bob = link(harness.ledger.as_ref(), "bob", "u-bob");
    harness
        .ledger
        .winner_append(&WinnerRecord {
            track: Track::DailyGrind,
            slot_id: flipper_core::SlotId::now_v7(),
            external_id: None,
            user_id: None,
            username: "Alice".to_string(),
            score: "300".to_string(),
            table_name: "Twilight Zone".to_string(),
            won_at: hours_after(start, -48),
        })
        .unwrap();
    let active = harness.active_slot(Track::DailyGrind, "Theatre of Magic", hours_after(start, -24));
    harness
        .lineup
        .set_results(active.external_id.as_ref().unwrap(), &[("bob", "900"), ("alice", "800")]);

    let report = controller(&harness).maintain(Track::DailyGrind, start).await.unwrap();

    assert_eq!(report.picker, Some(bob.clone()));
    let provisioned = harness.ledger.slot_get(report.provisioned.unwrap()).unwrap().unwrap();
    assert_eq!(provisioned.picker, Some(bob));
    assert_eq!(harness.ledger.scores_for_slot(active.slot_id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unlinked_winner_leaves_slot_open() {
    let harness = Harness::new();
    let start = base_time();
    let active = harness.active_slot(Track::WeeklyVr, "Fish Tales", hours_after(start, -24));
    harness
        .lineup
        .set_results(active.external_id.as_ref().unwrap(), &[("stranger", "10")]);

    let report = controller(&harness).maintain(Track::WeeklyVr, start).await.unwrap();

    assert_eq!(report.picker, None);
    let winners = harness.ledger.winner_list(Some(Track::WeeklyVr)).unwrap();
    assert_eq!(winners[0].user_id, None);
    assert!(harness.notifier.saw("no linked account"));
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_scores_or_winner() {
    let harness = Harness::new();
    let start = base_time();
    let active = harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    let remote_id = active.external_id.clone().unwrap();
    harness.lineup.set_results(&remote_id, &[("alice", "500"), ("bob", "400")]);

    // A previous run recorded scores and the winner before it was interrupted.
    harness
        .ledger
        .scores_append(&[
            ScoreRecord {
                slot_id: active.slot_id,
                rank: 1,
                username: "alice".to_string(),
                score: "500".to_string(),
                recorded_at: hours_after(start, -1),
            },
            ScoreRecord {
                slot_id: active.slot_id,
                rank: 2,
                username: "bob".to_string(),
                score: "400".to_string(),
                recorded_at: hours_after(start, -1),
            },
        ])
        .unwrap();
    harness
        .ledger
        .winner_append(&WinnerRecord {
            track: Track::DailyGrind,
            slot_id: active.slot_id,
            external_id: Some(remote_id.clone()),
            user_id: None,
            username: "alice".to_string(),
            score: "500".to_string(),
            table_name: "Medieval Madness".to_string(),
            won_at: hours_after(start, -1),
        })
        .unwrap();

    let report = controller(&harness).maintain(Track::DailyGrind, start).await.unwrap();

    assert_eq!(harness.ledger.scores_for_slot(active.slot_id).unwrap().len(), 2);
    assert_eq!(harness.ledger.winner_list(Some(Track::DailyGrind)).unwrap().len(), 1);
    match report.closed.map(|c| c.result) {
        Some(CloseResult::Winner { dynasty, .. }) => assert!(!dynasty),
        other => panic!("expected a winner, got {:?}", other),
    }
    assert_eq!(
        harness.ledger.slot_get(active.slot_id).unwrap().unwrap().status,
        SlotStatus::Completed
    );
}

#[tokio::test]
async fn test_empty_results_close_without_winner() {
    let harness = Harness::new();
    let start = base_time();
    let active = harness.active_slot(Track::MonthlyGrind, "Twilight Zone", hours_after(start, -24));

    let report = controller(&harness).maintain(Track::MonthlyGrind, start).await.unwrap();

    assert_eq!(report.closed.unwrap().result, CloseResult::NoResults);
    assert_eq!(
        harness.ledger.slot_get(active.slot_id).unwrap().unwrap().status,
        SlotStatus::Completed
    );
    assert!(harness.ledger.winner_list(None).unwrap().is_empty());
    assert_eq!(harness.slots_with(Track::MonthlyGrind, SlotStatus::Queued).len(), 1);
    assert!(harness.notifier.saw("closed with no scores"));
}

#[tokio::test]
async fn test_unavailable_results_are_reported() {
    let harness = Harness::new();
    let start = base_time();
    let active = harness.active_slot(Track::WeeklyVpxs, "Monster Bash", hours_after(start, -24));
    let remote_id = active.external_id.clone().unwrap();
    harness.lineup.set_results(&remote_id, &[("alice", "500")]);
    harness.lineup.fail_results(&remote_id, 10);

    let report = controller(&harness).maintain(Track::WeeklyVpxs, start).await.unwrap();

    assert_eq!(report.closed.unwrap().result, CloseResult::ResultsUnavailable);
    assert!(harness.ledger.winner_list(None).unwrap().is_empty());
    assert!(!harness.ledger.scores_exist(active.slot_id).unwrap());
}

#[tokio::test]
async fn test_missing_remote_entry_hides_active_slot() {
    let harness = Harness::new();
    let start = base_time();
    let active = harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    let queued = harness.queued_slot(Track::DailyGrind, "Attack from Mars", hours_after(start, -12));
    harness.lineup.remove_entry(active.external_id.as_ref().unwrap());

    let report = controller(&harness).maintain(Track::DailyGrind, start).await.unwrap();

    assert_eq!(report.closed.unwrap().result, CloseResult::Missing);
    assert_eq!(
        harness.ledger.slot_get(active.slot_id).unwrap().unwrap().status,
        SlotStatus::Hidden
    );
    assert_eq!(report.promoted.unwrap().slot_id, queued.slot_id);
    assert_single_active(harness.ledger.as_ref());
}

#[tokio::test]
async fn test_placeholder_is_filled_at_promotion() {
    let harness = Harness::new();
    let start = base_time();
    let placeholder = harness.placeholder_slot(Track::WeeklyVr, hours_after(start, -72));

    let report = controller(&harness).maintain(Track::WeeklyVr, start).await.unwrap();

    let promoted = report.promoted.unwrap();
    assert_eq!(promoted.slot_id, placeholder.slot_id);
    assert!(!promoted.is_placeholder());
    assert!(promoted.name.ends_with(" WG-VR"));
    let table = harness.ledger.catalog_get(promoted.table_name()).unwrap().unwrap();
    assert!(table.vr);
    let remote = harness.lineup.entry(promoted.external_id.as_ref().unwrap()).unwrap();
    assert!(!remote.hidden);
    assert!(remote.has_tag("WG-VR"));
}

#[tokio::test]
async fn test_no_queued_slot_means_no_promotion() {
    let harness = Harness::new();
    let start = base_time();

    let report = controller(&harness).maintain(Track::WeeklyVpxs, start).await.unwrap();

    assert!(report.closed.is_none());
    assert!(report.promoted.is_none());
    assert_eq!(harness.slots_with(Track::WeeklyVpxs, SlotStatus::Queued).len(), 1);
    assert_eq!(harness.slots_with(Track::WeeklyVpxs, SlotStatus::Active).len(), 0);
}

#[tokio::test]
async fn test_queue_order_is_preserved() {
    let harness = Harness::new();
    let start = base_time();
    harness.active_slot(Track::WeeklyVpxs, "Monster Bash", hours_after(start, -200));
    let first = harness.queued_slot(Track::WeeklyVpxs, "Twilight Zone", hours_after(start, -100));
    let second = harness.queued_slot(Track::WeeklyVpxs, "Attack from Mars", hours_after(start, -90));
    let third = harness.queued_slot(Track::WeeklyVpxs, "Medieval Madness", hours_after(start, -80));

    let report = controller(&harness).maintain(Track::WeeklyVpxs, start).await.unwrap();

    assert_eq!(report.promoted.unwrap().slot_id, first.slot_id);
    let order: Vec<_> = harness
        .slots_with(Track::WeeklyVpxs, SlotStatus::Queued)
        .into_iter()
        .map(|s| s.slot_id)
        .collect();
    assert_eq!(order, vec![second.slot_id, third.slot_id, report.provisioned.unwrap()]);
}

#[tokio::test]
async fn test_pause_override_is_promoted_first() {
    let harness = Harness::new();
    let start = base_time();
    let bob = link(harness.ledger.as_ref(), "bob", "u-bob");
    harness.active_slot(Track::DailyGrind, "Twilight Zone", hours_after(start, -24));
    let earlier = harness.queued_slot(Track::DailyGrind, "Attack from Mars", hours_after(start, -12));
    harness
        .ledger
        .slot_set_picker(earlier.slot_id, Some(bob), None, hours_after(start, -12))
        .unwrap();

    PauseControl::new(harness.ctx.clone())
        .set_pause(Track::DailyGrind, "Charity Marathon", Some(24), start)
        .await
        .unwrap();
    let report = controller(&harness)
        .maintain(Track::DailyGrind, hours_after(start, 1))
        .await
        .unwrap();

    assert!(report.override_used);
    let promoted = report.promoted.unwrap();
    assert_eq!(promoted.name, "Charity Marathon");
    assert!(harness.lineup.entry_named("Charity Marathon").is_some());

    let earlier = harness.ledger.slot_get(earlier.slot_id).unwrap().unwrap();
    assert_eq!(earlier.status, SlotStatus::Queued);
    assert_eq!(earlier.picker, None);
    assert_single_active(harness.ledger.as_ref());
}

#[tokio::test]
async fn test_sessions_are_released_on_failure() {
    let harness = Harness::new();
    let start = base_time();
    harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    harness.lineup.drop_mutations(true);

    let result = controller(&harness).maintain(Track::DailyGrind, start).await;

    assert!(result.is_err());
    assert_eq!(harness.lineup.sessions_opened(), 1);
    assert_eq!(harness.lineup.sessions_closed(), 1);
}

#[tokio::test]
async fn test_failing_track_does_not_stop_others() {
    let harness = Harness::new();
    let start = base_time();
    exhaust_vr_tables(&harness);
    harness.placeholder_slot(Track::WeeklyVr, hours_after(start, -10));
    harness.queued_slot(Track::DailyGrind, "Theatre of Magic", hours_after(start, -10));

    let results = CycleController::new(harness.ctx.clone()).maintain_all(start).await;

    assert_eq!(results.len(), 4);
    for (track, result) in &results {
        match track {
            Track::WeeklyVr => assert!(result.is_err()),
            _ => assert!(result.is_ok(), "{} failed: {:?}", track, result),
        }
    }
    assert_eq!(harness.slots_with(Track::DailyGrind, SlotStatus::Active).len(), 1);
}

#[tokio::test]
async fn test_notifier_failure_is_not_fatal() {
    let harness = Harness::new();
    harness.notifier.set_failing(true);
    let start = base_time();
    harness.queued_slot(Track::MonthlyGrind, "Twilight Zone", hours_after(start, -1));

    let report = controller(&harness).maintain(Track::MonthlyGrind, start).await;

    assert!(report.is_ok());
    assert!(harness.notifier.messages().is_empty());
}

#[tokio::test]
async fn test_materialize_creates_hidden_entries() {
    let harness = Harness::new();
    let start = base_time();
    let slot = harness
        .ledger
        .slot_create_queued(Track::DailyGrind, Some("Twilight Zone DG"), &harness.ctx.policy, start)
        .unwrap();

    let created = controller(&harness).materialize(Track::DailyGrind).await.unwrap();

    assert_eq!(created.len(), 1);
    let id = created[0].external_id.clone().unwrap();
    assert_eq!(created[0].slot_id, slot.slot_id);
    let remote = harness.lineup.entry(&id).unwrap();
    assert!(remote.hidden);
    assert!(remote.has_tag("DG"));

    let again = controller(&harness).materialize(Track::DailyGrind).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(harness.lineup.sessions_opened(), 1);
}

#[tokio::test]
async fn test_failed_promotion_retries_do_not_grow_queue() {
    let harness = Harness::new();
    let start = base_time();
    exhaust_vr_tables(&harness);
    let placeholder = harness.placeholder_slot(Track::WeeklyVr, hours_after(start, -10));

    for run in 0..3 {
        let result = controller(&harness)
            .maintain(Track::WeeklyVr, hours_after(start, run))
            .await;
        assert!(result.is_err(), "run {} promoted unexpectedly", run);
        assert_eq!(harness.slots_with(Track::WeeklyVr, SlotStatus::Queued).len(), 2);
        assert!(harness.slots_with(Track::WeeklyVr, SlotStatus::Active).is_empty());
    }

    // Once a table can be drawn the stuck placeholder is promoted, and the
    // slot provisioned by the first run is all that stays queued.
    harness
        .ledger
        .catalog_upsert(&CatalogEntry {
            vr: true,
            ..CatalogEntry::new("Black Knight")
        })
        .unwrap();
    let report = controller(&harness)
        .maintain(Track::WeeklyVr, hours_after(start, 3))
        .await
        .unwrap();

    assert_eq!(report.provisioned, None);
    let promoted = report.promoted.unwrap();
    assert_eq!(promoted.slot_id, placeholder.slot_id);
    assert_eq!(promoted.name, "Black Knight WG-VR");
    assert_eq!(harness.slots_with(Track::WeeklyVr, SlotStatus::Queued).len(), 1);
    assert_single_active(harness.ledger.as_ref());
}

#[tokio::test]
async fn test_retry_after_close_keeps_winner_slot() {
    let harness = Harness::new();
    let start = base_time();
    let alice = link(harness.ledger.as_ref(), "alice", "u-alice");
    exhaust_vr_tables(&harness);
    let active = harness.active_slot(Track::WeeklyVr, "Fish Tales", hours_after(start, -24));
    harness
        .lineup
        .set_results(active.external_id.as_ref().unwrap(), &[("alice", "700")]);
    harness.placeholder_slot(Track::WeeklyVr, hours_after(start, -10));

    let first = controller(&harness).maintain(Track::WeeklyVr, start).await;
    assert!(first.is_err());
    let second = controller(&harness)
        .maintain(Track::WeeklyVr, hours_after(start, 1))
        .await;
    assert!(second.is_err());

    let queued = harness.slots_with(Track::WeeklyVr, SlotStatus::Queued);
    assert_eq!(queued.len(), 2);
    let held: Vec<_> = queued.iter().filter(|s| s.picker.is_some()).collect();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].picker, Some(alice));
    assert_eq!(harness.ledger.winner_list(Some(Track::WeeklyVr)).unwrap().len(), 1);
    assert_eq!(
        harness.ledger.slot_get(active.slot_id).unwrap().unwrap().status,
        SlotStatus::Completed
    );
}

#[tokio::test]
async fn test_table_picked_during_maintenance_is_kept() {
    let harness = Harness::new();
    let start = base_time();
    let alice = UserId::new("u-alice");
    harness.active_slot(Track::DailyGrind, "Medieval Madness", hours_after(start, -24));
    let pending = harness.placeholder_slot(Track::DailyGrind, hours_after(start, -12));
    harness
        .ledger
        .slot_set_picker(pending.slot_id, Some(alice.clone()), None, hours_after(start, -12))
        .unwrap();

    // The picker chooses while the active slot is being locked.
    let picker = PickerWorkflow::new(harness.ctx.clone());
    let mut picked = false;
    harness.lineup.on_call(move |operation| {
        if operation == "lock" && !picked {
            picked = true;
            let selection = picker
                .select_table(Track::DailyGrind, &alice, "Twilight Zone", false)
                .unwrap();
            assert!(matches!(selection, Selection::Accepted(_)));
        }
    });

    let report = controller(&harness).maintain(Track::DailyGrind, start).await.unwrap();

    let promoted = report.promoted.unwrap();
    assert_eq!(promoted.slot_id, pending.slot_id);
    assert_eq!(promoted.name, "Twilight Zone DG");
    assert_eq!(promoted.status, SlotStatus::Active);
    assert!(harness.lineup.entry_named("Twilight Zone DG").is_some());
    assert_single_active(harness.ledger.as_ref());
}
