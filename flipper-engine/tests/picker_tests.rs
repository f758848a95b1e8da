//! Picker workflow: assignment, nomination and table selection.

use flipper_core::{Platform, SlotId, Track, UserId, WinnerRecord, WorkflowError};
use flipper_engine::{ConfirmReason, CycleController, PickerWorkflow, Selection};
use flipper_storage::LedgerStore;
use flipper_test_utils::assertions::assert_workflow_error;
use flipper_test_utils::fixtures::{base_time, hours_after, link, Harness};

fn picker(harness: &Harness) -> PickerWorkflow {
    PickerWorkflow::new(harness.ctx.clone())
}

fn record_win(harness: &Harness, track: Track, username: &str, user_id: Option<&str>) {
    harness
        .ledger
        .winner_append(&WinnerRecord {
            track,
            slot_id: SlotId::now_v7(),
            external_id: None,
            user_id: user_id.map(UserId::new),
            username: username.to_string(),
            score: "1,000".to_string(),
            table_name: "Medieval Madness".to_string(),
            won_at: base_time(),
        })
        .unwrap();
}

#[test]
fn test_only_earliest_open_slot_is_assignable() {
    let harness = Harness::new();
    let start = base_time();
    let first = harness.placeholder_slot(Track::DailyGrind, start);
    let second = harness.placeholder_slot(Track::DailyGrind, hours_after(start, 24));
    let alice = UserId::new("u-alice");

    let result = picker(&harness).assign(Track::DailyGrind, second.slot_id, alice.clone(), start);
    assert_workflow_error(&result, |e| matches!(e, WorkflowError::NotAssignable { .. }));

    let slot = picker(&harness)
        .assign(Track::DailyGrind, first.slot_id, alice.clone(), start)
        .unwrap();
    assert_eq!(slot.picker, Some(alice));
    assert_eq!(slot.assigned_at, Some(start));

    // The first slot is taken, so the second is now the open one.
    let open = picker(&harness).open_slot(Track::DailyGrind).unwrap().unwrap();
    assert_eq!(open.slot_id, second.slot_id);
}

#[test]
fn test_assign_without_open_slot() {
    let harness = Harness::new();
    let result = picker(&harness).assign_next(Track::WeeklyVr, UserId::new("u-bob"), base_time());
    assert_workflow_error(&result, |e| matches!(e, WorkflowError::NoOpenSlot { track: Track::WeeklyVr }));
}

#[test]
fn test_priority_slot_is_never_open() {
    let harness = Harness::new();
    let start = base_time();
    let mut slot = harness.placeholder_slot(Track::DailyGrind, start);
    slot.priority = true;
    harness.ledger.slot_update(&slot).unwrap();

    assert!(picker(&harness).open_slot(Track::DailyGrind).unwrap().is_none());
}

#[test]
fn test_last_winner_nominates_by_linked_username() {
    let harness = Harness::new();
    let start = base_time();
    let alice = link(harness.ledger.as_ref(), "Alice", "u-alice");
    record_win(&harness, Track::DailyGrind, "alice", None);
    let slot = harness.placeholder_slot(Track::DailyGrind, start);
    let carol = UserId::new("u-carol");

    let nominated = picker(&harness)
        .nominate(Track::DailyGrind, &alice, carol.clone(), start)
        .unwrap();

    assert_eq!(nominated.slot_id, slot.slot_id);
    assert_eq!(nominated.picker, Some(carol));
    assert_eq!(nominated.nominator, Some(alice));
}

#[test]
fn test_nomination_requires_last_winner() {
    let harness = Harness::new();
    let start = base_time();
    let bob = link(harness.ledger.as_ref(), "bob", "u-bob");
    harness.placeholder_slot(Track::DailyGrind, start);

    let result = picker(&harness).nominate(Track::DailyGrind, &bob, UserId::new("u-carol"), start);
    assert_workflow_error(&result, |e| matches!(e, WorkflowError::NotLastWinner { .. }));

    record_win(&harness, Track::DailyGrind, "alice", Some("u-alice"));
    let result = picker(&harness).nominate(Track::DailyGrind, &bob, UserId::new("u-carol"), start);
    assert_workflow_error(&result, |e| matches!(e, WorkflowError::NotLastWinner { .. }));
}

#[test]
fn test_nomination_rejected_once_picker_designated() {
    let harness = Harness::new();
    let start = base_time();
    record_win(&harness, Track::WeeklyVpxs, "alice", Some("u-alice"));
    let slot = harness.placeholder_slot(Track::WeeklyVpxs, start);
    harness
        .ledger
        .slot_set_picker(slot.slot_id, Some(UserId::new("u-dave")), None, start)
        .unwrap();

    let result = picker(&harness).nominate(
        Track::WeeklyVpxs,
        &UserId::new("u-alice"),
        UserId::new("u-carol"),
        start,
    );
    assert_workflow_error(&result, |e| matches!(e, WorkflowError::PickerAlreadyDesignated { .. }));
}

#[tokio::test]
async fn test_dynasty_winner_nominates_then_nominee_picks() {
    let harness = Harness::new();
    let start = base_time();
    let alice = link(harness.ledger.as_ref(), "alice", "u-alice");
    record_win(&harness, Track::DailyGrind, "alice", Some("u-alice"));
    let active = harness.active_slot(Track::DailyGrind, "Attack from Mars", hours_after(start, -24));
    harness
        .lineup
        .set_results(active.external_id.as_ref().unwrap(), &[("ALICE", "2,000")]);

    let report = CycleController::new(harness.ctx.clone())
        .maintain(Track::DailyGrind, start)
        .await
        .unwrap();
    assert_eq!(report.picker, None);

    let carol = UserId::new("u-carol");
    picker(&harness)
        .nominate(Track::DailyGrind, &alice, carol.clone(), start)
        .unwrap();
    let selection = picker(&harness)
        .select_table(Track::DailyGrind, &carol, "theatre of magic", false)
        .unwrap();

    match selection {
        Selection::Accepted(slot) => {
            assert_eq!(Some(slot.slot_id), report.provisioned);
            assert_eq!(slot.name, "Theatre of Magic DG");
            assert_eq!(slot.picker, Some(carol));
        }
        other => panic!("expected acceptance, got {:?}", other),
    }
}

#[test]
fn test_incompatible_table_needs_confirmation() {
    let harness = Harness::new();
    let start = base_time();
    let alice = UserId::new("u-alice");
    let slot = harness.placeholder_slot(Track::DailyGrind, start);
    harness
        .ledger
        .slot_set_picker(slot.slot_id, Some(alice.clone()), None, start)
        .unwrap();

    let first = picker(&harness)
        .select_table(Track::DailyGrind, &alice, "Fish Tales", false)
        .unwrap();
    assert_eq!(
        first,
        Selection::NeedsConfirmation {
            table: "Fish Tales".to_string(),
            reason: ConfirmReason::Incompatible(Platform::AtGames),
        }
    );
    let untouched = harness.ledger.slot_get(slot.slot_id).unwrap().unwrap();
    assert!(untouched.is_placeholder());

    let confirmed = picker(&harness)
        .select_table(Track::DailyGrind, &alice, "Fish Tales", true)
        .unwrap();
    assert!(matches!(confirmed, Selection::Accepted(ref s) if s.name == "Fish Tales DG"));
}

#[test]
fn test_unknown_table_needs_confirmation() {
    let harness = Harness::new();
    let start = base_time();
    let alice = UserId::new("u-alice");
    let slot = harness.placeholder_slot(Track::WeeklyVr, start);
    harness
        .ledger
        .slot_set_picker(slot.slot_id, Some(alice.clone()), None, start)
        .unwrap();

    let selection = picker(&harness)
        .select_table(Track::WeeklyVr, &alice, "  Zaccaria Soccer ", false)
        .unwrap();
    assert!(matches!(
        selection,
        Selection::NeedsConfirmation { reason: ConfirmReason::NotInCatalog, .. }
    ));

    let accepted = picker(&harness)
        .select_table(Track::WeeklyVr, &alice, "Zaccaria Soccer", true)
        .unwrap();
    assert!(matches!(accepted, Selection::Accepted(ref s) if s.name == "Zaccaria Soccer WG-VR"));
}

#[test]
fn test_only_designated_picker_selects() {
    let harness = Harness::new();
    let start = base_time();
    let slot = harness.placeholder_slot(Track::DailyGrind, start);
    harness
        .ledger
        .slot_set_picker(slot.slot_id, Some(UserId::new("u-alice")), None, start)
        .unwrap();

    let result = picker(&harness).select_table(
        Track::DailyGrind,
        &UserId::new("u-bob"),
        "Twilight Zone",
        true,
    );
    assert_workflow_error(&result, |e| matches!(e, WorkflowError::NotDesignatedPicker { .. }));
}

#[test]
fn test_random_pick_respects_platform_and_exclusion() {
    let harness = Harness::new();
    let start = base_time();
    let alice = UserId::new("u-alice");
    // Recently played on DG; must not be drawn again.
    for table in ["Medieval Madness", "Attack from Mars", "Twilight Zone"] {
        harness.queued_slot(Track::DailyGrind, table, hours_after(start, -48));
    }
    let slot = harness.placeholder_slot(Track::DailyGrind, hours_after(start, 24));
    harness
        .ledger
        .slot_set_picker(slot.slot_id, Some(alice.clone()), None, start)
        .unwrap();

    let picked = picker(&harness).random_pick(Track::DailyGrind, &alice, start).unwrap();

    assert_eq!(picked.slot_id, slot.slot_id);
    assert_eq!(picked.name, "Theatre of Magic DG");
}
