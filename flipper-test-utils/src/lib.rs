//! Flipper Test Utilities
//!
//! Shared test infrastructure for the flipper workspace:
//! - An in-memory scoreboard ([`FakeLineup`]) with failure injection
//! - A notifier that records every announcement
//! - Proptest generators for core types
//! - Fixtures for catalogs, timestamps and a ready engine context
//! - Assertions for the ledger's structural invariants

pub use flipper_storage::MockLedger;

pub use flipper_core::{
    CatalogEntry, ExternalId, FlipperError, FlipperResult, GameSlot, IdentityLink, PauseState,
    PolicyConfig, RemoteError, SlotId, SlotStatus, StorageError, Timestamp, Track, UserId,
    WinnerRecord, WorkflowError,
};
pub use flipper_engine::{EngineContext, LineupAdapter, LineupSession, Notifier, RankedResult, RemoteEntry};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

// ============================================================================
// FAKE LINEUP
// ============================================================================

#[derive(Debug, Default)]
struct LineupState {
    entries: Vec<RemoteEntry>,
    results: HashMap<ExternalId, Vec<RankedResult>>,
    transient_results: HashMap<ExternalId, u32>,
    next_id: u64,
    ignore_mutations: bool,
    fail_open: bool,
    sessions_opened: usize,
    sessions_closed: usize,
    created: Vec<String>,
}

impl LineupState {
    fn entry_mut(&mut self, id: &ExternalId) -> FlipperResult<&mut RemoteEntry> {
        self.entries
            .iter_mut()
            .find(|e| &e.external_id == id)
            .ok_or_else(|| {
                RemoteError::EntryNotFound {
                    external_id: id.clone(),
                }
                .into()
            })
    }

    fn mutate(&mut self, id: &ExternalId, apply: impl FnOnce(&mut RemoteEntry)) -> FlipperResult<()> {
        let ignore = self.ignore_mutations;
        let entry = self.entry_mut(id)?;
        if !ignore {
            apply(entry);
        }
        Ok(())
    }
}

type CallHook = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
struct Hooks {
    on_call: Option<CallHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_call", &self.on_call.is_some())
            .finish()
    }
}

/// In-memory scoreboard admin surface.
///
/// Clones share state, so a test keeps one handle while the engine holds
/// another.
#[derive(Debug, Clone, Default)]
pub struct FakeLineup {
    state: Arc<Mutex<LineupState>>,
    hooks: Arc<Mutex<Hooks>>,
}

impl FakeLineup {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LineupState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `hook` with the operation name after every session mutation.
    ///
    /// Lets a test act as a second writer between a remote call and the
    /// engine's next ledger write.
    pub fn on_call(&self, hook: impl FnMut(&str) + Send + 'static) {
        self.hooks().on_call = Some(Box::new(hook));
    }

    fn hooks(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire(&self, operation: &str) {
        if let Some(hook) = self.hooks().on_call.as_mut() {
            hook(operation);
        }
    }

    /// Add an entry directly, bypassing any session.
    pub fn add_entry(&self, name: &str, hidden: bool, locked: bool, tags: &[&str]) -> ExternalId {
        let mut state = self.state();
        state.next_id += 1;
        let id = ExternalId::new(format!("ext-{}", state.next_id));
        state.entries.push(RemoteEntry {
            external_id: id.clone(),
            name: name.to_string(),
            hidden,
            locked,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
        id
    }

    /// Publish ranked results as `(username, score)` pairs, rank 1 first.
    pub fn set_results(&self, id: &ExternalId, rows: &[(&str, &str)]) {
        let results = rows
            .iter()
            .enumerate()
            .map(|(i, (username, score))| RankedResult {
                rank: i as u32 + 1,
                username: username.to_string(),
                score: score.to_string(),
            })
            .collect();
        self.state().results.insert(id.clone(), results);
    }

    pub fn remove_entry(&self, id: &ExternalId) {
        let mut state = self.state();
        state.entries.retain(|e| &e.external_id != id);
        state.results.remove(id);
    }

    /// Make the next `times` result fetches for `id` fail transiently.
    pub fn fail_results(&self, id: &ExternalId, times: u32) {
        self.state().transient_results.insert(id.clone(), times);
    }

    /// Accept mutations without applying them.
    pub fn drop_mutations(&self, ignore: bool) {
        self.state().ignore_mutations = ignore;
    }

    /// Refuse to open sessions.
    pub fn refuse_sessions(&self, refuse: bool) {
        self.state().fail_open = refuse;
    }

    pub fn entries(&self) -> Vec<RemoteEntry> {
        self.state().entries.clone()
    }

    pub fn entry(&self, id: &ExternalId) -> Option<RemoteEntry> {
        self.state().entries.iter().find(|e| &e.external_id == id).cloned()
    }

    pub fn entry_named(&self, name: &str) -> Option<RemoteEntry> {
        self.state()
            .entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Names passed to `create_entry`, in call order.
    pub fn created_names(&self) -> Vec<String> {
        self.state().created.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state().sessions_closed
    }
}

#[async_trait]
impl LineupAdapter for FakeLineup {
    async fn open_session(&self) -> FlipperResult<Box<dyn LineupSession>> {
        let mut state = self.state();
        if state.fail_open {
            return Err(RemoteError::Session {
                reason: "fake lineup refused the session".to_string(),
            }
            .into());
        }
        state.sessions_opened += 1;
        Ok(Box::new(FakeSession {
            lineup: self.clone(),
        }))
    }
}

struct FakeSession {
    lineup: FakeLineup,
}

#[async_trait]
impl LineupSession for FakeSession {
    async fn create_entry(&mut self, name: &str) -> FlipperResult<ExternalId> {
        self.lineup.state().created.push(name.to_string());
        // New entries start visible and unlocked, like the real admin form.
        let id = self.lineup.add_entry(name, false, false, &[]);
        self.lineup.fire("create_entry");
        Ok(id)
    }

    async fn rename(&mut self, id: &ExternalId, name: &str) -> FlipperResult<()> {
        let result = self.lineup.state().mutate(id, |e| e.name = name.to_string());
        self.lineup.fire("rename");
        result
    }

    async fn tag(&mut self, id: &ExternalId, label: &str) -> FlipperResult<()> {
        let result = self.lineup.state().mutate(id, |e| {
            if !e.has_tag(label) {
                e.tags.push(label.to_string());
            }
        });
        self.lineup.fire("tag");
        result
    }

    async fn lock(&mut self, id: &ExternalId) -> FlipperResult<()> {
        let result = self.lineup.state().mutate(id, |e| e.locked = true);
        self.lineup.fire("lock");
        result
    }

    async fn unlock(&mut self, id: &ExternalId) -> FlipperResult<()> {
        let result = self.lineup.state().mutate(id, |e| e.locked = false);
        self.lineup.fire("unlock");
        result
    }

    async fn hide(&mut self, id: &ExternalId) -> FlipperResult<()> {
        let result = self.lineup.state().mutate(id, |e| e.hidden = true);
        self.lineup.fire("hide");
        result
    }

    async fn show(&mut self, id: &ExternalId) -> FlipperResult<()> {
        let result = self.lineup.state().mutate(id, |e| e.hidden = false);
        self.lineup.fire("show");
        result
    }

    async fn delete(&mut self, id: &ExternalId) -> FlipperResult<()> {
        let mut state = self.lineup.state();
        state.entry_mut(id)?;
        if !state.ignore_mutations {
            state.entries.retain(|e| &e.external_id != id);
        }
        drop(state);
        self.lineup.fire("delete");
        Ok(())
    }

    async fn list_entries(&mut self) -> FlipperResult<Vec<RemoteEntry>> {
        Ok(self.lineup.entries())
    }

    async fn fetch_ranked_results(&mut self, id: &ExternalId) -> FlipperResult<Vec<RankedResult>> {
        let mut state = self.lineup.state();
        if let Some(remaining) = state.transient_results.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transient {
                    operation: "fetch_ranked_results".to_string(),
                    reason: "injected".to_string(),
                }
                .into());
            }
        }
        state.entry_mut(id)?;
        Ok(state.results.get(id).cloned().unwrap_or_default())
    }

    async fn close(&mut self) -> FlipperResult<()> {
        self.lineup.state().sessions_closed += 1;
        Ok(())
    }
}

// ============================================================================
// RECORDING NOTIFIER
// ============================================================================

/// Notifier that keeps every message, optionally failing delivery.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Whether any message contains `needle`, ignoring case.
    pub fn saw(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.messages().iter().any(|m| m.to_lowercase().contains(&needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> FlipperResult<()> {
        if *self.fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(RemoteError::Rejected {
                operation: "notify".to_string(),
                reason: "injected".to_string(),
            }
            .into());
        }
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(text.to_string());
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for flipper types.

    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    pub fn arb_track() -> impl Strategy<Value = Track> {
        prop_oneof![
            Just(Track::DailyGrind),
            Just(Track::WeeklyVpxs),
            Just(Track::WeeklyVr),
            Just(Track::MonthlyGrind),
        ]
    }

    pub fn arb_slot_status() -> impl Strategy<Value = SlotStatus> {
        prop_oneof![
            Just(SlotStatus::Queued),
            Just(SlotStatus::Active),
            Just(SlotStatus::Completed),
            Just(SlotStatus::Hidden),
        ]
    }

    /// Scoreboard usernames drawn from a small pool so repeats happen.
    pub fn arb_username() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("alice".to_string()),
            Just("Alice".to_string()),
            Just("bob".to_string()),
            Just("carol".to_string()),
            "[a-z]{3,8}",
        ]
    }

    /// Timestamp within 2026.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..365 * 24 * 3600).prop_map(|offset| {
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default()
                + chrono::Duration::seconds(offset)
        })
    }

    /// Ranked results with ranks 1..=n.
    pub fn arb_results(max: usize) -> impl Strategy<Value = Vec<(String, u64)>> {
        prop::collection::vec((arb_username(), 1u64..100_000_000), 0..=max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for engine scenarios.

    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use flipper_engine::TableDraw;
    use flipper_storage::LedgerStore;

    /// A Wednesday morning, fixed so scenarios are reproducible.
    pub fn base_time() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 4, 6, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn hours_after(base: Timestamp, hours: i64) -> Timestamp {
        base + Duration::hours(hours)
    }

    /// A catalog covering every platform with a few single-platform tables.
    pub fn catalog() -> Vec<CatalogEntry> {
        let table = |name: &str, atgames: bool, vr: bool, vpxs: bool| CatalogEntry {
            atgames,
            vr,
            vpxs,
            ..CatalogEntry::new(name)
        };
        vec![
            table("Medieval Madness", true, true, true),
            table("Attack from Mars", true, true, true),
            table("Twilight Zone", true, false, true),
            table("Theatre of Magic", true, false, false),
            table("Fish Tales", false, true, false),
            table("Monster Bash", false, false, true),
        ]
    }

    pub fn seed_catalog<S: LedgerStore + ?Sized>(ledger: &S) {
        for entry in catalog() {
            if let Err(e) = ledger.catalog_upsert(&entry) {
                panic!("seeding catalog failed: {}", e);
            }
        }
    }

    pub fn link<S: LedgerStore + ?Sized>(ledger: &S, username: &str, user_id: &str) -> UserId {
        let user_id = UserId::new(user_id);
        let result = ledger.identity_link(&IdentityLink {
            username: username.to_string(),
            user_id: user_id.clone(),
            linked_at: base_time(),
        });
        if let Err(e) = result {
            panic!("linking identity failed: {}", e);
        }
        user_id
    }

    /// Engine wired to a mock ledger, a fake lineup and a recording notifier.
    pub struct Harness {
        pub ledger: Arc<MockLedger>,
        pub lineup: FakeLineup,
        pub notifier: Arc<RecordingNotifier>,
        pub ctx: Arc<EngineContext>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_policy(PolicyConfig {
                result_fetch_backoff_ms: 0,
                ..PolicyConfig::default()
            })
        }

        pub fn with_policy(policy: PolicyConfig) -> Self {
            let ledger = Arc::new(MockLedger::new());
            seed_catalog(ledger.as_ref());
            let lineup = FakeLineup::new();
            let notifier = Arc::new(RecordingNotifier::new());
            let ctx = EngineContext::new(
                ledger.clone(),
                Arc::new(lineup.clone()),
                notifier.clone(),
                policy,
            )
            .with_draw(TableDraw::seeded(7));
            Self {
                ledger,
                lineup,
                notifier,
                ctx: Arc::new(ctx),
            }
        }

        /// An ACTIVE slot with a visible, unlocked remote entry.
        pub fn active_slot(&self, track: Track, table: &str, at: Timestamp) -> GameSlot {
            let name = track.entry_name(table);
            let id = self.lineup.add_entry(&name, false, false, &[track.code()]);
            let mut slot = GameSlot::queued(track, name, at, at);
            slot.external_id = Some(id);
            slot.apply_status(SlotStatus::Active, at);
            self.insert(&slot);
            slot
        }

        /// A QUEUED slot with a hidden remote entry.
        pub fn queued_slot(&self, track: Track, table: &str, at: Timestamp) -> GameSlot {
            let name = track.entry_name(table);
            let id = self.lineup.add_entry(&name, true, false, &[track.code()]);
            let mut slot = GameSlot::queued(track, name, at, at);
            slot.external_id = Some(id);
            self.insert(&slot);
            slot
        }

        /// A QUEUED placeholder slot with no remote entry.
        pub fn placeholder_slot(&self, track: Track, at: Timestamp) -> GameSlot {
            let slot = GameSlot::placeholder(track, at, at);
            self.insert(&slot);
            slot
        }

        pub fn slots(&self, track: Track) -> Vec<GameSlot> {
            match self.ledger.slot_list(track) {
                Ok(slots) => slots,
                Err(e) => panic!("listing slots failed: {}", e),
            }
        }

        pub fn slots_with(&self, track: Track, status: SlotStatus) -> Vec<GameSlot> {
            self.slots(track)
                .into_iter()
                .filter(|s| s.status == status)
                .collect()
        }

        fn insert(&self, slot: &GameSlot) {
            if let Err(e) = self.ledger.slot_insert(slot) {
                panic!("inserting slot failed: {}", e);
            }
        }
    }

    impl Default for Harness {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for ledger invariants and error variants.

    use super::*;
    use flipper_storage::LedgerStore;

    /// Assert that no track has more than one ACTIVE slot.
    #[track_caller]
    pub fn assert_single_active<S: LedgerStore + ?Sized>(ledger: &S) {
        for track in Track::ALL {
            let active = match ledger.slot_list(track) {
                Ok(slots) => slots.into_iter().filter(|s| s.status == SlotStatus::Active).count(),
                Err(e) => panic!("listing {} slots failed: {}", track, e),
            };
            assert!(active <= 1, "{} has {} ACTIVE slots", track, active);
        }
    }

    /// Assert that a result is a specific workflow error.
    #[track_caller]
    pub fn assert_workflow_error<T: std::fmt::Debug>(
        result: &FlipperResult<T>,
        check: impl Fn(&WorkflowError) -> bool,
    ) {
        match result {
            Err(FlipperError::Workflow(e)) if check(e) => {}
            other => panic!("Expected matching Workflow error, got: {:?}", other),
        }
    }

    /// Assert that a result is a Remote error.
    #[track_caller]
    pub fn assert_remote_error<T: std::fmt::Debug>(result: &FlipperResult<T>) {
        match result {
            Err(FlipperError::Remote(_)) => {}
            other => panic!("Expected Remote error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipper_engine::{ResultsFetch, Session};
    use proptest::prelude::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fake_lineup_mutations_are_visible() {
        let lineup = FakeLineup::new();
        let mut session = Session::open(&lineup).await.unwrap();
        let id = session.create_hidden_tagged("Fish Tales WG-VR", "WG-VR").await.unwrap();
        session.show(&id).await.unwrap();
        session.lock(&id).await.unwrap();
        session.close().await;

        let entry = lineup.entry(&id).unwrap();
        assert!(!entry.hidden);
        assert!(entry.locked);
        assert!(entry.has_tag("wg-vr"));
        assert_eq!(lineup.sessions_opened(), 1);
        assert_eq!(lineup.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_dropped_mutation_fails_verification() {
        let lineup = FakeLineup::new();
        let id = lineup.add_entry("Twilight Zone DG", true, false, &["DG"]);
        lineup.drop_mutations(true);
        let mut session = Session::open(&lineup).await.unwrap();
        let result = session.show(&id).await;
        session.close().await;
        assertions::assert_remote_error(&result);
        assert!(matches!(
            result,
            Err(FlipperError::Remote(RemoteError::VerificationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_transient_results_are_retried() {
        let lineup = FakeLineup::new();
        let id = lineup.add_entry("Monster Bash WG-VPXS", false, false, &[]);
        lineup.set_results(&id, &[("alice", "1,000"), ("bob", "900")]);
        lineup.fail_results(&id, 2);

        let mut session = Session::open(&lineup).await.unwrap();
        let fetched = session.fetch_results(&id, 3, Duration::ZERO).await.unwrap();
        session.close().await;
        match fetched {
            ResultsFetch::Results(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].username, "alice");
            }
            other => panic!("expected results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify("Daily Grind: alice won").await.unwrap();
        notifier.set_failing(true);
        assert!(notifier.notify("lost").await.is_err());
        assert_eq!(notifier.messages().len(), 1);
        assert!(notifier.saw("ALICE"));
    }

    #[test]
    fn test_harness_fixtures() {
        let harness = fixtures::Harness::new();
        let now = fixtures::base_time();
        let active = harness.active_slot(Track::DailyGrind, "Medieval Madness", now);
        assert_eq!(active.status, SlotStatus::Active);
        assert_eq!(harness.slots_with(Track::DailyGrind, SlotStatus::Active).len(), 1);
        assertions::assert_single_active(harness.ledger.as_ref());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_results_are_bounded(rows in generators::arb_results(5)) {
            prop_assert!(rows.len() <= 5);
        }

        #[test]
        fn prop_generated_timestamp_in_year(at in generators::arb_timestamp()) {
            use chrono::Datelike;
            prop_assert_eq!(at.year(), 2026);
        }
    }
}
