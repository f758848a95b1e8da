//! Flipper Engine - Tournament Lifecycle Controller
//!
//! Drives each track's slot state machine against the ledger and the
//! external lineup:
//!
//! - [`CycleController`]: closes the active slot, provisions and promotes
//! - [`Reconciler`]: rewrites ledger status from the observed lineup
//! - [`PickerWorkflow`]: picker assignment, nomination and table selection
//! - [`TimeoutEscalator`]: auto-fills slots whose picker went quiet
//! - [`PauseControl`]: priority override injection

pub mod adapter;
pub mod cycle;
pub mod draw;
pub mod notify;
pub mod pause;
pub mod picker;
pub mod reconcile;
pub mod stats;
pub mod timeout;

pub use adapter::{LineupAdapter, LineupSession, RankedResult, RemoteEntry, ResultsFetch, Session};
pub use cycle::{describe, CloseResult, ClosedSlot, CycleController, CycleReport};
pub use draw::TableDraw;
pub use notify::{announce, LogNotifier, Notifier};
pub use pause::PauseControl;
pub use picker::{ConfirmReason, PickerWorkflow, Selection};
pub use reconcile::{ReconcileReport, Reconciler};
pub use stats::{table_stats, winner_leaderboard, LeaderboardRow, StatsPeriod, TableStats};
pub use timeout::{Escalation, TimeoutEscalator, TimeoutReport};

use flipper_core::PolicyConfig;
use flipper_storage::LedgerStore;
use std::sync::Arc;

/// Shared collaborators of every engine component.
#[derive(Clone)]
pub struct EngineContext {
    pub ledger: Arc<dyn LedgerStore>,
    pub adapter: Arc<dyn LineupAdapter>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: PolicyConfig,
    pub draw: Arc<TableDraw>,
}

impl EngineContext {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        adapter: Arc<dyn LineupAdapter>,
        notifier: Arc<dyn Notifier>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            ledger,
            adapter,
            notifier,
            policy,
            draw: Arc::new(TableDraw::default()),
        }
    }

    /// Replace the table draw, e.g. with a seeded one.
    pub fn with_draw(mut self, draw: TableDraw) -> Self {
        self.draw = Arc::new(draw);
        self
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
