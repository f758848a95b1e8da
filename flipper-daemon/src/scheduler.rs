//! Background scheduling.
//!
//! One task per scheduled track sleeps until the track's next cadence fire
//! time and runs a maintenance cycle; a separate task runs the timeout
//! escalator on a fixed interval. Work inside a task is strictly sequential,
//! and a running cycle always finishes before shutdown is observed.

use crate::config::SchedulerConfig;
use chrono::{FixedOffset, Utc};
use flipper_core::{Timestamp, Track};
use flipper_engine::{describe, CycleController, EngineContext, TimeoutEscalator};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Longest single sleep; the fire time is re-checked against the wall clock after each.
const MAX_SLEEP: Duration = Duration::from_secs(15 * 60);

// ============================================================================
// METRICS
// ============================================================================

/// Counters for scheduled work since startup.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub cycles_run: AtomicU64,
    pub cycle_failures: AtomicU64,
    pub timeout_checks: AtomicU64,
    pub escalations: AtomicU64,
    /// Track checks that failed inside a timeout run
    pub timeout_failures: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycle_failures: self.cycle_failures.load(Ordering::Relaxed),
            timeout_checks: self.timeout_checks.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            timeout_failures: self.timeout_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub cycles_run: u64,
    pub cycle_failures: u64,
    pub timeout_checks: u64,
    pub escalations: u64,
    pub timeout_failures: u64,
}

// ============================================================================
// TASKS
// ============================================================================

/// Run every scheduled task until shutdown and return the final counters.
pub async fn run_scheduler(
    ctx: Arc<EngineContext>,
    config: SchedulerConfig,
    offset: FixedOffset,
    shutdown_rx: watch::Receiver<bool>,
) -> SchedulerSnapshot {
    let metrics = Arc::new(SchedulerMetrics::new());
    let mut handles = Vec::with_capacity(config.tracks.len() + 1);

    for track in config.tracks.iter().copied() {
        handles.push(tokio::spawn(track_task(
            Arc::clone(&ctx),
            track,
            offset,
            Arc::clone(&metrics),
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(timeout_task(
        Arc::clone(&ctx),
        config.timeout_check_interval(),
        Arc::clone(&metrics),
        shutdown_rx,
    )));

    tracing::info!(
        tracks = ?config.tracks,
        timeout_check_interval_secs = config.timeout_check_interval_secs,
        "Scheduler started"
    );

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Scheduler task panicked");
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles_run = snapshot.cycles_run,
        cycle_failures = snapshot.cycle_failures,
        timeout_checks = snapshot.timeout_checks,
        escalations = snapshot.escalations,
        timeout_failures = snapshot.timeout_failures,
        "Scheduler stopped"
    );
    snapshot
}

/// Maintain `track` at each of its cadence fire times.
pub async fn track_task(
    ctx: Arc<EngineContext>,
    track: Track,
    offset: FixedOffset,
    metrics: Arc<SchedulerMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let controller = CycleController::new(ctx);
    let mut next = track.cadence().next_after(Utc::now(), offset);
    tracing::info!(track = %track, next = %next, "Next maintenance scheduled");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!(track = %track, "Track task shutting down");
                    break;
                }
            }

            _ = tokio::time::sleep(until(next, Utc::now())) => {
                let now = Utc::now();
                if now < next {
                    continue;
                }
                run_cycle(&controller, track, now, &metrics).await;
                next = track.cadence().next_after(Utc::now(), offset);
                tracing::info!(track = %track, next = %next, "Next maintenance scheduled");
            }
        }
    }
}

/// Time to sleep before re-checking `next`, capped at [`MAX_SLEEP`].
fn until(next: Timestamp, now: Timestamp) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO).min(MAX_SLEEP)
}

async fn run_cycle(controller: &CycleController, track: Track, now: Timestamp, metrics: &SchedulerMetrics) {
    match controller.maintain(track, now).await {
        Ok(report) => {
            metrics.cycles_run.fetch_add(1, Ordering::Relaxed);
            tracing::info!(track = %track, summary = %describe(&report), "Scheduled maintenance finished");
        }
        Err(e) => {
            metrics.cycle_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(track = %track, error = %e, "Scheduled maintenance failed");
        }
    }
}

/// Run the timeout escalator every `period`, starting immediately.
pub async fn timeout_task(
    ctx: Arc<EngineContext>,
    period: Duration,
    metrics: Arc<SchedulerMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let escalator = TimeoutEscalator::new(ctx);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Timeout task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let report = escalator.run(Utc::now()).await;
                metrics.timeout_checks.fetch_add(1, Ordering::Relaxed);
                metrics
                    .escalations
                    .fetch_add(report.escalated.len() as u64, Ordering::Relaxed);
                metrics
                    .timeout_failures
                    .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
            }
        }
    }
}
