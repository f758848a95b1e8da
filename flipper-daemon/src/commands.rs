//! Subcommand handlers

use crate::bridge::HttpLineupAdapter;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::run_scheduler;
use crate::webhook::WebhookNotifier;
use crate::Commands;
use chrono::Utc;
use flipper_core::{CatalogEntry, IdentityLink, SlotStatus, Timestamp, Track, UserId};
use flipper_engine::{
    describe, table_stats, winner_leaderboard, ConfirmReason, CycleController, EngineContext,
    LeaderboardRow, LogNotifier, Notifier, PauseControl, PickerWorkflow, Reconciler, Selection,
    StatsPeriod, TableStats, TimeoutEscalator,
};
use flipper_storage::{LedgerStore, LmdbLedger};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Wire the ledger, bridge and notifier described by `config`.
fn build_context(config: &mut DaemonConfig) -> DaemonResult<Arc<EngineContext>> {
    let ledger = LmdbLedger::open(&config.ledger_path, config.ledger_max_size_mb)?;
    let adapter = HttpLineupAdapter::new(&config.bridge)?;
    let notifier: Arc<dyn Notifier> = match config.webhook.url.take() {
        Some(url) => Arc::new(WebhookNotifier::new(&config.webhook, url)?),
        None => {
            tracing::info!("No webhook configured; announcements go to the log only");
            Arc::new(LogNotifier)
        }
    };
    Ok(Arc::new(EngineContext::new(
        Arc::new(ledger),
        Arc::new(adapter),
        notifier,
        config.policy.clone(),
    )))
}

pub async fn execute(command: Commands, mut config: DaemonConfig) -> DaemonResult<()> {
    let ctx = build_context(&mut config)?;
    let now = Utc::now();
    let ledger = ctx.ledger.as_ref();

    match command {
        Commands::Run => run(ctx, config).await,

        Commands::Maintain { track } => maintain(&ctx, track, now).await,

        Commands::Reconcile => {
            let report = Reconciler::new(Arc::clone(&ctx)).reconcile(now).await?;
            println!(
                "Reconciled: {} created, {} updated, {} demoted, {} ignored.",
                report.created, report.updated, report.demoted, report.ignored
            );
            Ok(())
        }

        Commands::CheckTimeouts => {
            let report = TimeoutEscalator::new(Arc::clone(&ctx)).run(now).await;
            for escalation in &report.escalated {
                println!(
                    "{}: auto-selected {} ({})",
                    escalation.track.display_name(),
                    escalation.table,
                    escalation
                        .forfeited
                        .as_ref()
                        .map(|p| format!("{} timed out", p))
                        .unwrap_or_else(|| "no picker".to_string())
                );
            }
            for (track, e) in &report.failures {
                println!("{}: check failed: {}", track.display_name(), e);
            }
            if report.escalated.is_empty() && report.failures.is_empty() {
                println!("No picker is overdue.");
            }
            if report.failures.is_empty() {
                Ok(())
            } else {
                Err(DaemonError::TracksFailed {
                    failed: report.failures.len(),
                    total: Track::ALL.len() - report.skipped_tracks.len(),
                })
            }
        }

        Commands::Assign { track, user, slot } => {
            let workflow = PickerWorkflow::new(Arc::clone(&ctx));
            let user = UserId::new(required("user", &user)?);
            let slot = match slot {
                Some(slot_id) => workflow.assign(track, slot_id, user, now)?,
                None => workflow.assign_next(track, user, now)?,
            };
            println!(
                "{} picks the table for {} slot {}.",
                slot.picker.as_ref().map(UserId::as_str).unwrap_or_default(),
                track.display_name(),
                slot.slot_id
            );
            Ok(())
        }

        Commands::Nominate {
            track,
            nominator,
            nominee,
        } => {
            let slot = PickerWorkflow::new(Arc::clone(&ctx)).nominate(
                track,
                &UserId::new(required("nominator", &nominator)?),
                UserId::new(required("nominee", &nominee)?),
                now,
            )?;
            println!(
                "{} nominated {} to pick the next {} table.",
                nominator.trim(),
                nominee.trim(),
                track.display_name()
            );
            tracing::debug!(track = %track, slot_id = %slot.slot_id, "Nomination recorded");
            Ok(())
        }

        Commands::Pick {
            track,
            user,
            table,
            confirm,
        } => {
            let table = table.join(" ");
            let user = UserId::new(required("user", &user)?);
            let selection =
                PickerWorkflow::new(Arc::clone(&ctx)).select_table(track, &user, &table, confirm)?;
            match selection {
                Selection::Accepted(slot) => {
                    println!("{}: {} is queued.", track.display_name(), slot.name);
                    materialize(&ctx, track).await;
                }
                Selection::NeedsConfirmation { table, reason } => {
                    println!("{} Run again with --confirm to use it anyway.", confirm_message(&table, reason));
                }
            }
            Ok(())
        }

        Commands::RandomPick { track, user } => {
            let user = UserId::new(required("user", &user)?);
            let slot = PickerWorkflow::new(Arc::clone(&ctx)).random_pick(track, &user, now)?;
            println!("{}: randomly selected {}.", track.display_name(), slot.table_name());
            materialize(&ctx, track).await;
            Ok(())
        }

        Commands::Pause { track, name, hours } => {
            let state = PauseControl::new(Arc::clone(&ctx))
                .set_pause(track, &name, hours, now)
                .await?;
            println!("{}", pause_line(&state.track, &state.slot_name, state.expires_at));
            Ok(())
        }

        Commands::Unpause => {
            let previous = PauseControl::new(Arc::clone(&ctx)).clear_pause()?;
            if previous.paused {
                println!("Pause cleared.");
            } else {
                println!("No pause was active.");
            }
            Ok(())
        }

        Commands::LinkUser { username, user_id } => {
            let link = IdentityLink {
                username: required("username", &username)?.to_string(),
                user_id: UserId::new(required("user_id", &user_id)?),
                linked_at: now,
            };
            ledger.identity_link(&link)?;
            println!("Linked {} to {}.", link.username, link.user_id);
            Ok(())
        }

        Commands::ImportCatalog { path } => {
            let entries = read_catalog(&path)?;
            for entry in &entries {
                ledger.catalog_upsert(entry)?;
            }
            tracing::info!(path = %path.display(), tables = entries.len(), "Catalog imported");
            println!("Imported {} tables.", entries.len());
            Ok(())
        }

        Commands::Winners { track, days } => {
            let rows = winner_leaderboard(ledger, track, days.since(now))?;
            print!("{}", format_leaderboard(&rows, track, days));
            Ok(())
        }

        Commands::TableStats { query } => {
            let rows = table_stats(ledger, required("query", &query)?)?;
            print!("{}", format_table_stats(&rows, &query));
            Ok(())
        }

        Commands::Status => {
            print!("{}", format_status(ledger, now)?);
            Ok(())
        }

        Commands::Wipe { yes } => {
            if !yes {
                return Err(DaemonError::Input {
                    reason: "wipe deletes every slot and winner; pass --yes to confirm".to_string(),
                });
            }
            ledger.wipe()?;
            tracing::warn!("Ledger wiped");
            println!("Ledger wiped. Catalog and user links were kept.");
            Ok(())
        }
    }
}

fn required<'a>(field: &str, value: &'a str) -> DaemonResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DaemonError::Input {
            reason: format!("{} must not be empty", field),
        });
    }
    Ok(value)
}

/// Reconcile once, then run the scheduler until Ctrl-C.
async fn run(ctx: Arc<EngineContext>, config: DaemonConfig) -> DaemonResult<()> {
    let offset = config.policy.schedule_offset()?;

    match Reconciler::new(Arc::clone(&ctx)).reconcile(Utc::now()).await {
        Ok(report) => tracing::info!(
            created = report.created,
            updated = report.updated,
            demoted = report.demoted,
            "Startup reconciliation finished"
        ),
        Err(e) => tracing::warn!(error = %e, "Startup reconciliation failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    run_scheduler(ctx, config.scheduler, offset, shutdown_rx).await;
    Ok(())
}

async fn maintain(ctx: &Arc<EngineContext>, track: Option<Track>, now: Timestamp) -> DaemonResult<()> {
    let controller = CycleController::new(Arc::clone(ctx));
    let results = match track {
        Some(track) => vec![(track, controller.maintain(track, now).await)],
        None => controller.maintain_all(now).await,
    };

    let total = results.len();
    let mut failed = 0;
    for (track, result) in results {
        match result {
            Ok(report) => println!("{}", describe(&report)),
            Err(e) => {
                failed += 1;
                println!("{}: maintenance failed: {}", track.display_name(), e);
            }
        }
    }
    if failed > 0 {
        return Err(DaemonError::TracksFailed { failed, total });
    }
    Ok(())
}

/// Push a freshly chosen table to the lineup; promotion retries on failure.
async fn materialize(ctx: &Arc<EngineContext>, track: Track) {
    if let Err(e) = CycleController::new(Arc::clone(ctx)).materialize(track).await {
        tracing::warn!(track = %track, error = %e, "Could not create the remote entry yet");
        println!("The scoreboard entry will be created when the game is promoted.");
    }
}

fn confirm_message(table: &str, reason: ConfirmReason) -> String {
    match reason {
        ConfirmReason::NotInCatalog => format!("\"{}\" is not in the table catalog.", table),
        ConfirmReason::Incompatible(platform) => {
            format!("\"{}\" is not marked as playable on {}.", table, platform)
        }
    }
}

fn pause_line(track: &Option<Track>, name: &Option<String>, expires_at: Option<Timestamp>) -> String {
    format!(
        "Paused {}: \"{}\" plays next, until {}.",
        track.map(|t| t.display_name()).unwrap_or("?"),
        name.as_deref().unwrap_or_default(),
        expires_at
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "further notice".to_string())
    )
}

fn read_catalog(path: &Path) -> DaemonResult<Vec<CatalogEntry>> {
    let text = std::fs::read_to_string(path)?;
    parse_catalog(&text)
}

/// Parse a JSON array of catalog entries, rejecting blank names.
fn parse_catalog(text: &str) -> DaemonResult<Vec<CatalogEntry>> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(text).map_err(|e| DaemonError::Input {
        reason: format!("catalog is not a JSON array of tables: {}", e),
    })?;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, mut entry)| {
            entry.name = entry.name.trim().to_string();
            if entry.name.is_empty() {
                return Err(DaemonError::Input {
                    reason: format!("catalog entry {} has no name", i),
                });
            }
            Ok(entry)
        })
        .collect()
}

fn format_leaderboard(rows: &[LeaderboardRow], track: Option<Track>, period: StatsPeriod) -> String {
    let scope = track.map(|t| t.display_name()).unwrap_or("All tracks");
    let mut out = format!("{} winners ({})\n", scope, period);
    if rows.is_empty() {
        out.push_str("  no winners yet\n");
    }
    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(out, "  {:>2}. {:<24} {}", i + 1, row.username, row.wins);
    }
    out
}

fn format_table_stats(rows: &[TableStats], query: &str) -> String {
    if rows.is_empty() {
        return format!("No recorded games match \"{}\".\n", query.trim());
    }
    let mut out = String::new();
    for row in rows {
        let best = match (row.best_score, &row.best_holder) {
            (Some(score), Some(holder)) => format!("best {} by {}", group_thousands(score), holder),
            _ => "no numeric score".to_string(),
        };
        let _ = writeln!(out, "{}: played {} times, {}", row.table_name, row.plays, best);
    }
    out
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Per-track lineup summary plus the pause state.
fn format_status(ledger: &dyn LedgerStore, now: Timestamp) -> DaemonResult<String> {
    let mut out = String::new();
    for track in Track::ALL {
        let _ = writeln!(out, "{} ({})", track.display_name(), track.code());

        match ledger.slot_get_active(track)? {
            Some(active) => {
                let _ = writeln!(out, "  now playing: {}", active.table_name());
            }
            None => out.push_str("  now playing: nothing\n"),
        }

        let queued = ledger.slot_list_by_status(track, SlotStatus::Queued)?;
        if queued.is_empty() {
            out.push_str("  queue: empty\n");
        }
        for (i, slot) in queued.iter().enumerate() {
            let table = if slot.is_placeholder() {
                "(table not chosen)"
            } else {
                slot.table_name()
            };
            let mut line = format!("  {}. {}", i + 1, table);
            if slot.priority {
                line.push_str(" [priority]");
            }
            if let Some(picker) = &slot.picker {
                let _ = write!(line, " picker: {}", picker);
            }
            if let Some(nominator) = &slot.nominator {
                let _ = write!(line, " nominated by {}", nominator);
            }
            let _ = writeln!(out, "{}", line);
        }

        if let Some(last) = ledger.winner_last(track)? {
            let _ = writeln!(
                out,
                "  last winner: {} with {} on {}",
                last.username, last.score, last.table_name
            );
        }
    }

    let pause = ledger.pause_get()?;
    if pause.paused && !pause.is_expired(now) {
        let _ = writeln!(out, "{}", pause_line(&pause.track, &pause.slot_name, pause.expires_at));
    } else {
        out.push_str("No pause active.\n");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use flipper_core::{GameSlot, PauseState, SlotId, WinnerRecord};
    use flipper_storage::MockLedger;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 4, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_catalog() {
        let entries = parse_catalog(
            r#"[
                {"name": " Medieval Madness ", "aliases": ["MM"], "atgames": true, "vr": true, "vpxs": true},
                {"name": "Fish Tales", "vr": true, "year": 1992}
            ]"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Medieval Madness");
        assert!(entries[1].vr && !entries[1].atgames);
        assert_eq!(entries[1].year, Some(1992));

        assert!(matches!(parse_catalog(r#"[{"name": "  "}]"#), Err(DaemonError::Input { .. })));
        assert!(matches!(parse_catalog(r#"{"name": "x"}"#), Err(DaemonError::Input { .. })));
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("user", "  u-1 ").unwrap(), "u-1");
        assert!(required("user", "   ").is_err());
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(40_100_000), "40,100,000");
    }

    #[test]
    fn test_format_leaderboard() {
        let rows = vec![
            LeaderboardRow { username: "alice".to_string(), wins: 3 },
            LeaderboardRow { username: "bob".to_string(), wins: 1 },
        ];
        let text = format_leaderboard(&rows, Some(Track::DailyGrind), StatsPeriod::Week);
        assert!(text.starts_with("Daily Grind winners (7d)"));
        assert!(text.contains("1. alice"));
        assert!(format_leaderboard(&[], None, StatsPeriod::All).contains("no winners yet"));
    }

    #[test]
    fn test_format_table_stats() {
        let rows = vec![TableStats {
            table_name: "Medieval Madness".to_string(),
            plays: 2,
            best_score: Some(12_500_000),
            best_holder: Some("alice".to_string()),
        }];
        assert_eq!(
            format_table_stats(&rows, "medieval"),
            "Medieval Madness: played 2 times, best 12,500,000 by alice\n"
        );
        assert!(format_table_stats(&[], " zzz ").contains("\"zzz\""));
    }

    #[test]
    fn test_format_status() {
        let ledger = MockLedger::new();
        let mut active = GameSlot::queued(Track::DailyGrind, "Twilight Zone DG", at(1), at(1));
        active.apply_status(SlotStatus::Active, at(1));
        ledger.slot_insert(&active).unwrap();
        let mut pending = GameSlot::placeholder(Track::DailyGrind, at(30), at(2));
        pending.picker = Some(UserId::new("u-alice"));
        ledger.slot_insert(&pending).unwrap();
        ledger
            .winner_append(&WinnerRecord {
                track: Track::DailyGrind,
                slot_id: SlotId::now_v7(),
                external_id: None,
                user_id: None,
                username: "bob".to_string(),
                score: "1,234".to_string(),
                table_name: "Monster Bash".to_string(),
                won_at: at(0),
            })
            .unwrap();
        ledger
            .pause_put(&PauseState {
                paused: true,
                track: Some(Track::WeeklyVr),
                slot_name: Some("Charity Marathon".to_string()),
                expires_at: Some(at(5) + Duration::hours(24)),
            })
            .unwrap();

        let text = format_status(&ledger, at(5)).unwrap();
        assert!(text.contains("now playing: Twilight Zone\n"));
        assert!(text.contains("1. (table not chosen) picker: u-alice"));
        assert!(text.contains("last winner: bob with 1,234 on Monster Bash"));
        assert!(text.contains("Paused Weekly Grind (VR): \"Charity Marathon\""));

        let later = format_status(&ledger, at(5) + Duration::hours(25)).unwrap();
        assert!(later.contains("No pause active."));
    }

    #[test]
    fn test_confirm_message() {
        assert!(confirm_message("Fish Tales", ConfirmReason::Incompatible(flipper_core::Platform::AtGames))
            .contains("not marked as playable"));
        assert!(confirm_message("Foo", ConfirmReason::NotInCatalog).contains("catalog"));
    }
}
