//! Aggregate queries over winner history

use chrono::Duration;
use flipper_core::{parse_score, FlipperResult, Timestamp, Track};
use flipper_storage::LedgerStore;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Trailing window for leaderboard queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Week,
    Month,
    Quarter,
    All,
}

impl StatsPeriod {
    pub fn days(&self) -> Option<i64> {
        match self {
            StatsPeriod::Week => Some(7),
            StatsPeriod::Month => Some(30),
            StatsPeriod::Quarter => Some(90),
            StatsPeriod::All => None,
        }
    }

    /// Start of the window ending at `now`; `None` means all time.
    pub fn since(&self, now: Timestamp) -> Option<Timestamp> {
        self.days().map(|d| now - Duration::days(d))
    }
}

impl fmt::Display for StatsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.days() {
            Some(d) => write!(f, "{}d", d),
            None => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsPeriodParseError(pub String);

impl fmt::Display for StatsPeriodParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid period '{}', expected 7d, 30d, 90d or all", self.0)
    }
}

impl std::error::Error for StatsPeriodParseError {}

impl FromStr for StatsPeriod {
    type Err = StatsPeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "7" | "7d" | "week" => Ok(StatsPeriod::Week),
            "30" | "30d" | "month" => Ok(StatsPeriod::Month),
            "90" | "90d" | "quarter" => Ok(StatsPeriod::Quarter),
            "all" => Ok(StatsPeriod::All),
            _ => Err(StatsPeriodParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardRow {
    pub username: String,
    pub wins: usize,
}

/// Win counts per username, most wins first, ties by name.
///
/// Usernames are grouped ignoring case; the most recent spelling is shown.
pub fn winner_leaderboard<S: LedgerStore + ?Sized>(
    ledger: &S,
    track: Option<Track>,
    since: Option<Timestamp>,
) -> FlipperResult<Vec<LeaderboardRow>> {
    let mut counts: BTreeMap<String, LeaderboardRow> = BTreeMap::new();
    for record in ledger.winners_since(track, since)? {
        let row = counts
            .entry(record.username.trim().to_lowercase())
            .or_insert_with(|| LeaderboardRow {
                username: String::new(),
                wins: 0,
            });
        row.username = record.username.trim().to_string();
        row.wins += 1;
    }

    let mut rows: Vec<LeaderboardRow> = counts.into_values().collect();
    rows.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then_with(|| a.username.to_lowercase().cmp(&b.username.to_lowercase()))
    });
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub table_name: String,
    pub plays: usize,
    pub best_score: Option<u64>,
    pub best_holder: Option<String>,
}

/// Play count and best winning score for tables whose name contains `query`.
pub fn table_stats<S: LedgerStore + ?Sized>(ledger: &S, query: &str) -> FlipperResult<Vec<TableStats>> {
    let needle = query.trim().to_lowercase();
    let mut tables: BTreeMap<String, TableStats> = BTreeMap::new();

    for record in ledger.winner_list(None)? {
        let table = record.table_name.trim();
        if !table.to_lowercase().contains(&needle) {
            continue;
        }
        let stats = tables
            .entry(table.to_lowercase())
            .or_insert_with(|| TableStats {
                table_name: table.to_string(),
                plays: 0,
                best_score: None,
                best_holder: None,
            });
        stats.plays += 1;
        if let Some(score) = parse_score(&record.score) {
            if stats.best_score.is_none_or(|best| score > best) {
                stats.best_score = Some(score);
                stats.best_holder = Some(record.username.clone());
            }
        }
    }

    let mut rows: Vec<TableStats> = tables.into_values().collect();
    rows.sort_by(|a, b| b.plays.cmp(&a.plays).then_with(|| a.table_name.cmp(&b.table_name)));
    Ok(rows)
}
