//! Flipper daemon and admin CLI

use clap::{Parser, Subcommand};
use flipper_core::{SlotId, Track};
use flipper_engine::StatsPeriod;
use std::path::PathBuf;

mod bridge;
mod commands;
mod config;
mod constants;
mod error;
mod scheduler;
mod telemetry;
mod webhook;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "flipper")]
#[command(about = "Flipper - pinball league tournament scheduler", long_about = None, version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "FLIPPER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Run,

    /// Run a maintenance cycle now
    Maintain {
        /// Only this track; every track when omitted
        #[arg(short, long)]
        track: Option<Track>,
    },

    /// Rebuild ledger status from the external lineup
    Reconcile,

    /// Run the timeout escalator once
    CheckTimeouts,

    /// Make a user the picker of the earliest open slot
    Assign {
        track: Track,
        user: String,

        /// Slot to assign; must be the earliest open one
        #[arg(long)]
        slot: Option<SlotId>,
    },

    /// Hand the next pick to someone else (last winner only)
    Nominate {
        track: Track,
        nominator: String,
        nominee: String,
    },

    /// Choose the table for the picker's slot
    Pick {
        track: Track,
        user: String,

        /// Table name; words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        table: Vec<String>,

        /// Accept a table that is unknown or not playable on the track's platform
        #[arg(long)]
        confirm: bool,
    },

    /// Let the draw choose the picker's table
    RandomPick { track: Track, user: String },

    /// Inject a priority game on a track
    Pause {
        track: Track,
        name: String,

        /// Duration in hours; policy default when omitted
        #[arg(long)]
        hours: Option<i64>,
    },

    /// End the current pause early
    Unpause,

    /// Link a scoreboard username to a chat user id
    LinkUser { username: String, user_id: String },

    /// Merge tables from a JSON array into the catalog
    ImportCatalog { path: PathBuf },

    /// Winner leaderboard
    Winners {
        /// Restrict to one track
        track: Option<Track>,

        /// Trailing window: 7, 30, 90 (days) or all
        #[arg(long, default_value = "all")]
        days: StatsPeriod,
    },

    /// Play counts and best scores for matching tables
    TableStats { query: String },

    /// Show every track's lineup, pickers and the pause
    Status,

    /// Delete slots, scores, winners and the pause (catalog and links stay)
    Wipe {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match DaemonConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = telemetry::init_tracing(config.log_format, cli.verbose) {
        eprintln!("error: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = commands::execute(cli.command, config).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_pick_joins_table_words() {
        let cli = Cli::parse_from([
            "flipper", "pick", "dg", "u-alice", "Theatre", "of", "Magic", "--confirm",
        ]);
        match cli.command {
            Commands::Pick {
                track,
                table,
                confirm,
                ..
            } => {
                assert_eq!(track, Track::DailyGrind);
                assert_eq!(table.join(" "), "Theatre of Magic");
                assert!(confirm);
            }
            _ => panic!("expected pick"),
        }
    }

    #[test]
    fn test_winners_period() {
        let cli = Cli::parse_from(["flipper", "winners", "WG-VR", "--days", "30"]);
        assert!(matches!(
            cli.command,
            Commands::Winners {
                track: Some(Track::WeeklyVr),
                days: StatsPeriod::Month
            }
        ));
        assert!(Cli::try_parse_from(["flipper", "winners", "--days", "14"]).is_err());
        assert!(Cli::try_parse_from(["flipper", "maintain", "--track", "XX"]).is_err());
    }
}
