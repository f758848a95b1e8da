//! Random table selection

use flipper_core::{CatalogEntry, FlipperResult, PolicyConfig, Timestamp, Track, WorkflowError};
use flipper_storage::LedgerStore;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Mutex;

/// Uniform draw over the catalog tables a track may play.
#[derive(Debug)]
pub struct TableDraw {
    rng: Mutex<StdRng>,
}

impl Default for TableDraw {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

impl TableDraw {
    pub fn from_os_rng() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic draws for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Tables compatible with the track's platform and not lined up on the
    /// track within the exclusion window.
    pub fn candidates<S: LedgerStore + ?Sized>(
        ledger: &S,
        policy: &PolicyConfig,
        track: Track,
        now: Timestamp,
    ) -> FlipperResult<Vec<CatalogEntry>> {
        let excluded: HashSet<String> = ledger
            .recent_table_names(track, now - policy.exclusion_window())?
            .into_iter()
            .map(|name| name.trim().to_lowercase())
            .collect();
        let platform = track.platform();

        Ok(ledger
            .catalog_list()?
            .into_iter()
            .filter(|entry| entry.supports(platform))
            .filter(|entry| !excluded.contains(&entry.name.trim().to_lowercase()))
            .collect())
    }

    /// Draw one eligible table.
    pub fn draw<S: LedgerStore + ?Sized>(
        &self,
        ledger: &S,
        policy: &PolicyConfig,
        track: Track,
        now: Timestamp,
    ) -> FlipperResult<CatalogEntry> {
        let candidates = Self::candidates(ledger, policy, track, now)?;
        let chosen = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| flipper_core::StorageError::LockPoisoned)?;
            candidates.choose(&mut *rng).cloned()
        };
        match chosen {
            Some(entry) => {
                tracing::debug!(track = %track, table = %entry.name, pool = candidates.len(), "Drew random table");
                Ok(entry)
            }
            None => Err(WorkflowError::NoCompatibleTable { track }.into()),
        }
    }
}
