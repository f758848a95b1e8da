//! Flipper Storage - Ledger Trait and Implementations
//!
//! Defines the durable ledger of game slots, scores, winner history,
//! pause state, catalog and identity links. Two backends implement it:
//! [`MockLedger`] keeps everything in memory, [`LmdbLedger`] persists to LMDB.

pub mod lmdb;

pub use lmdb::{LmdbLedger, LmdbLedgerError};

use flipper_core::{
    same_username, CatalogEntry, EntityType, ExternalId, FlipperError, FlipperResult,
    GameSlot, IdentityLink, PauseState, Platform, PolicyConfig, ScoreRecord, SlotId, SlotStatus,
    StorageError, Timestamp, Track, UserId, WinnerRecord, WorkflowError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// LEDGER TRAIT
// ============================================================================

/// Storage trait for the tournament ledger.
///
/// Every slot operation is scoped to one slot of one track; tracks share no
/// rows. Required methods are the raw row operations, provided methods build
/// the lifecycle operations on top of them.
pub trait LedgerStore: Send + Sync {
    // === Slot Operations ===

    /// Insert a new slot. Fails if the id or external id is already taken.
    fn slot_insert(&self, slot: &GameSlot) -> FlipperResult<()>;

    fn slot_get(&self, id: SlotId) -> FlipperResult<Option<GameSlot>>;

    /// Look a slot up through the unique external-id index.
    fn slot_get_by_external(&self, external_id: &ExternalId) -> FlipperResult<Option<GameSlot>>;

    /// Replace a stored slot row, keeping the external-id index in step.
    fn slot_update(&self, slot: &GameSlot) -> FlipperResult<()>;

    /// Replace a slot row only if it still equals `expected`.
    ///
    /// The comparison and the write are one atomic step. A row changed
    /// since `expected` was read fails with [`WorkflowError::SlotChanged`].
    fn slot_replace(&self, expected: &GameSlot, slot: &GameSlot) -> FlipperResult<()>;

    /// All slots of a track ordered by scheduled activation, then creation.
    fn slot_list(&self, track: Track) -> FlipperResult<Vec<GameSlot>>;

    // === Score Operations ===

    /// Append score records. Ranks already stored for a slot are left untouched.
    fn scores_append(&self, records: &[ScoreRecord]) -> FlipperResult<()>;

    /// Score records of a slot ordered by rank.
    fn scores_for_slot(&self, slot_id: SlotId) -> FlipperResult<Vec<ScoreRecord>>;

    // === Winner History ===

    fn winner_append(&self, record: &WinnerRecord) -> FlipperResult<()>;

    /// Winner records in append order, optionally for one track.
    fn winner_list(&self, track: Option<Track>) -> FlipperResult<Vec<WinnerRecord>>;

    // === Pause State ===

    fn pause_get(&self) -> FlipperResult<PauseState>;

    fn pause_put(&self, state: &PauseState) -> FlipperResult<()>;

    // === Catalog ===

    /// Insert a table or merge it over the stored row of the same name.
    fn catalog_upsert(&self, entry: &CatalogEntry) -> FlipperResult<()>;

    /// All catalog entries ordered by name.
    fn catalog_list(&self) -> FlipperResult<Vec<CatalogEntry>>;

    // === Identity Links ===

    /// Link a username to an identity, replacing any earlier link of that identity.
    fn identity_link(&self, link: &IdentityLink) -> FlipperResult<()>;

    fn identity_by_username(&self, username: &str) -> FlipperResult<Option<IdentityLink>>;

    fn identity_list(&self) -> FlipperResult<Vec<IdentityLink>>;

    // === Administration ===

    /// Delete slots, scores and winner history and reset the pause state.
    /// Catalog and identity links survive.
    fn wipe(&self) -> FlipperResult<()>;

    // ------------------------------------------------------------------------
    // Provided lifecycle operations
    // ------------------------------------------------------------------------

    /// Fetch a slot that must exist.
    fn slot_require(&self, id: SlotId) -> FlipperResult<GameSlot> {
        self.slot_get(id)?.ok_or_else(|| slot_not_found(id))
    }

    fn slot_list_by_status(&self, track: Track, status: SlotStatus) -> FlipperResult<Vec<GameSlot>> {
        Ok(self
            .slot_list(track)?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    /// The single ACTIVE slot of a track, if any.
    fn slot_get_active(&self, track: Track) -> FlipperResult<Option<GameSlot>> {
        Ok(self
            .slot_list(track)?
            .into_iter()
            .find(|s| s.status == SlotStatus::Active))
    }

    /// The QUEUED slot that activates next.
    fn slot_get_next_queued(&self, track: Track) -> FlipperResult<Option<GameSlot>> {
        Ok(self
            .slot_list(track)?
            .into_iter()
            .find(|s| s.status == SlotStatus::Queued))
    }

    /// Create a QUEUED slot with the policy's activation time.
    ///
    /// With no name the slot is a placeholder awaiting a table choice.
    fn slot_create_queued(
        &self,
        track: Track,
        name: Option<&str>,
        policy: &PolicyConfig,
        now: Timestamp,
    ) -> FlipperResult<GameSlot> {
        let scheduled_at = policy.activation_time(track, now);
        let slot = match name {
            Some(name) => GameSlot::queued(track, name, scheduled_at, now),
            None => GameSlot::placeholder(track, scheduled_at, now),
        };
        self.slot_insert(&slot)?;
        Ok(slot)
    }

    fn slot_transition(&self, id: SlotId, status: SlotStatus, now: Timestamp) -> FlipperResult<GameSlot> {
        let current = self.slot_require(id)?;
        let mut slot = current.clone();
        slot.apply_status(status, now);
        self.slot_replace(&current, &slot)?;
        Ok(slot)
    }

    /// Assign a picker (and nominator) or clear both with `None`.
    fn slot_set_picker(
        &self,
        id: SlotId,
        picker: Option<UserId>,
        nominator: Option<UserId>,
        now: Timestamp,
    ) -> FlipperResult<GameSlot> {
        let current = self.slot_require(id)?;
        let mut slot = current.clone();
        match picker {
            Some(picker) => slot.assign_picker(picker, nominator, now),
            None => slot.clear_picker(),
        }
        self.slot_replace(&current, &slot)?;
        Ok(slot)
    }

    fn slot_attach_external(&self, id: SlotId, external_id: ExternalId) -> FlipperResult<GameSlot> {
        let current = self.slot_require(id)?;
        let mut slot = current.clone();
        slot.external_id = Some(external_id);
        self.slot_replace(&current, &slot)?;
        Ok(slot)
    }

    /// Fill a queued placeholder in place, forfeiting its picker.
    ///
    /// Only succeeds while the row is still a QUEUED placeholder held by
    /// `expected_picker`; otherwise nothing is written and the result is
    /// [`WorkflowError::SlotChanged`].
    fn slot_overwrite_if(
        &self,
        id: SlotId,
        expected_picker: Option<&UserId>,
        name: &str,
        external_id: Option<ExternalId>,
    ) -> FlipperResult<GameSlot> {
        let current = self.slot_require(id)?;
        if current.status != SlotStatus::Queued
            || !current.is_placeholder()
            || current.picker.as_ref() != expected_picker
        {
            return Err(slot_changed(id));
        }
        let mut slot = current.clone();
        slot.name = name.to_string();
        slot.external_id = external_id;
        slot.clear_picker();
        self.slot_replace(&current, &slot)?;
        Ok(slot)
    }

    /// Idempotence guard for result capture.
    fn scores_exist(&self, slot_id: SlotId) -> FlipperResult<bool> {
        Ok(!self.scores_for_slot(slot_id)?.is_empty())
    }

    fn winner_last(&self, track: Track) -> FlipperResult<Option<WinnerRecord>> {
        Ok(self.winner_list(Some(track))?.pop())
    }

    fn winner_for_slot(&self, slot_id: SlotId) -> FlipperResult<Option<WinnerRecord>> {
        Ok(self
            .winner_list(None)?
            .into_iter()
            .find(|w| w.slot_id == slot_id))
    }

    fn winners_since(&self, track: Option<Track>, since: Option<Timestamp>) -> FlipperResult<Vec<WinnerRecord>> {
        Ok(self
            .winner_list(track)?
            .into_iter()
            .filter(|w| since.is_none_or(|at| w.won_at >= at))
            .collect())
    }

    /// Catalog entry by exact name or alias, ignoring case.
    fn catalog_get(&self, name: &str) -> FlipperResult<Option<CatalogEntry>> {
        Ok(self.catalog_list()?.into_iter().find(|e| e.is_named(name)))
    }

    fn catalog_search(
        &self,
        query: &str,
        platform: Option<Platform>,
        limit: usize,
    ) -> FlipperResult<Vec<CatalogEntry>> {
        Ok(self
            .catalog_list()?
            .into_iter()
            .filter(|e| e.matches(query))
            .filter(|e| platform.is_none_or(|p| e.supports(p)))
            .take(limit)
            .collect())
    }

    fn identity_for_user(&self, user_id: &UserId) -> FlipperResult<Option<IdentityLink>> {
        Ok(self
            .identity_list()?
            .into_iter()
            .find(|l| &l.user_id == user_id))
    }

    /// Bare table names a track has lined up since `since`.
    fn recent_table_names(&self, track: Track, since: Timestamp) -> FlipperResult<Vec<String>> {
        Ok(self
            .slot_list(track)?
            .into_iter()
            .filter(|s| s.created_at >= since && !s.is_placeholder())
            .map(|s| s.table_name().to_string())
            .collect())
    }
}

/// Ordering used by every backend for `slot_list`.
pub(crate) fn sort_slots(slots: &mut [GameSlot]) {
    slots.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.slot_id.cmp(&b.slot_id))
    });
}

pub(crate) fn slot_changed(id: SlotId) -> FlipperError {
    WorkflowError::SlotChanged {
        slot: id.to_string(),
    }
    .into()
}

pub(crate) fn slot_not_found(id: SlotId) -> FlipperError {
    StorageError::NotFound {
        entity_type: EntityType::Slot,
        key: id.to_string(),
    }
    .into()
}

/// Storage key for case-insensitive names.
pub(crate) fn fold_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// MOCK LEDGER
// ============================================================================

/// In-memory ledger for tests and dry runs.
#[derive(Debug, Default)]
pub struct MockLedger {
    slots: Arc<RwLock<HashMap<SlotId, GameSlot>>>,
    by_external: Arc<RwLock<HashMap<ExternalId, SlotId>>>,
    scores: Arc<RwLock<BTreeMap<(SlotId, u32), ScoreRecord>>>,
    winners: Arc<RwLock<Vec<WinnerRecord>>>,
    pause: Arc<RwLock<PauseState>>,
    catalog: Arc<RwLock<HashMap<String, CatalogEntry>>>,
    identities: Arc<RwLock<HashMap<String, IdentityLink>>>,
}

fn read<T>(lock: &RwLock<T>) -> FlipperResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StorageError::LockPoisoned.into())
}

fn write<T>(lock: &RwLock<T>) -> FlipperResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StorageError::LockPoisoned.into())
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get count of stored slots across all tracks.
    pub fn slot_count(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Get count of stored winner records.
    pub fn winner_count(&self) -> usize {
        self.winners.read().map(|w| w.len()).unwrap_or(0)
    }

    /// Write `slot` over its existing row with both locks held.
    fn store_slot(
        slots: &mut HashMap<SlotId, GameSlot>,
        index: &mut HashMap<ExternalId, SlotId>,
        slot: &GameSlot,
    ) -> FlipperResult<()> {
        let previous = slots
            .get(&slot.slot_id)
            .ok_or_else(|| slot_not_found(slot.slot_id))?;

        if let Some(external_id) = &slot.external_id {
            Self::check_external_free(index, external_id, slot.slot_id)?;
        }
        if let Some(old) = &previous.external_id {
            if slot.external_id.as_ref() != Some(old) {
                index.remove(old);
            }
        }
        if let Some(external_id) = &slot.external_id {
            index.insert(external_id.clone(), slot.slot_id);
        }
        slots.insert(slot.slot_id, slot.clone());
        Ok(())
    }

    fn check_external_free(
        index: &HashMap<ExternalId, SlotId>,
        external_id: &ExternalId,
        owner: SlotId,
    ) -> FlipperResult<()> {
        match index.get(external_id) {
            Some(holder) if *holder != owner => Err(StorageError::UniqueViolation {
                index_name: "slot_by_external".to_string(),
                value: external_id.to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

impl LedgerStore for MockLedger {
    fn slot_insert(&self, slot: &GameSlot) -> FlipperResult<()> {
        let mut slots = write(&self.slots)?;
        let mut index = write(&self.by_external)?;
        if slots.contains_key(&slot.slot_id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Slot,
                reason: "already exists".to_string(),
            }
            .into());
        }
        if let Some(external_id) = &slot.external_id {
            Self::check_external_free(&index, external_id, slot.slot_id)?;
            index.insert(external_id.clone(), slot.slot_id);
        }
        slots.insert(slot.slot_id, slot.clone());
        Ok(())
    }

    fn slot_get(&self, id: SlotId) -> FlipperResult<Option<GameSlot>> {
        Ok(read(&self.slots)?.get(&id).cloned())
    }

    fn slot_get_by_external(&self, external_id: &ExternalId) -> FlipperResult<Option<GameSlot>> {
        let slots = read(&self.slots)?;
        let index = read(&self.by_external)?;
        Ok(index.get(external_id).and_then(|id| slots.get(id)).cloned())
    }

    fn slot_update(&self, slot: &GameSlot) -> FlipperResult<()> {
        let mut slots = write(&self.slots)?;
        let mut index = write(&self.by_external)?;
        Self::store_slot(&mut slots, &mut index, slot)
    }

    fn slot_replace(&self, expected: &GameSlot, slot: &GameSlot) -> FlipperResult<()> {
        let mut slots = write(&self.slots)?;
        let mut index = write(&self.by_external)?;
        let unchanged = match slots.get(&slot.slot_id) {
            Some(current) => current == expected,
            None => return Err(slot_not_found(slot.slot_id)),
        };
        if !unchanged {
            return Err(slot_changed(slot.slot_id));
        }
        Self::store_slot(&mut slots, &mut index, slot)
    }

    fn slot_list(&self, track: Track) -> FlipperResult<Vec<GameSlot>> {
        let mut result: Vec<GameSlot> = read(&self.slots)?
            .values()
            .filter(|s| s.track == track)
            .cloned()
            .collect();
        sort_slots(&mut result);
        Ok(result)
    }

    fn scores_append(&self, records: &[ScoreRecord]) -> FlipperResult<()> {
        let mut scores = write(&self.scores)?;
        for record in records {
            scores
                .entry((record.slot_id, record.rank))
                .or_insert_with(|| record.clone());
        }
        Ok(())
    }

    fn scores_for_slot(&self, slot_id: SlotId) -> FlipperResult<Vec<ScoreRecord>> {
        Ok(read(&self.scores)?
            .range((slot_id, 0)..=(slot_id, u32::MAX))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn winner_append(&self, record: &WinnerRecord) -> FlipperResult<()> {
        write(&self.winners)?.push(record.clone());
        Ok(())
    }

    fn winner_list(&self, track: Option<Track>) -> FlipperResult<Vec<WinnerRecord>> {
        Ok(read(&self.winners)?
            .iter()
            .filter(|w| track.is_none_or(|t| w.track == t))
            .cloned()
            .collect())
    }

    fn pause_get(&self) -> FlipperResult<PauseState> {
        Ok(read(&self.pause)?.clone())
    }

    fn pause_put(&self, state: &PauseState) -> FlipperResult<()> {
        *write(&self.pause)? = state.clone();
        Ok(())
    }

    fn catalog_upsert(&self, entry: &CatalogEntry) -> FlipperResult<()> {
        let mut catalog = write(&self.catalog)?;
        let key = fold_key(&entry.name);
        let merged = match catalog.get(&key) {
            Some(existing) => entry.clone().merged_over(existing),
            None => entry.clone(),
        };
        catalog.insert(key, merged);
        Ok(())
    }

    fn catalog_list(&self) -> FlipperResult<Vec<CatalogEntry>> {
        let mut entries: Vec<CatalogEntry> = read(&self.catalog)?.values().cloned().collect();
        entries.sort_by_key(|e| fold_key(&e.name));
        Ok(entries)
    }

    fn identity_link(&self, link: &IdentityLink) -> FlipperResult<()> {
        let mut identities = write(&self.identities)?;
        identities.retain(|_, existing| existing.user_id != link.user_id);
        identities.insert(fold_key(&link.username), link.clone());
        Ok(())
    }

    fn identity_by_username(&self, username: &str) -> FlipperResult<Option<IdentityLink>> {
        Ok(read(&self.identities)?.get(&fold_key(username)).cloned())
    }

    fn identity_list(&self) -> FlipperResult<Vec<IdentityLink>> {
        let mut links: Vec<IdentityLink> = read(&self.identities)?.values().cloned().collect();
        links.sort_by_key(|l| fold_key(&l.username));
        Ok(links)
    }

    fn wipe(&self) -> FlipperResult<()> {
        write(&self.slots)?.clear();
        write(&self.by_external)?.clear();
        write(&self.scores)?.clear();
        write(&self.winners)?.clear();
        *write(&self.pause)? = PauseState::inactive();
        Ok(())
    }
}

/// Whether `username` is the most recent winner of `track`.
pub fn is_last_winner<S: LedgerStore + ?Sized>(
    store: &S,
    track: Track,
    username: &str,
) -> FlipperResult<bool> {
    Ok(store
        .winner_last(track)?
        .is_some_and(|w| same_username(&w.username, username)))
}

// ============================================================================
// SHARED BACKEND CHECKS
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
