//! LMDB-backed ledger.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each entity family lives in
//! its own named database inside one environment; values are JSON.
//!
//! | database           | key                              | value          |
//! |--------------------|----------------------------------|----------------|
//! | `slots`            | slot id (16 bytes, UUIDv7)       | `GameSlot`     |
//! | `slot_by_external` | external id                      | slot id        |
//! | `scores`           | slot id ++ rank (u32 big-endian) | `ScoreRecord`  |
//! | `winners`          | sequence (u64 big-endian)        | `WinnerRecord` |
//! | `pause`            | `state`                          | `PauseState`   |
//! | `catalog`          | lowercased table name            | `CatalogEntry` |
//! | `identities`       | lowercased username              | `IdentityLink` |
//!
//! Every mutation runs in a single write transaction, so the external-id
//! index never disagrees with the slot rows.

use std::path::Path;

use flipper_core::{
    CatalogEntry, EntityType, ExternalId, FlipperError, FlipperResult, GameSlot, IdentityLink,
    PauseState, ScoreRecord, SlotId, StorageError, Track, WinnerRecord,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{fold_key, slot_changed, slot_not_found, sort_slots, LedgerStore};

const PAUSE_KEY: &[u8] = b"state";

/// Error type for LMDB ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbLedgerError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a named database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: &'static str, reason: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt row in {0}")]
    Corrupt(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbLedgerError to FlipperError.
impl From<LmdbLedgerError> for FlipperError {
    fn from(e: LmdbLedgerError) -> Self {
        FlipperError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbLedgerError {
    LmdbLedgerError::Transaction(e.to_string())
}

fn encode<T: Serialize>(entity_type: EntityType, value: &T) -> FlipperResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        StorageError::Serialization {
            entity_type,
            reason: e.to_string(),
        }
        .into()
    })
}

fn decode<T: DeserializeOwned>(entity_type: EntityType, bytes: &[u8]) -> FlipperResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::Serialization {
            entity_type,
            reason: e.to_string(),
        }
        .into()
    })
}

fn slot_key(id: SlotId) -> [u8; 16] {
    id.to_bytes()
}

fn score_key(slot_id: SlotId, rank: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(20);
    key.extend_from_slice(&slot_key(slot_id));
    key.extend_from_slice(&rank.to_be_bytes());
    key
}

/// Durable ledger stored in an LMDB environment.
pub struct LmdbLedger {
    env: Env,
    slots: Database<Bytes, Bytes>,
    slot_by_external: Database<Bytes, Bytes>,
    scores: Database<Bytes, Bytes>,
    winners: Database<Bytes, Bytes>,
    pause: Database<Bytes, Bytes>,
    catalog: Database<Bytes, Bytes>,
    identities: Database<Bytes, Bytes>,
}

impl LmdbLedger {
    /// Open (or create) a ledger in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment and its named databases cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbLedgerError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(7)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbLedgerError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let mut create = |name: &'static str| -> Result<Database<Bytes, Bytes>, LmdbLedgerError> {
            env.create_database(&mut wtxn, Some(name))
                .map_err(|e| LmdbLedgerError::DbOpen {
                    name,
                    reason: e.to_string(),
                })
        };
        let slots = create("slots")?;
        let slot_by_external = create("slot_by_external")?;
        let scores = create("scores")?;
        let winners = create("winners")?;
        let pause = create("pause")?;
        let catalog = create("catalog")?;
        let identities = create("identities")?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            slots,
            slot_by_external,
            scores,
            winners,
            pause,
            catalog,
            identities,
        })
    }

    fn read_slot(&self, rtxn: &RoTxn, id: SlotId) -> FlipperResult<Option<GameSlot>> {
        match self.slots.get(rtxn, &slot_key(id)).map_err(txn_err)? {
            Some(bytes) => Ok(Some(decode(EntityType::Slot, bytes)?)),
            None => Ok(None),
        }
    }

    /// The slot currently holding `external_id` in the unique index.
    fn index_holder(&self, rtxn: &RoTxn, external_id: &ExternalId) -> FlipperResult<Option<SlotId>> {
        match self
            .slot_by_external
            .get(rtxn, external_id.as_str().as_bytes())
            .map_err(txn_err)?
        {
            Some(bytes) => {
                let raw: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| LmdbLedgerError::Corrupt("slot_by_external"))?;
                Ok(Some(SlotId::from_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn ensure_index_free(
        &self,
        rtxn: &RoTxn,
        external_id: &ExternalId,
        owner: SlotId,
    ) -> FlipperResult<()> {
        match self.index_holder(rtxn, external_id)? {
            Some(holder) if holder != owner => Err(StorageError::UniqueViolation {
                index_name: "slot_by_external".to_string(),
                value: external_id.to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Overwrite `previous` with `slot` and move its index entry.
    fn write_slot(&self, wtxn: &mut RwTxn, previous: &GameSlot, slot: &GameSlot) -> FlipperResult<()> {
        if let Some(external_id) = &slot.external_id {
            self.ensure_index_free(wtxn, external_id, slot.slot_id)?;
        }
        if let Some(old) = &previous.external_id {
            if slot.external_id.as_ref() != Some(old) {
                self.slot_by_external
                    .delete(wtxn, old.as_str().as_bytes())
                    .map_err(txn_err)?;
            }
        }
        if let Some(external_id) = &slot.external_id {
            self.slot_by_external
                .put(wtxn, external_id.as_str().as_bytes(), &slot_key(slot.slot_id))
                .map_err(txn_err)?;
        }
        let value = encode(EntityType::Slot, slot)?;
        self.slots
            .put(wtxn, &slot_key(slot.slot_id), &value)
            .map_err(txn_err)?;
        Ok(())
    }

    fn list_values<T: DeserializeOwned>(
        &self,
        db: &Database<Bytes, Bytes>,
        entity_type: EntityType,
    ) -> FlipperResult<Vec<T>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut values = Vec::new();
        for result in db.iter(&rtxn).map_err(txn_err)? {
            let (_, bytes) = result.map_err(txn_err)?;
            values.push(decode(entity_type, bytes)?);
        }
        Ok(values)
    }
}

impl LedgerStore for LmdbLedger {
    fn slot_insert(&self, slot: &GameSlot) -> FlipperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        if self.read_slot(&wtxn, slot.slot_id)?.is_some() {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Slot,
                reason: "already exists".to_string(),
            }
            .into());
        }
        if let Some(external_id) = &slot.external_id {
            self.ensure_index_free(&wtxn, external_id, slot.slot_id)?;
            self.slot_by_external
                .put(&mut wtxn, external_id.as_str().as_bytes(), &slot_key(slot.slot_id))
                .map_err(txn_err)?;
        }
        let value = encode(EntityType::Slot, slot)?;
        self.slots
            .put(&mut wtxn, &slot_key(slot.slot_id), &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn slot_get(&self, id: SlotId) -> FlipperResult<Option<GameSlot>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.read_slot(&rtxn, id)
    }

    fn slot_get_by_external(&self, external_id: &ExternalId) -> FlipperResult<Option<GameSlot>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.index_holder(&rtxn, external_id)? {
            Some(id) => self.read_slot(&rtxn, id),
            None => Ok(None),
        }
    }

    fn slot_update(&self, slot: &GameSlot) -> FlipperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let previous = self
            .read_slot(&wtxn, slot.slot_id)?
            .ok_or_else(|| slot_not_found(slot.slot_id))?;
        self.write_slot(&mut wtxn, &previous, slot)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn slot_replace(&self, expected: &GameSlot, slot: &GameSlot) -> FlipperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let previous = self
            .read_slot(&wtxn, slot.slot_id)?
            .ok_or_else(|| slot_not_found(slot.slot_id))?;
        if previous != *expected {
            return Err(slot_changed(slot.slot_id));
        }
        self.write_slot(&mut wtxn, &previous, slot)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn slot_list(&self, track: Track) -> FlipperResult<Vec<GameSlot>> {
        let mut slots: Vec<GameSlot> = self
            .list_values::<GameSlot>(&self.slots, EntityType::Slot)?
            .into_iter()
            .filter(|s| s.track == track)
            .collect();
        sort_slots(&mut slots);
        Ok(slots)
    }

    fn scores_append(&self, records: &[ScoreRecord]) -> FlipperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        for record in records {
            let key = score_key(record.slot_id, record.rank);
            if self.scores.get(&wtxn, &key).map_err(txn_err)?.is_some() {
                continue;
            }
            let value = encode(EntityType::ScoreRecord, record)?;
            self.scores.put(&mut wtxn, &key, &value).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn scores_for_slot(&self, slot_id: SlotId) -> FlipperResult<Vec<ScoreRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut records = Vec::new();
        for result in self
            .scores
            .prefix_iter(&rtxn, &slot_key(slot_id))
            .map_err(txn_err)?
        {
            let (_, bytes) = result.map_err(txn_err)?;
            records.push(decode::<ScoreRecord>(EntityType::ScoreRecord, bytes)?);
        }
        Ok(records)
    }

    fn winner_append(&self, record: &WinnerRecord) -> FlipperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let next = match self.winners.last(&wtxn).map_err(txn_err)? {
            Some((key, _)) => {
                let raw: [u8; 8] = key
                    .try_into()
                    .map_err(|_| LmdbLedgerError::Corrupt("winners"))?;
                u64::from_be_bytes(raw) + 1
            }
            None => 0,
        };
        let value = encode(EntityType::WinnerRecord, record)?;
        self.winners
            .put(&mut wtxn, &next.to_be_bytes(), &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn winner_list(&self, track: Option<Track>) -> FlipperResult<Vec<WinnerRecord>> {
        Ok(self
            .list_values::<WinnerRecord>(&self.winners, EntityType::WinnerRecord)?
            .into_iter()
            .filter(|w| track.is_none_or(|t| w.track == t))
            .collect())
    }

    fn pause_get(&self) -> FlipperResult<PauseState> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.pause.get(&rtxn, PAUSE_KEY).map_err(txn_err)? {
            Some(bytes) => decode(EntityType::PauseState, bytes),
            None => Ok(PauseState::inactive()),
        }
    }

    fn pause_put(&self, state: &PauseState) -> FlipperResult<()> {
        let value = encode(EntityType::PauseState, state)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.pause.put(&mut wtxn, PAUSE_KEY, &value).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn catalog_upsert(&self, entry: &CatalogEntry) -> FlipperResult<()> {
        let key = fold_key(&entry.name);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let merged = match self.catalog.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => {
                let existing: CatalogEntry = decode(EntityType::CatalogEntry, bytes)?;
                entry.clone().merged_over(&existing)
            }
            None => entry.clone(),
        };
        let value = encode(EntityType::CatalogEntry, &merged)?;
        self.catalog
            .put(&mut wtxn, key.as_bytes(), &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn catalog_list(&self) -> FlipperResult<Vec<CatalogEntry>> {
        // Keys are folded names, so iteration order is already name order.
        self.list_values(&self.catalog, EntityType::CatalogEntry)
    }

    fn identity_link(&self, link: &IdentityLink) -> FlipperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut stale = Vec::new();
        for result in self.identities.iter(&wtxn).map_err(txn_err)? {
            let (key, bytes) = result.map_err(txn_err)?;
            let existing: IdentityLink = decode(EntityType::IdentityLink, bytes)?;
            if existing.user_id == link.user_id {
                stale.push(key.to_vec());
            }
        }
        for key in stale {
            self.identities.delete(&mut wtxn, &key).map_err(txn_err)?;
        }
        let value = encode(EntityType::IdentityLink, link)?;
        self.identities
            .put(&mut wtxn, fold_key(&link.username).as_bytes(), &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn identity_by_username(&self, username: &str) -> FlipperResult<Option<IdentityLink>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self
            .identities
            .get(&rtxn, fold_key(username).as_bytes())
            .map_err(txn_err)?
        {
            Some(bytes) => Ok(Some(decode(EntityType::IdentityLink, bytes)?)),
            None => Ok(None),
        }
    }

    fn identity_list(&self) -> FlipperResult<Vec<IdentityLink>> {
        self.list_values(&self.identities, EntityType::IdentityLink)
    }

    fn wipe(&self) -> FlipperResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.slots.clear(&mut wtxn).map_err(txn_err)?;
        self.slot_by_external.clear(&mut wtxn).map_err(txn_err)?;
        self.scores.clear(&mut wtxn).map_err(txn_err)?;
        self.winners.clear(&mut wtxn).map_err(txn_err)?;
        self.pause.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }
}
