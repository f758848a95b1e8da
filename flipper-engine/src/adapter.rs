//! External lineup adapter.
//!
//! The scoreboard's admin surface is reached only through [`LineupAdapter`],
//! which hands out one private [`LineupSession`] per routine. Engine code
//! never talks to a raw session: it wraps it in a [`Session`], which re-reads
//! the lineup after every mutation and fails with
//! `RemoteError::VerificationFailed` when the change did not stick.

use async_trait::async_trait;
use flipper_core::{ExternalId, FlipperError, FlipperResult, RemoteError, SlotStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One entry as the external lineup currently shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub external_id: ExternalId,
    pub name: String,
    pub hidden: bool,
    pub locked: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RemoteEntry {
    /// Lifecycle status implied by visibility and lock state.
    pub fn observed_status(&self) -> SlotStatus {
        match (self.hidden, self.locked) {
            (true, _) => SlotStatus::Queued,
            (false, false) => SlotStatus::Active,
            (false, true) => SlotStatus::Completed,
        }
    }

    pub fn has_tag(&self, label: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(label))
    }
}

/// One row of a ranked results view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedResult {
    pub rank: u32,
    pub username: String,
    pub score: String,
}

/// A private automation session on the scoreboard's admin surface.
///
/// Calls are sequential; implementations need not be `Sync`.
#[async_trait]
pub trait LineupSession: Send {
    /// Create an entry and return its opaque id.
    async fn create_entry(&mut self, name: &str) -> FlipperResult<ExternalId>;

    async fn rename(&mut self, id: &ExternalId, name: &str) -> FlipperResult<()>;

    async fn tag(&mut self, id: &ExternalId, label: &str) -> FlipperResult<()>;

    async fn lock(&mut self, id: &ExternalId) -> FlipperResult<()>;

    async fn unlock(&mut self, id: &ExternalId) -> FlipperResult<()>;

    async fn hide(&mut self, id: &ExternalId) -> FlipperResult<()>;

    async fn show(&mut self, id: &ExternalId) -> FlipperResult<()>;

    async fn delete(&mut self, id: &ExternalId) -> FlipperResult<()>;

    async fn list_entries(&mut self) -> FlipperResult<Vec<RemoteEntry>>;

    /// Ranked results for an entry, best first.
    async fn fetch_ranked_results(&mut self, id: &ExternalId) -> FlipperResult<Vec<RankedResult>>;

    /// Release the session. Called exactly once.
    async fn close(&mut self) -> FlipperResult<()>;
}

/// Capability to open sessions on the external lineup.
#[async_trait]
pub trait LineupAdapter: Send + Sync {
    async fn open_session(&self) -> FlipperResult<Box<dyn LineupSession>>;
}

/// Outcome of a bounded ranked-results fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultsFetch {
    Results(Vec<RankedResult>),
    /// The entry no longer exists remotely
    NotFound,
    /// Transient failures outlasted every attempt
    Unavailable,
}

/// Verified wrapper around a raw session.
pub struct Session {
    inner: Box<dyn LineupSession>,
    closed: bool,
}

/// Whether a failure means the remote entry is gone.
pub fn remote_missing(err: &FlipperError) -> bool {
    matches!(err, FlipperError::Remote(RemoteError::EntryNotFound { .. }))
}

impl Session {
    pub async fn open(adapter: &dyn LineupAdapter) -> FlipperResult<Self> {
        let inner = adapter.open_session().await?;
        tracing::debug!("Lineup session opened");
        Ok(Self {
            inner,
            closed: false,
        })
    }

    /// Release the session, logging rather than returning a failure.
    pub async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.inner.close().await {
            tracing::warn!(error = %e, "Failed to close lineup session");
        } else {
            tracing::debug!("Lineup session closed");
        }
    }

    pub async fn list_entries(&mut self) -> FlipperResult<Vec<RemoteEntry>> {
        self.inner.list_entries().await
    }

    /// Re-read one entry after a mutation.
    async fn observe(&mut self, id: &ExternalId) -> FlipperResult<Option<RemoteEntry>> {
        Ok(self
            .inner
            .list_entries()
            .await?
            .into_iter()
            .find(|e| &e.external_id == id))
    }

    async fn verify<F>(&mut self, operation: &str, id: &ExternalId, check: F) -> FlipperResult<RemoteEntry>
    where
        F: Fn(&RemoteEntry) -> bool + Send,
    {
        match self.observe(id).await? {
            Some(entry) if check(&entry) => Ok(entry),
            Some(entry) => Err(RemoteError::VerificationFailed {
                operation: operation.to_string(),
                external_id: id.clone(),
                detail: format!(
                    "observed name={:?} hidden={} locked={} tags={:?}",
                    entry.name, entry.hidden, entry.locked, entry.tags
                ),
            }
            .into()),
            None => Err(RemoteError::EntryNotFound {
                external_id: id.clone(),
            }
            .into()),
        }
    }

    pub async fn create_entry(&mut self, name: &str) -> FlipperResult<ExternalId> {
        let id = self.inner.create_entry(name).await?;
        let expected = name.trim().to_string();
        match self.observe(&id).await? {
            Some(entry) if entry.name.trim() == expected => {
                tracing::info!(external_id = %id, name = %expected, "Remote entry created");
                Ok(id)
            }
            _ => Err(RemoteError::VerificationFailed {
                operation: "create_entry".to_string(),
                external_id: id,
                detail: format!("entry named {:?} not listed after create", expected),
            }
            .into()),
        }
    }

    pub async fn rename(&mut self, id: &ExternalId, name: &str) -> FlipperResult<()> {
        self.inner.rename(id, name).await?;
        let expected = name.trim().to_string();
        self.verify("rename", id, move |e| e.name.trim() == expected).await?;
        Ok(())
    }

    pub async fn tag(&mut self, id: &ExternalId, label: &str) -> FlipperResult<()> {
        self.inner.tag(id, label).await?;
        let label = label.to_string();
        self.verify("tag", id, move |e| e.has_tag(&label)).await?;
        Ok(())
    }

    pub async fn lock(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.inner.lock(id).await?;
        self.verify("lock", id, |e| e.locked).await?;
        Ok(())
    }

    pub async fn unlock(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.inner.unlock(id).await?;
        self.verify("unlock", id, |e| !e.locked).await?;
        Ok(())
    }

    pub async fn hide(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.inner.hide(id).await?;
        self.verify("hide", id, |e| e.hidden).await?;
        Ok(())
    }

    pub async fn show(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.inner.show(id).await?;
        self.verify("show", id, |e| !e.hidden).await?;
        Ok(())
    }

    pub async fn delete(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.inner.delete(id).await?;
        if self.observe(id).await?.is_some() {
            return Err(RemoteError::VerificationFailed {
                operation: "delete".to_string(),
                external_id: id.clone(),
                detail: "entry still listed".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Create an entry that stays out of sight until promotion.
    pub async fn create_hidden_tagged(&mut self, name: &str, label: &str) -> FlipperResult<ExternalId> {
        let id = self.create_entry(name).await?;
        self.tag(&id, label).await?;
        self.hide(&id).await?;
        Ok(id)
    }

    /// Fetch ranked results, retrying transient failures with a fixed backoff.
    pub async fn fetch_results(
        &mut self,
        id: &ExternalId,
        attempts: u32,
        backoff: Duration,
    ) -> FlipperResult<ResultsFetch> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match self.inner.fetch_ranked_results(id).await {
                Ok(mut results) => {
                    results.sort_by_key(|r| r.rank);
                    return Ok(ResultsFetch::Results(results));
                }
                Err(e) if remote_missing(&e) => return Ok(ResultsFetch::NotFound),
                Err(FlipperError::Remote(e)) if e.is_transient() => {
                    tracing::warn!(
                        external_id = %id,
                        attempt,
                        attempts,
                        error = %e,
                        "Transient failure fetching results"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ResultsFetch::Unavailable)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("Lineup session dropped without close");
        }
    }
}
