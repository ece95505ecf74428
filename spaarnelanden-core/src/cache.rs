//! Single-slot, time-to-live cache in front of the page fetch.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::extract::extract;
use crate::model::ContainerDataset;
use crate::ports::{PagePort, PortError};

/// Dataset together with the moment it was requested.
#[derive(Debug, Clone)]
struct CacheEntry {
    dataset: Arc<ContainerDataset>,
    fetched_at: DateTime<Utc>,
}

/// Outcome of the most recent fetch when it failed.
#[derive(Debug, Clone)]
struct FailedFetch {
    err: Arc<PortError>,
    requested_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<CacheEntry>,
    failure: Option<FailedFetch>,
}

impl Slot {
    /// Error of a failed fetch that was requested no earlier than `now`.
    fn failure_since(&self, now: DateTime<Utc>) -> Option<Arc<PortError>> {
        self.failure
            .as_ref()
            .filter(|failure| failure.requested_at >= now)
            .map(|failure| Arc::clone(&failure.err))
    }
}

/// Fetch + extract behind a time-to-live.
///
/// The slot is guarded by an async mutex that stays locked for the whole
/// fetch, so callers arriving while a fetch is running wait for it and then
/// get its result instead of starting a second request. That holds for
/// failures too: a waiter whose request time is not later than the failed
/// fetch gets the same error. Dropping a pending call leaves the previous
/// entry in place.
pub struct RefreshCache {
    port: Arc<dyn PagePort>,
    ttl: TimeDelta,
    slot: Mutex<Slot>,
}

impl RefreshCache {
    /// Create an empty cache over `port`.
    #[must_use]
    pub fn new(port: Arc<dyn PagePort>, ttl: TimeDelta) -> Self {
        Self {
            port,
            ttl,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Request time of the cached dataset, if there is one.
    pub async fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.slot
            .lock()
            .await
            .entry
            .as_ref()
            .map(|entry| entry.fetched_at)
    }

    /// Return the cached dataset, fetching a new one when it is missing or at least `ttl` old.
    ///
    /// # Errors
    ///
    /// Propagates fetch and extraction failures. The previous entry is kept in that case.
    pub async fn get(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Arc<ContainerDataset>, Arc<PortError>> {
        let mut slot = self.slot.lock().await;

        if let Some(entry) = slot.entry.as_ref()
            && now - entry.fetched_at < self.ttl
        {
            debug!(
                age_secs = (now - entry.fetched_at).num_seconds(),
                "serving cached container data"
            );
            return Ok(Arc::clone(&entry.dataset));
        }
        if let Some(err) = slot.failure_since(now) {
            debug!(%err, "sharing the failure of the fetch just made");
            return Err(err);
        }

        self.fill(&mut slot, now).await
    }

    /// Fetch regardless of age.
    ///
    /// Callers that queued up behind a fetch requested at or after `now`
    /// reuse that result, whether it succeeded or failed.
    ///
    /// # Errors
    ///
    /// Propagates fetch and extraction failures. The previous entry is kept in that case.
    pub async fn refetch(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Arc<ContainerDataset>, Arc<PortError>> {
        let mut slot = self.slot.lock().await;

        if let Some(entry) = slot.entry.as_ref()
            && entry.fetched_at >= now
        {
            return Ok(Arc::clone(&entry.dataset));
        }
        if let Some(err) = slot.failure_since(now) {
            return Err(err);
        }

        self.fill(&mut slot, now).await
    }

    async fn fill(
        &self,
        slot: &mut Slot,
        now: DateTime<Utc>,
    ) -> Result<Arc<ContainerDataset>, Arc<PortError>> {
        debug!("fetching container page");
        match self.fetch_dataset().await {
            Ok(dataset) => {
                slot.entry = Some(CacheEntry {
                    dataset: Arc::clone(&dataset),
                    fetched_at: now,
                });
                slot.failure = None;
                Ok(dataset)
            }
            Err(err) => {
                let err = Arc::new(err);
                slot.failure = Some(FailedFetch {
                    err: Arc::clone(&err),
                    requested_at: now,
                });
                Err(err)
            }
        }
    }

    async fn fetch_dataset(&self) -> Result<Arc<ContainerDataset>, PortError> {
        let page = self.port.fetch().await?;
        Ok(Arc::new(extract(&page)?))
    }
}
