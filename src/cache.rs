use crate::collectors::checks::{check_with_retry, collect_checks};
use crate::collectors::Prober;
use crate::config::ProbeConfig;
use crate::metrics::Metrics;
use crate::state::{CacheState, CheckResult, SiteRecord, StatusCounts, StatusSnapshot};
use crate::store::{SiteStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("failed to load site list: {0}")]
    Store(#[source] Arc<StoreError>),
    #[error("a refresh cycle is already running")]
    AlreadyRunning,
    #[error("refresh worker is not running")]
    WorkerGone,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub last_update: DateTime<Utc>,
    pub sites_checked: usize,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Completed(RefreshSummary),
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheView {
    pub ready: bool,
    pub in_progress: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub sites_cached: usize,
    pub counts: StatusCounts,
}

// The lock is never held across an await.
pub struct StatusCache {
    state: Mutex<CacheState>,
    store: Arc<SiteStore>,
    prober: Arc<dyn Prober>,
    probe: ProbeConfig,
    stale_after: Duration,
    metrics: Arc<Metrics>,
}

impl StatusCache {
    pub fn new(
        store: Arc<SiteStore>,
        prober: Arc<dyn Prober>,
        probe: ProbeConfig,
        stale_after: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            store,
            prober,
            probe,
            stale_after,
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store(&self) -> &Arc<SiteStore> {
        &self.store
    }

    pub fn snapshot(&self) -> (StatusSnapshot, bool) {
        let state = self.lock();
        (state.snapshot.clone(), self.is_stale(&state, Utc::now()))
    }

    pub fn view(&self) -> CacheView {
        let state = self.lock();
        CacheView {
            ready: state.ready,
            in_progress: state.in_progress,
            last_update: state.last_update,
            sites_cached: state.snapshot.len(),
            counts: state.counts(),
        }
    }

    pub fn try_queue(&self) -> bool {
        let mut state = self.lock();
        !std::mem::replace(&mut state.queued, true)
    }

    /// Same as [`try_queue`](Self::try_queue), but only for an empty cache
    /// with no cycle running. Both are checked under one lock.
    pub fn try_queue_warmup(&self) -> bool {
        let mut state = self.lock();
        if state.ready || state.in_progress || state.queued {
            return false;
        }
        state.queued = true;
        true
    }

    pub fn clear_queued(&self) {
        self.lock().queued = false;
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    fn is_stale(&self, state: &CacheState, now: DateTime<Utc>) -> bool {
        match state.last_update {
            Some(at) if state.ready => now
                .signed_duration_since(at)
                .to_std()
                .map(|age| age > self.stale_after)
                .unwrap_or(false),
            _ => true,
        }
    }

    pub async fn refresh_cycle(&self) -> Result<RefreshOutcome, RefreshError> {
        {
            let mut state = self.lock();
            if state.in_progress {
                info!("refresh already in progress, skipping");
                self.metrics.observe_refresh("skipped", Duration::ZERO);
                return Ok(RefreshOutcome::Skipped);
            }
            state.in_progress = true;
        }

        let started = Instant::now();
        let result = self.collect().await;
        let elapsed = started.elapsed();

        let mut state = self.lock();
        state.in_progress = false;
        match result {
            Ok(snapshot) => {
                let now = Utc::now();
                let summary = RefreshSummary {
                    last_update: now,
                    sites_checked: snapshot.len(),
                    counts: StatusCounts::from_results(&snapshot),
                };
                self.metrics.update_from_snapshot(&snapshot, now);
                state.replace_snapshot(snapshot, now);
                drop(state);

                self.metrics.observe_refresh("ok", elapsed);
                info!(
                    sites = summary.sites_checked,
                    up = summary.counts.up,
                    down = summary.counts.down,
                    caution = summary.counts.caution,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "status refresh finished"
                );
                Ok(RefreshOutcome::Completed(summary))
            }
            Err(err) => {
                drop(state);
                self.metrics.observe_refresh("error", elapsed);
                error!(error = %err, "status refresh failed, keeping previous snapshot");
                Err(RefreshError::Store(Arc::new(err)))
            }
        }
    }

    async fn collect(&self) -> Result<StatusSnapshot, StoreError> {
        let records = self.store.list().await?;
        info!(sites = records.len(), "starting status refresh");
        Ok(collect_checks(
            self.prober.as_ref(),
            &records,
            self.probe.batch_size,
            self.probe.max_attempts,
        )
        .await)
    }

    pub async fn check_site(&self, record: &SiteRecord) -> CheckResult {
        check_with_retry(self.prober.as_ref(), record, self.probe.max_attempts).await
    }
}
