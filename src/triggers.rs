use crate::refresh::{RefreshReason, Refresher};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub async fn run_startup(
    refresher: Refresher,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = shutdown.changed() => {}
        _ = tokio::time::sleep(delay) => {
            refresher.request_refresh(RefreshReason::Startup);
        }
    }
}

pub async fn run_periodic(
    refresher: Refresher,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("periodic refresh stopped");
                break;
            }
            _ = ticker.tick() => {
                refresher.request_refresh(RefreshReason::Periodic);
            }
        }
    }
}

pub async fn run_daily(refresher: Refresher, at: NaiveTime, mut shutdown: watch::Receiver<bool>) {
    // Each run is scheduled from the previous target, not from the wall clock.
    let mut next = next_occurrence(&Local::now(), at);
    loop {
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        info!(next = %next.format("%Y-%m-%d %H:%M"), "daily refresh scheduled");

        tokio::select! {
            _ = shutdown.changed() => {
                debug!("daily refresh stopped");
                break;
            }
            _ = tokio::time::sleep(wait) => {
                refresher.request_refresh(RefreshReason::Daily);
                next = next_occurrence(&next, at);
            }
        }
    }
}

/// Next moment strictly after `now` whose wall-clock time is `at`. A time
/// that falls into a DST gap is moved forward by an hour.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        let naive = date.and_time(at);
        let resolved = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + ChronoDuration::hours(1))).earliest());
        if let Some(candidate) = resolved {
            if candidate > *now {
                return candidate;
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
}

// Every notify() cancels the pending refresh and starts the delay over.
pub struct SiteChangeDebouncer {
    refresher: Refresher,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SiteChangeDebouncer {
    pub fn new(refresher: Refresher, delay: Duration) -> Self {
        Self {
            refresher,
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn notify(&self) {
        let refresher = self.refresher.clone();
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            refresher.request_refresh(RefreshReason::SiteChange);
        });

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = pending.take() {
            previous.abort();
        }
    }
}
