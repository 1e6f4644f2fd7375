use crate::cache::{RefreshError, RefreshOutcome, RefreshSummary, StatusCache};
use crate::state::StatusSnapshot;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type RefreshReply = Result<RefreshSummary, RefreshError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Startup,
    Periodic,
    Daily,
    Manual,
    SiteChange,
    Warmup,
}

impl RefreshReason {
    // A running cycle may have read the site list before the change.
    fn needs_fresh_cycle(self) -> bool {
        matches!(self, Self::SiteChange)
    }
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Startup => "startup",
            Self::Periodic => "periodic",
            Self::Daily => "daily",
            Self::Manual => "manual",
            Self::SiteChange => "site_change",
            Self::Warmup => "warmup",
        };
        f.write_str(s)
    }
}

struct RefreshRequest {
    reason: RefreshReason,
    reply: Option<oneshot::Sender<RefreshReply>>,
}

#[derive(Clone)]
pub struct Refresher {
    cache: Arc<StatusCache>,
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl Refresher {
    pub fn spawn(cache: Arc<StatusCache>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(cache.clone(), rx));
        (Self { cache, tx }, worker)
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub fn get_snapshot(&self) -> (StatusSnapshot, bool) {
        if self.cache.try_queue_warmup() {
            self.send(RefreshReason::Warmup);
        }
        self.cache.snapshot()
    }

    pub fn request_refresh(&self, reason: RefreshReason) -> bool {
        if !reason.needs_fresh_cycle() && !self.cache.try_queue() {
            debug!(%reason, "refresh already queued");
            return false;
        }
        self.send(reason)
    }

    fn send(&self, reason: RefreshReason) -> bool {
        let sent = self
            .tx
            .send(RefreshRequest {
                reason,
                reply: None,
            })
            .is_ok();
        if !sent {
            self.cache.clear_queued();
        }
        sent
    }

    /// Waits for a full refresh. Joins the running cycle if there is one.
    pub async fn force_refresh(&self) -> RefreshReply {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RefreshRequest {
                reason: RefreshReason::Manual,
                reply: Some(reply_tx),
            })
            .map_err(|_| RefreshError::WorkerGone)?;
        reply_rx.await.map_err(|_| RefreshError::WorkerGone)?
    }
}

async fn run_worker(cache: Arc<StatusCache>, mut rx: mpsc::UnboundedReceiver<RefreshRequest>) {
    let mut rerun: Option<RefreshReason> = None;
    loop {
        let mut waiters = Vec::new();
        let reason = match rerun.take() {
            Some(reason) => reason,
            None => {
                let Some(first) = rx.recv().await else {
                    break;
                };
                waiters.extend(first.reply);
                first.reason
            }
        };
        cache.clear_queued();

        let mut warmup_only = reason == RefreshReason::Warmup;
        let mut coalesced = 0_usize;
        while let Ok(req) = rx.try_recv() {
            coalesced += 1;
            warmup_only &= req.reason == RefreshReason::Warmup;
            waiters.extend(req.reply);
        }
        if warmup_only && waiters.is_empty() && cache.is_ready() {
            debug!("cache already warm, dropping warmup request");
            continue;
        }
        info!(%reason, coalesced, "refresh requested");

        let cycle = cache.refresh_cycle();
        tokio::pin!(cycle);
        let outcome = loop {
            tokio::select! {
                outcome = &mut cycle => break outcome,
                Some(req) = rx.recv() => {
                    cache.clear_queued();
                    if req.reason.needs_fresh_cycle() {
                        debug!(reason = %req.reason, "refresh queued after running cycle");
                        rerun = Some(req.reason);
                    } else {
                        debug!(reason = %req.reason, "joining running refresh");
                    }
                    waiters.extend(req.reply);
                }
            }
        };

        let reply = match outcome {
            Ok(RefreshOutcome::Completed(summary)) => Ok(summary),
            Ok(RefreshOutcome::Skipped) => Err(RefreshError::AlreadyRunning),
            Err(err) => Err(err),
        };
        for waiter in waiters {
            let _ = waiter.send(reply.clone());
        }
    }
    debug!("refresh worker stopped");
}
