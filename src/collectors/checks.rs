use super::Prober;
use crate::state::{CheckResult, CheckStatus, SiteRecord, StatusSnapshot};
use futures::future::join_all;
use tracing::{info, warn};

pub const MANUAL_CHECK_MESSAGE: &str = "Manual check required";
pub const SITE_UP_MESSAGE: &str = "Site is up";

pub async fn check_with_retry(
    prober: &dyn Prober,
    record: &SiteRecord,
    max_attempts: u32,
) -> CheckResult {
    if record.manual_check {
        return CheckResult::new(record, CheckStatus::Caution, MANUAL_CHECK_MESSAGE);
    }

    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match prober.probe(&record.url).await {
            Ok(_) => return CheckResult::new(record, CheckStatus::Up, SITE_UP_MESSAGE),
            Err(err) if attempt < max_attempts => {
                info!(
                    url = %record.url,
                    attempt,
                    max_attempts,
                    error = %err,
                    "retrying site check"
                );
                attempt += 1;
            }
            Err(err) => {
                warn!(site = %record.name, url = %record.url, error = %err, "site is down");
                return CheckResult::new(record, CheckStatus::Down, err.to_string());
            }
        }
    }
}

/// Checks every site in chunks of `batch_size`. Checks inside a chunk run
/// concurrently; the next chunk starts once the whole chunk has finished.
/// The result order always matches `records`.
pub async fn collect_checks(
    prober: &dyn Prober,
    records: &[SiteRecord],
    batch_size: usize,
    max_attempts: u32,
) -> StatusSnapshot {
    let mut results = Vec::with_capacity(records.len());
    for chunk in records.chunks(batch_size.max(1)) {
        let batch = join_all(
            chunk
                .iter()
                .map(|record| check_with_retry(prober, record, max_attempts)),
        )
        .await;
        results.extend(batch);
    }
    results.into()
}
