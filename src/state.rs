use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub manual_check: bool,
}

#[cfg(test)]
impl SiteRecord {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            manual_check: false,
        }
    }

    pub fn manual(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            manual_check: true,
            ..Self::new(name, url)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
    Caution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    pub url: String,
    pub status: CheckStatus,
    pub error: String,
    pub manual_check: bool,
}

impl CheckResult {
    pub fn new(record: &SiteRecord, status: CheckStatus, error: impl Into<String>) -> Self {
        Self {
            name: record.name.clone(),
            url: record.url.clone(),
            status,
            error: error.into(),
            manual_check: record.manual_check,
        }
    }
}

pub type StatusSnapshot = Arc<[CheckResult]>;

pub fn empty_snapshot() -> StatusSnapshot {
    Arc::from(Vec::new())
}

#[derive(Debug, Clone)]
pub struct CacheState {
    pub snapshot: StatusSnapshot,
    pub last_update: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub ready: bool,
    pub queued: bool,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            snapshot: empty_snapshot(),
            last_update: None,
            in_progress: false,
            ready: false,
            queued: false,
        }
    }
}

impl CacheState {
    pub fn replace_snapshot(&mut self, snapshot: StatusSnapshot, now: DateTime<Utc>) {
        self.snapshot = snapshot;
        self.last_update = Some(now);
        self.ready = true;
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_results(&self.snapshot)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub up: usize,
    pub down: usize,
    pub caution: usize,
}

impl StatusCounts {
    pub fn from_results(results: &[CheckResult]) -> Self {
        results.iter().fold(Self::default(), |mut acc, r| {
            match r.status {
                CheckStatus::Up => acc.up += 1,
                CheckStatus::Down => acc.down += 1,
                CheckStatus::Caution => acc.caution += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.up + self.down + self.caution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_result_serializes_with_camel_case_fields() {
        let record = SiteRecord::manual("Intranet", "http://intranet.test");
        let result = CheckResult::new(&record, CheckStatus::Caution, "Manual check required");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "caution");
        assert_eq!(json["manualCheck"], true);
        assert_eq!(json["error"], "Manual check required");
    }

    #[test]
    fn site_record_manual_check_defaults_to_false() {
        let record: SiteRecord =
            serde_json::from_str(r#"{"name":"A","url":"http://a.test"}"#).unwrap();
        assert!(!record.manual_check);
    }

    #[test]
    fn replace_snapshot_marks_ready() {
        let mut state = CacheState::default();
        assert!(!state.ready);

        let record = SiteRecord::new("A", "http://a.test");
        let snapshot: StatusSnapshot =
            Arc::from(vec![CheckResult::new(&record, CheckStatus::Up, "Site is up")]);
        state.replace_snapshot(snapshot, Utc::now());

        assert!(state.ready);
        assert!(state.last_update.is_some());
        assert_eq!(
            state.counts(),
            StatusCounts {
                up: 1,
                down: 0,
                caution: 0
            }
        );
    }
}
