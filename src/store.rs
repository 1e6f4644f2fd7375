use crate::state::SiteRecord;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read site store {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to write site store {path}: {reason}")]
    Write { path: String, reason: String },
    #[error("a site with URL {0} already exists")]
    Duplicate(String),
    #[error("no site with URL {0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
}

#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn read(&self) -> Result<Vec<SiteRecord>, StoreError>;
    async fn write(&self, records: &[SiteRecord]) -> Result<(), StoreError>;
}

// Mutations run under write_lock.
pub struct SiteStore {
    backend: Arc<dyn RecordBackend>,
    write_lock: Mutex<()>,
}

impl SiteStore {
    pub fn new(backend: Arc<dyn RecordBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<SiteRecord>, StoreError> {
        self.backend.read().await
    }

    pub async fn find(&self, url: &str) -> Result<Option<SiteRecord>, StoreError> {
        Ok(self.list().await?.into_iter().find(|r| r.url == url))
    }

    pub async fn add(&self, record: SiteRecord) -> Result<SiteRecord, StoreError> {
        let record = validate_record(record)?;

        let _guard = self.write_lock.lock().await;
        let mut records = self.backend.read().await?;
        if records.iter().any(|r| r.url == record.url) {
            return Err(StoreError::Duplicate(record.url));
        }
        records.push(record.clone());
        self.backend.write(&records).await?;

        info!(
            site = %record.name,
            url = %record.url,
            manual_check = record.manual_check,
            "site added"
        );
        Ok(record)
    }

    pub async fn remove(&self, url: &str) -> Result<SiteRecord, StoreError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StoreError::Validation("URL is required".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let mut records = self.backend.read().await?;
        let idx = records
            .iter()
            .position(|r| r.url == url)
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        let removed = records.remove(idx);
        self.backend.write(&records).await?;

        info!(site = %removed.name, url = %removed.url, "site removed");
        Ok(removed)
    }
}

fn validate_record(record: SiteRecord) -> Result<SiteRecord, StoreError> {
    let name = record.name.trim();
    let url = record.url.trim();
    if name.is_empty() || url.is_empty() {
        return Err(StoreError::Validation("Name and URL are required".to_string()));
    }

    let parsed = Url::parse(url)
        .map_err(|err| StoreError::Validation(format!("invalid URL {url}: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StoreError::Validation(format!(
            "URL must use http or https, got {}",
            parsed.scheme()
        )));
    }

    Ok(SiteRecord {
        name: name.to_string(),
        url: url.to_string(),
        manual_check: record.manual_check,
    })
}

#[derive(Debug, Deserialize, Serialize)]
struct SiteRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "ManualCheck", default, with = "yes_no")]
    manual_check: bool,
}

impl From<SiteRow> for SiteRecord {
    fn from(row: SiteRow) -> Self {
        Self {
            name: row.name,
            url: row.url,
            manual_check: row.manual_check,
        }
    }
}

impl From<&SiteRecord> for SiteRow {
    fn from(record: &SiteRecord) -> Self {
        Self {
            name: record.name.clone(),
            url: record.url.clone(),
            manual_check: record.manual_check,
        }
    }
}

mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "Yes" } else { "No" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Option::<Flag>::deserialize(deserializer)? {
            None => Ok(false),
            Some(Flag::Bool(v)) => Ok(v),
            Some(Flag::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" => Ok(true),
                "no" | "n" | "false" | "" => Ok(false),
                other => Err(serde::de::Error::custom(format!(
                    "ManualCheck must be Yes or No, got '{other}'"
                ))),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct YamlFileBackend {
    path: PathBuf,
}

impl YamlFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl RecordBackend for YamlFileBackend {
    async fn read(&self) -> Result<Vec<SiteRecord>, StoreError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::Read {
                    path: self.display(),
                    reason: err.to_string(),
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<SiteRow> = serde_yaml::from_str(&text).map_err(|err| StoreError::Read {
            path: self.display(),
            reason: err.to_string(),
        })?;
        Ok(rows.into_iter().map(SiteRecord::from).collect())
    }

    async fn write(&self, records: &[SiteRecord]) -> Result<(), StoreError> {
        let write_err = |reason: String| StoreError::Write {
            path: self.display(),
            reason,
        };

        let rows: Vec<SiteRow> = records.iter().map(SiteRow::from).collect();
        let text = serde_yaml::to_string(&rows).map_err(|err| write_err(err.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| write_err(err.to_string()))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|err| write_err(err.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| write_err(err.to_string()))
    }
}

#[cfg(test)]
pub use memory::MemoryBackend;
