use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default = "default_sites_file")]
    pub sites_file: PathBuf,
    #[serde(default = "default_refresh_interval", with = "duration_str")]
    pub refresh_interval: Duration,
    #[serde(default = "default_daily_refresh_at")]
    pub daily_refresh_at: String,
    #[serde(default = "default_startup_delay", with = "duration_str")]
    pub startup_delay: Duration,
    #[serde(default = "default_crud_debounce", with = "duration_str")]
    pub crud_debounce: Duration,
    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout", with = "duration_str")]
    pub timeout: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: default_probe_timeout(),
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.sites_file.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "поле sites_file не должно быть пустым".to_string(),
            ));
        }
        if self.refresh_interval < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "refresh_interval должно быть >= 1s".to_string(),
            ));
        }
        if !self.daily_refresh_at.trim().is_empty() && self.daily_refresh_time().is_none() {
            return Err(ConfigError::Validation(format!(
                "daily_refresh_at '{}' должно быть в формате HH:MM",
                self.daily_refresh_at
            )));
        }

        validate_probe(&self.probe)
    }

    pub fn daily_refresh_time(&self) -> Option<NaiveTime> {
        let raw = self.daily_refresh_at.trim();
        if raw.is_empty() {
            return None;
        }
        NaiveTime::parse_from_str(raw, "%H:%M").ok()
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_probe(cfg: &ProbeConfig) -> Result<(), ConfigError> {
    if cfg.timeout.is_zero() {
        return Err(ConfigError::Validation(
            "probe.timeout должен быть > 0".to_string(),
        ));
    }
    if cfg.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "probe.max_attempts должно быть >= 1".to_string(),
        ));
    }
    if cfg.batch_size < 1 {
        return Err(ConfigError::Validation(
            "probe.batch_size должно быть >= 1".to_string(),
        ));
    }
    if cfg.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "probe.user_agent не должен быть пустым".to_string(),
        ));
    }
    Ok(())
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

fn default_sites_file() -> PathBuf {
    PathBuf::from("data/sites.yaml")
}

const fn default_refresh_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_daily_refresh_at() -> String {
    "06:00".to_string()
}

const fn default_startup_delay() -> Duration {
    Duration::from_secs(2)
}

const fn default_crud_debounce() -> Duration {
    Duration::from_secs(1)
}

const fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_attempts() -> u32 {
    2
}

const fn default_batch_size() -> usize {
    10
}

fn default_user_agent() -> String {
    concat!("sitewatch/", env!("CARGO_PKG_VERSION")).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        serde_yaml::from_str("listen: 127.0.0.1:3000\n").expect("минимальный конфиг")
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = valid_config();
        cfg.validate().expect("минимальный конфиг валиден");

        assert_eq!(cfg.sites_file, PathBuf::from("data/sites.yaml"));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(1800));
        assert_eq!(cfg.crud_debounce, Duration::from_secs(1));
        assert_eq!(cfg.probe.timeout, Duration::from_secs(10));
        assert_eq!(cfg.probe.max_attempts, 2);
        assert_eq!(cfg.probe.batch_size, 10);
        assert_eq!(
            cfg.daily_refresh_time(),
            NaiveTime::from_hms_opt(6, 0, 0)
        );
    }

    #[test]
    fn example_config_is_valid() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("пример разбирается");
        cfg.validate().expect("пример валиден");
    }

    #[test]
    fn humantime_durations_are_parsed() {
        let cfg: Config = serde_yaml::from_str(
            "listen: 127.0.0.1:3000\nrefresh_interval: 5m\nprobe:\n  timeout: 1500ms\n",
        )
        .unwrap();
        assert_eq!(cfg.refresh_interval, Duration::from_secs(300));
        assert_eq!(cfg.probe.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn empty_daily_refresh_disables_it() {
        let mut cfg = valid_config();
        cfg.daily_refresh_at = String::new();
        cfg.validate().unwrap();
        assert!(cfg.daily_refresh_time().is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = valid_config();
        cfg.listen = "not-an-addr".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = valid_config();
        cfg.daily_refresh_at = "25:99".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = valid_config();
        cfg.probe.batch_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = valid_config();
        cfg.probe.max_attempts = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = valid_config();
        cfg.refresh_interval = Duration::from_millis(10);
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
