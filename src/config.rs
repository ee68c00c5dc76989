// ⚙️ Config - TOML settings, every field defaulted
//
//   local_db = "worklog-local.db"
//   remote_db = "worklog-remote.db"
//   lock_shards = 64
//
//   [tracker]
//   tracked_kinds = ["CO", "CM"]
//   balance_kind = "CO"

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::locks::DEFAULT_SHARDS;
use crate::tracker::TrackerPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub local_db: PathBuf,
    pub remote_db: PathBuf,
    pub lock_shards: usize,
    pub tracker: TrackerPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            local_db: PathBuf::from("worklog-local.db"),
            remote_db: PathBuf::from("worklog-remote.db"),
            lock_shards: DEFAULT_SHARDS,
            tracker: TrackerPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(SyncConfig::parse("").unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_partial_tracker_section() {
        let config = SyncConfig::parse(
            r#"
            remote_db = "/srv/worklog/remote.db"

            [tracker]
            tracked_kinds = ["CO", "CM"]
            "#,
        )
        .unwrap();

        assert_eq!(config.remote_db, PathBuf::from("/srv/worklog/remote.db"));
        assert_eq!(config.local_db, PathBuf::from("worklog-local.db"));
        assert!(config.tracker.tracks("CM"));
        assert_eq!(config.tracker.balance_kind, "CO");
        assert_eq!(config.lock_shards, 64);
    }

    #[test]
    fn test_load_missing_file() {
        let err = SyncConfig::load(Path::new("/nonexistent/worklog.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
