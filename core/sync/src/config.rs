//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use revsync_common::{Error, Result};

/// Settings for a sync session.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic sync ticks.
    pub sync_interval_secs: u64,
    /// Retries for update requests that fail in transit.
    pub max_retries: u32,
    /// Commit uncommitted changes on every tick.
    pub auto_commit: bool,
    /// Pull remote changes on every tick.
    pub auto_update: bool,
    /// Authority type (e.g., "memory", "local").
    pub authority: String,
    /// Authority-specific configuration.
    pub authority_config: serde_json::Value,
}

impl SyncConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Read a config file.
    ///
    /// # Errors
    /// - File unreadable
    /// - Malformed JSON
    /// - Zero sync interval
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).await?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "sync_interval_secs must be positive".to_string(),
            ));
        }
        if self.authority.is_empty() {
            return Err(Error::InvalidInput("authority must be named".to_string()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            max_retries: 3,
            auto_commit: false,
            auto_update: true,
            authority: "local".to_string(),
            authority_config: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert!(!config.auto_commit);
        assert!(config.auto_update);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync.json");
        tokio::fs::write(&path, r#"{"auto_commit": true, "sync_interval_secs": 5}"#)
            .await
            .unwrap();

        let config = SyncConfig::load(&path).await.unwrap();
        assert!(config.auto_commit);
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync.json");
        let config = SyncConfig {
            authority: "memory".to_string(),
            ..SyncConfig::default()
        };

        config.save(&path).await.unwrap();
        assert_eq!(SyncConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_load_rejects_zero_interval() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync.json");
        tokio::fs::write(&path, r#"{"sync_interval_secs": 0}"#)
            .await
            .unwrap();

        assert!(matches!(
            SyncConfig::load(&path).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            SyncConfig::load(temp.path().join("absent.json")).await,
            Err(Error::Io(_))
        ));
    }
}
