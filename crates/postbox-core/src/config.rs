use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CONFIG_FILE, DATABASE_FILE, MAX_WAIT_SLICE, MEDIA_DIR, STORY_EXPIRATION_SLACK_SECS,
    TIME_OFFSET_POLL_INTERVAL,
};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    #[serde(with = "duration_ms")]
    pub time_offset_poll_interval: Duration,
    pub story_expiration_slack_secs: i32,
    #[serde(with = "duration_ms")]
    pub max_wait_slice: Duration,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            database_file: DATABASE_FILE.to_string(),
            time_offset_poll_interval: TIME_OFFSET_POLL_INTERVAL,
            story_expiration_slack_secs: STORY_EXPIRATION_SLACK_SECS,
            max_wait_slice: MAX_WAIT_SLICE,
        }
    }

    /// Read `<data_dir>/postbox.json` if it exists, falling back to defaults.
    /// The data directory always comes from the argument.
    pub fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self, ConfigError> {
        let data_dir = data_dir.as_ref();
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::new(data_dir));
        }

        let contents = std::fs::read_to_string(&path)?;
        let mut config: CoreConfig = serde_json::from_str(&contents)?;
        config.data_dir = data_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Poll and wait intervals must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_offset_poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("time_offset_poll_interval"));
        }
        if self.max_wait_slice.is_zero() {
            return Err(ConfigError::ZeroDuration("max_wait_slice"));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join(MEDIA_DIR)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new("postbox_data")
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = CoreConfig::load(dir.path()).unwrap();
        assert_eq!(config, CoreConfig::new(dir.path()));
        assert_eq!(config.database_path(), dir.path().join(DATABASE_FILE));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"time_offset_poll_interval": 250, "story_expiration_slack_secs": 5}"#,
        )
        .unwrap();

        let config = CoreConfig::load(dir.path()).unwrap();
        assert_eq!(config.time_offset_poll_interval, Duration::from_millis(250));
        assert_eq!(config.story_expiration_slack_secs, 5);
        assert_eq!(config.max_wait_slice, MAX_WAIT_SLICE);
        assert_eq!(config.data_dir, dir.path());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        assert!(matches!(
            CoreConfig::load(dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_rejects_zero_intervals() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"max_wait_slice": 0}"#).unwrap();
        assert!(matches!(
            CoreConfig::load(dir.path()),
            Err(ConfigError::ZeroDuration("max_wait_slice"))
        ));

        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"time_offset_poll_interval": 0}"#).unwrap();
        assert!(matches!(
            CoreConfig::load(dir.path()),
            Err(ConfigError::ZeroDuration("time_offset_poll_interval"))
        ));
    }
}
