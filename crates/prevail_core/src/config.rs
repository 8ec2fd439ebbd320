//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the journal files.
    pub data_directory: PathBuf,

    /// How long a journal file stays open before the next write rotates it.
    pub rotation_interval: Duration,

    /// Number of journal entries replayed per state transaction at startup.
    pub replay_chunk_size: usize,

    /// Connection descriptor of an external transaction store.
    ///
    /// When set, the file journal is not used and the engine must be opened
    /// with [`Engine::open_with_log`](crate::Engine::open_with_log).
    pub external_store_url: Option<String>,

    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("database"),
            rotation_interval: Duration::from_secs(900), // 15 minutes
            replay_chunk_size: 1000,
            external_store_url: None,
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the journal directory.
    #[must_use]
    pub fn data_directory(mut self, path: impl AsRef<Path>) -> Self {
        self.data_directory = path.as_ref().to_path_buf();
        self
    }

    /// Sets the rotation interval.
    #[must_use]
    pub const fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    /// Sets the rotation interval in whole seconds.
    #[must_use]
    pub const fn rotation_interval_seconds(mut self, seconds: u64) -> Self {
        self.rotation_interval = Duration::from_secs(seconds);
        self
    }

    /// Sets the replay chunk size.
    #[must_use]
    pub const fn replay_chunk_size(mut self, size: usize) -> Self {
        self.replay_chunk_size = size;
        self
    }

    /// Sets the external store connection descriptor.
    #[must_use]
    pub fn external_store_url(mut self, url: impl Into<String>) -> Self {
        self.external_store_url = Some(url.into());
        self
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Checks the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the chunk size is zero or the data
    /// directory path is empty.
    pub fn validate(&self) -> CoreResult<()> {
        if self.replay_chunk_size == 0 {
            return Err(CoreError::config("replay_chunk_size must be at least 1"));
        }
        if self.data_directory.as_os_str().is_empty() {
            return Err(CoreError::config("data_directory must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.data_directory, PathBuf::from("database"));
        assert_eq!(config.rotation_interval, Duration::from_secs(900));
        assert_eq!(config.replay_chunk_size, 1000);
        assert!(config.external_store_url.is_none());
        assert!(config.create_if_missing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .data_directory("db")
            .rotation_interval_seconds(3600)
            .replay_chunk_size(2)
            .create_if_missing(false);

        assert_eq!(config.data_directory, PathBuf::from("db"));
        assert_eq!(config.rotation_interval, Duration::from_secs(3600));
        assert_eq!(config.replay_chunk_size, 2);
        assert!(!config.create_if_missing);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = Config::new().replay_chunk_size(0);
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn empty_directory_is_rejected() {
        let config = Config::new().data_directory("");
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }
}
