/// Failure of the underlying storage. Fatal to the engine: the running
/// transaction is rolled back and the postbox refuses further work.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a transaction that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostboxError {
    #[error("Postbox storage failed: {message}")]
    Fatal { message: String },

    #[error("Postbox is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At most one summary tag may be configured, got {0:#x}")]
    MultipleSummaryTags(u32),

    #[error("Tags {0:#x} are not declared as existing message tags")]
    UnknownTags(u32),

    #[error("Config value {0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
