/// Errors raised by settings stores and key parsing.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The key does not name a known entry.
    #[error("unknown settings key: {0}")]
    NotFound(String),

    /// The key is not usable by this store.
    #[error("invalid settings key: {0}")]
    InvalidKey(String),

    /// The value exceeds the configured size limit.
    #[error("value for {key} too large ({size} bytes, max {max})")]
    ValueTooLarge { key: String, size: usize, max: usize },

    /// The store already holds the configured number of entries.
    #[error("settings store full ({max} entries)")]
    StoreFull { max: usize },

    /// Backing storage failed.
    #[error("settings i/o failed: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
