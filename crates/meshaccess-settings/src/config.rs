use serde::Deserialize;

/// Limits applied by [`crate::DirStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of entries kept in the store.
    pub max_entries: usize,
    /// Maximum bytes per stored value.
    pub max_value_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_value_size: 4096,
        }
    }
}
