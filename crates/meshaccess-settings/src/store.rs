use crate::error::Result;

/// Persistent key-value storage.
///
/// Keys are slash separated paths. Saving an empty value keeps the key with
/// no bytes; readers treat that the same as an absent key.
pub trait SettingsStore: Send {
    fn save(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete(&mut self, key: &str) -> Result<()>;

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Every entry at or below `prefix`, sorted by key.
    fn load_subtree(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

/// True if `key` is `prefix` itself or a path below it.
pub fn in_subtree(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
        None => false,
    }
}
