use std::collections::BTreeMap;

use tracing::trace;

use crate::error::Result;
use crate::store::{in_subtree, SettingsStore};

/// Settings kept in memory, lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }
}

impl SettingsStore for MemStore {
    fn save(&mut self, key: &str, value: &[u8]) -> Result<()> {
        trace!(key, len = value.len(), "save");
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        trace!(key, "delete");
        self.entries.remove(key);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn load_subtree(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| in_subtree(key, prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
