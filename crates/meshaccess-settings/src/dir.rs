use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::config::StoreConfig;
use crate::error::{Result, SettingsError};
use crate::store::{in_subtree, SettingsStore};

const VALUE_SUFFIX: &str = ".val";
const TEMP_SUFFIX: &str = ".tmp";

/// Settings kept as one file per key in a single directory.
///
/// File names are the hex encoded key plus `.val`, so nested keys never
/// collide with their parents. Symlinks are refused.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    config: StoreConfig,
}

impl DirStore {
    /// Open or create a store directory with default limits.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open or create a store directory with explicit limits.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|err| SettingsError::Io(format!("{}: {err}", path.display())))?;
        let metadata = std::fs::symlink_metadata(path)
            .map_err(|err| SettingsError::Io(format!("{}: {err}", path.display())))?;
        if !metadata.is_dir() {
            return Err(SettingsError::Io(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        debug!(root = %path.display(), "opened settings directory");
        Ok(Self {
            root: path.to_path_buf(),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(SettingsError::InvalidKey("empty key".into()));
        }
        Ok(self
            .root
            .join(format!("{}{VALUE_SUFFIX}", hex::encode(key.as_bytes()))))
    }

    /// Keys of every entry, unsorted.
    fn entries(&self) -> Result<Vec<(String, PathBuf)>> {
        let dir = std::fs::read_dir(&self.root)
            .map_err(|err| SettingsError::Io(format!("{}: {err}", self.root.display())))?;

        let mut keys = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|err| SettingsError::Io(err.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(encoded) = file_name.strip_suffix(VALUE_SUFFIX) else {
                continue;
            };
            let key = match hex::decode(encoded).map(String::from_utf8) {
                Ok(Ok(key)) => key,
                _ => {
                    warn!(file = %file_name, "skipping unrecognized settings file");
                    continue;
                }
            };
            keys.push((key, entry.path()));
        }
        Ok(keys)
    }

    fn read_value(&self, key: &str, path: &Path) -> Result<Option<Vec<u8>>> {
        let path_metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SettingsError::Io(err.to_string())),
        };
        if path_metadata.file_type().is_symlink() {
            return Err(SettingsError::Io(format!(
                "refusing to read settings symlink: {key}"
            )));
        }
        if !path_metadata.is_file() {
            return Err(SettingsError::Io(format!("not a regular file: {key}")));
        }

        let file = std::fs::File::open(path)
            .map_err(|err| SettingsError::Io(format!("failed opening {key}: {err}")))?;
        let opened_metadata = file
            .metadata()
            .map_err(|err| SettingsError::Io(err.to_string()))?;

        #[cfg(unix)]
        {
            if !same_file_identity(&path_metadata, &opened_metadata) {
                return Err(SettingsError::Io(format!(
                    "settings file changed during load: {key}"
                )));
            }
        }

        let max = self.config.max_value_size;
        if opened_metadata.len() > max as u64 {
            return Err(SettingsError::ValueTooLarge {
                key: key.to_string(),
                size: opened_metadata.len() as usize,
                max,
            });
        }

        let read_limit = u64::try_from(max.saturating_add(1)).unwrap_or(u64::MAX);
        let mut value = Vec::new();
        file.take(read_limit)
            .read_to_end(&mut value)
            .map_err(|err| SettingsError::Io(format!("failed reading {key}: {err}")))?;
        if value.len() > max {
            return Err(SettingsError::ValueTooLarge {
                key: key.to_string(),
                size: value.len(),
                max,
            });
        }

        Ok(Some(value))
    }
}

impl SettingsStore for DirStore {
    fn save(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key)?;
        if value.len() > self.config.max_value_size {
            return Err(SettingsError::ValueTooLarge {
                key: key.to_string(),
                size: value.len(),
                max: self.config.max_value_size,
            });
        }

        if !path.exists() {
            let count = self.entries()?.len();
            if count >= self.config.max_entries {
                return Err(SettingsError::StoreFull {
                    max: self.config.max_entries,
                });
            }
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(TEMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, value)
            .map_err(|err| SettingsError::Io(format!("failed writing {key}: {err}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|err| SettingsError::Io(format!("failed writing {key}: {err}")))?;

        trace!(key, len = value.len(), "save");
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                trace!(key, "delete");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SettingsError::Io(format!("failed deleting {key}: {err}"))),
        }
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;
        self.read_value(key, &path)
    }

    fn load_subtree(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = self
            .entries()?
            .into_iter()
            .filter(|(key, _)| in_subtree(key, prefix))
            .collect::<Vec<_>>();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut values = Vec::with_capacity(entries.len());
        for (key, path) in entries {
            if let Some(value) = self.read_value(&key, &path)? {
                values.push((key, value));
            }
        }
        Ok(values)
    }
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}
