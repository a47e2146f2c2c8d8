//! Configuration storage backed by JSON files.
//!
//! Each key is stored as `<dir>/<key>.json`; the instrument settings live
//! under the `settings` key.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use wicap_core::{ConfigError, ConfigStorage, InstrumentSettings};

const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    dir: PathBuf,
}

impl FileConfigStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load_settings(&self) -> Result<InstrumentSettings, ConfigError> {
        self.load_value(SETTINGS_KEY)
    }

    fn save_settings(&self, settings: &InstrumentSettings) -> Result<(), ConfigError> {
        self.save_value(SETTINGS_KEY, settings)
    }

    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let json = fs::read_to_string(self.path(key)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfigError::NotFound(key.to_string()),
            _ => ConfigError::ReadError(e.to_string()),
        })?;
        serde_json::from_str(&json).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| ConfigError::StorageUnavailable(e.to_string()))?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        fs::write(self.path(key), json).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        tracing::debug!("Saved {} to {}", key, self.dir.display());
        Ok(())
    }

    fn has_key(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    fn delete_key(&self, key: &str) -> Result<(), ConfigError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::WriteError(e.to_string())),
        }
    }
}
