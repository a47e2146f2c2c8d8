//! Configuration types and the storage abstraction.
//!
//! Persistent storage differs per platform (flash sectors on the device, a
//! JSON file on a host), so the core only defines the [`ConfigStorage`]
//! trait and the serializable settings.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::capture::{XRATE_DEFAULT, XSAMP_DEFAULT};
use crate::error::SecurityError;
use crate::security::AuthMode;

/// Errors that can occur during configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested configuration was not found.
    NotFound(String),
    /// Failed to read configuration.
    ReadError(String),
    /// Failed to write configuration.
    WriteError(String),
    /// Configuration data is invalid.
    InvalidData(String),
    /// Storage is not available.
    StorageUnavailable(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Configuration not found: {}", key),
            ConfigError::ReadError(msg) => write!(f, "Read error: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Write error: {}", msg),
            ConfigError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            ConfigError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Abstract configuration storage.
///
/// All methods are synchronous so the same trait serves flash storage on the
/// device and files on a host.
pub trait ConfigStorage: Send + Sync {
    /// Load the instrument settings.
    fn load_settings(&self) -> Result<InstrumentSettings, ConfigError>;

    /// Save the instrument settings.
    fn save_settings(&self, settings: &InstrumentSettings) -> Result<(), ConfigError>;

    /// Load a value by key.
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError>;

    /// Save a value by key.
    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError>;

    /// Check if a key exists.
    fn has_key(&self, key: &str) -> bool;

    /// Delete a key.
    fn delete_key(&self, key: &str) -> Result<(), ConfigError>;

    /// Load settings, falling back to defaults when none are stored yet.
    fn load_or_default(&self) -> Result<InstrumentSettings, ConfigError> {
        match self.load_settings() {
            Err(ConfigError::NotFound(_)) => Ok(InstrumentSettings::default()),
            other => other,
        }
    }
}

/// Persisted instrument configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstrumentSettings {
    pub network: NetworkSettings,
    pub capture: CaptureSettings,
    pub http: HttpSettings,
}

/// Wireless network and addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkSettings {
    /// Auth mode name, e.g. `WPA2_AES_PSK`.
    pub security: String,
    pub ssid: String,
    pub passwd: String,
    /// Unit number, added to `ip_base` for static addressing.
    pub unit: u32,
    /// Base address; zero selects DHCP.
    pub ip_base: u32,
    pub gateway: u32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            security: AuthMode::default().name().to_string(),
            ssid: "testnet".to_string(),
            passwd: "testpass".to_string(),
            unit: 1,
            ip_base: 0,
            gateway: 0,
        }
    }
}

impl NetworkSettings {
    pub fn auth_mode(&self) -> Result<AuthMode, SecurityError> {
        self.security.parse()
    }
}

/// Capture defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    pub xsamp: usize,
    pub xrate: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            xsamp: XSAMP_DEFAULT,
            xrate: XRATE_DEFAULT,
        }
    }
}

/// Host HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpSettings {
    pub bind: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// In-memory storage for testing.
    struct MemoryConfigStorage {
        data: RwLock<HashMap<String, String>>,
    }

    impl MemoryConfigStorage {
        fn new() -> Self {
            Self {
                data: RwLock::new(HashMap::new()),
            }
        }
    }

    impl ConfigStorage for MemoryConfigStorage {
        fn load_settings(&self) -> Result<InstrumentSettings, ConfigError> {
            self.load_value("settings")
        }

        fn save_settings(&self, settings: &InstrumentSettings) -> Result<(), ConfigError> {
            self.save_value("settings", settings)
        }

        fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
            let data = self.data.read().unwrap();
            let json = data
                .get(key)
                .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidData(e.to_string()))
        }

        fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
            let json =
                serde_json::to_string(value).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            self.data.write().unwrap().insert(key.to_string(), json);
            Ok(())
        }

        fn has_key(&self, key: &str) -> bool {
            self.data.read().unwrap().contains_key(key)
        }

        fn delete_key(&self, key: &str) -> Result<(), ConfigError> {
            self.data.write().unwrap().remove(key);
            Ok(())
        }
    }

    #[test]
    fn test_defaults() {
        let settings = InstrumentSettings::default();
        assert_eq!(settings.network.security, "WPA2_WPA_MIXED_PSK");
        assert_eq!(settings.network.auth_mode(), Ok(AuthMode::Wpa2WpaMixedPsk));
        assert_eq!(settings.capture.xsamp, 1000);
        assert_eq!(settings.capture.xrate, 10_000);
    }

    #[test]
    fn test_settings_round_trip() {
        let storage = MemoryConfigStorage::new();
        assert!(!storage.has_key("settings"));
        assert_eq!(storage.load_or_default().unwrap(), InstrumentSettings::default());

        let mut settings = InstrumentSettings::default();
        settings.network.ssid = "lab".to_string();
        settings.capture.xsamp = 5000;
        storage.save_settings(&settings).unwrap();

        assert!(storage.has_key("settings"));
        assert_eq!(storage.load_settings().unwrap(), settings);

        storage.delete_key("settings").unwrap();
        assert!(matches!(
            storage.load_settings(),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"network":{"ssid":"field","ipBase":3232238858}}"#;
        let settings: InstrumentSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.network.ssid, "field");
        assert_eq!(settings.network.ip_base, 3_232_238_858);
        assert_eq!(settings.network.passwd, "testpass");
        assert_eq!(settings.capture, CaptureSettings::default());
    }

    #[test]
    fn test_invalid_data() {
        let storage = MemoryConfigStorage::new();
        storage
            .data
            .write()
            .unwrap()
            .insert("settings".to_string(), "not json".to_string());
        assert!(matches!(
            storage.load_settings(),
            Err(ConfigError::InvalidData(_))
        ));
    }
}
