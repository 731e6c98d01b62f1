//! User preference storage
//!
//! A key/value store for the handful of settings a user overrides between
//! runs (display name, exchange, model). Stored values are applied on top of
//! the config file at startup.

use crate::config::{ChatConfig, ConfigError, USER_SETTINGS};
use crate::error::ChatError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Default preference file, relative to the working directory
pub const DEFAULT_PREFS_FILE: &str = "relaychat-prefs.toml";

/// Environment variable overriding the preference file location
pub const PREFS_PATH_ENV: &str = "RELAYCHAT_PREFS";

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Failed to access preference file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse preference file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to write preference file: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unknown preference '{0}'")]
    UnknownKey(String),
    #[error("Invalid value for '{key}': {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: ConfigError,
    },
    #[error("Preference store lock poisoned")]
    Poisoned,
}

impl From<PreferenceError> for ChatError {
    fn from(error: PreferenceError) -> Self {
        ChatError::preferences(error.to_string())
    }
}

/// Key/value store for user preferences
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;

    /// Every stored preference, sorted by key
    fn all(&self) -> Result<BTreeMap<String, String>, PreferenceError>;
}

/// Reject keys `ChatConfig::apply_setting` would not understand
fn check_key(key: &str) -> Result<(), PreferenceError> {
    if USER_SETTINGS.contains(&key) {
        Ok(())
    } else {
        Err(PreferenceError::UnknownKey(key.to_string()))
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        let values = self.values.lock().map_err(|_| PreferenceError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        check_key(key)?;
        let mut values = self.values.lock().map_err(|_| PreferenceError::Poisoned)?;
        values.insert(key.to_string(), value.trim().to_string());
        Ok(())
    }

    fn all(&self) -> Result<BTreeMap<String, String>, PreferenceError> {
        let values = self.values.lock().map_err(|_| PreferenceError::Poisoned)?;
        Ok(values.clone())
    }
}

/// Flat TOML table on disk, rewritten on every `set`
#[derive(Debug)]
pub struct TomlFilePreferences {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlFilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Explicit path, else `$RELAYCHAT_PREFS`, else `relaychat-prefs.toml`
    pub fn locate(explicit: Option<&Path>) -> Self {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(PREFS_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFS_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, PreferenceError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }
}

impl PreferenceStore for TomlFilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        check_key(key)?;
        let _guard = self.write_lock.lock().map_err(|_| PreferenceError::Poisoned)?;

        let mut values = self.load()?;
        values.insert(key.to_string(), value.trim().to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string(&values)?)?;
        debug!(path = %self.path.display(), key, "Preference saved");
        Ok(())
    }

    fn all(&self) -> Result<BTreeMap<String, String>, PreferenceError> {
        self.load()
    }
}

/// Validate and store one preference against the config it will apply to
pub fn set_preference(
    store: &dyn PreferenceStore,
    config: &ChatConfig,
    key: &str,
    value: &str,
) -> Result<(), PreferenceError> {
    check_key(key)?;
    let mut probe = config.clone();
    probe
        .apply_setting(key, value)
        .map_err(|source| PreferenceError::InvalidValue {
            key: key.to_string(),
            source,
        })?;
    store.set(key, value)
}

/// Apply every stored preference to `config`, returning the keys applied
///
/// Unknown keys in the store are skipped; invalid values are an error so a
/// hand-edited file cannot silently produce a broken config.
pub fn apply_preferences(
    store: &dyn PreferenceStore,
    config: &mut ChatConfig,
) -> Result<Vec<String>, PreferenceError> {
    let mut applied = Vec::new();
    for (key, value) in store.all()? {
        if !USER_SETTINGS.contains(&key.as_str()) {
            debug!(key = %key, "Ignoring unknown stored preference");
            continue;
        }
        config
            .apply_setting(&key, &value)
            .map_err(|source| PreferenceError::InvalidValue {
                key: key.clone(),
                source,
            })?;
        applied.push(key);
    }

    if !applied.is_empty() {
        info!(keys = ?applied, "Applied stored preferences");
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> ChatConfig {
        ChatConfig::new("Alice", "mqtt://localhost:1883")
    }

    #[test]
    fn test_memory_store_get_set() {
        let store = MemoryPreferences::new();
        assert_eq!(store.get("session.name").unwrap(), None);

        store.set("session.name", "  Bob ").unwrap();
        assert_eq!(store.get("session.name").unwrap().as_deref(), Some("Bob"));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let store = MemoryPreferences::new();
        assert!(matches!(
            store.set("broker.broker_url", "mqtt://elsewhere"),
            Err(PreferenceError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("prefs.toml");

        let store = TomlFilePreferences::new(&path);
        assert!(store.all().unwrap().is_empty());
        store.set("llm.model", "qwen2.5-7b").unwrap();
        store.set("broker.exchange", "lobby").unwrap();

        let reopened = TomlFilePreferences::new(&path);
        assert_eq!(reopened.get("llm.model").unwrap().as_deref(), Some("qwen2.5-7b"));
        let all = reopened.all().unwrap();
        assert_eq!(
            all.keys().cloned().collect::<Vec<_>>(),
            vec!["broker.exchange".to_string(), "llm.model".to_string()]
        );
    }

    #[test]
    fn test_file_store_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let store = TomlFilePreferences::new(&path);
        assert!(matches!(store.all(), Err(PreferenceError::Parse(_))));
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let store = TomlFilePreferences::locate(Some(Path::new("/tmp/custom-prefs.toml")));
        assert_eq!(store.path(), Path::new("/tmp/custom-prefs.toml"));
    }

    #[test]
    fn test_apply_preferences() {
        let store = MemoryPreferences::new();
        store.set("session.name", "Bob").unwrap();
        store.set("llm.model", "mistral").unwrap();

        let mut config = config();
        let applied = apply_preferences(&store, &mut config).unwrap();

        assert_eq!(applied, vec!["llm.model".to_string(), "session.name".to_string()]);
        assert_eq!(config.session.name, "Bob");
        assert_eq!(config.llm.model, "mistral");
    }

    #[test]
    fn test_apply_skips_unknown_file_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "\"theme.color\" = \"dark\"\n\"session.name\" = \"Bob\"\n").unwrap();

        let mut config = config();
        let applied = apply_preferences(&TomlFilePreferences::new(&path), &mut config).unwrap();
        assert_eq!(applied, vec!["session.name".to_string()]);
        assert_eq!(config.session.name, "Bob");
    }

    #[test]
    fn test_invalid_stored_value_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "\"broker.exchange\" = \"no spaces allowed\"\n").unwrap();

        let mut config = config();
        let result = apply_preferences(&TomlFilePreferences::new(&path), &mut config);
        assert!(matches!(result, Err(PreferenceError::InvalidValue { .. })));
        assert_eq!(config.broker.exchange, "llmchat_exchange");
    }

    #[test]
    fn test_set_preference_validates_value() {
        let store = MemoryPreferences::new();
        let config = config();

        assert!(set_preference(&store, &config, "session.name", "   ").is_err());
        assert!(store.all().unwrap().is_empty());

        set_preference(&store, &config, "session.name", "Carol").unwrap();
        assert_eq!(store.get("session.name").unwrap().as_deref(), Some("Carol"));
    }

    #[test]
    fn test_error_converts_to_chat_error() {
        let error: ChatError = PreferenceError::UnknownKey("x".to_string()).into();
        assert!(error.to_string().contains("Unknown preference"));
    }
}
