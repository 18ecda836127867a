//! Live application configuration.
//!
//! [`ConfigStore`] owns the current [`AppConfig`] snapshot. Readers clone the
//! `Arc` and never hold the lock across an await; writers replace the whole
//! snapshot and notify config-change subscribers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use accounts_core::TranslationTable;
use anyhow::Context as _;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainConfig {
    pub env: String,
    pub server_name: String,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            server_name: "accounts".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationConfig {
    pub default_locale: String,
    pub available_locales: Vec<String>,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            default_locale: "en".to_string(),
            available_locales: vec!["en".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub token_confirmation_expiry_hours: u32,
    pub token_password_reset_expiry_hours: u32,
    pub access_token_expiry_web_hours: u32,
    /// HMAC secret for bearer tokens. Never sent to config listeners.
    #[serde(skip)]
    pub jwt_secret: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_confirmation_expiry_hours: 24,
            token_password_reset_expiry_hours: 24,
            access_token_expiry_web_hours: 24 * 7,
            jwt_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub admin_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub bucket: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bucket: "users".to_string(),
        }
    }
}

/// Everything handlers read at request time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub main: MainConfig,
    pub localization: LocalizationConfig,
    pub security: SecurityConfig,
    pub oauth: OAuthConfig,
    pub file: FileConfig,
}

impl AppConfig {
    #[must_use]
    pub fn is_dev(&self) -> bool {
        self.main.env == "dev" || self.main.env == "local"
    }
}

/// Read-mostly owner of the live [`AppConfig`].
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<AppConfig>>,
    changes: watch::Sender<Arc<AppConfig>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let (changes, _rx) = watch::channel(Arc::clone(&config));
        Self {
            current: RwLock::new(config),
            changes,
        }
    }

    /// Snapshot in effect right now.
    #[must_use]
    pub fn get(&self) -> Arc<AppConfig> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the snapshot and notifies subscribers.
    pub fn replace(&self, config: AppConfig) {
        let config = Arc::new(config);
        *self.current.write() = Arc::clone(&config);
        self.changes.send_replace(config);
    }

    /// Receiver that observes every later [`ConfigStore::replace`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppConfig>> {
        self.changes.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

/// Loads every `<locale>.json` file in `dir` (a flat `id -> template` map)
/// into a compiled table.
///
/// # Errors
///
/// Fails on unreadable files, malformed JSON, invalid templates, or when no
/// file exists for `default_locale`.
pub fn load_translations(dir: &Path, default_locale: &str) -> anyhow::Result<TranslationTable> {
    let mut raw: HashMap<String, HashMap<String, String>> = HashMap::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(locale) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let entries = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        raw.insert(locale.to_string(), entries);
    }
    anyhow::ensure!(
        raw.contains_key(default_locale),
        "no translations for default locale {default_locale} in {}",
        dir.display()
    );
    Ok(TranslationTable::compile(default_locale, &raw)?)
}
