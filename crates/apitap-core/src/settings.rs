//! Persisted inspector settings
//!
//! The inspector UI's key/value settings, surviving across daemon runs as a
//! JSON file under the platform data directory. A missing or unreadable file
//! yields defaults. `dark_mode` and `saved_filters` are reserved by the UI
//! and round-trip unused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{AppError, Result};

/// Default settings values.
pub mod defaults {
    /// Clear captured requests when the active tab navigates
    pub const CLEAR_ON_TAB_REFRESH: bool = true;

    /// Settings file name under the data directory
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Data directory name
    pub const APP_DIR: &str = "apitap";
}

/// Inspector settings, camelCase on the wire to match the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectorSettings {
    pub clear_on_tab_refresh: bool,
    /// Reserved by the UI, unimplemented
    pub dark_mode: bool,
    /// Reserved by the UI, unused by current filtering
    pub saved_filters: Vec<String>,
}

impl Default for InspectorSettings {
    fn default() -> Self {
        Self {
            clear_on_tab_refresh: defaults::CLEAR_ON_TAB_REFRESH,
            dark_mode: false,
            saved_filters: Vec::new(),
        }
    }
}

/// Settings store: cached in memory, persisted on every update.
#[derive(Clone)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    cached: Arc<Mutex<InspectorSettings>>,
}

impl SettingsStore {
    /// Open (or initialize) the settings file at `path`.
    pub fn open(path: PathBuf) -> Self {
        let settings = load_from(&path);
        Self {
            path: Some(path),
            cached: Arc::new(Mutex::new(settings)),
        }
    }

    /// Open the settings file at the default platform location.
    pub fn open_default() -> Self {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(defaults::APP_DIR);
        path.push(defaults::SETTINGS_FILE);
        Self::open(path)
    }

    /// In-memory store that never touches disk, for tests and dry runs.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            cached: Arc::new(Mutex::new(InspectorSettings::default())),
        }
    }

    pub async fn get(&self) -> InspectorSettings {
        self.cached.lock().await.clone()
    }

    pub async fn clear_on_tab_refresh(&self) -> bool {
        self.cached.lock().await.clear_on_tab_refresh
    }

    /// Replace the settings wholesale and persist them.
    pub async fn replace(&self, settings: InspectorSettings) -> Result<()> {
        let mut cached = self.cached.lock().await;
        *cached = settings;
        self.persist(&cached)
    }

    fn persist(&self, settings: &InspectorSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::SettingsError(format!("create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, json)
            .map_err(|e| AppError::SettingsError(format!("write {}: {e}", path.display())))
    }
}

fn load_from(path: &Path) -> InspectorSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("settings file {} unreadable, using defaults: {err}", path.display());
                InspectorSettings::default()
            }
        },
        Err(_) => InspectorSettings::default(),
    }
}
