//! Persistent Bluetooth-name to model-name cache.
//!
//! Lovense toys do not report their model, so the user has to pick one once;
//! the cache remembers the choice between sessions. Disk failures are logged
//! and swallowed, the in-memory view always stays usable.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

pub struct ModelCache {
    path: Option<PathBuf>,
    default_model: String,
    entries: Mutex<HashMap<String, String>>,
}

impl ModelCache {
    /// Load the cache from `path`, creating the file if necessary. With
    /// `None` the cache is memory-only.
    pub fn new(path: Option<PathBuf>, default_model: impl Into<String>) -> Self {
        let cache = Self {
            path,
            default_model: default_model.into(),
            entries: Mutex::new(HashMap::new()),
        };
        cache.load();
        info!(
            "initialized model cache with {} entries from {:?} (default model: {})",
            cache.entries.lock().unwrap().len(),
            cache.path,
            cache.default_model
        );
        cache
    }

    /// Conventional location under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("toyhub");
        path.push("models.json");
        Some(path)
    }

    /// Cached model name for a Bluetooth name, or the configured default.
    pub fn get(&self, bluetooth_name: &str) -> String {
        let model = self
            .entries
            .lock()
            .unwrap()
            .get(bluetooth_name)
            .cloned()
            .unwrap_or_else(|| self.default_model.clone());
        debug!("model cache resolved {bluetooth_name} -> {model}");
        model
    }

    /// Merge entries and persist. Disk errors are logged, never returned; the
    /// in-memory cache is updated regardless.
    pub fn update(&self, updates: HashMap<String, String>) {
        info!("updating model cache with {updates:?}");
        let snapshot = {
            let mut entries = self.entries.lock().unwrap();
            entries.extend(updates);
            entries.clone()
        };
        let Some(path) = &self.path else { return };
        if let Err(error) = Self::write_file(path, &snapshot) {
            warn!("error writing model cache: {error:#}");
        }
    }

    fn load(&self) {
        let Some(path) = &self.path else { return };
        match Self::read_file(path) {
            Ok(entries) => *self.entries.lock().unwrap() = entries,
            Err(error) => warn!("error reading model cache: {error:#}"),
        }
    }

    fn read_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(path, "{}")?;
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_file(path: &Path, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}
