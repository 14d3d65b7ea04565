use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const PREF_MODULE_VERSION: &str = "module_version";
pub const PREF_API_TOKEN: &str = "api_token";
pub const PREF_LAST_UPDATED_MODULE: &str = "last_updated_module";
pub const PREF_ROLLBACK_ONGOING: &str = "rollback_ongoing";
pub const PREF_COM_ERROR_FLAGGED: &str = "communication_error_flagged";
pub const PREF_MODULES_TO_SHOW: &str = "modules_to_show";

pub const SHOW_ALL: &str = "all";
pub const SHOW_INSTALLED: &str = "installed";
pub const SHOW_NOT_INSTALLED: &str = "not_installed";

// Orchestrator-scoped string preferences. The store is constructed once per
// invocation and passed by reference to every component that needs it; no
// component reads preferences through a global.
pub trait PrefStore {
    fn get(&self, key: &str, default: &str) -> String;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

pub fn get_bool(store: &dyn PrefStore, key: &str) -> bool {
    store.get(key, "0") == "1"
}

pub fn set_bool(store: &mut dyn PrefStore, key: &str, value: bool) -> Result<()> {
    store.set(key, if value { "1" } else { "0" })
}

#[derive(Debug)]
pub struct FilePrefStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePrefStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read preferences: {}", path.display()));
            }
        };

        let mut values = BTreeMap::new();
        for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            values.insert(key.to_string(), value.to_string());
        }

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_out(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut payload = String::new();
        for (key, value) in &self.values {
            payload.push_str(&format!("{key}={value}\n"));
        }
        fs::write(&self.path, payload.as_bytes())
            .with_context(|| format!("failed to write preferences: {}", self.path.display()))
    }
}

impl PrefStore for FilePrefStore {
    fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.write_out()
    }
}

#[derive(Debug, Default)]
pub struct MemoryPrefStore {
    values: BTreeMap<String, String>,
}

impl PrefStore for MemoryPrefStore {
    fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
