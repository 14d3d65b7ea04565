use std::collections::BTreeMap;
use std::fs;
use std::io;

use anyhow::{Context, Result};
use modwright_catalog::{InstalledModuleInfo, DEFAULT_LOCALE};
use modwright_core::identity::folder_from_identity;
use modwright_sources::ModuleVersions;
use serde::Deserialize;

use crate::layout::AppLayout;

pub const MODULE_MANIFEST: &str = "module.toml";

// The manifest every installed module ships in its installation folder. The
// per-locale tables keep title and description lookups pure.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub latest_version: String,
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub title: BTreeMap<String, String>,
    #[serde(default)]
    pub description: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct InstalledModule {
    pub folder: String,
    pub manifest: ModuleManifest,
}

impl InstalledModule {
    fn localized(&self, table: &BTreeMap<String, String>, locale: &str) -> String {
        if let Some(text) = table.get(locale) {
            return text.clone();
        }
        table.get(DEFAULT_LOCALE).cloned().unwrap_or_default()
    }
}

impl InstalledModuleInfo for InstalledModule {
    fn module_name(&self) -> &str {
        &self.manifest.name
    }

    fn title_in(&self, locale: &str) -> String {
        self.localized(&self.manifest.title, locale)
    }

    fn description_in(&self, locale: &str) -> String {
        self.localized(&self.manifest.description, locale)
    }
}

impl ModuleVersions for InstalledModule {
    fn version(&self) -> String {
        self.manifest.version.clone()
    }

    fn latest_version(&self) -> String {
        self.manifest.latest_version.clone()
    }
}

// The host's module registry, backed by the modules directory.
#[derive(Debug)]
pub struct ModuleRegistry<'a> {
    layout: &'a AppLayout,
}

impl<'a> ModuleRegistry<'a> {
    pub fn new(layout: &'a AppLayout) -> Self {
        Self { layout }
    }

    pub fn is_installed(&self, module_name: &str) -> bool {
        self.layout
            .module_dir(&folder_from_identity(module_name))
            .join(MODULE_MANIFEST)
            .exists()
    }

    pub fn find(&self, module_name: &str) -> Result<Option<InstalledModule>> {
        self.load_folder(&folder_from_identity(module_name))
    }

    pub fn load_folder(&self, folder: &str) -> Result<Option<InstalledModule>> {
        let manifest_path = self.layout.module_dir(folder).join(MODULE_MANIFEST);
        let raw = match fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read module manifest: {}", manifest_path.display())
                });
            }
        };

        let manifest: ModuleManifest = toml::from_str(&raw).with_context(|| {
            format!("failed to parse module manifest: {}", manifest_path.display())
        })?;

        Ok(Some(InstalledModule {
            folder: folder.to_string(),
            manifest,
        }))
    }

    // Broken installations are skipped here; `probe` reports what is wrong
    // with a specific one.
    pub fn all(&self) -> Result<Vec<InstalledModule>> {
        let modules_dir = self.layout.modules_dir();
        if !modules_dir.exists() {
            return Ok(Vec::new());
        }

        let mut modules = Vec::new();
        for entry in fs::read_dir(&modules_dir)
            .with_context(|| format!("failed to read modules dir: {}", modules_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().to_string();
            if let Ok(Some(module)) = self.load_folder(&folder) {
                modules.push(module);
            }
        }

        modules.sort_by(|a, b| a.folder.cmp(&b.folder));
        Ok(modules)
    }

    // Attempts to load the module the way the host would at boot. An empty
    // result means healthy; anything else is the fault text.
    pub fn probe(&self, module_name: &str) -> String {
        let folder = folder_from_identity(module_name);
        let module_dir = self.layout.module_dir(&folder);
        if !module_dir.exists() {
            return format!("installation folder '{folder}' is missing");
        }

        let manifest_path = module_dir.join(MODULE_MANIFEST);
        let raw = match fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(err) => return format!("module manifest is unreadable: {err}"),
        };

        let manifest: ModuleManifest = match toml::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(err) => return format!("module manifest is invalid: {err}"),
        };

        if manifest.name != module_name {
            return format!(
                "module manifest declares '{}' but is installed as '{module_name}'",
                manifest.name
            );
        }
        if manifest.version.trim().is_empty() {
            return "module manifest declares no version".to_string();
        }
        if !manifest.entry.is_empty() && !module_dir.join(&manifest.entry).exists() {
            return format!("module entry point '{}' is missing", manifest.entry);
        }

        String::new()
    }
}
