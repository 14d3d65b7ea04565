use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use modwright_core::identity::is_canonical;
use modwright_core::version;
use serde::Deserialize;

use crate::descriptor::{SourceDescriptor, SourceKind};

pub const CATALOG_SCHEMA_VERSION: u32 = 1;

const BUNDLED_CATALOG: &str = include_str!("../data/catalog.toml");

// The catalog configuration is normally fetched from a remote location so
// new modules can be published without shipping a new orchestrator build.
pub trait CatalogFetch {
    fn fetch_catalog(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    schema_version: u32,
    #[serde(default)]
    requires_app_version: String,
    #[serde(default)]
    modules: BTreeMap<String, SourceDescriptor>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    modules: BTreeMap<String, SourceDescriptor>,
}

impl Catalog {
    pub fn from_toml_str(raw: &str, app_version: &str) -> Result<Self> {
        let document: CatalogDocument =
            toml::from_str(raw).context("failed to parse module catalog")?;

        if document.schema_version > CATALOG_SCHEMA_VERSION {
            return Err(anyhow!(
                "catalog schema version {} is newer than the supported version {}",
                document.schema_version,
                CATALOG_SCHEMA_VERSION
            ));
        }
        if !document.requires_app_version.is_empty()
            && version::compare(app_version, &document.requires_app_version) == Ordering::Less
        {
            return Err(anyhow!(
                "catalog requires orchestrator version {} but this is {}",
                document.requires_app_version,
                app_version
            ));
        }

        for (module_name, descriptor) in &document.modules {
            if !is_canonical(module_name) {
                return Err(anyhow!(
                    "catalog key '{module_name}' is not a canonical module name"
                ));
            }
            descriptor.validate(module_name)?;
        }

        Ok(Self {
            modules: document.modules,
        })
    }

    // Prefer the remote catalog; fall back to the bundled copy when the
    // fetch fails or the remote document assumes a newer orchestrator.
    pub fn load(fetch: Option<&dyn CatalogFetch>, app_version: &str) -> Result<Self> {
        if let Some(fetch) = fetch {
            if let Ok(raw) = fetch.fetch_catalog() {
                if let Ok(catalog) = Self::from_toml_str(&raw, app_version) {
                    return Ok(catalog);
                }
            }
        }
        Self::bundled(app_version)
    }

    pub fn bundled(app_version: &str) -> Result<Self> {
        Self::from_toml_str(BUNDLED_CATALOG, app_version).context("bundled catalog is invalid")
    }

    pub fn descriptor(&self, module_name: &str) -> Option<&SourceDescriptor> {
        self.modules.get(module_name)
    }

    pub fn contains(&self, module_name: &str) -> bool {
        self.modules.contains_key(module_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SourceDescriptor)> {
        self.modules.iter()
    }

    pub fn members_of_kind(&self, kind: SourceKind) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, descriptor)| descriptor.kind == kind)
            .map(|(module_name, _)| module_name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
