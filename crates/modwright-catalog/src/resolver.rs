use std::collections::BTreeMap;

use crate::config::Catalog;

pub const DEFAULT_LOCALE: &str = "en-US";

// Some modules ship without a real title; that sentinel must never be used
// as a resolution key.
pub const PLACEHOLDER_TITLE: &str = "Module title";

// The view of an installed module the resolver needs. Locale-dependent
// strings are plain accessors so resolution never mutates ambient state.
pub trait InstalledModuleInfo {
    fn module_name(&self) -> &str;
    fn title_in(&self, locale: &str) -> String;
    fn description_in(&self, locale: &str) -> String;
}

// Installation folder names are not stable: the same module may be unpacked
// under a different folder than the catalog assumes. Resolution falls back
// from the folder-derived name to the default-locale title and description
// strings the catalog ships.
#[derive(Debug)]
pub struct IdentityResolver {
    titles: BTreeMap<String, String>,
    descriptions: BTreeMap<String, String>,
}

impl IdentityResolver {
    pub fn new(catalog: &Catalog) -> Self {
        let mut titles = BTreeMap::new();
        let mut descriptions = BTreeMap::new();

        for (module_name, descriptor) in catalog.iter() {
            if !descriptor.title.is_empty() && descriptor.title != PLACEHOLDER_TITLE {
                titles
                    .entry(descriptor.title.clone())
                    .or_insert_with(|| module_name.clone());
            }
            if !descriptor.description.is_empty() {
                descriptions
                    .entry(descriptor.description.clone())
                    .or_insert_with(|| module_name.clone());
            }
        }

        Self {
            titles,
            descriptions,
        }
    }

    // First match wins: exact catalog key, then default-locale title, then
    // default-locale description. None means "no update source known" and
    // is not an error.
    pub fn resolve(&self, catalog: &Catalog, module: &dyn InstalledModuleInfo) -> Option<String> {
        if catalog.contains(module.module_name()) {
            return Some(module.module_name().to_string());
        }

        let title = module.title_in(DEFAULT_LOCALE);
        if !title.is_empty() && title != PLACEHOLDER_TITLE {
            if let Some(module_name) = self.titles.get(&title) {
                return Some(module_name.clone());
            }
        }

        let description = module.description_in(DEFAULT_LOCALE);
        if !description.is_empty() {
            if let Some(module_name) = self.descriptions.get(&description) {
                return Some(module_name.clone());
            }
        }

        None
    }
}
