mod config;
mod descriptor;
mod resolver;

pub use config::{Catalog, CatalogFetch, CATALOG_SCHEMA_VERSION};
pub use descriptor::{SourceDescriptor, SourceKind};
pub use resolver::{IdentityResolver, InstalledModuleInfo, DEFAULT_LOCALE, PLACEHOLDER_TITLE};
