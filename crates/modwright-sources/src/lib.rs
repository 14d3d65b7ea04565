mod factory;
mod http;
mod service;
mod version_cache;

pub use factory::make;
pub use http::{
    parse_release, HttpCatalogFetch, HttpUpdateClient, ReleaseInfo, UpdateClient, RELEASE_API_BASE,
    RELEASE_WEB_BASE,
};
pub use service::{
    AggregateSource, ModuleVersions, ReleaseSource, SourceContext, StaticSource, UpdateService,
    MODULES_ARCHIVE_FOLDER,
};
pub use version_cache::{VersionCache, LATEST_VERSION_TTL};

#[cfg(test)]
mod tests;
