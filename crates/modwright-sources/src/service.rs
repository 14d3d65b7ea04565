use std::collections::BTreeMap;

use modwright_catalog::SourceKind;
use modwright_core::identity::ORCHESTRATOR_NAME;
use modwright_core::{
    get_bool, set_bool, FlashMessage, FlashStore, PrefStore, UpdateError, PREF_API_TOKEN,
    PREF_COM_ERROR_FLAGGED,
};

use crate::http::{UpdateClient, RELEASE_WEB_BASE};
use crate::version_cache::VersionCache;

// The host's modules folder as it appears inside the staging area and inside
// aggregate bundle archives.
pub const MODULES_ARCHIVE_FOLDER: &str = "modules";

// The installed module's own answers, when it is installed at all. Every
// source variant prefers these over a remote lookup.
pub trait ModuleVersions {
    fn version(&self) -> String;
    fn latest_version(&self) -> String;
}

// Collaborators an update service consults. Constructed per invocation and
// passed by reference; nothing here is global.
pub struct SourceContext<'a> {
    pub client: &'a dyn UpdateClient,
    pub prefs: &'a mut dyn PrefStore,
    pub flash: &'a mut dyn FlashStore,
    pub cache: Option<&'a VersionCache>,
    pub installed: Option<&'a dyn ModuleVersions>,
}

impl SourceContext<'_> {
    fn api_token(&self) -> Option<String> {
        let token = self.prefs.get(PREF_API_TOKEN, "");
        (!token.is_empty()).then_some(token)
    }

    // One flash message per boot, no matter how many lookups fail.
    fn flag_communication_error(&mut self, service_label: &str) {
        if get_bool(self.prefs, PREF_COM_ERROR_FLAGGED) {
            return;
        }
        let _ = self.flash.push(FlashMessage {
            scope: ORCHESTRATOR_NAME.to_string(),
            level: "danger".to_string(),
            text: format!("Communication error with {service_label}"),
        });
        let _ = set_bool(self.prefs, PREF_COM_ERROR_FLAGGED, true);
    }
}

#[derive(Debug, Clone)]
pub enum UpdateService {
    Release(ReleaseSource),
    Aggregate(AggregateSource),
    Static(StaticSource),
}

#[derive(Debug, Clone)]
pub struct ReleaseSource {
    pub module_name: String,
    pub repository: String,
    pub tag_prefix: String,
    pub fetch_latest_from_remote: bool,
    pub no_release: bool,
    pub default_branch: String,
    pub is_theme: bool,
    pub category: String,
    pub folders_to_clean: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AggregateSource {
    pub module_name: String,
    pub members: BTreeMap<String, String>,
    pub download_url: String,
    pub documentation_url: String,
    pub category: String,
    pub folders_to_clean: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StaticSource {
    pub module_name: String,
    pub download_url: String,
    pub documentation_url: String,
    pub latest_version: String,
    pub is_theme: bool,
    pub category: String,
    pub folders_to_clean: Vec<String>,
}

impl UpdateService {
    pub fn module_name(&self) -> &str {
        match self {
            Self::Release(source) => &source.module_name,
            Self::Aggregate(source) => &source.module_name,
            Self::Static(source) => &source.module_name,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Release(_) => SourceKind::RepositoryRelease,
            Self::Aggregate(_) => SourceKind::AggregateSource,
            Self::Static(_) => SourceKind::StaticUrl,
        }
    }

    pub fn is_theme(&self) -> bool {
        match self {
            Self::Release(source) => source.is_theme,
            Self::Aggregate(_) => false,
            Self::Static(source) => source.is_theme,
        }
    }

    pub fn category(&self) -> &str {
        match self {
            Self::Release(source) => &source.category,
            Self::Aggregate(source) => &source.category,
            Self::Static(source) => &source.category,
        }
    }

    pub fn folders_to_clean(&self) -> &[String] {
        match self {
            Self::Release(source) => &source.folders_to_clean,
            Self::Aggregate(source) => &source.folders_to_clean,
            Self::Static(source) => &source.folders_to_clean,
        }
    }

    pub fn documentation_url(&self) -> String {
        match self {
            Self::Release(source) => format!("{RELEASE_WEB_BASE}/{}", source.repository),
            Self::Aggregate(source) => source.documentation_url.clone(),
            Self::Static(source) => source.documentation_url.clone(),
        }
    }

    // A source with no comparable version (no formal releases, or a bundle
    // with no version concept) skips the numeric check entirely.
    pub fn skips_version_check(&self) -> bool {
        match self {
            Self::Release(source) => source.no_release,
            Self::Aggregate(_) => true,
            Self::Static(_) => false,
        }
    }

    // Every module that must be re-staged when this one is acted on, as a
    // map from module name to the folder key expected inside the archive.
    // Aggregate bundles update as a set; the others update alone.
    pub fn modules_to_update(&self) -> BTreeMap<String, String> {
        match self {
            Self::Aggregate(source) => source.members.clone(),
            _ => {
                let mut map = BTreeMap::new();
                map.insert(
                    self.module_name().to_string(),
                    self.module_name().to_string(),
                );
                map
            }
        }
    }

    // Where the downloaded archive is extracted, relative to the upgrade
    // scratch directory. Aggregate bundles already ship a `modules/` top
    // folder; everything else is extracted into one so the staging tree
    // always ends up as `<upgrade>/modules/...`.
    pub fn unzip_folder(&self) -> &'static str {
        match self {
            Self::Aggregate(_) => "",
            _ => MODULES_ARCHIVE_FOLDER,
        }
    }

    // Empty means "unknown", which callers must treat as "no comparison
    // possible", not as "up to date".
    pub fn latest_version(&self, ctx: &mut SourceContext) -> String {
        match self {
            Self::Release(source) => source.latest_version(ctx),
            Self::Aggregate(_) => installed_latest_version(ctx),
            Self::Static(source) => {
                let from_module = installed_latest_version(ctx);
                if !from_module.is_empty() {
                    from_module
                } else {
                    source.latest_version.clone()
                }
            }
        }
    }

    pub fn current_version(&self, ctx: &SourceContext) -> String {
        ctx.installed
            .map(|module| module.version())
            .unwrap_or_default()
    }

    pub fn download_url(
        &self,
        version: &str,
        ctx: &mut SourceContext,
    ) -> Result<String, UpdateError> {
        match self {
            Self::Release(source) => source.download_url(version, ctx),
            Self::Aggregate(source) => Ok(source.download_url.clone()),
            Self::Static(source) => Ok(source.download_url.clone()),
        }
    }
}

fn installed_latest_version(ctx: &SourceContext) -> String {
    ctx.installed
        .map(|module| module.latest_version())
        .unwrap_or_default()
}

impl ReleaseSource {
    fn latest_version(&self, ctx: &mut SourceContext) -> String {
        if !self.fetch_latest_from_remote {
            let from_module = installed_latest_version(ctx);
            if !from_module.is_empty() {
                return from_module;
            }
        }

        // Head-of-branch sources have nothing comparable to report.
        if self.no_release {
            return String::new();
        }

        let cache = ctx.cache;
        match cache {
            Some(cache) => {
                cache.remember(&self.module_name, || self.fetch_remote_latest(ctx))
            }
            None => self.fetch_remote_latest(ctx),
        }
    }

    fn fetch_remote_latest(&self, ctx: &mut SourceContext) -> String {
        let token = ctx.api_token();
        match ctx.client.latest_release(&self.repository, token.as_deref()) {
            Ok(Some(info)) => info.tag,
            Ok(None) => String::new(),
            Err(_) => {
                ctx.flag_communication_error(SourceKind::RepositoryRelease.label());
                String::new()
            }
        }
    }

    fn download_url(&self, version: &str, ctx: &mut SourceContext) -> Result<String, UpdateError> {
        if self.no_release {
            return Ok(format!(
                "{RELEASE_WEB_BASE}/{}/archive/refs/heads/{}.zip",
                self.repository, self.default_branch
            ));
        }

        let tag = self.prefixed_tag(version);
        let token = ctx.api_token();
        let release = if tag.is_empty() {
            ctx.client.latest_release(&self.repository, token.as_deref())?
        } else {
            ctx.client
                .release_by_tag(&self.repository, &tag, token.as_deref())?
        };

        match release {
            Some(info) => Ok(info.asset_url.unwrap_or_else(|| {
                format!(
                    "{RELEASE_WEB_BASE}/{}/archive/refs/tags/{}.zip",
                    self.repository, info.tag
                )
            })),
            None => Ok(String::new()),
        }
    }

    // Release tags may carry a per-repository prefix the version string
    // lacks; versions pasted from release feeds may carry a trailing
    // newline.
    fn prefixed_tag(&self, version: &str) -> String {
        let version = version.trim_end_matches('\n');
        if version.is_empty() || self.tag_prefix.is_empty() {
            return version.to_string();
        }
        if version.len() > self.tag_prefix.len() && !version.starts_with(&self.tag_prefix) {
            return format!("{}{version}", self.tag_prefix);
        }
        version.to_string()
    }
}
