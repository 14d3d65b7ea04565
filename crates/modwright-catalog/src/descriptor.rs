use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    RepositoryRelease,
    AggregateSource,
    StaticUrl,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::RepositoryRelease => "release host",
            Self::AggregateSource => "bundle host",
            Self::StaticUrl => "download host",
        }
    }
}

// One catalog entry: which source kind locates a module's updates, plus the
// kind-specific parameters and the default-locale strings the identity
// resolver matches against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub tag_prefix: String,
    #[serde(default)]
    pub fetch_latest_from_remote: bool,
    #[serde(default)]
    pub no_release: bool,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub documentation_url: String,
    #[serde(default)]
    pub latest_version: String,
    #[serde(default)]
    pub is_theme: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub folders_to_clean: Vec<String>,
}

impl SourceDescriptor {
    pub fn validate(&self, module_name: &str) -> Result<()> {
        match self.kind {
            SourceKind::RepositoryRelease => {
                if self.repository.is_empty() {
                    return Err(anyhow!(
                        "descriptor for '{module_name}' is missing 'repository'"
                    ));
                }
                if self.no_release && self.default_branch.is_empty() {
                    return Err(anyhow!(
                        "descriptor for '{module_name}' sets 'no_release' without 'default_branch'"
                    ));
                }
            }
            SourceKind::AggregateSource | SourceKind::StaticUrl => {
                if self.download_url.is_empty() {
                    return Err(anyhow!(
                        "descriptor for '{module_name}' is missing 'download_url'"
                    ));
                }
            }
        }
        Ok(())
    }
}
