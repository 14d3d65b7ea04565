use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use modwright_catalog::{Catalog, SourceKind};
use modwright_core::{
    get_bool, FlashStore, MemoryFlashStore, MemoryPrefStore, PrefStore, UpdateError,
    PREF_API_TOKEN, PREF_COM_ERROR_FLAGGED,
};

use crate::{
    make, parse_release, ModuleVersions, ReleaseInfo, SourceContext, UpdateClient, UpdateService,
    VersionCache, MODULES_ARCHIVE_FOLDER,
};

const APP_VERSION: &str = "0.4.0";

fn test_dir(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    path.push(format!(
        "modwright-sources-tests-{label}-{}-{}",
        std::process::id(),
        nanos
    ));
    path
}

fn sample_catalog() -> Catalog {
    let raw = r#"
schema_version = 1

[modules._alpha_]
kind = "repository-release"
repository = "acme/alpha"
tag_prefix = "v"
title = "Alpha charts"

[modules._nightly_]
kind = "repository-release"
repository = "acme/nightly"
no_release = true
default_branch = "main"
title = "Nightly tools"

[modules._fixed_]
kind = "static-url"
download_url = "https://downloads.test/fixed.zip"
documentation_url = "https://downloads.test/fixed"
latest_version = "3.1.0"
title = "Fixed download"

[modules._bundle-one_]
kind = "aggregate-source"
download_url = "https://downloads.test/bundle.zip"
title = "Bundle one"

[modules._bundle-two_]
kind = "aggregate-source"
download_url = "https://downloads.test/bundle.zip"
title = "Bundle two"
"#;
    Catalog::from_toml_str(raw, APP_VERSION).expect("catalog must parse")
}

#[derive(Default)]
struct FakeClient {
    latest: BTreeMap<String, Option<ReleaseInfo>>,
    by_tag: BTreeMap<(String, String), Option<ReleaseInfo>>,
    fail: bool,
    calls: RefCell<Vec<String>>,
    tokens: RefCell<Vec<Option<String>>>,
}

impl FakeClient {
    fn with_latest(repository: &str, info: ReleaseInfo) -> Self {
        let mut client = Self::default();
        client.latest.insert(repository.to_string(), Some(info));
        client
    }
}

impl UpdateClient for FakeClient {
    fn latest_release(
        &self,
        repository: &str,
        token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError> {
        self.calls.borrow_mut().push(format!("latest:{repository}"));
        self.tokens.borrow_mut().push(token.map(ToString::to_string));
        if self.fail {
            return Err(UpdateError::communication("release host", "rate limited"));
        }
        Ok(self.latest.get(repository).cloned().flatten())
    }

    fn release_by_tag(
        &self,
        repository: &str,
        tag: &str,
        token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError> {
        self.calls
            .borrow_mut()
            .push(format!("tag:{repository}:{tag}"));
        self.tokens.borrow_mut().push(token.map(ToString::to_string));
        if self.fail {
            return Err(UpdateError::communication("release host", "rate limited"));
        }
        Ok(self
            .by_tag
            .get(&(repository.to_string(), tag.to_string()))
            .cloned()
            .flatten())
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, UpdateError> {
        self.calls.borrow_mut().push(format!("download:{url}"));
        fs::write(destination, b"payload")
            .map_err(|err| UpdateError::staging(err.to_string()))?;
        Ok(7)
    }
}

struct FakeModule {
    version: String,
    latest_version: String,
}

impl ModuleVersions for FakeModule {
    fn version(&self) -> String {
        self.version.clone()
    }

    fn latest_version(&self) -> String {
        self.latest_version.clone()
    }
}

#[test]
fn parse_release_extracts_tag_and_first_asset() {
    let payload = serde_json::json!({
        "tag_name": "v2.0.0",
        "assets": [
            {"browser_download_url": "https://downloads.test/alpha-2.0.0.zip"},
            {"browser_download_url": "https://downloads.test/alpha-2.0.0.tar.gz"}
        ]
    });
    let info = parse_release(&payload).expect("must parse");
    assert_eq!(info.tag, "v2.0.0");
    assert_eq!(
        info.asset_url.as_deref(),
        Some("https://downloads.test/alpha-2.0.0.zip")
    );

    let bare = serde_json::json!({"tag_name": "v2.0.0"});
    let info = parse_release(&bare).expect("must parse");
    assert_eq!(info.asset_url, None);

    assert!(parse_release(&serde_json::json!({"message": "Not Found"})).is_none());
}

#[test]
fn factory_dispatches_by_kind() {
    let catalog = sample_catalog();
    assert!(matches!(
        make("_alpha_", &catalog),
        Some(UpdateService::Release(_))
    ));
    assert!(matches!(
        make("_fixed_", &catalog),
        Some(UpdateService::Static(_))
    ));
    assert!(matches!(
        make("_bundle-one_", &catalog),
        Some(UpdateService::Aggregate(_))
    ));
    assert!(make("_unknown_", &catalog).is_none());
}

#[test]
fn aggregate_members_cover_every_catalog_member_of_the_kind() {
    let catalog = sample_catalog();
    let service = make("_bundle-one_", &catalog).expect("must build");

    let members = service.modules_to_update();
    assert!(!members.is_empty());
    for member in catalog.members_of_kind(SourceKind::AggregateSource) {
        assert!(members.contains_key(member), "missing member {member}");
    }
    assert_eq!(service.unzip_folder(), "");
    assert!(service.skips_version_check());
}

#[test]
fn single_module_update_set_contains_only_itself() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");
    let members = service.modules_to_update();
    assert_eq!(members.len(), 1);
    assert!(members.contains_key("_alpha_"));
    assert_eq!(service.unzip_folder(), MODULES_ARCHIVE_FOLDER);
}

#[test]
fn release_latest_prefers_installed_module_answer() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let client = FakeClient::with_latest(
        "acme/alpha",
        ReleaseInfo {
            tag: "v9.9.9".to_string(),
            asset_url: None,
        },
    );
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();
    let installed = FakeModule {
        version: "1.0.0".to_string(),
        latest_version: "1.1.0".to_string(),
    };

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: Some(&installed),
    };
    assert_eq!(service.latest_version(&mut ctx), "1.1.0");
    assert!(client.calls.borrow().is_empty(), "no remote call expected");
}

#[test]
fn release_latest_falls_back_to_remote_when_module_declines() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let client = FakeClient::with_latest(
        "acme/alpha",
        ReleaseInfo {
            tag: "v2.0.0".to_string(),
            asset_url: None,
        },
    );
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();
    let installed = FakeModule {
        version: "1.0.0".to_string(),
        latest_version: String::new(),
    };

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: Some(&installed),
    };
    assert_eq!(service.latest_version(&mut ctx), "v2.0.0");
    assert_eq!(client.calls.borrow().as_slice(), ["latest:acme/alpha"]);
}

#[test]
fn release_latest_passes_api_token() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let client = FakeClient::with_latest(
        "acme/alpha",
        ReleaseInfo {
            tag: "v2.0.0".to_string(),
            asset_url: None,
        },
    );
    let mut prefs = MemoryPrefStore::default();
    prefs.set(PREF_API_TOKEN, "tok123").expect("must set");
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    assert_eq!(service.latest_version(&mut ctx), "v2.0.0");
    assert_eq!(
        client.tokens.borrow().as_slice(),
        [Some("tok123".to_string())]
    );
}

#[test]
fn no_release_source_reports_unknown_latest_and_branch_url() {
    let catalog = sample_catalog();
    let service = make("_nightly_", &catalog).expect("must build");

    let client = FakeClient::default();
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    assert_eq!(service.latest_version(&mut ctx), "");
    assert!(service.skips_version_check());

    let url = service
        .download_url("2.0.0", &mut ctx)
        .expect("must resolve");
    assert_eq!(
        url,
        "https://github.com/acme/nightly/archive/refs/heads/main.zip"
    );
    assert!(client.calls.borrow().is_empty());
}

#[test]
fn communication_failure_is_flagged_once() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let client = FakeClient {
        fail: true,
        ..FakeClient::default()
    };
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    assert_eq!(service.latest_version(&mut ctx), "");
    assert_eq!(service.latest_version(&mut ctx), "");

    assert!(get_bool(&prefs, PREF_COM_ERROR_FLAGGED));
    let messages = flash.drain().expect("must drain");
    assert_eq!(messages.len(), 1, "only one communication alert expected");
    assert!(messages[0].text.contains("Communication error"));
}

#[test]
fn download_url_prefers_release_asset() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let mut client = FakeClient::default();
    client.by_tag.insert(
        ("acme/alpha".to_string(), "v1.1.0".to_string()),
        Some(ReleaseInfo {
            tag: "v1.1.0".to_string(),
            asset_url: Some("https://downloads.test/alpha-1.1.0.zip".to_string()),
        }),
    );
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    let url = service
        .download_url("1.1.0", &mut ctx)
        .expect("must resolve");
    assert_eq!(url, "https://downloads.test/alpha-1.1.0.zip");
}

#[test]
fn download_url_synthesizes_tag_archive_without_asset() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let mut client = FakeClient::default();
    client.by_tag.insert(
        ("acme/alpha".to_string(), "v1.1.0".to_string()),
        Some(ReleaseInfo {
            tag: "v1.1.0".to_string(),
            asset_url: None,
        }),
    );
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    // A trailing newline from the release feed must not leak into the tag.
    let url = service
        .download_url("1.1.0\n", &mut ctx)
        .expect("must resolve");
    assert_eq!(
        url,
        "https://github.com/acme/alpha/archive/refs/tags/v1.1.0.zip"
    );
}

#[test]
fn download_url_does_not_double_prefix_tags() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let mut client = FakeClient::default();
    client.by_tag.insert(
        ("acme/alpha".to_string(), "v1.1.0".to_string()),
        Some(ReleaseInfo {
            tag: "v1.1.0".to_string(),
            asset_url: None,
        }),
    );
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    let url = service
        .download_url("v1.1.0", &mut ctx)
        .expect("must resolve");
    assert_eq!(
        url,
        "https://github.com/acme/alpha/archive/refs/tags/v1.1.0.zip"
    );
}

#[test]
fn download_url_uses_latest_release_when_version_unknown() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let client = FakeClient::with_latest(
        "acme/alpha",
        ReleaseInfo {
            tag: "v3.0.0".to_string(),
            asset_url: None,
        },
    );
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    let url = service.download_url("", &mut ctx).expect("must resolve");
    assert_eq!(
        url,
        "https://github.com/acme/alpha/archive/refs/tags/v3.0.0.zip"
    );
}

#[test]
fn download_url_propagates_communication_errors() {
    let catalog = sample_catalog();
    let service = make("_alpha_", &catalog).expect("must build");

    let client = FakeClient {
        fail: true,
        ..FakeClient::default()
    };
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    let err = service
        .download_url("1.1.0", &mut ctx)
        .expect_err("must fail");
    assert!(matches!(err, UpdateError::Communication { .. }));
}

#[test]
fn static_source_uses_fixed_values() {
    let catalog = sample_catalog();
    let service = make("_fixed_", &catalog).expect("must build");

    let client = FakeClient::default();
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: None,
    };
    assert_eq!(service.latest_version(&mut ctx), "3.1.0");
    assert_eq!(
        service.download_url("9.9.9", &mut ctx).expect("must resolve"),
        "https://downloads.test/fixed.zip"
    );
    assert_eq!(
        service.documentation_url(),
        "https://downloads.test/fixed"
    );
    assert!(client.calls.borrow().is_empty());
}

#[test]
fn static_source_prefers_installed_module_answer() {
    let catalog = sample_catalog();
    let service = make("_fixed_", &catalog).expect("must build");

    let client = FakeClient::default();
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();
    let installed = FakeModule {
        version: "3.0.0".to_string(),
        latest_version: "3.2.0".to_string(),
    };

    let mut ctx = SourceContext {
        client: &client,
        prefs: &mut prefs,
        flash: &mut flash,
        cache: None,
        installed: Some(&installed),
    };
    assert_eq!(service.latest_version(&mut ctx), "3.2.0");
}

#[test]
fn version_cache_avoids_second_fetch_within_window() {
    let dir = test_dir("cache");
    let cache = VersionCache::new(&dir);

    let calls = RefCell::new(0_u32);
    let fetch = || {
        *calls.borrow_mut() += 1;
        "v1.2.3".to_string()
    };

    assert_eq!(cache.remember("_alpha_", fetch), "v1.2.3");
    assert_eq!(
        cache.remember("_alpha_", || {
            *calls.borrow_mut() += 1;
            "v9.9.9".to_string()
        }),
        "v1.2.3"
    );
    assert_eq!(*calls.borrow(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn version_cache_refetches_after_expiry() {
    let dir = test_dir("cache-expiry");
    let cache = VersionCache::with_ttl(&dir, Duration::from_secs(0));

    assert_eq!(cache.remember("_alpha_", || "v1.0.0".to_string()), "v1.0.0");
    assert_eq!(cache.remember("_alpha_", || "v2.0.0".to_string()), "v2.0.0");

    let _ = fs::remove_dir_all(&dir);
}
