use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use modwright_catalog::Catalog;
use modwright_core::{
    MemoryFlashStore, MemoryPrefStore, PrefStore, UpdateError, PREF_MODULE_VERSION,
};
use modwright_installer::{Action, AppLayout, WizardState, WizardStep, MODULE_MANIFEST};
use modwright_sources::{ReleaseInfo, UpdateClient};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::dispatch::{Cli, Commands};
use crate::flows::{
    apply_settings, boot, collect_module_rows, filter_rows, format_info_lines, format_list_lines,
    next_step_arguments, resolve_service, run_action, run_guard, ModuleRow, APP_VERSION,
};
use crate::render::{render_status_line, OutputStyle};

fn test_root(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    path.push(format!(
        "modwright-cli-tests-{label}-{}-{}",
        std::process::id(),
        nanos
    ));
    path
}

fn test_catalog() -> Catalog {
    let raw = r#"
schema_version = 1

[modules._alpha_]
kind = "repository-release"
repository = "acme/alpha"
tag_prefix = "v"
title = "Alpha charts"
description = "Chart rendering for the host."
category = "charts"

[modules._fixed_]
kind = "static-url"
download_url = "https://downloads.test/fixed.zip"
documentation_url = "https://downloads.test/fixed"
latest_version = "3.1.0"
title = "Fixed download"
"#;
    Catalog::from_toml_str(raw, APP_VERSION).expect("catalog must parse")
}

fn manifest_toml(name: &str, version: &str) -> String {
    format!(
        "name = \"{name}\"\nversion = \"{version}\"\n\n[title]\n\"en-US\" = \"Alpha charts\"\n"
    )
}

fn write_module(layout: &AppLayout, folder: &str, name: &str, version: &str) {
    let module_dir = layout.module_dir(folder);
    fs::create_dir_all(&module_dir).expect("must create module dir");
    fs::write(module_dir.join(MODULE_MANIFEST), manifest_toml(name, version))
        .expect("must write manifest");
}

struct FakeClient {
    archive: PathBuf,
}

impl UpdateClient for FakeClient {
    fn latest_release(
        &self,
        _repository: &str,
        _token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError> {
        Ok(Some(ReleaseInfo {
            tag: "v1.1.0".to_string(),
            asset_url: Some("https://downloads.test/alpha-1.1.0.zip".to_string()),
        }))
    }

    fn release_by_tag(
        &self,
        _repository: &str,
        tag: &str,
        _token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError> {
        Ok(Some(ReleaseInfo {
            tag: tag.to_string(),
            asset_url: Some("https://downloads.test/alpha-1.1.0.zip".to_string()),
        }))
    }

    fn download(&self, _url: &str, destination: &Path) -> Result<u64, UpdateError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| UpdateError::staging(err.to_string()))?;
        }
        fs::copy(&self.archive, destination).map_err(|err| UpdateError::staging(err.to_string()))
    }
}

fn build_zip(path: &Path, files: &[(&str, &str)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create zip parent");
    }
    let file = fs::File::create(path).expect("must create zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (entry_path, contents) in files {
        zip.start_file(*entry_path, options).expect("must add entry");
        zip.write_all(contents.as_bytes()).expect("must write entry");
    }
    zip.finish().expect("must finish zip");
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "updated alpha to 1.1.0"),
        "updated alpha to 1.1.0"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "updated alpha to 1.1.0"),
        "[OK] updated alpha to 1.1.0"
    );
}

#[test]
fn render_status_line_rich_formats_warning() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "module is already installed"),
        "[WARN] module is already installed"
    );
}

#[test]
fn cli_parses_update_command() {
    let cli = Cli::try_parse_from(["modwright", "--plain", "update", "_alpha_"])
        .expect("must parse");
    assert!(cli.plain);
    assert!(matches!(cli.command, Commands::Update { module } if module == "_alpha_"));
}

#[test]
fn cli_parses_wizard_step_round_trip_parameters() {
    let cli = Cli::try_parse_from([
        "modwright",
        "wizard-step",
        "_alpha_",
        "--step",
        "download",
        "--action",
        "update",
        "--current-version",
        "1.0.0",
        "--latest-version",
        "v1.1.0",
        "--download-url",
        "https://downloads.test/alpha.zip",
    ])
    .expect("must parse");

    let Commands::WizardStep {
        module,
        step,
        action,
        current_version,
        latest_version,
        download_url,
        error,
    } = cli.command
    else {
        panic!("expected wizard-step command");
    };
    assert_eq!(module, "_alpha_");
    assert_eq!(step, "download");
    assert_eq!(action, "update");
    assert_eq!(current_version, "1.0.0");
    assert_eq!(latest_version, "v1.1.0");
    assert_eq!(download_url, "https://downloads.test/alpha.zip");
    assert!(error.is_empty());
}

#[test]
fn next_step_arguments_round_trip_the_state() {
    let state = WizardState {
        module_name: "_alpha_".to_string(),
        action: Action::Update,
        current_version: "1.0.0".to_string(),
        latest_version: "v1.1.0".to_string(),
        download_url: "https://downloads.test/alpha.zip".to_string(),
        step: WizardStep::Download,
        error: String::new(),
    };
    assert_eq!(
        next_step_arguments(&state),
        "wizard-step _alpha_ --step download --action update --current-version 1.0.0 \
         --latest-version v1.1.0 --download-url https://downloads.test/alpha.zip"
    );
}

#[test]
fn filter_rows_honors_display_preference() {
    let rows = vec![
        ModuleRow {
            module_name: "_alpha_".to_string(),
            title: String::new(),
            category: String::new(),
            is_theme: false,
            installed: true,
            installed_version: "1.0.0".to_string(),
            latest_version: "1.1.0".to_string(),
            upgrade_available: true,
        },
        ModuleRow {
            module_name: "_beta_".to_string(),
            title: String::new(),
            category: String::new(),
            is_theme: false,
            installed: false,
            installed_version: String::new(),
            latest_version: String::new(),
            upgrade_available: false,
        },
    ];

    let installed = filter_rows(rows.clone(), "installed");
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].module_name, "_alpha_");

    let not_installed = filter_rows(rows.clone(), "not_installed");
    assert_eq!(not_installed.len(), 1);
    assert_eq!(not_installed[0].module_name, "_beta_");

    assert_eq!(filter_rows(rows, "all").len(), 2);
}

#[test]
fn list_lines_show_status_per_module() {
    let rows = vec![
        ModuleRow {
            module_name: "_alpha_".to_string(),
            title: String::new(),
            category: String::new(),
            is_theme: false,
            installed: true,
            installed_version: "1.0.0".to_string(),
            latest_version: "1.1.0".to_string(),
            upgrade_available: true,
        },
        ModuleRow {
            module_name: "_nightly_".to_string(),
            title: String::new(),
            category: String::new(),
            is_theme: false,
            installed: true,
            installed_version: "1.0.0".to_string(),
            latest_version: String::new(),
            upgrade_available: false,
        },
    ];

    let lines = format_list_lines(&rows);
    assert_eq!(lines[0], "module\tinstalled\tlatest\tstatus");
    assert_eq!(lines[1], "_alpha_\t1.0.0\t1.1.0\tupgrade available");
    assert_eq!(lines[2], "_nightly_\t1.0.0\t-\tunknown");
}

#[test]
fn boot_records_the_orchestrator_version() {
    let mut prefs = MemoryPrefStore::default();
    prefs
        .set(PREF_MODULE_VERSION, "0.1.0")
        .expect("must seed version");

    let lines = boot(&mut prefs).expect("must boot");
    assert_eq!(prefs.get(PREF_MODULE_VERSION, ""), APP_VERSION);
    assert!(lines.iter().any(|line| line.contains("0.1.0")));

    let lines = boot(&mut prefs).expect("must boot again");
    assert!(lines.is_empty());
}

#[test]
fn settings_rejects_unknown_display_filter() {
    let mut prefs = MemoryPrefStore::default();
    let err = apply_settings(&mut prefs, None, Some("everything")).expect_err("must reject");
    assert!(err.to_string().contains("modules_to_show"));

    let lines = apply_settings(&mut prefs, Some("tok"), Some("installed")).expect("must apply");
    assert!(lines.iter().any(|line| line.contains("(set)")));
    assert!(lines.iter().any(|line| line.contains("installed")));
}

#[test]
fn resolve_service_prefers_exact_catalog_key() {
    let root = test_root("resolve-exact");
    let layout = AppLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    let catalog = test_catalog();

    let (module_name, _) =
        resolve_service(&layout, &catalog, "_alpha_").expect("must resolve");
    assert_eq!(module_name, "_alpha_");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn resolve_service_falls_back_to_localized_title() {
    let root = test_root("resolve-title");
    let layout = AppLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    let catalog = test_catalog();

    // The module was unpacked under an unexpected folder name, so its
    // runtime identity is unknown to the catalog; its title is not.
    write_module(&layout, "alpha-main", "_alpha-main_", "1.0.0");

    let (module_name, _) =
        resolve_service(&layout, &catalog, "_alpha-main_").expect("must resolve");
    assert_eq!(module_name, "_alpha_");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn resolve_service_reports_unmanaged_modules() {
    let root = test_root("resolve-none");
    let layout = AppLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    let catalog = test_catalog();

    let err = resolve_service(&layout, &catalog, "_stranger_").expect_err("must fail");
    assert!(err.to_string().contains("no update source"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn update_flow_end_to_end_through_the_cli_driver() {
    let root = test_root("flow-update");
    let layout = AppLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    let catalog = test_catalog();

    write_module(&layout, "alpha", "_alpha_", "1.0.0");
    let archive = root.join("fixture.zip");
    build_zip(
        &archive,
        &[(
            "alpha-1.1.0/module.toml",
            &manifest_toml("_alpha_", "1.1.0"),
        )],
    );

    let client = FakeClient { archive };
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let lines = run_action(
        &layout,
        &catalog,
        &client,
        &mut prefs,
        &mut flash,
        None,
        "_alpha_",
        Action::Update,
        OutputStyle::Plain,
    )
    .expect("must run");

    assert!(
        lines.iter().any(|line| line.contains("The upgrade is complete.")),
        "unexpected output: {lines:?}"
    );

    // The deferred check on the next invocation finds a healthy module.
    let guard_lines = run_guard(
        &layout,
        &catalog,
        &client,
        &mut prefs,
        &mut flash,
        OutputStyle::Plain,
    )
    .expect("guard must run");
    assert!(guard_lines
        .iter()
        .any(|line| line.contains("Post-update check passed")));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_flow_warns_when_already_installed() {
    let root = test_root("flow-installed");
    let layout = AppLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    let catalog = test_catalog();
    write_module(&layout, "alpha", "_alpha_", "1.0.0");

    let client = FakeClient {
        archive: root.join("missing.zip"),
    };
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let lines = run_action(
        &layout,
        &catalog,
        &client,
        &mut prefs,
        &mut flash,
        None,
        "_alpha_",
        Action::Install,
        OutputStyle::Plain,
    )
    .expect("must run");
    assert!(lines[0].contains("already installed"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn info_lines_include_documentation_and_bundle_members() {
    let root = test_root("info");
    let layout = AppLayout::new(&root);
    layout.ensure_base_dirs().expect("must create dirs");
    let catalog = test_catalog();

    let client = FakeClient {
        archive: root.join("missing.zip"),
    };
    let mut prefs = MemoryPrefStore::default();
    let mut flash = MemoryFlashStore::default();

    let rows = collect_module_rows(
        &layout,
        &catalog,
        &client,
        &mut prefs,
        &mut flash,
        None,
    )
    .expect("must collect");
    let row = rows
        .iter()
        .find(|row| row.module_name == "_fixed_")
        .expect("row must exist");

    let (_, service) = resolve_service(&layout, &catalog, "_fixed_").expect("must resolve");
    let lines = format_info_lines(row, &service);
    assert!(lines.iter().any(|line| line == "Module: _fixed_"));
    assert!(lines
        .iter()
        .any(|line| line.contains("https://downloads.test/fixed")));
    assert!(lines.iter().any(|line| line.contains("Latest: 3.1.0")));

    let _ = fs::remove_dir_all(&root);
}
