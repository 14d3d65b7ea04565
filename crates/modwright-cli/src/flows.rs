use anyhow::{anyhow, Result};
use modwright_catalog::{Catalog, IdentityResolver};
use modwright_core::version;
use modwright_core::{
    get_bool, set_bool, FlashStore, PrefStore, UpdateError, PREF_API_TOKEN,
    PREF_COM_ERROR_FLAGGED, PREF_LAST_UPDATED_MODULE, PREF_MODULES_TO_SHOW, PREF_MODULE_VERSION,
    PREF_ROLLBACK_ONGOING, SHOW_ALL, SHOW_INSTALLED, SHOW_NOT_INSTALLED,
};
use modwright_installer::{
    advance, execute_step, plan, run_check, Action, AlertKind, AppLayout, GuardCheck,
    ModuleRegistry, TimeBudget, WizardContext, WizardSession, WizardState, WizardStep,
};
use modwright_sources::{
    make, ModuleVersions, SourceContext, UpdateClient, UpdateService, VersionCache,
};

use crate::render::{render_status_line, OutputStyle, StepProgress};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// The wizard's session-scoped abort flag, persisted between single-step
// invocations and cleared when a new wizard starts.
pub const PREF_WIZARD_ABORTED: &str = "wizard_aborted";

// Runs once per invocation before anything else, like the host's boot hook.
pub fn boot(prefs: &mut dyn PrefStore) -> Result<Vec<String>> {
    let mut lines = Vec::new();

    set_bool(prefs, PREF_COM_ERROR_FLAGGED, false)?;

    let recorded = prefs.get(PREF_MODULE_VERSION, "");
    if recorded != APP_VERSION {
        prefs.set(PREF_MODULE_VERSION, APP_VERSION)?;
        if !recorded.is_empty() {
            lines.push(format!(
                "The orchestrator preferences were updated from version {recorded} to {APP_VERSION}."
            ));
        }
    }

    Ok(lines)
}

// Maps a module argument to its catalog entry: an exact key match first,
// then the identity resolver for installations under unexpected folders.
pub fn resolve_service(
    layout: &AppLayout,
    catalog: &Catalog,
    module_arg: &str,
) -> Result<(String, UpdateService)> {
    if let Some(service) = make(module_arg, catalog) {
        return Ok((module_arg.to_string(), service));
    }

    let registry = ModuleRegistry::new(layout);
    if let Some(installed) = registry.find(module_arg)? {
        let resolver = IdentityResolver::new(catalog);
        if let Some(module_name) = resolver.resolve(catalog, &installed) {
            if let Some(service) = make(&module_name, catalog) {
                return Ok((module_name, service));
            }
        }
    }

    Err(UpdateError::Resolution(module_arg.to_string()).into())
}

#[derive(Debug, Clone)]
pub struct ModuleRow {
    pub module_name: String,
    pub title: String,
    pub category: String,
    pub is_theme: bool,
    pub installed: bool,
    pub installed_version: String,
    pub latest_version: String,
    pub upgrade_available: bool,
}

#[allow(clippy::too_many_arguments)]
pub fn collect_module_rows(
    layout: &AppLayout,
    catalog: &Catalog,
    client: &dyn UpdateClient,
    prefs: &mut dyn PrefStore,
    flash: &mut dyn FlashStore,
    cache: Option<&VersionCache>,
) -> Result<Vec<ModuleRow>> {
    let registry = ModuleRegistry::new(layout);

    let mut rows = Vec::new();
    for (module_name, descriptor) in catalog.iter() {
        let Some(service) = make(module_name, catalog) else {
            continue;
        };
        // A module with an unreadable manifest is listed as not installed;
        // `check` and `update` on it surface the real error.
        let installed = registry.find(module_name).ok().flatten();

        let (installed_version, latest_version) = {
            let mut ctx = SourceContext {
                client,
                prefs: &mut *prefs,
                flash: &mut *flash,
                cache,
                installed: installed.as_ref().map(|module| module as &dyn ModuleVersions),
            };
            let latest = service.latest_version(&mut ctx);
            (service.current_version(&ctx), latest)
        };

        rows.push(ModuleRow {
            module_name: module_name.clone(),
            title: descriptor.title.clone(),
            category: descriptor.category.clone(),
            is_theme: descriptor.is_theme,
            installed: installed.is_some(),
            upgrade_available: version::upgrade_available(&installed_version, &latest_version),
            installed_version,
            latest_version,
        });
    }

    Ok(rows)
}

pub fn filter_rows(rows: Vec<ModuleRow>, modules_to_show: &str) -> Vec<ModuleRow> {
    match modules_to_show {
        SHOW_INSTALLED => rows.into_iter().filter(|row| row.installed).collect(),
        SHOW_NOT_INSTALLED => rows.into_iter().filter(|row| !row.installed).collect(),
        _ => rows,
    }
}

pub fn format_list_lines(rows: &[ModuleRow]) -> Vec<String> {
    if rows.is_empty() {
        return vec!["No modules to show".to_string()];
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push("module\tinstalled\tlatest\tstatus".to_string());
    for row in rows {
        let installed = if row.installed && !row.installed_version.is_empty() {
            row.installed_version.as_str()
        } else if row.installed {
            "?"
        } else {
            "-"
        };
        let latest = if row.latest_version.is_empty() {
            "-"
        } else {
            row.latest_version.as_str()
        };
        let status = if !row.installed {
            "not installed"
        } else if row.upgrade_available {
            "upgrade available"
        } else if row.latest_version.is_empty() {
            "unknown"
        } else {
            "up to date"
        };
        lines.push(format!("{}\t{installed}\t{latest}\t{status}", row.module_name));
    }
    lines
}

pub fn format_info_lines(row: &ModuleRow, service: &UpdateService) -> Vec<String> {
    let mut lines = vec![format!("Module: {}", row.module_name)];
    if !row.title.is_empty() {
        lines.push(format!("Title: {}", row.title));
    }
    if !row.category.is_empty() {
        lines.push(format!("Category: {}", row.category));
    }
    if service.is_theme() {
        lines.push("Theme: yes".to_string());
    }
    let documentation = service.documentation_url();
    if !documentation.is_empty() {
        lines.push(format!("Documentation: {documentation}"));
    }
    lines.push(format!(
        "Installed: {}",
        if row.installed {
            row.installed_version.as_str()
        } else {
            "no"
        }
    ));
    lines.push(format!(
        "Latest: {}",
        if row.latest_version.is_empty() {
            "unknown"
        } else {
            row.latest_version.as_str()
        }
    ));

    let members = service.modules_to_update();
    if members.len() > 1 {
        let others: Vec<&str> = members
            .keys()
            .filter(|member| member.as_str() != row.module_name)
            .map(String::as_str)
            .collect();
        lines.push(format!("Updates together with: {}", others.join(", ")));
    }

    lines
}

#[allow(clippy::too_many_arguments)]
pub fn run_check_command(
    layout: &AppLayout,
    catalog: &Catalog,
    client: &dyn UpdateClient,
    prefs: &mut dyn PrefStore,
    flash: &mut dyn FlashStore,
    cache: Option<&VersionCache>,
    module_arg: &str,
    style: OutputStyle,
) -> Result<Vec<String>> {
    let (module_name, service) = resolve_service(layout, catalog, module_arg)?;
    let registry = ModuleRegistry::new(layout);
    let installed = registry.find(&module_name)?;

    let mut ctx = SourceContext {
        client,
        prefs,
        flash,
        cache,
        installed: installed.as_ref().map(|module| module as &dyn ModuleVersions),
    };
    let latest = service.latest_version(&mut ctx);
    let current = service.current_version(&ctx);

    let line = if installed.is_none() {
        render_status_line(style, "step", &format!("{module_name} is not installed"))
    } else if version::upgrade_available(&current, &latest) {
        render_status_line(
            style,
            "ok",
            &format!("{module_name}: upgrade available ({current} -> {latest})"),
        )
    } else if latest.is_empty() {
        render_status_line(
            style,
            "step",
            &format!("{module_name}: no upgrade information is available"),
        )
    } else {
        render_status_line(style, "ok", &format!("{module_name}: up to date ({current})"))
    };
    Ok(vec![line])
}

#[allow(clippy::too_many_arguments)]
pub fn run_action(
    layout: &AppLayout,
    catalog: &Catalog,
    client: &dyn UpdateClient,
    prefs: &mut dyn PrefStore,
    flash: &mut dyn FlashStore,
    cache: Option<&VersionCache>,
    module_arg: &str,
    action: Action,
    style: OutputStyle,
) -> Result<Vec<String>> {
    let (module_name, service) = resolve_service(layout, catalog, module_arg)?;
    let registry = ModuleRegistry::new(layout);
    let installed = registry.find(&module_name)?;

    if action == Action::Install && installed.is_some() {
        return Ok(vec![render_status_line(
            style,
            "warn",
            &format!("{module_name} is already installed; use update instead"),
        )]);
    }
    if action == Action::Update && installed.is_none() {
        return Ok(vec![render_status_line(
            style,
            "warn",
            &format!("{module_name} is not installed; use install instead"),
        )]);
    }

    let (current_version, latest_version, download_url) = {
        let mut ctx = SourceContext {
            client,
            prefs: &mut *prefs,
            flash: &mut *flash,
            cache,
            installed: installed.as_ref().map(|module| module as &dyn ModuleVersions),
        };
        let latest = service.latest_version(&mut ctx);
        let current = service.current_version(&ctx);
        let url = match service.download_url(&latest, &mut ctx) {
            Ok(url) => url,
            Err(err) => {
                return Ok(vec![render_status_line(
                    style,
                    "error",
                    &format!("Error during retrieving the download URL: {err}"),
                )]);
            }
        };
        (current, latest, url)
    };

    // Starting a new wizard clears a leftover abort flag.
    set_bool(prefs, PREF_WIZARD_ABORTED, false)?;

    let mut state = WizardState {
        module_name,
        action,
        current_version,
        latest_version,
        download_url,
        step: WizardStep::Check,
        error: String::new(),
    };
    let mut session = WizardSession::default();
    let budget = TimeBudget::unlimited();

    let progress = StepProgress::start(style, action.as_str(), plan(action).len() as u64);
    let mut lines = Vec::new();
    let mut completed_steps = 0_u64;
    loop {
        let outcome = {
            let mut ctx = WizardContext {
                layout,
                service: &service,
                client,
                prefs: &mut *prefs,
                flash: &mut *flash,
                budget: &budget,
                session: &mut session,
            };
            execute_step(&state, &mut ctx)
        };

        completed_steps += 1;
        progress.set(completed_steps);

        let status = match outcome.alert_kind {
            AlertKind::Success => "ok",
            AlertKind::Danger => "error",
        };
        for alert_line in outcome.alert.lines() {
            lines.push(render_status_line(style, status, alert_line));
        }

        match advance(&state, &outcome) {
            Some(next_state) => state = next_state,
            None => break,
        }
    }
    progress.finish();

    Ok(lines)
}

#[allow(clippy::too_many_arguments)]
pub fn run_single_step(
    layout: &AppLayout,
    catalog: &Catalog,
    client: &dyn UpdateClient,
    prefs: &mut dyn PrefStore,
    flash: &mut dyn FlashStore,
    state: WizardState,
    style: OutputStyle,
) -> Result<Vec<String>> {
    let (module_name, service) = resolve_service(layout, catalog, &state.module_name)?;
    let state = WizardState {
        module_name,
        ..state
    };

    let mut session = WizardSession {
        aborted: get_bool(prefs, PREF_WIZARD_ABORTED),
    };
    let budget = TimeBudget::unlimited();

    let outcome = {
        let mut ctx = WizardContext {
            layout,
            service: &service,
            client,
            prefs: &mut *prefs,
            flash: &mut *flash,
            budget: &budget,
            session: &mut session,
        };
        execute_step(&state, &mut ctx)
    };
    set_bool(prefs, PREF_WIZARD_ABORTED, session.aborted)?;

    let status = match outcome.alert_kind {
        AlertKind::Success => "ok",
        AlertKind::Danger => "error",
    };
    let mut lines = Vec::new();
    for alert_line in outcome.alert.lines() {
        lines.push(render_status_line(style, status, alert_line));
    }
    if let Some(next_state) = advance(&state, &outcome) {
        lines.push(format!("next: modwright {}", next_step_arguments(&next_state)));
    }
    Ok(lines)
}

// The arguments a caller round-trips to resume the transaction at its next
// step; the wizard itself holds no state between invocations.
pub fn next_step_arguments(state: &WizardState) -> String {
    let mut args = format!(
        "wizard-step {} --step {} --action {}",
        state.module_name,
        state.step.as_str(),
        state.action.as_str()
    );
    if !state.current_version.is_empty() {
        args.push_str(&format!(" --current-version {}", state.current_version));
    }
    if !state.latest_version.is_empty() {
        args.push_str(&format!(" --latest-version {}", state.latest_version));
    }
    if !state.download_url.is_empty() {
        args.push_str(&format!(" --download-url {}", state.download_url));
    }
    if !state.error.is_empty() {
        args.push_str(&format!(" --error '{}'", state.error.replace('\'', "")));
    }
    args
}

#[allow(clippy::too_many_arguments)]
pub fn run_rollback(
    layout: &AppLayout,
    catalog: &Catalog,
    client: &dyn UpdateClient,
    prefs: &mut dyn PrefStore,
    flash: &mut dyn FlashStore,
    module_arg: &str,
    error: &str,
    style: OutputStyle,
) -> Result<Vec<String>> {
    let (module_name, service) = resolve_service(layout, catalog, module_arg)?;

    let state = WizardState {
        module_name,
        action: Action::Update,
        current_version: String::new(),
        latest_version: String::new(),
        download_url: String::new(),
        step: WizardStep::Rollback,
        error: error.to_string(),
    };
    let mut session = WizardSession::default();
    let budget = TimeBudget::unlimited();

    let outcome = {
        let mut ctx = WizardContext {
            layout,
            service: &service,
            client,
            prefs: &mut *prefs,
            flash: &mut *flash,
            budget: &budget,
            session: &mut session,
        };
        execute_step(&state, &mut ctx)
    };

    let mut lines = Vec::new();
    for alert_line in outcome.alert.lines() {
        lines.push(render_status_line(style, "error", alert_line));
    }
    Ok(lines)
}

// The middleware position: runs before the requested command, so the host
// never serves with a known-broken freshly updated module.
pub fn run_guard(
    layout: &AppLayout,
    catalog: &Catalog,
    client: &dyn UpdateClient,
    prefs: &mut dyn PrefStore,
    flash: &mut dyn FlashStore,
    style: OutputStyle,
) -> Result<Vec<String>> {
    match run_check(layout, prefs, flash)? {
        GuardCheck::Idle => Ok(Vec::new()),
        GuardCheck::Healthy { module_name } => Ok(vec![render_status_line(
            style,
            "ok",
            &format!("Post-update check passed for {module_name}."),
        )]),
        GuardCheck::RollbackRequired { module_name, fault } => {
            let mut lines = vec![render_status_line(
                style,
                "error",
                &format!("The updated module {module_name} failed its post-update check; rolling back."),
            )];
            match run_rollback(layout, catalog, client, prefs, flash, &module_name, &fault, style)
            {
                Ok(rollback_lines) => lines.extend(rollback_lines),
                Err(err) => {
                    // No update source resolvable any more; clear the flags
                    // so the guard does not wedge every future invocation.
                    prefs.set(PREF_LAST_UPDATED_MODULE, "")?;
                    set_bool(prefs, PREF_ROLLBACK_ONGOING, false)?;
                    lines.push(render_status_line(
                        style,
                        "error",
                        &format!("Rollback could not be started: {err:#}"),
                    ));
                }
            }
            Ok(lines)
        }
    }
}

pub fn apply_settings(
    prefs: &mut dyn PrefStore,
    api_token: Option<&str>,
    modules_to_show: Option<&str>,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();

    if let Some(token) = api_token {
        prefs.set(PREF_API_TOKEN, token)?;
        lines.push("api_token updated".to_string());
    }
    if let Some(value) = modules_to_show {
        if ![SHOW_ALL, SHOW_INSTALLED, SHOW_NOT_INSTALLED].contains(&value) {
            return Err(anyhow!(
                "modules_to_show must be one of: {SHOW_ALL}, {SHOW_INSTALLED}, {SHOW_NOT_INSTALLED}"
            ));
        }
        prefs.set(PREF_MODULES_TO_SHOW, value)?;
        lines.push(format!("modules_to_show set to {value}"));
    }

    lines.extend(format_settings_lines(&*prefs));
    Ok(lines)
}

pub fn format_settings_lines(prefs: &dyn PrefStore) -> Vec<String> {
    vec![
        format!(
            "api_token: {}",
            if prefs.get(PREF_API_TOKEN, "").is_empty() {
                "(not set)"
            } else {
                "(set)"
            }
        ),
        format!(
            "modules_to_show: {}",
            prefs.get(PREF_MODULES_TO_SHOW, SHOW_ALL)
        ),
    ]
}
