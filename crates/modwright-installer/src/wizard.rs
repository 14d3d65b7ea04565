use std::cmp::Ordering;

use modwright_catalog::SourceKind;
use modwright_core::identity::folder_from_identity;
use modwright_core::version;
use modwright_core::{
    bounded_error_text, pull_scoped, set_bool, FlashStore, PrefStore, UpdateError,
    PREF_LAST_UPDATED_MODULE, PREF_ROLLBACK_ONGOING,
};
use modwright_sources::{UpdateClient, UpdateService, MODULES_ARCHIVE_FOLDER};

use crate::archive::{extract_zip, find_payload_folder, keep_set, zip_file_list};
use crate::fs_ops::{
    claim_lock, clean_stale_files, copy_tree, move_tree, recreate_dir, release_lock_if_owner,
    remove_dir_if_exists, TimeBudget,
};
use crate::layout::AppLayout;
use crate::registry::{ModuleRegistry, MODULE_MANIFEST};

pub const UPGRADE_COMPLETE: &str = "The upgrade is complete.";

const WIZARD_ABORTED: &str = "The upgrade wizard was aborted.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Update,
    Install,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Install => "install",
        }
    }

    // An unrecognized action falls back to the safer of the two: an update
    // keeps a backup, an install does not.
    pub fn parse(value: &str) -> Self {
        match value {
            "install" => Self::Install,
            _ => Self::Update,
        }
    }
}

// The upgrade runs as discrete steps, one per driver invocation, to stay
// within a single request's time budget. Nothing is held in memory between
// steps; the state value is round-tripped by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Check,
    Prepare,
    Backup,
    Download,
    Unzip,
    Copy,
    Commit,
    Rollback,
}

impl WizardStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Prepare => "prepare",
            Self::Backup => "backup",
            Self::Download => "download",
            Self::Unzip => "unzip",
            Self::Copy => "copy",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "check" => Some(Self::Check),
            "prepare" => Some(Self::Prepare),
            "backup" => Some(Self::Backup),
            "download" => Some(Self::Download),
            "unzip" => Some(Self::Unzip),
            "copy" => Some(Self::Copy),
            "commit" => Some(Self::Commit),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WizardState {
    pub module_name: String,
    pub action: Action,
    pub current_version: String,
    pub latest_version: String,
    pub download_url: String,
    pub step: WizardStep,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Success,
    Danger,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub alert_kind: AlertKind,
    pub alert: String,
    pub next: Option<WizardStep>,
    pub aborted: bool,
    pub error: String,
}

impl StepOutcome {
    fn success(alert: impl Into<String>, next: WizardStep) -> Self {
        Self {
            alert_kind: AlertKind::Success,
            alert: alert.into(),
            next: Some(next),
            aborted: false,
            error: String::new(),
        }
    }

    fn finished(alert: impl Into<String>) -> Self {
        Self {
            alert_kind: AlertKind::Success,
            alert: alert.into(),
            next: None,
            aborted: false,
            error: String::new(),
        }
    }

    fn abort(alert: impl Into<String>) -> Self {
        Self {
            alert_kind: AlertKind::Danger,
            alert: alert.into(),
            next: None,
            aborted: true,
            error: String::new(),
        }
    }

    fn redirect_rollback(error: String) -> Self {
        let error = bounded_error_text(&error);
        Self {
            alert_kind: AlertKind::Danger,
            alert: error.clone(),
            next: Some(WizardStep::Rollback),
            aborted: false,
            error,
        }
    }

    pub fn is_terminal_success(&self) -> bool {
        self.next.is_none() && !self.aborted
    }
}

// Session-scoped abort flag: once a step fails terminally, every later step
// of the same session short-circuits.
#[derive(Debug, Default)]
pub struct WizardSession {
    pub aborted: bool,
}

pub struct WizardContext<'a> {
    pub layout: &'a AppLayout,
    pub service: &'a UpdateService,
    pub client: &'a dyn UpdateClient,
    pub prefs: &'a mut dyn PrefStore,
    pub flash: &'a mut dyn FlashStore,
    pub budget: &'a TimeBudget,
    pub session: &'a mut WizardSession,
}

pub fn plan(action: Action) -> Vec<WizardStep> {
    let mut steps = vec![WizardStep::Check, WizardStep::Prepare];
    if action == Action::Update {
        steps.push(WizardStep::Backup);
    }
    steps.extend([
        WizardStep::Download,
        WizardStep::Unzip,
        WizardStep::Copy,
        WizardStep::Commit,
    ]);
    steps
}

pub fn advance(state: &WizardState, outcome: &StepOutcome) -> Option<WizardState> {
    let next = outcome.next?;
    let mut next_state = state.clone();
    next_state.step = next;
    if !outcome.error.is_empty() {
        next_state.error = outcome.error.clone();
    }
    Some(next_state)
}

pub fn execute_step(state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    if ctx.session.aborted {
        return StepOutcome::abort(WIZARD_ABORTED);
    }

    let outcome = match state.step {
        WizardStep::Check => step_check(state, ctx),
        WizardStep::Prepare => step_prepare(state, ctx),
        WizardStep::Backup => step_backup(state, ctx),
        WizardStep::Download => step_download(state, ctx),
        WizardStep::Unzip => step_unzip(state, ctx),
        WizardStep::Copy => step_copy(state, ctx),
        WizardStep::Commit => step_commit(state, ctx),
        WizardStep::Rollback => step_rollback(state, ctx),
    };

    if outcome.aborted {
        ctx.session.aborted = true;
    }
    if outcome.next.is_none() && state.step != WizardStep::Check {
        let _ = release_lock_if_owner(&ctx.layout.lock_path(), &state.module_name);
    }

    outcome
}

fn step_check(state: &WizardState, ctx: &WizardContext) -> StepOutcome {
    // Sources without comparable versions (head-of-branch, bundles) are
    // always eligible; "unknown" must not read as "up to date".
    if ctx.service.skips_version_check() {
        return StepOutcome::success(
            "No comparable version information is available for this module source. Continuing.",
            WizardStep::Prepare,
        );
    }

    if state.latest_version.is_empty() {
        return StepOutcome::abort("No upgrade information is available.");
    }

    if state.action == Action::Update
        && version::compare(&state.current_version, &state.latest_version) != Ordering::Less
    {
        return StepOutcome::abort(
            "This is the latest version of the module. No upgrade is available.",
        );
    }

    let alert = match state.action {
        Action::Update => format!("Upgrade the module to version {}.", state.latest_version),
        Action::Install => format!("Install version {} of the module.", state.latest_version),
    };
    StepOutcome::success(alert, WizardStep::Prepare)
}

fn step_prepare(state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    if let Err(err) = claim_lock(&ctx.layout.lock_path(), &state.module_name) {
        return StepOutcome::abort(format!("{err:#}"));
    }

    let result = (|| -> anyhow::Result<()> {
        recreate_dir(&ctx.layout.upgrade_dir())?;
        if state.action == Action::Update {
            recreate_dir(&ctx.layout.backup_dir())?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            let mut alert = "The folder data/tmp/upgrade has been created.".to_string();
            let next = if state.action == Action::Update {
                alert.push_str("\nThe folder data/tmp/backup has been created.");
                WizardStep::Backup
            } else {
                WizardStep::Download
            };
            StepOutcome::success(alert, next)
        }
        Err(_) => {
            StepOutcome::abort("Error during creating the temporary backup and upgrade folders.")
        }
    }
}

fn step_backup(_state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    let result = (|| -> Result<u64, UpdateError> {
        let mut copied = 0;
        for module_name in ctx.service.modules_to_update().keys() {
            let folder = folder_from_identity(module_name);
            copied += copy_tree(
                &ctx.layout.module_dir(&folder),
                &ctx.layout.backup_module_dir(&folder),
                ctx.budget,
            )?;
        }
        Ok(copied)
    })();

    match result {
        Ok(copied) => StepOutcome::success(
            format!("A backup of the current module was created ({copied} files)."),
            WizardStep::Download,
        ),
        Err(err) => StepOutcome::abort(format!(
            "Failed to create a backup of the current module.\n{}",
            bounded_error_text(&err.to_string())
        )),
    }
}

fn step_download(state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    if state.download_url.is_empty() {
        return StepOutcome::abort("No download URL is available for the module.");
    }

    let destination = ctx.layout.archive_path(&state.module_name);
    match ctx.client.download(&state.download_url, &destination) {
        Ok(bytes) => StepOutcome::success(
            format!("{} KB were downloaded.", (bytes + 1023) / 1024),
            WizardStep::Unzip,
        ),
        Err(err) => StepOutcome::abort(format!(
            "Error during downloading the module archive.\n{}",
            bounded_error_text(&err.to_string())
        )),
    }
}

fn step_unzip(state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    let archive = ctx.layout.archive_path(&state.module_name);
    let target = ctx.layout.unzip_target(ctx.service.unzip_folder());

    match extract_zip(&archive, &target) {
        Ok(count) => {
            StepOutcome::success(format!("{count} files were extracted."), WizardStep::Copy)
        }
        Err(err) => StepOutcome::abort(format!(
            "Error during unpacking the module archive.\n{}",
            bounded_error_text(&err.to_string())
        )),
    }
}

fn step_copy(state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    let is_aggregate = ctx.service.kind() == SourceKind::AggregateSource;

    let result = (|| -> Result<(), UpdateError> {
        let archive = ctx.layout.archive_path(&state.module_name);
        let staging_modules = ctx.layout.staging_modules_dir();
        let file_list = zip_file_list(&archive)?;

        for (module_name, archive_key) in ctx.service.modules_to_update() {
            let folder = folder_from_identity(&module_name);

            // Bundles ship their members under fixed folder names; other
            // archives wrap the module in one unpredictable top folder.
            let payload = if is_aggregate {
                folder_from_identity(&archive_key)
            } else {
                find_payload_folder(&staging_modules, MODULE_MANIFEST)
            };
            let source = if payload.is_empty() {
                staging_modules.clone()
            } else {
                staging_modules.join(&payload)
            };

            move_tree(&source, &ctx.layout.module_dir(&folder), ctx.budget)?;

            // While we have time, clean up any old files.
            let keep_prefix = if is_aggregate {
                format!("{MODULES_ARCHIVE_FOLDER}/{}", folder_from_identity(&archive_key))
            } else {
                payload
            };
            let files_to_keep = keep_set(&file_list, &keep_prefix);
            clean_stale_files(
                &ctx.layout.module_dir(&folder),
                ctx.service.folders_to_clean(),
                &files_to_keep,
                ctx.budget,
            )?;
        }

        Ok(())
    })();

    match result {
        Ok(()) => StepOutcome::success("The files were copied.", WizardStep::Commit),
        Err(err) => StepOutcome::redirect_rollback(err.to_string()),
    }
}

fn step_commit(state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    match state.action {
        // A fresh install replaced nothing that was loaded before, so it can
        // be probed right away.
        Action::Install => {
            let registry = ModuleRegistry::new(ctx.layout);
            for module_name in ctx.service.modules_to_update().keys() {
                let fault = registry.probe(module_name);
                if !fault.is_empty() {
                    return StepOutcome::redirect_rollback(fault);
                }
            }
            StepOutcome::finished(UPGRADE_COMPLETE)
        }
        // An update replaced code that may already be loaded; verification
        // is deferred to the guard on the next request.
        Action::Update => {
            let persisted = ctx
                .prefs
                .set(PREF_LAST_UPDATED_MODULE, &state.module_name)
                .and_then(|()| set_bool(ctx.prefs, PREF_ROLLBACK_ONGOING, false));
            if persisted.is_err() {
                return StepOutcome::redirect_rollback(
                    "failed to persist the deferred health check state".to_string(),
                );
            }
            StepOutcome::finished(UPGRADE_COMPLETE)
        }
    }
}

fn step_rollback(state: &WizardState, ctx: &mut WizardContext) -> StepOutcome {
    let members = ctx.service.modules_to_update();

    let restore_result = (|| -> Result<(), UpdateError> {
        for module_name in members.keys() {
            let folder = folder_from_identity(module_name);
            let module_dir = ctx.layout.module_dir(&folder);

            remove_dir_if_exists(&module_dir)?;
            copy_tree(
                &ctx.layout.backup_module_dir(&folder),
                &module_dir,
                ctx.budget,
            )?;

            // Clear the module's queued fault messages; unrelated messages
            // stay queued.
            let _ = pull_scoped(ctx.flash, module_name);
        }
        Ok(())
    })();

    let _ = ctx.prefs.set(PREF_LAST_UPDATED_MODULE, "");
    let _ = set_bool(ctx.prefs, PREF_ROLLBACK_ONGOING, false);

    match restore_result {
        Ok(()) => {
            let mut alert = match state.action {
                Action::Update => format!(
                    "The module {} was rolled back to the previous version, because the update caused errors.",
                    state.module_name
                ),
                Action::Install => format!(
                    "The installation of module {} was rolled back, because the module caused errors.",
                    state.module_name
                ),
            };
            if !state.error.is_empty() {
                alert.push('\n');
                alert.push_str(&bounded_error_text(&state.error));
            }
            StepOutcome::abort(alert)
        }
        Err(err) => {
            let folder = folder_from_identity(&state.module_name);
            let failure = UpdateError::RollbackFailure {
                backup_path: ctx.layout.backup_module_dir(&folder).display().to_string(),
                detail: err.to_string(),
            };
            let alert = match state.action {
                Action::Update => format!(
                    "A rollback of the module {} to the previous version failed.\n{failure}",
                    state.module_name
                ),
                Action::Install => format!(
                    "A rollback of the installation of module {} failed.\n{failure}",
                    state.module_name
                ),
            };
            StepOutcome::abort(alert)
        }
    }
}
