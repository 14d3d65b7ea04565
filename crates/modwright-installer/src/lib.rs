mod archive;
mod fs_ops;
mod guard;
mod layout;
mod registry;
mod wizard;

pub use archive::{extract_zip, find_payload_folder, keep_set, zip_file_list};
pub use fs_ops::{
    claim_lock, clean_stale_files, copy_tree, move_tree, recreate_dir, release_lock,
    release_lock_if_owner, remove_dir_if_exists, TimeBudget,
};
pub use guard::{run_check, GuardCheck};
pub use layout::AppLayout;
pub use registry::{InstalledModule, ModuleManifest, ModuleRegistry, MODULE_MANIFEST};
pub use wizard::{
    advance, execute_step, plan, Action, AlertKind, StepOutcome, WizardContext, WizardSession,
    WizardState, WizardStep, UPGRADE_COMPLETE,
};
