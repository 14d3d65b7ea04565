use anyhow::Result;
use modwright_core::{
    bounded_error_text, get_bool, pull_scoped, set_bool, FlashStore, PrefStore,
    PREF_LAST_UPDATED_MODULE, PREF_ROLLBACK_ONGOING,
};

use crate::layout::AppLayout;
use crate::registry::ModuleRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardCheck {
    Idle,
    Healthy { module_name: String },
    RollbackRequired { module_name: String, fault: String },
}

// Deferred health check, run at the start of every request before normal
// handling. A module that just replaced its own code cannot be trusted to
// self-test in the request that installed it; the first request afterwards
// probes it and triggers a rollback if it is broken. The rollback-ongoing
// flag keeps a second request from triggering the same rollback again.
pub fn run_check(
    layout: &AppLayout,
    prefs: &mut dyn PrefStore,
    flash: &mut dyn FlashStore,
) -> Result<GuardCheck> {
    let module_name = prefs.get(PREF_LAST_UPDATED_MODULE, "");
    if module_name.is_empty() {
        return Ok(GuardCheck::Idle);
    }
    if get_bool(prefs, PREF_ROLLBACK_ONGOING) {
        return Ok(GuardCheck::Idle);
    }

    let registry = ModuleRegistry::new(layout);
    let mut fault = registry.probe(&module_name);

    // Fault signals may also surface through the transient-message channel;
    // messages for other modules are re-queued, not lost.
    let messages = pull_scoped(flash, &module_name)?;
    if fault.is_empty() {
        if let Some(message) = messages.iter().find(|message| message.level == "danger") {
            fault = message.text.clone();
        }
    }

    if fault.is_empty() {
        prefs.set(PREF_LAST_UPDATED_MODULE, "")?;
        return Ok(GuardCheck::Healthy { module_name });
    }

    set_bool(prefs, PREF_ROLLBACK_ONGOING, true)?;
    Ok(GuardCheck::RollbackRequired {
        module_name,
        fault: bounded_error_text(&fault),
    })
}
