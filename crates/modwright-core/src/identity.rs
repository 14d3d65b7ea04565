// Canonical module identities are the installation folder name wrapped in
// marker characters: the module installed in `modules/fancy-imagebar` is
// registered as `_fancy-imagebar_`. The folder is always recoverable from
// the identity; the reverse mapping goes through the identity resolver.

pub const IDENTITY_MARKER: char = '_';

// The orchestrator registers under its own canonical identity; its
// preferences and flash messages are scoped to this name.
pub const ORCHESTRATOR_NAME: &str = "_modwright_";

pub fn folder_from_identity(identity: &str) -> String {
    let stripped = identity.strip_prefix(IDENTITY_MARKER).unwrap_or(identity);
    let stripped = stripped.strip_suffix(IDENTITY_MARKER).unwrap_or(stripped);
    stripped.to_string()
}

pub fn identity_from_folder(folder: &str) -> String {
    format!("{IDENTITY_MARKER}{folder}{IDENTITY_MARKER}")
}

pub fn is_canonical(identity: &str) -> bool {
    identity.len() > 2
        && identity.starts_with(IDENTITY_MARKER)
        && identity.ends_with(IDENTITY_MARKER)
}
