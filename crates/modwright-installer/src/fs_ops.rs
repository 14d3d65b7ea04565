use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use modwright_core::UpdateError;

// Copy and move loops must give up before the host's hard execution-time
// ceiling; this is the margin kept in reserve.
const TIME_MARGIN: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    deadline: Option<Instant>,
}

impl TimeBudget {
    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub fn with_limit(limit: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + limit),
        }
    }

    pub fn is_nearly_up(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() + TIME_MARGIN >= deadline,
            None => false,
        }
    }

    fn check(&self, during: &str) -> Result<(), UpdateError> {
        if self.is_nearly_up() {
            return Err(UpdateError::Timeout(during.to_string()));
        }
        Ok(())
    }
}

pub fn recreate_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    }
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

// A missing source tree copies zero files; rollback relies on this when an
// Install action has no backup to restore.
pub fn copy_tree(src: &Path, dst: &Path, budget: &TimeBudget) -> Result<u64, UpdateError> {
    if !src.exists() {
        return Ok(0);
    }
    let mut copied = 0;
    copy_tree_recursive(src, src, dst, budget, &mut copied)?;
    Ok(copied)
}

fn copy_tree_recursive(
    src_root: &Path,
    current: &Path,
    dst_root: &Path,
    budget: &TimeBudget,
    copied: &mut u64,
) -> Result<(), UpdateError> {
    let entries = fs::read_dir(current).map_err(|err| {
        UpdateError::staging(format!("failed to read {}: {err}", current.display()))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|err| UpdateError::staging(format!("failed to read directory entry: {err}")))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| {
            UpdateError::staging(format!("failed to stat {}: {err}", path.display()))
        })?;

        if file_type.is_dir() {
            copy_tree_recursive(src_root, &path, dst_root, budget, copied)?;
            continue;
        }

        budget.check("copying files")?;

        let rel = path.strip_prefix(src_root).map_err(|err| {
            UpdateError::staging(format!("failed to relativize {}: {err}", path.display()))
        })?;
        let dst_path = dst_root.join(rel);
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                UpdateError::staging(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        fs::copy(&path, &dst_path).map_err(|err| {
            UpdateError::staging(format!(
                "failed to copy {} to {}: {err}",
                path.display(),
                dst_path.display()
            ))
        })?;
        *copied += 1;
    }

    Ok(())
}

// Moves every file of `src` over `dst`, replacing files in place, then
// removes what is left of `src`. Unlike a directory rename this works when
// `dst` already exists and is a live installation.
pub fn move_tree(src: &Path, dst: &Path, budget: &TimeBudget) -> Result<u64, UpdateError> {
    if !src.exists() {
        return Err(UpdateError::staging(format!(
            "staging folder is missing: {}",
            src.display()
        )));
    }

    let mut moved = 0;
    move_tree_recursive(src, src, dst, budget, &mut moved)?;
    fs::remove_dir_all(src).map_err(|err| {
        UpdateError::staging(format!(
            "failed to remove staging folder {}: {err}",
            src.display()
        ))
    })?;
    Ok(moved)
}

fn move_tree_recursive(
    src_root: &Path,
    current: &Path,
    dst_root: &Path,
    budget: &TimeBudget,
    moved: &mut u64,
) -> Result<(), UpdateError> {
    let entries = fs::read_dir(current).map_err(|err| {
        UpdateError::staging(format!("failed to read {}: {err}", current.display()))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|err| UpdateError::staging(format!("failed to read directory entry: {err}")))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| {
            UpdateError::staging(format!("failed to stat {}: {err}", path.display()))
        })?;

        if file_type.is_dir() {
            move_tree_recursive(src_root, &path, dst_root, budget, moved)?;
            continue;
        }

        budget.check("moving files")?;

        let rel = path.strip_prefix(src_root).map_err(|err| {
            UpdateError::staging(format!("failed to relativize {}: {err}", path.display()))
        })?;
        let dst_path = dst_root.join(rel);
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                UpdateError::staging(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        if dst_path.exists() {
            fs::remove_file(&dst_path).map_err(|err| {
                UpdateError::staging(format!(
                    "failed to replace {}: {err}",
                    dst_path.display()
                ))
            })?;
        }
        if fs::rename(&path, &dst_path).is_err() {
            fs::copy(&path, &dst_path).map_err(|err| {
                UpdateError::staging(format!(
                    "failed to move {} to {}: {err}",
                    path.display(),
                    dst_path.display()
                ))
            })?;
            fs::remove_file(&path).map_err(|err| {
                UpdateError::staging(format!("failed to remove {}: {err}", path.display()))
            })?;
        }
        *moved += 1;
    }

    Ok(())
}

// Deletes files under the given module folders that are not part of the
// freshly installed archive. A file named in `files_to_keep` is never
// deleted, wherever it sits.
pub fn clean_stale_files(
    module_dir: &Path,
    folders_to_clean: &[String],
    files_to_keep: &HashSet<String>,
    budget: &TimeBudget,
) -> Result<u64, UpdateError> {
    let mut removed = 0;
    for folder in folders_to_clean {
        let folder_path = module_dir.join(folder);
        if !folder_path.exists() {
            continue;
        }
        clean_recursive(module_dir, &folder_path, files_to_keep, budget, &mut removed)?;
    }
    Ok(removed)
}

fn clean_recursive(
    module_dir: &Path,
    current: &Path,
    files_to_keep: &HashSet<String>,
    budget: &TimeBudget,
    removed: &mut u64,
) -> Result<(), UpdateError> {
    let entries = fs::read_dir(current).map_err(|err| {
        UpdateError::staging(format!("failed to read {}: {err}", current.display()))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|err| UpdateError::staging(format!("failed to read directory entry: {err}")))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| {
            UpdateError::staging(format!("failed to stat {}: {err}", path.display()))
        })?;

        if file_type.is_dir() {
            clean_recursive(module_dir, &path, files_to_keep, budget, removed)?;
            continue;
        }

        budget.check("cleaning up old files")?;

        let rel = path
            .strip_prefix(module_dir)
            .map_err(|err| {
                UpdateError::staging(format!("failed to relativize {}: {err}", path.display()))
            })?
            .to_string_lossy()
            .replace('\\', "/");
        if files_to_keep.contains(&rel) {
            continue;
        }

        fs::remove_file(&path).map_err(|err| {
            UpdateError::staging(format!("failed to delete {}: {err}", path.display()))
        })?;
        *removed += 1;
    }

    Ok(())
}

// Exclusive transaction marker. Two wizards must never share the staging and
// backup directories; the claim fails while another transaction holds it.
pub fn claim_lock(path: &Path, owner: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let holder = fs::read_to_string(path).unwrap_or_default();
            let holder = holder.trim();
            let detail = if holder.is_empty() {
                String::new()
            } else {
                format!(" (held for '{holder}')")
            };
            return Err(anyhow!("another module transaction is in progress{detail}"));
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to claim transaction lock: {}", path.display()));
        }
    };

    file.write_all(format!("{owner}\n").as_bytes())
        .with_context(|| format!("failed to write transaction lock: {}", path.display()))?;
    Ok(())
}

pub fn release_lock(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to release transaction lock: {}", path.display()))?;
    }
    Ok(())
}

// Releases the lock only when this transaction claimed it; a lock held for
// another module stays in place.
pub fn release_lock_if_owner(path: &Path, owner: &str) -> Result<()> {
    let holder = match fs::read_to_string(path) {
        Ok(holder) => holder,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read transaction lock: {}", path.display()));
        }
    };
    if holder.trim() == owner {
        release_lock(path)?;
    }
    Ok(())
}

pub fn remove_dir_if_exists(path: &Path) -> Result<(), UpdateError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|err| {
            UpdateError::staging(format!("failed to remove {}: {err}", path.display()))
        })?;
    }
    Ok(())
}
