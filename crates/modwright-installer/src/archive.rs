use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use modwright_core::UpdateError;
use zip::ZipArchive;

// Extracts a downloaded module archive into the staging area and returns the
// number of files written. Entries that would escape the target directory
// are skipped.
pub fn extract_zip(zip_path: &Path, dst: &Path) -> Result<u64, UpdateError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        UpdateError::staging(format!("failed to open archive {}: {err}", zip_path.display()))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|err| {
        UpdateError::staging(format!("failed to read archive {}: {err}", zip_path.display()))
    })?;

    fs::create_dir_all(dst).map_err(|err| {
        UpdateError::staging(format!("failed to create {}: {err}", dst.display()))
    })?;

    let mut extracted = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|err| {
            UpdateError::staging(format!(
                "failed to read archive entry in {}: {err}",
                zip_path.display()
            ))
        })?;

        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let out_path = dst.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|err| {
                UpdateError::staging(format!("failed to create {}: {err}", out_path.display()))
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                UpdateError::staging(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let mut out_file = fs::File::create(&out_path).map_err(|err| {
            UpdateError::staging(format!("failed to create {}: {err}", out_path.display()))
        })?;
        io::copy(&mut entry, &mut out_file).map_err(|err| {
            UpdateError::staging(format!("failed to extract {}: {err}", out_path.display()))
        })?;
        extracted += 1;
    }

    Ok(extracted)
}

// Lists the file entries of an archive, as archive-relative paths.
pub fn zip_file_list(zip_path: &Path) -> Result<Vec<String>, UpdateError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        UpdateError::staging(format!("failed to open archive {}: {err}", zip_path.display()))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|err| {
        UpdateError::staging(format!("failed to read archive {}: {err}", zip_path.display()))
    })?;

    let mut files = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|err| {
            UpdateError::staging(format!(
                "failed to read archive entry in {}: {err}",
                zip_path.display()
            ))
        })?;
        if entry.is_dir() {
            continue;
        }
        if let Some(rel) = entry.enclosed_name() {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }

    Ok(files)
}

// Archives usually wrap the module in one top-level folder whose name is not
// predictable (release tags end up in it). A module manifest directly at the
// top means there is no wrapper at all.
pub fn find_payload_folder(root: &Path, manifest_name: &str) -> String {
    let Ok(entries) = fs::read_dir(root) else {
        return String::new();
    };

    let mut directory_name = String::new();
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if file_type.is_file() && name == manifest_name {
            return String::new();
        }
        if file_type.is_dir() {
            directory_name = name;
        }
    }

    directory_name
}

// The set of module-relative paths shipped by the archive, used to decide
// which old files may be cleaned up.
pub fn keep_set(file_list: &[String], payload_prefix: &str) -> HashSet<String> {
    if payload_prefix.is_empty() {
        return file_list.iter().cloned().collect();
    }

    let prefix = format!("{}/", payload_prefix.trim_end_matches('/'));
    file_list
        .iter()
        .filter_map(|path| path.strip_prefix(&prefix))
        .map(ToString::to_string)
        .collect()
}
