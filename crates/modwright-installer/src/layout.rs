use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use modwright_core::identity::folder_from_identity;
use modwright_sources::MODULES_ARCHIVE_FOLDER;

// Filesystem layout of a host application root. Everything under data/tmp is
// scratch space owned by the upgrade transaction; it is recreated empty at
// PREPARE and never assumed to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    root: PathBuf,
}

impl AppLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join(MODULES_ARCHIVE_FOLDER)
    }

    pub fn module_dir(&self, folder: &str) -> PathBuf {
        self.modules_dir().join(folder)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir().join("tmp")
    }

    pub fn upgrade_dir(&self) -> PathBuf {
        self.tmp_dir().join("upgrade")
    }

    // The staging copy of the host's modules folder, shared by every source
    // kind once the archive is unpacked.
    pub fn staging_modules_dir(&self) -> PathBuf {
        self.upgrade_dir().join(MODULES_ARCHIVE_FOLDER)
    }

    pub fn unzip_target(&self, unzip_folder: &str) -> PathBuf {
        if unzip_folder.is_empty() {
            self.upgrade_dir()
        } else {
            self.upgrade_dir().join(unzip_folder)
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.tmp_dir().join("backup")
    }

    pub fn backup_module_dir(&self, folder: &str) -> PathBuf {
        self.backup_dir().join(MODULES_ARCHIVE_FOLDER).join(folder)
    }

    pub fn archive_path(&self, module_name: &str) -> PathBuf {
        self.tmp_dir()
            .join(format!("{}.zip", folder_from_identity(module_name)))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.tmp_dir().join("upgrade.lock")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir().join("prefs").join("modwright.prefs")
    }

    pub fn flash_path(&self) -> PathBuf {
        self.data_dir().join("flash.queue")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.modules_dir(),
            self.data_dir(),
            self.tmp_dir(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
