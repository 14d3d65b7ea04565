use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use modwright_core::identity::folder_from_identity;

pub const LATEST_VERSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// Best-effort, file-backed memo of the last remote "latest version" answer.
// Shared between invocations, unsynchronized; a stampede on expiry only
// costs duplicate lookups.
#[derive(Debug)]
pub struct VersionCache {
    dir: PathBuf,
    ttl: Duration,
}

impl VersionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: LATEST_VERSION_TTL,
        }
    }

    pub fn with_ttl(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn remember(&self, module_name: &str, fetch: impl FnOnce() -> String) -> String {
        if let Some(cached) = self.lookup(module_name) {
            return cached;
        }

        let version = fetch();
        let _ = self.store(module_name, &version);
        version
    }

    fn cache_path(&self, module_name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.latest", folder_from_identity(module_name)))
    }

    fn lookup(&self, module_name: &str) -> Option<String> {
        let raw = match fs::read_to_string(self.cache_path(module_name)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(_) => return None,
        };

        let mut fetched_at = None;
        let mut version = None;
        for line in raw.lines() {
            match line.split_once('=') {
                Some(("fetched_at", value)) => fetched_at = value.parse::<u64>().ok(),
                Some(("version", value)) => version = Some(value.to_string()),
                _ => {}
            }
        }

        let fetched_at = fetched_at?;
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        if now.saturating_sub(fetched_at) >= self.ttl.as_secs() {
            return None;
        }
        version
    }

    fn store(&self, module_name: &str, version: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        fs::write(
            self.cache_path(module_name),
            format!("fetched_at={now}\nversion={version}\n"),
        )
    }
}
