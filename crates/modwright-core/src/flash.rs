use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};

// The host's transient-message channel. Modules report boot faults here;
// the deferred health-check guard drains it looking for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashMessage {
    pub scope: String,
    pub level: String,
    pub text: String,
}

pub trait FlashStore {
    fn push(&mut self, message: FlashMessage) -> Result<()>;
    fn drain(&mut self) -> Result<Vec<FlashMessage>>;
}

// Drains every queued message, keeps the ones for `scope`, and re-queues the
// rest so unrelated messages are not lost.
pub fn pull_scoped(store: &mut dyn FlashStore, scope: &str) -> Result<Vec<FlashMessage>> {
    let mut matching = Vec::new();
    for message in store.drain()? {
        if message.scope == scope {
            matching.push(message);
        } else {
            store.push(message)?;
        }
    }
    Ok(matching)
}

#[derive(Debug)]
pub struct FileFlashStore {
    path: PathBuf,
}

impl FileFlashStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FlashStore for FileFlashStore {
    fn push(&mut self, message: FlashMessage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut payload = match fs::read_to_string(&self.path) {
            Ok(payload) => payload,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read flash queue: {}", self.path.display())
                });
            }
        };
        payload.push_str(&serialize_message(&message));
        payload.push('\n');

        fs::write(&self.path, payload.as_bytes())
            .with_context(|| format!("failed to write flash queue: {}", self.path.display()))
    }

    fn drain(&mut self) -> Result<Vec<FlashMessage>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read flash queue: {}", self.path.display())
                });
            }
        };

        fs::remove_file(&self.path)
            .with_context(|| format!("failed to clear flash queue: {}", self.path.display()))?;

        let mut messages = Vec::new();
        for line in raw.lines().filter(|line| !line.is_empty()) {
            if let Some(message) = parse_message(line) {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

#[derive(Debug, Default)]
pub struct MemoryFlashStore {
    messages: Vec<FlashMessage>,
}

impl FlashStore for MemoryFlashStore {
    fn push(&mut self, message: FlashMessage) -> Result<()> {
        self.messages.push(message);
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<FlashMessage>> {
        Ok(std::mem::take(&mut self.messages))
    }
}

fn serialize_message(message: &FlashMessage) -> String {
    format!(
        "{}\t{}\t{}",
        message.scope,
        message.level,
        message.text.replace('\n', "\\n").replace('\t', " ")
    )
}

fn parse_message(line: &str) -> Option<FlashMessage> {
    let mut parts = line.splitn(3, '\t');
    let scope = parts.next()?.to_string();
    let level = parts.next()?.to_string();
    let text = parts.next()?.replace("\\n", "\n");
    Some(FlashMessage { scope, level, text })
}
