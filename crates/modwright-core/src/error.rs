use thiserror::Error;

// Error texts shown to the user (and persisted as rollback reasons) are
// bounded to this length.
pub const ERROR_MAX_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("communication error with {service}: {detail}")]
    Communication { service: String, detail: String },

    #[error("no update source is known for module '{0}'")]
    Resolution(String),

    #[error("{0}")]
    Staging(String),

    #[error("the time limit was nearly reached during {0}")]
    Timeout(String),

    #[error("module '{module}' failed to load: {detail}")]
    InstallationFault { module: String, detail: String },

    #[error("restoring the backup failed ({detail}); recover manually by copying the files from '{backup_path}'")]
    RollbackFailure { backup_path: String, detail: String },
}

impl UpdateError {
    pub fn staging(detail: impl Into<String>) -> Self {
        Self::Staging(detail.into())
    }

    pub fn communication(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Communication {
            service: service.into(),
            detail: detail.into(),
        }
    }
}

pub fn bounded_error_text(text: &str) -> String {
    if text.len() <= ERROR_MAX_LEN {
        return text.to_string();
    }

    let mut cut = ERROR_MAX_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}
