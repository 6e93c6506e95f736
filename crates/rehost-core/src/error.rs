use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::StoreKind;

#[derive(Debug, Error)]
pub enum RehostError {
    #[error("browser appears to be running; quit it and retry")]
    BrowserRunning,
    #[error("destination already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("path not found or not a directory: {}", .0.display())]
    NotFound(PathBuf),
    #[error("{store} store is required but missing at {}", path.display())]
    MissingStore { store: StoreKind, path: PathBuf },
    #[error("{store} store is malformed: {reason}")]
    MalformedStore { store: StoreKind, reason: String },
    #[error("{store} store failed: {message}")]
    Store { store: StoreKind, message: String },
    #[error("invalid domain rule: {0}")]
    InvalidRule(String),
    #[error("{} must not be {} or live inside it", inner.display(), outer.display())]
    Nested { inner: PathBuf, outer: PathBuf },
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RehostError {
    pub fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io { path: path.to_path_buf(), source }
    }

    pub fn store_failure(store: StoreKind, err: impl std::fmt::Display) -> Self {
        Self::Store { store, message: err.to_string() }
    }

    pub fn malformed(store: StoreKind, reason: impl Into<String>) -> Self {
        Self::MalformedStore { store, reason: reason.into() }
    }
}
