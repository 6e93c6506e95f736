//! Collaborators the engine consumes but does not implement: locating the profile directory
//! and knowing whether the browser that owns it is running.

use std::path::{Path, PathBuf};

use crate::error::RehostError;

/// Reports whether the application owning the profile is currently running.
pub trait BrowserProbe {
    /// # Errors
    /// Returns an error when liveness cannot be determined.
    fn is_running(&self) -> Result<bool, RehostError>;
}

/// Resolves the profile directory an operation should act on.
pub trait ProfileResolver {
    /// # Errors
    /// Returns an error when no usable profile directory can be determined.
    fn resolve(&self) -> Result<PathBuf, RehostError>;
}

/// Fail with [`RehostError::BrowserRunning`] unless the probe reports the browser closed.
///
/// # Errors
/// Propagates probe failures and reports a running browser as an error.
pub fn ensure_browser_closed(probe: &dyn BrowserProbe) -> Result<(), RehostError> {
    if probe.is_running()? {
        return Err(RehostError::BrowserRunning);
    }
    Ok(())
}

/// A profile directory given explicitly by the caller.
#[derive(Debug, Clone)]
pub struct ExplicitProfile {
    path: PathBuf,
}

impl ExplicitProfile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProfileResolver for ExplicitProfile {
    fn resolve(&self) -> Result<PathBuf, RehostError> {
        existing_dir(&self.path)
    }
}

/// Canonicalize `path`, requiring an existing directory.
pub(crate) fn existing_dir(path: &Path) -> Result<PathBuf, RehostError> {
    if !path.is_dir() {
        return Err(RehostError::NotFound(path.to_path_buf()));
    }
    path.canonicalize().map_err(RehostError::io(path))
}

/// Probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl BrowserProbe for StaticProbe {
    fn is_running(&self) -> Result<bool, RehostError> {
        Ok(self.0)
    }
}
