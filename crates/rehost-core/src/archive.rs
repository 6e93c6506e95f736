//! Full profile backup and restore.
//!
//! Both operations refuse to run while the browser is open. Restore always copies the current
//! profile aside before it deletes anything, so the only destructive step is recoverable.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::RehostError;
use crate::profile::{ensure_browser_closed, existing_dir, BrowserProbe};
use crate::snapshot::{copy_dir_new, copy_entry, summarize_dir, timestamp_slug};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub path: PathBuf,
    pub file_count: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored_from: PathBuf,
    pub profile: PathBuf,
    /// Copy of the profile as it was right before the restore.
    pub pre_restore: ArchiveOutcome,
    pub file_count: u64,
    pub total_bytes: u64,
}

/// Copy the whole profile to `<parent>/<profile name>-backup-<timestamp>`.
///
/// `destination_parent` defaults to the directory containing the profile and is created when
/// missing.
///
/// # Errors
/// Fails when the browser is running, the profile is missing, the destination already exists
/// or lies inside the profile, or any copy fails.
pub fn backup(
    probe: &dyn BrowserProbe,
    source_dir: &Path,
    destination_parent: Option<&Path>,
) -> Result<ArchiveOutcome, RehostError> {
    ensure_browser_closed(probe)?;
    let source = existing_dir(source_dir)?;
    let parent = match destination_parent {
        Some(parent) => parent.to_path_buf(),
        None => parent_of(&source)?,
    };
    fs::create_dir_all(&parent).map_err(RehostError::io(&parent))?;
    let parent = parent.canonicalize().map_err(RehostError::io(&parent))?;
    if parent.starts_with(&source) {
        return Err(RehostError::Nested { inner: parent, outer: source });
    }

    let outcome = archive_copy(&source, &parent, "backup", OffsetDateTime::now_utc())?;
    tracing::info!(
        "backed up {} to {} ({} files, {} bytes)",
        source.display(),
        outcome.path.display(),
        outcome.file_count,
        outcome.total_bytes
    );
    Ok(outcome)
}

/// Replace the contents of `target_profile_dir` with the contents of `source_backup_dir`.
///
/// Order is fixed: validate everything, copy the current profile to a
/// `<profile name>-pre-restore-<timestamp>` sibling, empty the profile, then copy the backup in.
///
/// # Errors
/// Fails before touching the profile when the browser is running, either directory is missing,
/// one directory is the other or lives inside it, or the pre-restore copy fails.
pub fn restore(
    probe: &dyn BrowserProbe,
    source_backup_dir: &Path,
    target_profile_dir: &Path,
) -> Result<RestoreOutcome, RehostError> {
    ensure_browser_closed(probe)?;
    let source = existing_dir(source_backup_dir)?;
    let target = existing_dir(target_profile_dir)?;
    if source.starts_with(&target) {
        return Err(RehostError::Nested { inner: source, outer: target });
    }
    if target.starts_with(&source) {
        return Err(RehostError::Nested { inner: target, outer: source });
    }
    let parent = parent_of(&target)?;

    let pre_restore = archive_copy(&target, &parent, "pre-restore", OffsetDateTime::now_utc())?;
    tracing::info!("pre-restore copy written to {}", pre_restore.path.display());

    clear_dir(&target)?;
    for entry in fs::read_dir(&source).map_err(RehostError::io(&source))? {
        let entry = entry.map_err(RehostError::io(&source))?;
        copy_entry(&entry.path(), &target.join(entry.file_name()))?;
    }

    let (file_count, total_bytes) = summarize_dir(&target);
    tracing::info!("restored {} from {}", target.display(), source.display());
    Ok(RestoreOutcome {
        restored_from: source,
        profile: target,
        pre_restore,
        file_count,
        total_bytes,
    })
}

fn archive_copy(
    source: &Path,
    parent: &Path,
    label: &str,
    now: OffsetDateTime,
) -> Result<ArchiveOutcome, RehostError> {
    let name = source
        .file_name()
        .ok_or_else(|| RehostError::NotFound(source.to_path_buf()))?
        .to_string_lossy()
        .into_owned();
    let destination = parent.join(format!("{name}-{label}-{}", timestamp_slug(now)));

    copy_dir_new(source, &destination)?;
    let (file_count, total_bytes) = summarize_dir(&destination);
    Ok(ArchiveOutcome { path: destination, file_count, total_bytes })
}

fn clear_dir(dir: &Path) -> Result<(), RehostError> {
    for entry in fs::read_dir(dir).map_err(RehostError::io(dir))? {
        let path = entry.map_err(RehostError::io(dir))?.path();
        let metadata = fs::symlink_metadata(&path).map_err(RehostError::io(&path))?;
        if metadata.is_dir() {
            fs::remove_dir_all(&path).map_err(RehostError::io(&path))?;
        } else {
            fs::remove_file(&path).map_err(RehostError::io(&path))?;
        }
    }
    Ok(())
}

fn parent_of(path: &Path) -> Result<PathBuf, RehostError> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| RehostError::NotFound(path.to_path_buf()))
}
