//! Append-only copies of store files and directories taken before mutation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::RehostError;

/// Suffix SQLite uses for its write-ahead log next to a database file.
const WAL_SIDECAR: &str = "-wal";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// RFC3339 creation time.
    pub created_at: String,
}

/// Snapshot `path` next to itself as `<name>.pre_migration_<timestamp>.bak`.
///
/// # Errors
/// Returns [`RehostError::NotFound`] when `path` is missing, [`RehostError::AlreadyExists`] when
/// the computed destination is taken, and [`RehostError::Io`] when copying fails.
pub fn snapshot(path: &Path) -> Result<Snapshot, RehostError> {
    snapshot_at(path, OffsetDateTime::now_utc())
}

pub(crate) fn snapshot_at(path: &Path, now: OffsetDateTime) -> Result<Snapshot, RehostError> {
    if !path.exists() {
        return Err(RehostError::NotFound(path.to_path_buf()));
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| RehostError::NotFound(path.to_path_buf()))?
        .to_string_lossy()
        .into_owned();
    let destination =
        path.with_file_name(format!("{file_name}.pre_migration_{}.bak", timestamp_slug(now)));

    if path.is_dir() {
        copy_dir_new(path, &destination)?;
    } else {
        copy_file_new(path, &destination)?;
        let wal = sidecar(path, WAL_SIDECAR);
        if wal.is_file() {
            copy_file_new(&wal, &sidecar(&destination, WAL_SIDECAR))?;
        }
    }

    tracing::debug!("snapshot {} -> {}", path.display(), destination.display());
    Ok(Snapshot { source: path.to_path_buf(), destination, created_at: rfc3339(now) })
}

/// Copy one file to a destination that must not exist yet. Permissions travel with the copy.
pub(crate) fn copy_file_new(src: &Path, dst: &Path) -> Result<u64, RehostError> {
    if dst.exists() {
        return Err(RehostError::AlreadyExists(dst.to_path_buf()));
    }
    fs::copy(src, dst).map_err(RehostError::io(src))
}

/// Recursively copy a directory to a destination that must not exist yet.
pub(crate) fn copy_dir_new(src: &Path, dst: &Path) -> Result<(), RehostError> {
    if dst.exists() {
        return Err(RehostError::AlreadyExists(dst.to_path_buf()));
    }
    copy_dir_recursive(src, dst)
}

pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), RehostError> {
    fs::create_dir_all(dst).map_err(RehostError::io(dst))?;

    for entry in fs::read_dir(src).map_err(RehostError::io(src))? {
        let entry = entry.map_err(RehostError::io(src))?;
        copy_entry(&entry.path(), &dst.join(entry.file_name()))?;
    }

    Ok(())
}

/// Copy a file, directory or symbolic link to `dst`.
pub(crate) fn copy_entry(src: &Path, dst: &Path) -> Result<(), RehostError> {
    let ty = fs::symlink_metadata(src).map_err(RehostError::io(src))?.file_type();
    if ty.is_dir() {
        copy_dir_recursive(src, dst)
    } else if ty.is_symlink() {
        copy_symlink(src, dst)
    } else {
        fs::copy(src, dst).map_err(RehostError::io(src))?;
        Ok(())
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), RehostError> {
    let target = fs::read_link(src).map_err(RehostError::io(src))?;
    std::os::unix::fs::symlink(target, dst).map_err(RehostError::io(dst))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), RehostError> {
    fs::copy(src, dst).map_err(RehostError::io(src))?;
    Ok(())
}

/// Count regular files below `path` and their total size in bytes.
pub(crate) fn summarize_dir(path: &Path) -> (u64, u64) {
    let mut files = 0;
    let mut bytes = 0;
    for entry in walkdir::WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            if let Ok(metadata) = entry.metadata() {
                files += 1;
                bytes += metadata.len();
            }
        }
    }
    (files, bytes)
}

/// `YYYYMMDD-HHMMSS-micros`, sortable and unique at copy granularity.
pub(crate) fn timestamp_slug(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}-{:06}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.microsecond()
    )
}

fn rfc3339(value: OffsetDateTime) -> String {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
