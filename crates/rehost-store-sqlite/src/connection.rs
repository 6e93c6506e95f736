use std::path::Path;

use anyhow::{Context, Result};
use rehost_core::{snapshot, RehostError, RewriteContext, Snapshot, StoreKind};
use rusqlite::{params, Connection, OpenFlags};

/// Snapshot and open the store file backing `store`.
///
/// Returns `Ok(None)` for an optional store that is not in the profile. A missing mandatory
/// store is an error. The snapshot is taken before the connection exists, in both modes.
pub(crate) fn open_for_rewrite(
    profile: &Path,
    store: StoreKind,
    ctx: &RewriteContext,
) -> Result<Option<(Snapshot, Connection)>, RehostError> {
    let path = profile.join(store.file_name());
    if !path.is_file() {
        if store.is_mandatory() {
            return Err(RehostError::MissingStore { store, path });
        }
        tracing::info!("{} not found; skipping {store}", path.display());
        return Ok(None);
    }

    let snapshot = snapshot(&path)?;
    let conn = open_store(&path, ctx).map_err(|err| failure(store, &err))?;
    Ok(Some((snapshot, conn)))
}

/// Open an existing store read-only when simulating and read-write otherwise. The file is never
/// created.
pub(crate) fn open_store(path: &Path, ctx: &RewriteContext) -> Result<Connection> {
    let access = if ctx.mode.is_simulate() {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    };
    let conn = Connection::open_with_flags(path, access | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

    let busy_ms = u64::try_from(ctx.busy_timeout.as_millis()).unwrap_or(u64::MAX);
    conn.execute_batch(&format!("PRAGMA busy_timeout = {busy_ms};"))
        .context("failed to configure sqlite pragmas")?;
    Ok(conn)
}

pub(crate) fn failure(store: StoreKind, err: &anyhow::Error) -> RehostError {
    RehostError::store_failure(store, format!("{err:#}"))
}

/// `LIKE` pattern selecting every value that mentions the old suffix. SQLite `LIKE` is ASCII
/// case-insensitive, matching the rule's own candidate test. Suffixes never contain `%` or `_`.
pub(crate) fn like_pattern(ctx: &RewriteContext) -> String {
    format!("%{}%", ctx.rule.old_suffix())
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

pub(crate) fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
