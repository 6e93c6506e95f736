//! Rewriting of a single text column keyed by an integer row id.

use std::path::Path;

use anyhow::{Context, Result};
use rehost_core::{
    RecordKey, RehostError, RewriteCandidate, RewriteContext, RewriteOutcome, StoreKind,
    StoreReport,
};
use rusqlite::{params, Connection, TransactionBehavior};

use crate::connection::{failure, like_pattern, open_for_rewrite, table_has_column};

pub(crate) struct ColumnTarget {
    pub store: StoreKind,
    /// Field name reported on every candidate.
    pub field: &'static str,
    /// `(table, column)` pairs that must exist for the store to hold anything to rewrite.
    pub requires: &'static [(&'static str, &'static str)],
    /// Selects `(id, value)`; `?1` is the `LIKE` pattern.
    pub select_sql: &'static str,
    /// `?1` is the new value, `?2` the row id.
    pub update_sql: &'static str,
}

pub(crate) struct ColumnPass {
    pub report: StoreReport,
    /// Boundary-valid rewrites, flagged `applied` once committed.
    pub planned: Vec<RewriteOutcome>,
    /// Open connection for follow-up work, absent when the store file is not in the profile.
    pub conn: Option<Connection>,
}

/// Snapshot, scan, plan and (in mutate mode) apply every rewrite of `target` in one
/// immediate transaction.
pub(crate) fn rewrite_column(
    profile: &Path,
    ctx: &RewriteContext,
    target: &ColumnTarget,
) -> Result<ColumnPass, RehostError> {
    let store = target.store;
    let Some((snapshot, mut conn)) = open_for_rewrite(profile, store, ctx)? else {
        return Ok(ColumnPass {
            report: StoreReport::absent(store, ctx.mode),
            planned: Vec::new(),
            conn: None,
        });
    };
    let mut report = StoreReport::empty(store, ctx.mode, snapshot);

    let missing = missing_column(&conn, target.requires).map_err(|err| failure(store, &err))?;
    if let Some((table, column)) = missing {
        if store.is_mandatory() {
            return Err(RehostError::malformed(store, format!("{table}.{column} does not exist")));
        }
        tracing::warn!("{table}.{column} does not exist; nothing to rewrite in {store}");
        return Ok(ColumnPass { report, planned: Vec::new(), conn: Some(conn) });
    }

    let candidates =
        scan(&conn, target, &like_pattern(ctx)).map_err(|err| failure(store, &err))?;
    report.candidates = candidates.len();

    let mut planned: Vec<RewriteOutcome> = candidates
        .iter()
        .map(|candidate| candidate.plan(&ctx.rule))
        .filter(RewriteOutcome::is_change)
        .collect();
    report.matched = planned.len();
    for outcome in &planned {
        ctx.log_rewrite(store, outcome);
    }

    if !ctx.mode.is_simulate() && !planned.is_empty() {
        report.updated = apply_updates(&mut conn, target.update_sql, &mut planned)
            .map_err(|err| failure(store, &err))?;
    }

    tracing::info!(
        "{store}: candidates {}, matched {}, updated {}",
        report.candidates,
        report.matched,
        report.updated
    );
    Ok(ColumnPass { report, planned, conn: Some(conn) })
}

fn missing_column(
    conn: &Connection,
    requires: &[(&'static str, &'static str)],
) -> Result<Option<(&'static str, &'static str)>> {
    for &(table, column) in requires {
        if !table_has_column(conn, table, column)? {
            return Ok(Some((table, column)));
        }
    }
    Ok(None)
}

fn scan(conn: &Connection, target: &ColumnTarget, pattern: &str) -> Result<Vec<RewriteCandidate>> {
    let mut stmt = conn
        .prepare(target.select_sql)
        .with_context(|| format!("failed to prepare {} candidate scan", target.store))?;
    let rows = stmt.query_map(params![pattern], |row| {
        Ok(RewriteCandidate {
            store: target.store,
            record_key: RecordKey::RowId(row.get(0)?),
            field: target.field,
            old_value: row.get(1)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to read {} candidates", target.store))
}

fn apply_updates(
    conn: &mut Connection,
    update_sql: &str,
    planned: &mut [RewriteOutcome],
) -> Result<usize> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start write transaction")?;
    let mut updated = 0;
    {
        let mut stmt = tx.prepare(update_sql).context("failed to prepare update")?;
        for outcome in planned.iter_mut() {
            let Some(id) = outcome.record_key.row_id() else {
                continue;
            };
            updated += stmt
                .execute(params![outcome.new_value, id])
                .with_context(|| format!("failed to update row {id}"))?;
            outcome.applied = true;
        }
    }
    tx.commit().context("failed to commit write transaction")?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use rehost_core::{DomainRule, RunMode};
    use tempfile::TempDir;

    use super::*;
    use crate::form_history::FORM_HISTORY;

    fn ctx(mode: RunMode) -> Result<RewriteContext> {
        Ok(RewriteContext::new(DomainRule::new("test-domain.co", "test-domain.co.uk")?, mode))
    }

    fn seed(profile: &Path) -> Result<()> {
        let conn = Connection::open(profile.join("formhistory.sqlite"))?;
        conn.execute_batch(
            "CREATE TABLE moz_formhistory (id INTEGER PRIMARY KEY, fieldname TEXT, value TEXT, origin TEXT);
             INSERT INTO moz_formhistory VALUES (1, 'email', 'a@b', 'https://mail.test-domain.co');
             INSERT INTO moz_formhistory VALUES (2, 'q', 'x', 'https://nottest-domain.co/path');
             INSERT INTO moz_formhistory VALUES (3, 'q', 'y', 'https://example.org');",
        )?;
        Ok(())
    }

    fn origins(profile: &Path) -> Result<Vec<String>> {
        let conn = Connection::open(profile.join("formhistory.sqlite"))?;
        let mut stmt = conn.prepare("SELECT origin FROM moz_formhistory ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    #[test]
    fn glued_label_is_a_candidate_but_never_updated() -> Result<()> {
        let temp = TempDir::new()?;
        seed(temp.path())?;

        let pass = rewrite_column(temp.path(), &ctx(RunMode::Mutate)?, &FORM_HISTORY)?;
        assert_eq!((pass.report.candidates, pass.report.matched, pass.report.updated), (2, 1, 1));
        assert!(pass.planned.iter().all(|outcome| outcome.applied));
        assert_eq!(
            origins(temp.path())?,
            vec![
                "https://mail.test-domain.co.uk".to_owned(),
                "https://nottest-domain.co/path".to_owned(),
                "https://example.org".to_owned(),
            ]
        );
        Ok(())
    }

    #[test]
    fn simulate_snapshots_but_writes_nothing() -> Result<()> {
        let temp = TempDir::new()?;
        seed(temp.path())?;
        let before = origins(temp.path())?;

        let pass = rewrite_column(temp.path(), &ctx(RunMode::Simulate)?, &FORM_HISTORY)?;
        assert_eq!((pass.report.matched, pass.report.updated), (1, 0));
        assert!(pass.planned.iter().all(|outcome| !outcome.applied));
        assert!(pass.report.snapshot.is_some_and(|s| s.destination.is_file()));
        assert_eq!(origins(temp.path())?, before);
        Ok(())
    }

    #[test]
    fn failed_update_rolls_back_the_whole_store() -> Result<()> {
        let temp = TempDir::new()?;
        seed(temp.path())?;
        Connection::open(temp.path().join("formhistory.sqlite"))?.execute_batch(
            "INSERT INTO moz_formhistory VALUES (4, 'q', 'z', 'https://docs.test-domain.co');
             CREATE TRIGGER reject_row_4 BEFORE UPDATE ON moz_formhistory WHEN OLD.id = 4
             BEGIN SELECT RAISE(ABORT, 'row 4 is locked'); END;",
        )?;
        let before = origins(temp.path())?;

        let result = rewrite_column(temp.path(), &ctx(RunMode::Mutate)?, &FORM_HISTORY);
        assert!(matches!(result, Err(RehostError::Store { store: StoreKind::FormHistory, .. })));
        assert_eq!(origins(temp.path())?, before);
        assert_eq!(before[0], "https://mail.test-domain.co");
        Ok(())
    }

    #[test]
    fn missing_column_on_optional_store_is_an_empty_report() -> Result<()> {
        let temp = TempDir::new()?;
        Connection::open(temp.path().join("formhistory.sqlite"))?
            .execute_batch("CREATE TABLE moz_formhistory (id INTEGER PRIMARY KEY, value TEXT);")?;

        let pass = rewrite_column(temp.path(), &ctx(RunMode::Mutate)?, &FORM_HISTORY)?;
        assert!(pass.report.present);
        assert_eq!(pass.report.candidates, 0);
        Ok(())
    }
}
