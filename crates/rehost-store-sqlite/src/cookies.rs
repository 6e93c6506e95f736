//! Cookie hosts in `cookies.sqlite`.
//!
//! `moz_cookies` is unique on `(name, host, path, originAttributes)`, so moving a cookie to its
//! new host can collide with a cookie already stored there. The incoming (rewritten) cookie
//! wins: the colliding row is deleted before the update.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rehost_core::{
    RecordKey, RehostError, RewriteCandidate, RewriteContext, RewriteOutcome, StoreKind,
    StoreReport, StoreRewriter,
};
use rusqlite::{params, Connection, TransactionBehavior};

use crate::connection::{failure, like_pattern, open_for_rewrite, table_has_column};

const STORE: StoreKind = StoreKind::Cookies;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CookieKey {
    name: Option<String>,
    host: String,
    path: Option<String>,
    origin_attributes: Option<String>,
}

struct CookieRow {
    id: i64,
    key: CookieKey,
}

/// Schema facts probed once per run.
struct CookieSchema {
    /// Older stores predate `originAttributes`; their key is `(name, host, path)`.
    origin_attributes: bool,
}

impl CookieSchema {
    fn select_sql(&self) -> &'static str {
        if self.origin_attributes {
            "SELECT id, name, host, path, originAttributes FROM moz_cookies WHERE host LIKE ?1 ORDER BY id"
        } else {
            "SELECT id, name, host, path, NULL FROM moz_cookies WHERE host LIKE ?1 ORDER BY id"
        }
    }

    fn probe_sql(&self) -> &'static str {
        if self.origin_attributes {
            "SELECT id FROM moz_cookies
             WHERE name IS ?1 AND host = ?2 AND path IS ?3 AND originAttributes IS ?4 AND id != ?5"
        } else {
            "SELECT id FROM moz_cookies
             WHERE name IS ?1 AND host = ?2 AND path IS ?3 AND ?4 IS NULL AND id != ?5"
        }
    }
}

/// Cookie host rewriter with delete-then-update conflict resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieRewriter;

impl StoreRewriter for CookieRewriter {
    fn store(&self) -> StoreKind {
        STORE
    }

    fn rewrite(&self, profile: &Path, ctx: &RewriteContext) -> Result<StoreReport, RehostError> {
        let Some((snapshot, mut conn)) = open_for_rewrite(profile, STORE, ctx)? else {
            return Ok(StoreReport::absent(STORE, ctx.mode));
        };
        let mut report = StoreReport::empty(STORE, ctx.mode, snapshot);

        if !table_has_column(&conn, "moz_cookies", "host").map_err(|err| failure(STORE, &err))? {
            tracing::warn!("moz_cookies.host does not exist; nothing to rewrite in {STORE}");
            return Ok(report);
        }
        let schema = CookieSchema {
            origin_attributes: table_has_column(&conn, "moz_cookies", "originAttributes")
                .map_err(|err| failure(STORE, &err))?,
        };

        let rows = scan(&conn, &schema, &like_pattern(ctx)).map_err(|err| failure(STORE, &err))?;
        report.candidates = rows.len();

        let mut planned = plan(ctx, rows);
        report.matched = planned.len();

        let resolved = if ctx.mode.is_simulate() {
            count_conflicts(&conn, &schema, &planned)
        } else {
            apply(&mut conn, &schema, &mut planned)
        };
        let (updated, conflicts) = resolved.map_err(|err| failure(STORE, &err))?;
        report.updated = updated;
        report.conflicts = conflicts;

        tracing::info!(
            "{STORE}: candidates {}, matched {}, updated {}, conflicts {}",
            report.candidates,
            report.matched,
            report.updated,
            report.conflicts
        );
        Ok(report)
    }
}

fn scan(conn: &Connection, schema: &CookieSchema, pattern: &str) -> Result<Vec<CookieRow>> {
    let mut stmt = conn.prepare(schema.select_sql()).context("failed to prepare cookie scan")?;
    let rows = stmt.query_map(params![pattern], |row| {
        Ok(CookieRow {
            id: row.get(0)?,
            key: CookieKey {
                name: row.get(1)?,
                host: row.get(2)?,
                path: row.get(3)?,
                origin_attributes: row.get(4)?,
            },
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read cookie candidates")
}

fn plan(ctx: &RewriteContext, rows: Vec<CookieRow>) -> Vec<(CookieRow, RewriteOutcome)> {
    rows.into_iter()
        .filter_map(|row| {
            let candidate = RewriteCandidate {
                store: STORE,
                record_key: RecordKey::RowId(row.id),
                field: "host",
                old_value: row.key.host.clone(),
            };
            let outcome = candidate.plan(&ctx.rule);
            outcome.is_change().then(|| {
                ctx.log_rewrite(STORE, &outcome);
                (row, outcome)
            })
        })
        .collect()
}

fn rewritten_key(row: &CookieRow, outcome: &RewriteOutcome) -> CookieKey {
    CookieKey { host: outcome.new_value.clone(), ..row.key.clone() }
}

fn colliding_rows(
    conn: &Connection,
    schema: &CookieSchema,
    key: &CookieKey,
    own_id: i64,
) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare_cached(schema.probe_sql()).context("failed to prepare cookie probe")?;
    let rows = stmt.query_map(
        params![key.name, key.host, key.path, key.origin_attributes, own_id],
        |row| row.get(0),
    )?;
    rows.collect::<rusqlite::Result<Vec<i64>>>().context("failed to probe cookie key")
}

/// Count what [`apply`] would resolve, including two candidates rewriting into the same key.
fn count_conflicts(
    conn: &Connection,
    schema: &CookieSchema,
    planned: &[(CookieRow, RewriteOutcome)],
) -> Result<(usize, usize)> {
    let mut claimed = HashSet::new();
    let mut conflicts = 0;
    for (row, outcome) in planned {
        let key = rewritten_key(row, outcome);
        // A key claimed by an earlier candidate collides with that candidate only; any stored
        // row under the key was already counted for it.
        conflicts += if claimed.contains(&key) {
            1
        } else {
            colliding_rows(conn, schema, &key, row.id)?.len()
        };
        claimed.insert(key);
    }
    Ok((0, conflicts))
}

/// Delete colliding rows and move every planned cookie to its new host. A cookie updated
/// earlier in the pass and then replaced by a later candidate is not counted as updated.
fn apply(
    conn: &mut Connection,
    schema: &CookieSchema,
    planned: &mut [(CookieRow, RewriteOutcome)],
) -> Result<(usize, usize)> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start cookie transaction")?;
    let mut conflicts = 0;
    // Rows updated in this pass and still present.
    let mut surviving = HashSet::new();

    for (row, outcome) in planned.iter_mut() {
        let key = rewritten_key(row, outcome);
        let colliding = colliding_rows(&tx, schema, &key, row.id)?;
        for existing in &colliding {
            tx.execute("DELETE FROM moz_cookies WHERE id = ?1", params![existing])
                .with_context(|| format!("failed to delete colliding cookie {existing}"))?;
            surviving.remove(existing);
            tracing::debug!("cookie {existing} replaced by {} under host {}", row.id, key.host);
        }
        conflicts += colliding.len();
        let changed = tx
            .execute("UPDATE moz_cookies SET host = ?1 WHERE id = ?2", params![key.host, row.id])
            .with_context(|| format!("failed to update cookie {}", row.id))?;
        if changed > 0 {
            surviving.insert(row.id);
        }
        outcome.applied = true;
        outcome.conflict_resolved = !colliding.is_empty();
    }

    tx.commit().context("failed to commit cookie transaction")?;
    Ok((surviving.len(), conflicts))
}

#[cfg(test)]
mod tests {
    use rehost_core::{DomainRule, RunMode};
    use tempfile::TempDir;

    use super::*;

    const SCHEMA: &str = "CREATE TABLE moz_cookies (
        id INTEGER PRIMARY KEY,
        originAttributes TEXT NOT NULL DEFAULT '',
        name TEXT,
        value TEXT,
        host TEXT,
        path TEXT,
        CONSTRAINT moz_uniqueid UNIQUE (name, host, path, originAttributes)
    );";

    fn ctx(mode: RunMode) -> Result<RewriteContext> {
        Ok(RewriteContext::new(DomainRule::new("test-domain.co", "test-domain.co.uk")?, mode))
    }

    fn seed(profile: &Path, rows: &str) -> Result<()> {
        let conn = Connection::open(profile.join("cookies.sqlite"))?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(rows)?;
        Ok(())
    }

    fn cookies(profile: &Path) -> Result<Vec<(i64, String, String)>> {
        let conn = Connection::open(profile.join("cookies.sqlite"))?;
        let mut stmt = conn.prepare("SELECT id, host, value FROM moz_cookies ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    const COLLIDING: &str = "
        INSERT INTO moz_cookies (id, originAttributes, name, value, host, path)
          VALUES (1, '', 'sid', 'from-a', '.oldco.test-domain.co', '/');
        INSERT INTO moz_cookies (id, originAttributes, name, value, host, path)
          VALUES (2, '', 'sid', 'from-b', '.oldco.test-domain.co.uk', '/');";

    #[test]
    fn incoming_cookie_replaces_the_one_already_at_the_new_host() -> Result<()> {
        let temp = TempDir::new()?;
        seed(temp.path(), COLLIDING)?;

        let report = CookieRewriter.rewrite(temp.path(), &ctx(RunMode::Mutate)?)?;
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(
            cookies(temp.path())?,
            vec![(1, ".oldco.test-domain.co.uk".to_owned(), "from-a".to_owned())]
        );
        Ok(())
    }

    #[test]
    fn simulate_counts_the_same_conflicts_without_deleting() -> Result<()> {
        let temp = TempDir::new()?;
        seed(temp.path(), COLLIDING)?;
        let before = cookies(temp.path())?;

        let simulated = CookieRewriter.rewrite(temp.path(), &ctx(RunMode::Simulate)?)?;
        assert_eq!((simulated.candidates, simulated.matched), (2, 1));
        assert_eq!((simulated.updated, simulated.conflicts), (0, 1));
        assert_eq!(cookies(temp.path())?, before);

        let mutated = CookieRewriter.rewrite(temp.path(), &ctx(RunMode::Mutate)?)?;
        assert_eq!(mutated.conflicts, simulated.conflicts);
        assert_eq!(mutated.matched, simulated.matched);
        Ok(())
    }

    #[test]
    fn candidates_collapsing_onto_one_key_count_as_conflicts() -> Result<()> {
        let temp = TempDir::new()?;
        seed(
            temp.path(),
            "INSERT INTO moz_cookies (id, name, value, host, path)
               VALUES (1, 'sid', 'upper', '.Test-Domain.co', '/');
             INSERT INTO moz_cookies (id, name, value, host, path)
               VALUES (2, 'sid', 'lower', '.test-domain.co', '/');",
        )?;

        let simulated = CookieRewriter.rewrite(temp.path(), &ctx(RunMode::Simulate)?)?;
        let mutated = CookieRewriter.rewrite(temp.path(), &ctx(RunMode::Mutate)?)?;
        assert_eq!((simulated.conflicts, mutated.conflicts), (1, 1));
        assert_eq!(mutated.updated, 1);
        assert_eq!(
            cookies(temp.path())?,
            vec![(2, ".test-domain.co.uk".to_owned(), "lower".to_owned())]
        );
        Ok(())
    }

    #[test]
    fn failed_update_rolls_back_deletes_and_updates() -> Result<()> {
        let temp = TempDir::new()?;
        seed(
            temp.path(),
            "INSERT INTO moz_cookies (id, name, value, host, path)
               VALUES (1, 'sid', 'a', '.a.test-domain.co', '/');
             INSERT INTO moz_cookies (id, name, value, host, path)
               VALUES (2, 'sid', 'b', '.b.test-domain.co', '/');
             INSERT INTO moz_cookies (id, name, value, host, path)
               VALUES (3, 'sid', 'stale', '.a.test-domain.co.uk', '/');
             CREATE TRIGGER reject_cookie_2 BEFORE UPDATE ON moz_cookies WHEN OLD.id = 2
             BEGIN SELECT RAISE(ABORT, 'cookie 2 is locked'); END;",
        )?;
        let before = cookies(temp.path())?;

        let result = CookieRewriter.rewrite(temp.path(), &ctx(RunMode::Mutate)?);
        assert!(matches!(result, Err(RehostError::Store { store: StoreKind::Cookies, .. })));
        assert_eq!(cookies(temp.path())?, before);
        assert_eq!(before.len(), 3);
        Ok(())
    }

    #[test]
    fn second_pass_is_a_no_op() -> Result<()> {
        let temp = TempDir::new()?;
        seed(temp.path(), COLLIDING)?;
        let mutate = ctx(RunMode::Mutate)?;

        CookieRewriter.rewrite(temp.path(), &mutate)?;
        let again = CookieRewriter.rewrite(temp.path(), &mutate)?;
        assert_eq!((again.candidates, again.matched, again.updated, again.conflicts), (1, 0, 0, 0));
        Ok(())
    }

    #[test]
    fn legacy_schema_without_origin_attributes() -> Result<()> {
        let temp = TempDir::new()?;
        let conn = Connection::open(temp.path().join("cookies.sqlite"))?;
        conn.execute_batch(
            "CREATE TABLE moz_cookies (id INTEGER PRIMARY KEY, name TEXT, value TEXT, host TEXT, path TEXT,
               UNIQUE (name, host, path));
             INSERT INTO moz_cookies VALUES (1, 'sid', 'a', 'sso.test-domain.co', '/');
             INSERT INTO moz_cookies VALUES (2, 'sid', 'b', 'sso.test-domain.co.uk', '/');",
        )?;
        drop(conn);

        let report = CookieRewriter.rewrite(temp.path(), &ctx(RunMode::Mutate)?)?;
        assert_eq!((report.updated, report.conflicts), (1, 1));
        assert_eq!(
            cookies(temp.path())?,
            vec![(1, "sso.test-domain.co.uk".to_owned(), "a".to_owned())]
        );
        Ok(())
    }
}
