use std::path::Path;

use rehost_core::{RehostError, RewriteContext, StoreKind, StoreReport, StoreRewriter};

use crate::column::{rewrite_column, ColumnTarget};

// A place referenced by several bookmarks is one candidate.
const BOOKMARKS: ColumnTarget = ColumnTarget {
    store: StoreKind::Bookmarks,
    field: "url",
    requires: &[("moz_places", "url"), ("moz_bookmarks", "fk")],
    select_sql: "SELECT DISTINCT p.id, p.url
                 FROM moz_places p
                 JOIN moz_bookmarks b ON b.fk = p.id
                 WHERE p.url LIKE ?1",
    update_sql: "UPDATE moz_places SET url = ?1 WHERE id = ?2",
};

/// Bookmarked URLs in `places.sqlite`. Usually a no-op after [`crate::HistoryRewriter`] has run,
/// since both point into `moz_places`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookmarksRewriter;

impl StoreRewriter for BookmarksRewriter {
    fn store(&self) -> StoreKind {
        StoreKind::Bookmarks
    }

    fn rewrite(&self, profile: &Path, ctx: &RewriteContext) -> Result<StoreReport, RehostError> {
        Ok(rewrite_column(profile, ctx, &BOOKMARKS)?.report)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rehost_core::{DomainRule, RunMode};
    use rusqlite::Connection;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn only_bookmarked_places_are_rewritten_once_each() -> Result<()> {
        let temp = TempDir::new()?;
        let conn = Connection::open(temp.path().join("places.sqlite"))?;
        conn.execute_batch(
            "CREATE TABLE moz_places (id INTEGER PRIMARY KEY, url TEXT);
             CREATE TABLE moz_bookmarks (id INTEGER PRIMARY KEY, fk INTEGER, title TEXT);
             INSERT INTO moz_places VALUES (1, 'https://wiki.test-domain.co/home');
             INSERT INTO moz_places VALUES (2, 'https://jira.test-domain.co/browse');
             INSERT INTO moz_bookmarks VALUES (10, 1, 'Wiki');
             INSERT INTO moz_bookmarks VALUES (11, 1, 'Wiki again');
             INSERT INTO moz_bookmarks VALUES (12, NULL, 'Folder');",
        )?;
        drop(conn);

        let ctx = RewriteContext::new(
            DomainRule::new("test-domain.co", "test-domain.co.uk")?,
            RunMode::Mutate,
        );
        let report = BookmarksRewriter.rewrite(temp.path(), &ctx)?;
        assert_eq!((report.candidates, report.matched, report.updated), (1, 1, 1));

        let conn = Connection::open(temp.path().join("places.sqlite"))?;
        let urls: Vec<String> = conn
            .prepare("SELECT url FROM moz_places ORDER BY id")?
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        assert_eq!(
            urls,
            vec![
                "https://wiki.test-domain.co.uk/home".to_owned(),
                "https://jira.test-domain.co/browse".to_owned(),
            ]
        );
        Ok(())
    }
}
