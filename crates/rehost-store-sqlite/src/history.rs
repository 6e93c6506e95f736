use std::path::Path;

use anyhow::{Context, Result};
use rehost_core::{
    RehostError, RewriteContext, RewriteOutcome, StoreKind, StoreReport, StoreRewriter,
};
use rusqlite::{params, Connection, TransactionBehavior};

use crate::column::{rewrite_column, ColumnTarget};
use crate::connection::{like_pattern, table_has_column};

const HISTORY: ColumnTarget = ColumnTarget {
    store: StoreKind::History,
    field: "url",
    requires: &[("moz_places", "url")],
    select_sql: "SELECT id, url FROM moz_places WHERE url LIKE ?1",
    update_sql: "UPDATE moz_places SET url = ?1 WHERE id = ?2",
};

/// Visited-page URLs in `places.sqlite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryRewriter;

impl StoreRewriter for HistoryRewriter {
    fn store(&self) -> StoreKind {
        StoreKind::History
    }

    fn rewrite(&self, profile: &Path, ctx: &RewriteContext) -> Result<StoreReport, RehostError> {
        let mut pass = rewrite_column(profile, ctx, &HISTORY)?;
        if ctx.mode.is_simulate() {
            return Ok(pass.report);
        }

        // Separate transaction: the url rewrite above is already committed.
        if let Some(conn) = pass.conn.as_mut() {
            match refresh_host_index(conn, ctx, &pass.planned) {
                Ok(rows) => {
                    tracing::info!("history host index refreshed: {rows} rows");
                    pass.report.index_rows_updated = Some(rows);
                }
                Err(err) => tracing::warn!("history host index refresh skipped: {err:#}"),
            }
        }
        Ok(pass.report)
    }
}

/// Bring the denormalized host columns in line with the rewritten urls.
fn refresh_host_index(
    conn: &mut Connection,
    ctx: &RewriteContext,
    planned: &[RewriteOutcome],
) -> Result<usize> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start index transaction")?;
    let mut touched = 0;

    if table_has_column(&tx, "moz_origins", "host")? {
        let with_rev_host = table_has_column(&tx, "moz_origins", "rev_host")?;
        let origins = {
            let mut stmt = tx.prepare("SELECT id, host FROM moz_origins WHERE host LIKE ?1")?;
            let rows = stmt.query_map(params![like_pattern(ctx)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read moz_origins")?
        };

        for (id, host) in origins {
            let Some(new_host) = ctx.rule.rewrite(&host) else {
                continue;
            };
            // An origin already registered under the new host keeps its row.
            touched += if with_rev_host {
                tx.execute(
                    "UPDATE OR IGNORE moz_origins SET host = ?1, rev_host = ?2 WHERE id = ?3",
                    params![new_host, reverse_host(&new_host), id],
                )
            } else {
                tx.execute(
                    "UPDATE OR IGNORE moz_origins SET host = ?1 WHERE id = ?2",
                    params![new_host, id],
                )
            }
            .with_context(|| format!("failed to update moz_origins row {id}"))?;
        }
    }

    if table_has_column(&tx, "moz_places", "rev_host")? {
        let mut stmt = tx.prepare("UPDATE moz_places SET rev_host = ?1 WHERE id = ?2")?;
        for outcome in planned.iter().filter(|outcome| outcome.applied) {
            let (Some(id), Some(host)) =
                (outcome.record_key.row_id(), ctx.rule.host_of(&outcome.new_value))
            else {
                continue;
            };
            touched += stmt
                .execute(params![reverse_host(host), id])
                .with_context(|| format!("failed to update moz_places.rev_host for row {id}"))?;
        }
    }

    tx.commit().context("failed to commit index transaction")?;
    Ok(touched)
}

/// `www.example.com` becomes `moc.elpmaxe.www.`.
fn reverse_host(host: &str) -> String {
    let mut reversed: String = host.to_ascii_lowercase().chars().rev().collect();
    reversed.push('.');
    reversed
}
