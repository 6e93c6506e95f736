use std::path::Path;

use rehost_core::{RehostError, RewriteContext, StoreKind, StoreReport, StoreRewriter};

use crate::column::{rewrite_column, ColumnTarget};

// Older schemas carry no origin column; the store then has nothing to rewrite.
pub(crate) const FORM_HISTORY: ColumnTarget = ColumnTarget {
    store: StoreKind::FormHistory,
    field: "origin",
    requires: &[("moz_formhistory", "origin")],
    select_sql: "SELECT id, origin FROM moz_formhistory WHERE origin LIKE ?1",
    update_sql: "UPDATE moz_formhistory SET origin = ?1 WHERE id = ?2",
};

/// Form-entry origins in `formhistory.sqlite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormHistoryRewriter;

impl StoreRewriter for FormHistoryRewriter {
    fn store(&self) -> StoreKind {
        StoreKind::FormHistory
    }

    fn rewrite(&self, profile: &Path, ctx: &RewriteContext) -> Result<StoreReport, RehostError> {
        Ok(rewrite_column(profile, ctx, &FORM_HISTORY)?.report)
    }
}
