use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rule::DomainRule;
use crate::snapshot::Snapshot;

/// Busy timeout applied when opening a relational store.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(15);

/// The stores of a profile the engine knows how to rewrite, in migration order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    History,
    Bookmarks,
    FormHistory,
    Cookies,
    Logins,
}

impl StoreKind {
    pub const ALL: [Self; 5] =
        [Self::History, Self::Bookmarks, Self::FormHistory, Self::Cookies, Self::Logins];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Bookmarks => "bookmarks",
            Self::FormHistory => "form_history",
            Self::Cookies => "cookies",
            Self::Logins => "logins",
        }
    }

    /// File name of the backing store inside a profile directory.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::History | Self::Bookmarks => "places.sqlite",
            Self::FormHistory => "formhistory.sqlite",
            Self::Cookies => "cookies.sqlite",
            Self::Logins => "logins.json",
        }
    }

    /// A missing mandatory store aborts a whole migration run.
    #[must_use]
    pub fn is_mandatory(self) -> bool {
        matches!(self, Self::History | Self::Bookmarks)
    }
}

impl Display for StoreKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Scan, match and probe conflicts without persisting anything.
    Simulate,
    Mutate,
}

impl RunMode {
    #[must_use]
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            Self::Simulate
        } else {
            Self::Mutate
        }
    }

    #[must_use]
    pub fn is_simulate(self) -> bool {
        self == Self::Simulate
    }
}

/// Configuration threaded through every rewriter call.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    pub rule: DomainRule,
    pub mode: RunMode,
    pub busy_timeout: Duration,
    /// Log every rewritten value at info level instead of debug.
    pub verbose: bool,
}

impl RewriteContext {
    #[must_use]
    pub fn new(rule: DomainRule, mode: RunMode) -> Self {
        Self { rule, mode, busy_timeout: DEFAULT_BUSY_TIMEOUT, verbose: false }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Log one planned rewrite, at info level when verbose.
    pub fn log_rewrite(&self, store: StoreKind, outcome: &RewriteOutcome) {
        if self.verbose {
            tracing::info!(
                store = %store,
                key = %outcome.record_key,
                "{} -> {}",
                outcome.old_value,
                outcome.new_value
            );
        } else {
            tracing::debug!(
                store = %store,
                key = %outcome.record_key,
                "{} -> {}",
                outcome.old_value,
                outcome.new_value
            );
        }
    }
}

/// Identity of one record inside a store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKey {
    RowId(i64),
    Login(usize),
}

impl RecordKey {
    #[must_use]
    pub fn row_id(self) -> Option<i64> {
        match self {
            Self::RowId(id) => Some(id),
            Self::Login(_) => None,
        }
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RowId(id) => write!(f, "row:{id}"),
            Self::Login(index) => write!(f, "login:{index}"),
        }
    }
}

/// One field of one record that textually mentions the old suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteCandidate {
    pub store: StoreKind,
    pub record_key: RecordKey,
    pub field: &'static str,
    pub old_value: String,
}

impl RewriteCandidate {
    /// Apply the rule to the candidate value. The outcome is not applied yet.
    #[must_use]
    pub fn plan(&self, rule: &DomainRule) -> RewriteOutcome {
        let new_value = rule.rewrite(&self.old_value).unwrap_or_else(|| self.old_value.clone());
        RewriteOutcome {
            record_key: self.record_key,
            old_value: self.old_value.clone(),
            new_value,
            applied: false,
            conflict_resolved: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub record_key: RecordKey,
    pub old_value: String,
    pub new_value: String,
    pub applied: bool,
    pub conflict_resolved: bool,
}

impl RewriteOutcome {
    /// Whether the rule produced a boundary-valid change.
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.new_value != self.old_value
    }
}

/// Counts produced by one store rewriter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreReport {
    pub store: StoreKind,
    pub mode: RunMode,
    /// False when the store file does not exist in the profile.
    pub present: bool,
    /// Records whose field contains the old suffix as a raw substring.
    pub candidates: usize,
    /// Candidates the boundary-aware rule actually rewrites.
    pub matched: usize,
    /// Records or fields written and still present after the store commits. Always zero when
    /// simulating.
    pub updated: usize,
    /// Uniqueness collisions detected (simulate) or resolved (mutate).
    pub conflicts: usize,
    pub snapshot: Option<Snapshot>,
    /// Rows touched by the best-effort host index refresh, when it ran and succeeded.
    pub index_rows_updated: Option<usize>,
}

impl StoreReport {
    #[must_use]
    pub fn absent(store: StoreKind, mode: RunMode) -> Self {
        Self {
            store,
            mode,
            present: false,
            candidates: 0,
            matched: 0,
            updated: 0,
            conflicts: 0,
            snapshot: None,
            index_rows_updated: None,
        }
    }

    #[must_use]
    pub fn empty(store: StoreKind, mode: RunMode, snapshot: Snapshot) -> Self {
        Self { present: true, snapshot: Some(snapshot), ..Self::absent(store, mode) }
    }
}

/// Aggregate of a full migration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationSummary {
    pub mode: RunMode,
    pub stores: Vec<StoreReport>,
    pub candidates: usize,
    pub matched: usize,
    pub updated: usize,
    pub conflicts: usize,
}

impl MigrationSummary {
    #[must_use]
    pub fn from_reports(mode: RunMode, stores: Vec<StoreReport>) -> Self {
        let candidates = stores.iter().map(|report| report.candidates).sum();
        let matched = stores.iter().map(|report| report.matched).sum();
        let updated = stores.iter().map(|report| report.updated).sum();
        let conflicts = stores.iter().map(|report| report.conflicts).sum();
        Self { mode, stores, candidates, matched, updated, conflicts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_kind_serializes_as_its_display_name() -> Result<(), serde_json::Error> {
        for kind in StoreKind::ALL {
            assert_eq!(serde_json::to_value(kind)?, serde_json::Value::from(kind.as_str()));
        }
        Ok(())
    }

    #[test]
    fn only_places_backed_stores_are_mandatory() {
        let mandatory: Vec<_> = StoreKind::ALL.into_iter().filter(|k| k.is_mandatory()).collect();
        assert_eq!(mandatory, vec![StoreKind::History, StoreKind::Bookmarks]);
    }

    #[test]
    fn summary_sums_every_counter() {
        let mut history = StoreReport::absent(StoreKind::History, RunMode::Mutate);
        history.candidates = 4;
        history.matched = 3;
        history.updated = 3;
        let mut cookies = StoreReport::absent(StoreKind::Cookies, RunMode::Mutate);
        cookies.candidates = 2;
        cookies.matched = 2;
        cookies.updated = 2;
        cookies.conflicts = 1;

        let summary = MigrationSummary::from_reports(RunMode::Mutate, vec![history, cookies]);
        assert_eq!(summary.candidates, 6);
        assert_eq!(summary.matched, 5);
        assert_eq!(summary.updated, 5);
        assert_eq!(summary.conflicts, 1);
    }
}
