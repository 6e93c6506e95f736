use std::path::Path;

use thiserror::Error;

use crate::credentials::CredentialRewriter;
use crate::error::RehostError;
use crate::model::{MigrationSummary, RewriteContext, StoreKind, StoreReport};
use crate::profile::{ensure_browser_closed, BrowserProbe};

/// Rewrites every domain reference held by one store of a profile.
pub trait StoreRewriter {
    fn store(&self) -> StoreKind;

    /// # Errors
    /// Returns an error when the store cannot be read, snapshotted or updated. A failed store
    /// must leave its own data as it was before the call.
    fn rewrite(&self, profile: &Path, ctx: &RewriteContext) -> Result<StoreReport, RehostError>;
}

/// One rewriter per store kind.
pub struct Rewriters {
    pub history: Box<dyn StoreRewriter>,
    pub bookmarks: Box<dyn StoreRewriter>,
    pub form_history: Box<dyn StoreRewriter>,
    pub cookies: Box<dyn StoreRewriter>,
    pub logins: Box<dyn StoreRewriter>,
}

impl Rewriters {
    /// Relational rewriters supplied by a store backend plus the built-in credential rewriter.
    pub fn with_relational(
        history: Box<dyn StoreRewriter>,
        bookmarks: Box<dyn StoreRewriter>,
        form_history: Box<dyn StoreRewriter>,
        cookies: Box<dyn StoreRewriter>,
    ) -> Self {
        Self { history, bookmarks, form_history, cookies, logins: Box::new(CredentialRewriter) }
    }

    /// Rewriters in migration order. Bookmarks follow history because both rewrite
    /// `moz_places`.
    fn in_order(&self) -> [&dyn StoreRewriter; 5] {
        [
            self.history.as_ref(),
            self.bookmarks.as_ref(),
            self.form_history.as_ref(),
            self.cookies.as_ref(),
            self.logins.as_ref(),
        ]
    }

    fn get(&self, kind: StoreKind) -> &dyn StoreRewriter {
        match kind {
            StoreKind::History => self.history.as_ref(),
            StoreKind::Bookmarks => self.bookmarks.as_ref(),
            StoreKind::FormHistory => self.form_history.as_ref(),
            StoreKind::Cookies => self.cookies.as_ref(),
            StoreKind::Logins => self.logins.as_ref(),
        }
    }
}

/// A run that stopped early. Stores in `completed` were fully processed (and, in mutate mode,
/// committed) before the failure; they are not rolled back.
#[derive(Debug, Error)]
#[error("migration stopped{}: {error}", stopped_at(.store))]
pub struct MigrationFailure {
    pub completed: Vec<StoreReport>,
    pub store: Option<StoreKind>,
    #[source]
    pub error: RehostError,
}

fn stopped_at(store: &Option<StoreKind>) -> String {
    store.map(|store| format!(" at {store}")).unwrap_or_default()
}

pub struct Orchestrator {
    rewriters: Rewriters,
}

impl Orchestrator {
    #[must_use]
    pub fn new(rewriters: Rewriters) -> Self {
        Self { rewriters }
    }

    /// Run every store rewriter in order: history, bookmarks, form history, cookies, logins.
    ///
    /// # Errors
    /// Stops at the first failing store. Preconditions (browser closed in mutate mode, mandatory
    /// stores present) are checked before any store is touched.
    pub fn run(
        &self,
        profile: &Path,
        ctx: &RewriteContext,
        probe: &dyn BrowserProbe,
    ) -> Result<MigrationSummary, MigrationFailure> {
        let precondition = |error| MigrationFailure { completed: Vec::new(), store: None, error };
        check_preconditions(profile, ctx, probe, &StoreKind::ALL).map_err(precondition)?;

        let mut completed = Vec::with_capacity(StoreKind::ALL.len());
        for rewriter in self.rewriters.in_order() {
            match rewriter.rewrite(profile, ctx) {
                Ok(report) => completed.push(report),
                Err(error) => {
                    let store = rewriter.store();
                    tracing::error!("{store} rewrite failed: {error}");
                    return Err(MigrationFailure { completed, store: Some(store), error });
                }
            }
        }

        let summary = MigrationSummary::from_reports(ctx.mode, completed);
        tracing::info!(
            "all stores done: candidates {}, matched {}, updated {}, conflicts {}",
            summary.candidates,
            summary.matched,
            summary.updated,
            summary.conflicts
        );
        Ok(summary)
    }

    /// Run a single store rewriter with the same preconditions as a full run.
    ///
    /// # Errors
    /// Returns precondition failures and the rewriter's own error.
    pub fn run_store(
        &self,
        kind: StoreKind,
        profile: &Path,
        ctx: &RewriteContext,
        probe: &dyn BrowserProbe,
    ) -> Result<StoreReport, RehostError> {
        check_preconditions(profile, ctx, probe, &[kind])?;
        self.rewriters.get(kind).rewrite(profile, ctx)
    }
}

fn check_preconditions(
    profile: &Path,
    ctx: &RewriteContext,
    probe: &dyn BrowserProbe,
    kinds: &[StoreKind],
) -> Result<(), RehostError> {
    if !ctx.mode.is_simulate() {
        ensure_browser_closed(probe)?;
    }
    for kind in kinds.iter().copied().filter(|kind| kind.is_mandatory()) {
        let path = profile.join(kind.file_name());
        if !path.is_file() {
            return Err(RehostError::MissingStore { store: kind, path });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use tempfile::TempDir;

    use super::*;
    use crate::model::RunMode;
    use crate::profile::StaticProbe;
    use crate::rule::DomainRule;

    type Calls = Rc<RefCell<Vec<StoreKind>>>;

    struct Fake {
        kind: StoreKind,
        calls: Calls,
        fail: bool,
    }

    impl StoreRewriter for Fake {
        fn store(&self) -> StoreKind {
            self.kind
        }

        fn rewrite(
            &self,
            _profile: &Path,
            ctx: &RewriteContext,
        ) -> Result<StoreReport, RehostError> {
            self.calls.borrow_mut().push(self.kind);
            if self.fail {
                return Err(RehostError::store_failure(self.kind, "constraint failed"));
            }
            let mut report = StoreReport::absent(self.kind, ctx.mode);
            report.present = true;
            report.candidates = 2;
            report.matched = 1;
            report.updated = usize::from(!ctx.mode.is_simulate());
            report.conflicts = usize::from(self.kind == StoreKind::Cookies);
            Ok(report)
        }
    }

    fn orchestrator(calls: &Calls, failing: Option<StoreKind>) -> Orchestrator {
        let fake = |kind| -> Box<dyn StoreRewriter> {
            Box::new(Fake { kind, calls: Rc::clone(calls), fail: failing == Some(kind) })
        };
        Orchestrator::new(Rewriters {
            history: fake(StoreKind::History),
            bookmarks: fake(StoreKind::Bookmarks),
            form_history: fake(StoreKind::FormHistory),
            cookies: fake(StoreKind::Cookies),
            logins: fake(StoreKind::Logins),
        })
    }

    fn ctx(mode: RunMode) -> Result<RewriteContext, RehostError> {
        Ok(RewriteContext::new(DomainRule::new("test-domain.co", "test-domain.co.uk")?, mode))
    }

    fn profile_with_places() -> Result<TempDir, std::io::Error> {
        let temp = TempDir::new()?;
        std::fs::write(temp.path().join("places.sqlite"), b"")?;
        Ok(temp)
    }

    #[test]
    fn runs_stores_in_fixed_order_and_sums_counts() -> Result<(), Box<dyn std::error::Error>> {
        let profile = profile_with_places()?;
        let calls = Calls::default();

        let summary = orchestrator(&calls, None).run(
            profile.path(),
            &ctx(RunMode::Mutate)?,
            &StaticProbe(false),
        )?;
        assert_eq!(*calls.borrow(), StoreKind::ALL.to_vec());
        assert_eq!(summary.stores.len(), 5);
        assert_eq!(summary.candidates, 10);
        assert_eq!(summary.updated, 5);
        assert_eq!(summary.conflicts, 1);
        Ok(())
    }

    #[test]
    fn missing_mandatory_store_aborts_before_any_store() -> Result<(), Box<dyn std::error::Error>> {
        let empty = TempDir::new()?;
        let calls = Calls::default();

        let failure = orchestrator(&calls, None)
            .run(empty.path(), &ctx(RunMode::Simulate)?, &StaticProbe(false))
            .err();
        assert!(matches!(
            failure.map(|f| f.error),
            Some(RehostError::MissingStore { store: StoreKind::History, .. })
        ));
        assert!(calls.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn failing_store_stops_the_run_and_keeps_prior_reports(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let profile = profile_with_places()?;
        let calls = Calls::default();

        let result = orchestrator(&calls, Some(StoreKind::FormHistory)).run(
            profile.path(),
            &ctx(RunMode::Mutate)?,
            &StaticProbe(false),
        );
        let Err(failure) = result else {
            panic!("form history failure should stop the run");
        };
        assert_eq!(failure.store, Some(StoreKind::FormHistory));
        assert!(failure.to_string().starts_with("migration stopped at form_history:"));
        let done: Vec<_> = failure.completed.iter().map(|r| r.store).collect();
        assert_eq!(done, vec![StoreKind::History, StoreKind::Bookmarks]);
        assert_eq!(
            *calls.borrow(),
            vec![StoreKind::History, StoreKind::Bookmarks, StoreKind::FormHistory]
        );
        Ok(())
    }

    #[test]
    fn running_browser_blocks_mutation_only() -> Result<(), Box<dyn std::error::Error>> {
        let profile = profile_with_places()?;
        let calls = Calls::default();
        let orchestrator = orchestrator(&calls, None);

        let blocked = orchestrator.run(profile.path(), &ctx(RunMode::Mutate)?, &StaticProbe(true));
        assert!(matches!(blocked.map_err(|f| f.error), Err(RehostError::BrowserRunning)));
        assert!(calls.borrow().is_empty());

        let simulated =
            orchestrator.run(profile.path(), &ctx(RunMode::Simulate)?, &StaticProbe(true))?;
        assert_eq!(simulated.updated, 0);
        Ok(())
    }

    #[test]
    fn single_store_run_checks_only_its_own_store() -> Result<(), Box<dyn std::error::Error>> {
        let empty = TempDir::new()?;
        let calls = Calls::default();
        let orchestrator = orchestrator(&calls, None);
        let ctx = ctx(RunMode::Mutate)?;

        let cookies =
            orchestrator.run_store(StoreKind::Cookies, empty.path(), &ctx, &StaticProbe(false))?;
        assert_eq!(cookies.store, StoreKind::Cookies);

        let history =
            orchestrator.run_store(StoreKind::History, empty.path(), &ctx, &StaticProbe(false));
        assert!(matches!(history, Err(RehostError::MissingStore { .. })));
        assert_eq!(*calls.borrow(), vec![StoreKind::Cookies]);
        Ok(())
    }
}
