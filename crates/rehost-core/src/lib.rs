//! Core of the profile rehosting engine: the domain rule, per-store reports, pre-mutation
//! snapshots, whole-profile archives, the saved-login rewriter and the run orchestrator.
//!
//! Relational stores are rewritten by a separate backend crate that implements
//! [`StoreRewriter`].

pub mod archive;
pub mod credentials;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod profile;
pub mod rule;
pub mod snapshot;

pub use archive::{backup, restore, ArchiveOutcome, RestoreOutcome};
pub use credentials::{rewrite_logins, CredentialRewriter};
pub use error::RehostError;
pub use model::{
    MigrationSummary, RecordKey, RewriteCandidate, RewriteContext, RewriteOutcome, RunMode,
    StoreKind, StoreReport, DEFAULT_BUSY_TIMEOUT,
};
pub use orchestrator::{MigrationFailure, Orchestrator, Rewriters, StoreRewriter};
pub use profile::{
    ensure_browser_closed, BrowserProbe, ExplicitProfile, ProfileResolver, StaticProbe,
};
pub use rule::DomainRule;
pub use snapshot::{snapshot, Snapshot};
