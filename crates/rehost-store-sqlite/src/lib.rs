//! SQLite-backed store rewriters: history and bookmarks in `places.sqlite`, form history in
//! `formhistory.sqlite` and cookies in `cookies.sqlite`.
//!
//! Every rewriter snapshots its file before opening it, opens read-only when simulating, and
//! applies all of its updates in a single `BEGIN IMMEDIATE` transaction.

mod bookmarks;
mod column;
mod connection;
mod cookies;
mod form_history;
mod history;

use rehost_core::{Orchestrator, Rewriters};

pub use bookmarks::BookmarksRewriter;
pub use cookies::CookieRewriter;
pub use form_history::FormHistoryRewriter;
pub use history::HistoryRewriter;

/// Every store rewriter for a browser profile: the relational ones from this crate plus the
/// credential rewriter from `rehost-core`.
#[must_use]
pub fn profile_rewriters() -> Rewriters {
    Rewriters::with_relational(
        Box::new(HistoryRewriter),
        Box::new(BookmarksRewriter),
        Box::new(FormHistoryRewriter),
        Box::new(CookieRewriter),
    )
}

#[must_use]
pub fn profile_orchestrator() -> Orchestrator {
    Orchestrator::new(profile_rewriters())
}
