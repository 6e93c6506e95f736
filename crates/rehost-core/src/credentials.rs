//! Rewriter for the JSON credential store (`logins.json`).
//!
//! The file is parsed into a typed structure that keeps every field it does not know about,
//! rewritten in memory and written back whole through a temporary sibling.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::RehostError;
use crate::model::{RecordKey, RewriteCandidate, RewriteContext, StoreKind, StoreReport};
use crate::orchestrator::StoreRewriter;
use crate::snapshot::snapshot;

const STORE: StoreKind = StoreKind::Logins;

/// Outer `None` means the key is absent, inner `None` means JSON `null`.
#[derive(Debug, Serialize, Deserialize)]
struct LoginsFile {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    logins: Option<Option<Vec<LoginEntry>>>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// One saved login, with the same absent/null distinction for its URL fields.
#[derive(Debug, Serialize, Deserialize)]
struct LoginEntry {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    hostname: Option<Option<String>>,
    #[serde(
        rename = "formSubmitURL",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    form_submit_url: Option<Option<String>>,
    #[serde(
        rename = "httpRealm",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    http_realm: Option<Option<String>>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl LoginEntry {
    /// URL-bearing fields eligible for rewriting. The realm only counts when it is
    /// scheme-qualified; plain realm names are free text.
    fn url_fields_mut(&mut self) -> Vec<(&'static str, &mut String)> {
        let mut fields = Vec::with_capacity(3);
        if let Some(Some(value)) = self.hostname.as_mut() {
            fields.push(("hostname", value));
        }
        if let Some(Some(value)) = self.form_submit_url.as_mut() {
            fields.push(("formSubmitURL", value));
        }
        if let Some(Some(value)) = self.http_realm.as_mut() {
            if value.starts_with("http://") || value.starts_with("https://") {
                fields.push(("httpRealm", value));
            }
        }
        fields.retain(|(_, value)| !value.is_empty());
        fields
    }
}

/// Structured-file rewriter for saved logins.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialRewriter;

impl StoreRewriter for CredentialRewriter {
    fn store(&self) -> StoreKind {
        STORE
    }

    fn rewrite(&self, profile: &Path, ctx: &RewriteContext) -> Result<StoreReport, RehostError> {
        rewrite_logins(profile, ctx)
    }
}

/// Rewrite every saved login URL field in `<profile>/logins.json`.
///
/// # Errors
/// Returns [`RehostError::MalformedStore`] when the file does not have the expected shape and
/// [`RehostError::Io`] when it cannot be read, snapshotted or replaced.
pub fn rewrite_logins(profile: &Path, ctx: &RewriteContext) -> Result<StoreReport, RehostError> {
    let path = profile.join(STORE.file_name());
    if !path.is_file() {
        tracing::info!("{} not found; skipping saved logins", path.display());
        return Ok(StoreReport::absent(STORE, ctx.mode));
    }

    let snapshot = snapshot(&path)?;
    let raw = fs::read_to_string(&path).map_err(RehostError::io(&path))?;
    let mut file: LoginsFile =
        serde_json::from_str(&raw).map_err(|err| RehostError::malformed(STORE, err.to_string()))?;
    let mut report = StoreReport::empty(STORE, ctx.mode, snapshot);

    for (index, login) in file.logins.iter_mut().flatten().flatten().enumerate() {
        for (field, value) in login.url_fields_mut() {
            if !ctx.rule.mentions(value) {
                continue;
            }
            report.candidates += 1;

            let candidate = RewriteCandidate {
                store: STORE,
                record_key: RecordKey::Login(index),
                field,
                old_value: value.clone(),
            };
            let mut outcome = candidate.plan(&ctx.rule);
            if !outcome.is_change() {
                continue;
            }
            report.matched += 1;
            ctx.log_rewrite(STORE, &outcome);

            if !ctx.mode.is_simulate() {
                value.clone_from(&outcome.new_value);
                outcome.applied = true;
                report.updated += 1;
            }
        }
    }

    if report.updated > 0 {
        write_replacing(&path, &file)?;
    }
    tracing::info!(
        "{STORE}: candidates {}, matched {}, updated {}",
        report.candidates,
        report.matched,
        report.updated
    );
    Ok(report)
}

/// Serialize `file` next to `path` and rename it over the original.
fn write_replacing(path: &Path, file: &LoginsFile) -> Result<(), RehostError> {
    let mut body = serde_json::to_string_pretty(file)
        .map_err(|err| RehostError::malformed(STORE, err.to_string()))?;
    body.push('\n');

    let dir = path.parent().ok_or_else(|| RehostError::NotFound(path.to_path_buf()))?;
    let permissions = fs::metadata(path).map_err(RehostError::io(path))?.permissions();
    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(RehostError::io(dir))?;
    staged.write_all(body.as_bytes()).map_err(RehostError::io(staged.path()))?;
    staged.as_file().sync_all().map_err(RehostError::io(path))?;
    staged.as_file().set_permissions(permissions).map_err(RehostError::io(path))?;
    staged
        .persist(path)
        .map_err(|err| RehostError::Io { path: path.to_path_buf(), source: err.error })?;
    Ok(())
}
