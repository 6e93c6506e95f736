//! Boundary-aware domain suffix replacement.
//!
//! A value is rewritten only when the old suffix ends a hostname: the host is either exactly
//! the suffix or ends with `.` + suffix, and the host is followed by `:`, `/` or the end of the
//! string. Hosts are found after a `scheme://[userinfo@]` prefix, or at the start of values
//! that carry no scheme at all (cookie hosts, origin hosts), where a leading `.` is kept as is.

use regex_lite::Regex;

use crate::error::RehostError;

const URL_HOST_PATTERN: &str = r"(?i)[a-z][a-z0-9+.\-]*://(?:[^/?#@\s]*@)?([^/?#:@\s]*)";
const BARE_HOST_PATTERN: &str = r"^\.?([^/?#:@\s]*)";

#[derive(Debug, Clone)]
pub struct DomainRule {
    old: String,
    new: String,
    url_host: Regex,
    bare_host: Regex,
}

impl DomainRule {
    /// Build a rule replacing `old` with `new`.
    ///
    /// # Errors
    /// Returns [`RehostError::InvalidRule`] when either suffix is not a plain hostname tail, when
    /// both are equal, or when `new` itself ends with `old` (the rewrite would never settle).
    pub fn new(old: &str, new: &str) -> Result<Self, RehostError> {
        let old = normalize_suffix("old", old)?;
        let new = normalize_suffix("new", new)?;
        if old == new {
            return Err(RehostError::InvalidRule(format!("old and new suffix are both {old}")));
        }
        if ends_at_label(&new, &old) {
            return Err(RehostError::InvalidRule(format!(
                "new suffix {new} ends with old suffix {old}; rewriting would not be idempotent"
            )));
        }

        let url_host = Regex::new(URL_HOST_PATTERN)
            .map_err(|err| RehostError::InvalidRule(err.to_string()))?;
        let bare_host = Regex::new(BARE_HOST_PATTERN)
            .map_err(|err| RehostError::InvalidRule(err.to_string()))?;

        Ok(Self { old, new, url_host, bare_host })
    }

    #[must_use]
    pub fn old_suffix(&self) -> &str {
        &self.old
    }

    #[must_use]
    pub fn new_suffix(&self) -> &str {
        &self.new
    }

    /// Raw, case-insensitive substring test. Used to count candidates; says nothing about
    /// label boundaries.
    #[must_use]
    pub fn mentions(&self, value: &str) -> bool {
        value.to_ascii_lowercase().contains(&self.old)
    }

    /// Rewrite the first boundary-valid occurrence of the old suffix.
    ///
    /// Returns `None` when no occurrence sits at a label boundary, even if the raw substring
    /// is present.
    #[must_use]
    pub fn rewrite(&self, value: &str) -> Option<String> {
        if !self.mentions(value) {
            return None;
        }

        if value.contains("://") {
            return self
                .url_host
                .captures_iter(value)
                .filter_map(|caps| caps.get(1))
                .find_map(|host| self.splice(value, host.start(), host.end()));
        }

        let host = self.bare_host.captures(value)?.get(1)?;
        self.splice(value, host.start(), host.end())
    }

    /// Host of the first URL in `value`, or the bare leading host (without its leading `.`)
    /// when the value has no scheme.
    #[must_use]
    pub fn host_of<'a>(&self, value: &'a str) -> Option<&'a str> {
        let host = if value.contains("://") {
            self.url_host.captures(value)?.get(1)?
        } else {
            self.bare_host.captures(value)?.get(1)?
        };
        Some(host.as_str()).filter(|host| !host.is_empty())
    }

    fn splice(&self, value: &str, start: usize, end: usize) -> Option<String> {
        let host = value[start..end].to_ascii_lowercase();
        if !ends_at_label(&host, &self.old) {
            return None;
        }
        let tail = &value[end..];
        if !(tail.is_empty() || tail.starts_with(':') || tail.starts_with('/')) {
            return None;
        }

        let cut = end - self.old.len();
        let mut rewritten = String::with_capacity(value.len() + self.new.len());
        rewritten.push_str(&value[..cut]);
        rewritten.push_str(&self.new);
        rewritten.push_str(tail);
        Some(rewritten)
    }
}

/// `host` is `suffix` or ends with `.` + `suffix`. Both must already be lowercase.
fn ends_at_label(host: &str, suffix: &str) -> bool {
    host == suffix
        || host
            .strip_suffix(suffix)
            .is_some_and(|head| head.ends_with('.'))
}

fn normalize_suffix(which: &str, raw: &str) -> Result<String, RehostError> {
    let suffix = raw.trim().to_ascii_lowercase();
    if suffix.is_empty() {
        return Err(RehostError::InvalidRule(format!("{which} suffix is empty")));
    }
    if !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.') {
        return Err(RehostError::InvalidRule(format!(
            "{which} suffix {raw:?} may only contain ASCII letters, digits, '-' and '.'"
        )));
    }
    if suffix.starts_with('.') || suffix.ends_with('.') || suffix.contains("..") {
        return Err(RehostError::InvalidRule(format!(
            "{which} suffix {raw:?} must be a dotted label sequence"
        )));
    }
    Ok(suffix)
}
