//! Keyword acceptance
//!
//! Implements Gentoo-style ACCEPT_KEYWORDS handling:
//! - Architecture keywords (amd64, arm64, etc.)
//! - Stability levels (stable `arch`, testing `~arch`)
//! - Wildcards: `**` (anything), `*` (any stable), `~*` (any testing)
//! - Per-package accepted keywords and keyword overrides

use crate::chunked::{ChunkedDataDict, Delta};
use crate::restriction::{PackageAttr, PackageRestriction, Restriction, ValueMatcher};
use crate::settings::Settings;
use crate::{ConfigError, Package, Result};
use indexmap::IndexSet;
use std::sync::Arc;

/// Check a keyword token (`arch`, `~arch`, `-arch`, `**`, `*`, `~*`, `-*`)
pub fn validate_keyword(token: &str) -> Result<()> {
    let body = token
        .strip_prefix('-')
        .unwrap_or(token);
    let body = body.strip_prefix('~').unwrap_or(body);
    let valid = matches!(body, "*" | "**")
        || (!body.is_empty()
            && body
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidKeyword(token.to_string()))
    }
}

/// Keywords accepted by default
///
/// ACCEPT_KEYWORDS expanded incrementally; every `~arch` also accepts `arch`,
/// and the domain's own arch is always accepted.
pub fn default_keywords(settings: &Settings) -> Result<IndexSet<String>> {
    let mut keywords = settings.expanded("ACCEPT_KEYWORDS");
    for token in &keywords {
        validate_keyword(token)?;
    }

    let stable: Vec<String> = keywords
        .iter()
        .filter_map(|k| k.strip_prefix('~'))
        .map(str::to_string)
        .collect();
    keywords.extend(stable);
    keywords.insert(settings.arch().to_string());

    if keywords.is_empty() {
        return Err(ConfigError::failure("no accepted keywords"));
    }
    Ok(keywords)
}

/// Keyword acceptance filter
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    defaults: IndexSet<String>,
    accepted: ChunkedDataDict,
    overrides: Vec<(Restriction, Vec<String>)>,
    per_package: bool,
}

impl KeywordFilter {
    pub fn new(defaults: IndexSet<String>) -> Self {
        let mut accepted = ChunkedDataDict::new();
        accepted.add_bare_global(Delta::from_tokens(&defaults));
        Self {
            defaults,
            accepted,
            overrides: Vec::new(),
            per_package: false,
        }
    }

    /// Accept extra keywords for matching packages (package.accept_keywords)
    pub fn add_accept(&mut self, restriction: Restriction, keywords: &[String]) {
        self.accepted.add(restriction, Delta::from_tokens(keywords));
        self.per_package = true;
    }

    /// Append keywords to matching packages' own keywords (package.keywords)
    pub fn add_override(&mut self, restriction: Restriction, keywords: Vec<String>) {
        self.overrides.push((restriction, keywords));
        self.per_package = true;
    }

    /// Decide whether a package's keywords are accepted
    pub fn accepts(&self, pkg: &Package) -> bool {
        let mut keywords: Vec<&str> = pkg.keywords.iter().map(String::as_str).collect();
        for (restriction, extra) in &self.overrides {
            if restriction.matches(pkg) {
                keywords.extend(extra.iter().map(String::as_str));
            }
        }

        let accepted = self.accepted.pull_data(pkg, Vec::<String>::new());
        if accepted.contains("**") {
            return true;
        }
        if accepted.contains("*") && keywords.iter().any(|k| !k.starts_with(['~', '-'])) {
            return true;
        }
        if accepted.contains("~*") && keywords.iter().any(|k| k.starts_with('~')) {
            return true;
        }
        keywords.iter().any(|k| accepted.contains(*k))
    }

    /// Wrap the filter as a visibility restriction
    ///
    /// Without per-package data and wildcards this is a plain containment check.
    pub fn into_restriction(self) -> Restriction {
        let wildcard = self.defaults.iter().any(|k| k.contains('*'));
        if !self.per_package && !wildcard {
            return Restriction::Package(PackageRestriction::new(
                PackageAttr::Keywords,
                ValueMatcher::AnyOf(self.defaults.into_iter().collect()),
            ));
        }
        let filter = Arc::new(self);
        Restriction::delegate("keywords", move |pkg, _| filter.accepts(pkg))
    }
}
