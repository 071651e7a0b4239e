//! Package masking and unmasking
//!
//! Implements Gentoo-style package.mask and package.unmask:
//! - mask file parsing with reason/author/date comment blocks
//! - two-tier mask sets (exact key lookups, then glob scans)
//! - visibility filter composition

use crate::atom::PackageAtom;
use crate::loader::Line;
use crate::restriction::Restriction;
use crate::{ConfigError, Package, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;

/// A single mask entry
#[derive(Debug, Clone)]
pub struct MaskEntry {
    /// The atom as written
    pub atom: String,
    pub restriction: Restriction,
    /// Reason for the mask
    pub reason: Option<String>,
    /// Author of the mask
    pub author: Option<String>,
    /// Date of the mask
    pub date: Option<NaiveDate>,
}

impl MaskEntry {
    /// Create a new mask entry
    pub fn new(atom: &str) -> Result<Self> {
        Ok(Self {
            atom: atom.to_string(),
            restriction: Restriction::parse(atom)?,
            reason: None,
            author: None,
            date: None,
        })
    }

    /// Set the reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Split a `Name <email> (YYYY-MM-DD)` comment into author and date
fn parse_author(comment: &str) -> Option<(String, Option<NaiveDate>)> {
    let open = comment.find('<')?;
    let close = open + comment[open..].find('>')?;
    let author = comment[..=close].trim().to_string();

    let rest = &comment[close + 1..];
    let date = rest
        .find('(')
        .zip(rest.find(')'))
        .and_then(|(start, end)| rest.get(start + 1..end))
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());

    Some((author, date))
}

fn entry_from_line(line: &Line, atom: &str) -> Result<MaskEntry> {
    if line.tokens.len() != 1 {
        return Err(line.error(ConfigError::failure("expected a single atom per line")));
    }
    let mut entry = MaskEntry::new(atom).map_err(|e| line.error(e))?;

    let mut reason = Vec::new();
    for comment in &line.comments {
        match parse_author(comment) {
            Some((author, date)) if entry.author.is_none() => {
                entry.author = Some(author);
                entry.date = date;
            }
            _ if !comment.is_empty() => reason.push(comment.as_str()),
            _ => {}
        }
    }
    if !reason.is_empty() {
        entry.reason = Some(reason.join("\n"));
    }

    Ok(entry)
}

/// Parse package.mask/package.unmask lines
pub fn parse_mask_entries(lines: &[Line]) -> Result<Vec<MaskEntry>> {
    lines
        .iter()
        .map(|line| entry_from_line(line, &line.tokens[0]))
        .collect()
}

/// Parse profile mask lines, where `-atom` drops an inherited entry
pub fn apply_incremental_masks(entries: &mut Vec<MaskEntry>, lines: &[Line]) -> Result<()> {
    for line in lines {
        let token = &line.tokens[0];
        match token.strip_prefix('-') {
            Some(atom) => {
                if line.tokens.len() != 1 {
                    return Err(line.error(ConfigError::failure("expected a single atom per line")));
                }
                Restriction::parse(atom).map_err(|e| line.error(e))?;
                entries.retain(|e| e.atom != atom);
            }
            None => entries.push(entry_from_line(line, token)?),
        }
    }
    Ok(())
}

/// Masks split into per-key atoms and everything else
#[derive(Debug, Clone, Default)]
pub struct MaskSet {
    atoms: HashMap<String, Vec<PackageAtom>>,
    globs: Vec<Restriction>,
}

impl MaskSet {
    pub fn new<I>(restrictions: I) -> Self
    where
        I: IntoIterator<Item = Restriction>,
    {
        let mut set = Self::default();
        for restriction in restrictions {
            set.insert(restriction);
        }
        set
    }

    pub fn insert(&mut self, restriction: Restriction) {
        match restriction {
            Restriction::Atom(atom) if !atom.is_wildcard() => {
                self.atoms.entry(atom.key()).or_default().push(atom);
            }
            other => self.globs.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty() && self.globs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.atoms.values().map(Vec::len).sum::<usize>() + self.globs.len()
    }

    /// Exact key hits first, then globs
    pub fn matches(&self, pkg: &Package) -> bool {
        if let Some(atoms) = self.atoms.get(&pkg.key()) {
            if atoms.iter().any(|a| a.matches(pkg)) {
                return true;
            }
        }
        self.globs.iter().any(|g| g.matches(pkg))
    }

    pub fn into_restriction(self, name: &str) -> Restriction {
        let set = Arc::new(self);
        Restriction::delegate(name, move |pkg, _| set.matches(pkg))
    }
}

impl FromIterator<Restriction> for MaskSet {
    fn from_iter<I: IntoIterator<Item = Restriction>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Compose `AND(extra..., OR(NOT(masked), unmasked))`
///
/// Without masks the filter is just the conjunction of `extra`.
pub fn generate_filter(masks: MaskSet, unmasks: MaskSet, extra: Vec<Restriction>) -> Restriction {
    let mut children = extra;
    if !masks.is_empty() {
        let mut either = vec![masks.into_restriction("masked").negate()];
        if !unmasks.is_empty() {
            either.push(unmasks.into_restriction("unmasked"));
        }
        children.push(Restriction::Or(either));
    }
    Restriction::And(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn line(number: usize, text: &str, comments: &[&str]) -> Line {
        Line {
            path: PathBuf::from("package.mask"),
            number,
            tokens: text.split_whitespace().map(str::to_string).collect(),
            comments: comments.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn pkg(cpv: &str) -> Package {
        Package::parse(cpv).unwrap()
    }

    fn masks(atoms: &[&str]) -> MaskSet {
        atoms.iter().map(|a| Restriction::parse(a).unwrap()).collect()
    }

    #[test]
    fn test_parse_mask_metadata() {
        let entries = parse_mask_entries(&[line(
            4,
            ">=dev-libs/foo-2",
            &["Jane Doe <jane@example.org> (2024-03-01)", "Breaks the world.", "Removal in 30 days."],
        )])
        .unwrap();

        let entry = &entries[0];
        assert_eq!(entry.author.as_deref(), Some("Jane Doe <jane@example.org>"));
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(entry.reason.as_deref(), Some("Breaks the world.\nRemoval in 30 days."));
    }

    #[test]
    fn test_parse_mask_errors() {
        let err = parse_mask_entries(&[line(7, "cat/a cat/b", &[])]).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 7, .. }));
        let err = parse_mask_entries(&[line(2, "-cat/a", &[])]).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_incremental_masks() {
        let mut entries = Vec::new();
        apply_incremental_masks(&mut entries, &[line(1, "cat/a", &[]), line(2, "cat/b", &[])]).unwrap();
        apply_incremental_masks(&mut entries, &[line(1, "-cat/a", &[])]).unwrap();
        let atoms: Vec<&str> = entries.iter().map(|e| e.atom.as_str()).collect();
        assert_eq!(atoms, vec!["cat/b"]);
    }

    #[test]
    fn test_incremental_mask_removal_needs_atom() {
        let mut entries = Vec::new();
        let err = apply_incremental_masks(&mut entries, &[line(1, "cat/a", &[]), line(3, "-", &[])]).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 3, .. }));
        let err = apply_incremental_masks(&mut entries, &[line(5, "->=broken", &[])]).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 5, .. }));
    }

    #[test]
    fn test_mask_set_partition() {
        let set = masks(&["cat/a", ">=cat/a-2", "cat/*", "*/z"]);
        assert_eq!(set.len(), 4);
        assert_eq!(set.atoms["cat/a"].len(), 2);
        assert_eq!(set.globs.len(), 2);
        assert!(set.matches(&pkg("cat/b-1")));
        assert!(set.matches(&pkg("other/z-1")));
        assert!(!set.matches(&pkg("other/a-1")));
    }

    #[test]
    fn test_mask_rejects_and_unmask_overrides() {
        let p = pkg("cat/pkg-1.0");
        let filter = generate_filter(masks(&["cat/pkg"]), MaskSet::default(), vec![]);
        assert!(!filter.matches(&p));

        let filter = generate_filter(masks(&["cat/pkg"]), masks(&["cat/pkg"]), vec![]);
        assert!(filter.matches(&p));
    }

    #[test]
    fn test_glob_mask_with_exact_unmask() {
        let filter = generate_filter(masks(&["cat/*"]), masks(&["=cat/pkg-1.0"]), vec![]);
        assert!(filter.matches(&pkg("cat/pkg-1.0")));
        assert!(!filter.matches(&pkg("cat/pkg-1.1")));
        assert!(!filter.matches(&pkg("cat/other-1.0")));
        assert!(filter.matches(&pkg("dev/other-1.0")));
    }

    #[test]
    fn test_unmatched_glob_mask_accepts_others() {
        let filter = generate_filter(masks(&["cat/*"]), MaskSet::default(), vec![]);
        assert!(filter.matches(&pkg("dev/x-1")));
        assert!(!filter.matches(&pkg("cat/x-1")));
    }

    #[test]
    fn test_no_masks_degenerates_to_extra() {
        let filter = generate_filter(MaskSet::default(), masks(&["cat/pkg"]), vec![Restriction::AlwaysFalse]);
        assert!(!filter.matches(&pkg("cat/pkg-1.0")));
        let filter = generate_filter(MaskSet::default(), MaskSet::default(), vec![]);
        assert!(filter.matches(&pkg("cat/pkg-1.0")));
    }
}
