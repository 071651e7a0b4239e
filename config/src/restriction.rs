//! Restriction algebra over packages
//!
//! Restrictions are immutable once built and evaluated purely, so a single
//! visibility filter can be shared across threads.

use crate::atom::PackageAtom;
use crate::package::Package;
use crate::{ConfigError, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// How a restriction is being queried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Plain match against the package as it is
    #[default]
    Match,
    /// Could the restriction be made to hold
    ForceTrue,
    /// Could the restriction be made to fail
    ForceFalse,
}

impl MatchMode {
    /// Mode seen by the child of a negation
    pub fn negate(self) -> Self {
        match self {
            MatchMode::Match => MatchMode::Match,
            MatchMode::ForceTrue => MatchMode::ForceFalse,
            MatchMode::ForceFalse => MatchMode::ForceTrue,
        }
    }
}

/// Predicate wrapped by a delegate restriction
pub type Predicate = dyn Fn(&Package, MatchMode) -> bool + Send + Sync;

/// A named, shareable predicate
#[derive(Clone)]
pub struct Delegate {
    name: String,
    func: Arc<Predicate>,
}

impl Delegate {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate").field("name", &self.name).finish()
    }
}

/// Package attribute inspected by a [`PackageRestriction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageAttr {
    Category,
    Name,
    Key,
    Cpv,
    Slot,
    Repo,
    Keywords,
    Iuse,
    Use,
}

impl PackageAttr {
    fn values(&self, pkg: &Package) -> Vec<String> {
        match self {
            PackageAttr::Category => vec![pkg.category.clone()],
            PackageAttr::Name => vec![pkg.name.clone()],
            PackageAttr::Key => vec![pkg.key()],
            PackageAttr::Cpv => vec![pkg.cpv()],
            PackageAttr::Slot => vec![pkg.slot.clone()],
            PackageAttr::Repo => vec![pkg.repo_id.clone()],
            PackageAttr::Keywords => pkg.keywords.clone(),
            PackageAttr::Iuse => pkg.iuse_stripped().map(str::to_string).collect(),
            PackageAttr::Use => pkg.use_flags.iter().cloned().collect(),
        }
    }
}

/// Matcher applied to attribute values
#[derive(Debug, Clone)]
pub enum ValueMatcher {
    Exact(String),
    Glob(glob::Pattern),
    Regex(regex::Regex),
    /// Any value is a member of the set
    AnyOf(BTreeSet<String>),
}

impl ValueMatcher {
    /// Compile a shell-style glob
    pub fn glob(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(ValueMatcher::Glob)
            .map_err(|e| ConfigError::InvalidGlob(format!("{}: {}", pattern, e)))
    }

    /// Compile an anchored regular expression
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(ValueMatcher::Regex(regex::Regex::new(&format!("^(?:{})$", pattern))?))
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            ValueMatcher::Exact(s) => s == value,
            ValueMatcher::Glob(p) => p.matches(value),
            ValueMatcher::Regex(r) => r.is_match(value),
            ValueMatcher::AnyOf(set) => set.contains(value),
        }
    }
}

/// Match one package attribute; multi-valued attributes match if any value does
#[derive(Debug, Clone)]
pub struct PackageRestriction {
    pub attr: PackageAttr,
    pub matcher: ValueMatcher,
}

impl PackageRestriction {
    pub fn new(attr: PackageAttr, matcher: ValueMatcher) -> Self {
        Self { attr, matcher }
    }

    pub fn matches(&self, pkg: &Package) -> bool {
        self.attr
            .values(pkg)
            .iter()
            .any(|v| self.matcher.matches(v))
    }
}

/// A node in the restriction expression tree
#[derive(Debug, Clone)]
pub enum Restriction {
    AlwaysTrue,
    AlwaysFalse,
    Atom(PackageAtom),
    Package(PackageRestriction),
    And(Vec<Restriction>),
    Or(Vec<Restriction>),
    Not(Box<Restriction>),
    Delegate(Delegate),
}

impl Restriction {
    /// Parse an atom, turning extended atoms (`cat/*`, `*/pkg`) into glob restrictions
    pub fn parse(s: &str) -> Result<Self> {
        let atom: PackageAtom = s.parse()?;
        if !atom.is_wildcard() {
            return Ok(Restriction::Atom(atom));
        }

        let key = Restriction::Package(PackageRestriction::new(
            PackageAttr::Key,
            ValueMatcher::glob(&atom.key())?,
        ));
        if atom.slot.is_none() && atom.repository.is_none() && atom.use_deps.is_empty() {
            return Ok(key);
        }
        let constraints = Restriction::delegate(format!("{} constraints", atom), move |pkg, _| {
            atom.matches_constraints(pkg)
        });
        Ok(Restriction::And(vec![key, constraints]))
    }

    /// Wrap a predicate
    pub fn delegate<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Package, MatchMode) -> bool + Send + Sync + 'static,
    {
        Restriction::Delegate(Delegate {
            name: name.into(),
            func: Arc::new(func),
        })
    }

    pub fn negate(self) -> Self {
        Restriction::Not(Box::new(self))
    }

    /// Concrete package key, for restrictions that can be indexed by key
    pub fn atom_key(&self) -> Option<String> {
        match self {
            Restriction::Atom(atom) if !atom.is_wildcard() => Some(atom.key()),
            _ => None,
        }
    }

    /// Plain match
    pub fn matches(&self, pkg: &Package) -> bool {
        self.evaluate(pkg, MatchMode::Match)
    }

    /// Whether the restriction holds once everything that can be forced on is
    pub fn force_true(&self, pkg: &Package) -> bool {
        self.evaluate(pkg, MatchMode::ForceTrue)
    }

    /// Whether the restriction fails once everything that can be forced off is
    pub fn force_false(&self, pkg: &Package) -> bool {
        !self.evaluate(pkg, MatchMode::ForceFalse)
    }

    /// Evaluate under a mode; only delegates see the mode
    pub fn evaluate(&self, pkg: &Package, mode: MatchMode) -> bool {
        match self {
            Restriction::AlwaysTrue => true,
            Restriction::AlwaysFalse => false,
            Restriction::Atom(atom) => atom.matches(pkg),
            Restriction::Package(r) => r.matches(pkg),
            Restriction::And(children) => children.iter().all(|c| c.evaluate(pkg, mode)),
            Restriction::Or(children) => children.iter().any(|c| c.evaluate(pkg, mode)),
            Restriction::Not(child) => !child.evaluate(pkg, mode.negate()),
            Restriction::Delegate(d) => (d.func)(pkg, mode),
        }
    }
}

impl From<PackageAtom> for Restriction {
    fn from(atom: PackageAtom) -> Self {
        Restriction::Atom(atom)
    }
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, children: &[Restriction]| {
            write!(f, "{}(", op)?;
            for (i, c) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", c)?;
            }
            write!(f, ")")
        };
        match self {
            Restriction::AlwaysTrue => write!(f, "true"),
            Restriction::AlwaysFalse => write!(f, "false"),
            Restriction::Atom(atom) => write!(f, "{}", atom),
            Restriction::Package(r) => write!(f, "{:?}~{:?}", r.attr, r.matcher),
            Restriction::And(children) => join(f, "and", children),
            Restriction::Or(children) => join(f, "or", children),
            Restriction::Not(child) => write!(f, "not({})", child),
            Restriction::Delegate(d) => write!(f, "<{}>", d.name),
        }
    }
}
