//! Package atom parsing and matching
//!
//! Implements Gentoo-style package atoms like:
//! - `category/package`
//! - `>=category/package-1.0`
//! - `=category/package-1.2*`
//! - `category/package:slot/subslot`
//! - `category/package::repo`
//! - `category/package[use_flag,-other(+)]`
//!
//! Extended atoms (`category/*`, `*/package`) parse fine but carry no
//! concrete package key; they are matched through glob restrictions.

use crate::package::Package;
use crate::version::Version;
use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version comparison operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionOp {
    /// No version constraint
    #[default]
    Any,
    /// Exact version match (=)
    Equal,
    /// Greater than (>)
    Greater,
    /// Greater than or equal (>=)
    GreaterEqual,
    /// Less than (<)
    Less,
    /// Less than or equal (<=)
    LessEqual,
    /// Version glob match (=*), e.g., =category/package-1.0*
    GlobEqual,
    /// Any revision of the version (~)
    RevisionBump,
}

/// A package atom representing a package specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageAtom {
    /// Version operator
    pub operator: VersionOp,
    /// Package category (e.g., "sys-apps")
    pub category: String,
    /// Package name (e.g., "systemd")
    pub name: String,
    /// Version (present iff the operator is not `Any`)
    pub version: Option<Version>,
    /// Slot specification (optional)
    pub slot: Option<String>,
    /// Sub-slot specification (optional)
    pub subslot: Option<String>,
    /// Repository restriction (optional)
    pub repository: Option<String>,
    /// USE flag requirements
    pub use_deps: Vec<UseDep>,
}

impl PackageAtom {
    /// Create a new package atom with just category and name
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            operator: VersionOp::Any,
            category: category.into(),
            name: name.into(),
            version: None,
            slot: None,
            subslot: None,
            repository: None,
            use_deps: Vec::new(),
        }
    }

    /// Set the version constraint
    pub fn with_version(mut self, op: VersionOp, version: Version) -> Self {
        self.operator = op;
        self.version = Some(version);
        self
    }

    /// Set the slot
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    /// Set the repository
    pub fn with_repository(mut self, repo: impl Into<String>) -> Self {
        self.repository = Some(repo.into());
        self
    }

    /// Add a USE dependency
    pub fn with_use_dep(mut self, dep: UseDep) -> Self {
        self.use_deps.push(dep);
        self
    }

    /// Get the package key (category/name)
    pub fn key(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// Check if this is a wildcard atom (e.g., */package or category/*)
    pub fn is_wildcard(&self) -> bool {
        self.category.contains('*') || self.name.contains('*')
    }

    /// Check whether this atom matches a package
    pub fn matches(&self, pkg: &Package) -> bool {
        if self.category != pkg.category || self.name != pkg.name {
            return false;
        }
        self.matches_constraints(pkg)
    }

    /// Check everything but the key: version, slot, repository and USE deps
    pub(crate) fn matches_constraints(&self, pkg: &Package) -> bool {
        if !self.matches_version(&pkg.version) {
            return false;
        }

        if let Some(ref slot) = self.slot {
            if slot != &pkg.slot {
                return false;
            }
            if let Some(ref subslot) = self.subslot {
                if pkg.subslot() != subslot.as_str() {
                    return false;
                }
            }
        }

        if let Some(ref repo) = self.repository {
            if repo != &pkg.repo_id {
                return false;
            }
        }

        self.use_deps.iter().all(|dep| dep.matches(pkg))
    }

    fn matches_version(&self, pkg_ver: &Version) -> bool {
        let Some(ref atom_ver) = self.version else {
            return true;
        };

        match self.operator {
            VersionOp::Any => true,
            VersionOp::Equal => pkg_ver == atom_ver,
            VersionOp::Greater => pkg_ver > atom_ver,
            VersionOp::GreaterEqual => pkg_ver >= atom_ver,
            VersionOp::Less => pkg_ver < atom_ver,
            VersionOp::LessEqual => pkg_ver <= atom_ver,
            VersionOp::GlobEqual => pkg_ver.has_prefix(atom_ver.as_str()),
            VersionOp::RevisionBump => pkg_ver.cmp_base(atom_ver).is_eq(),
        }
    }
}

/// Split `name-version` at the last `-<digit>` boundary
pub(crate) fn split_name_version(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .rev()
        .find(|&i| bytes[i] == b'-' && bytes[i + 1].is_ascii_digit())
        .map(|i| (&s[..i], &s[i + 1..]))
}

/// Validate a category or package name, optionally allowing `*` wildcards
pub(crate) fn valid_name(s: &str, allow_wildcard: bool) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '+' | '_' | '.' | '-')
                || (allow_wildcard && c == '*')
        })
}

impl FromStr for PackageAtom {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidAtom("empty atom".to_string()));
        }

        let mut remaining = s;

        // Parse operator
        let operator = if let Some(rest) = remaining.strip_prefix(">=") {
            remaining = rest;
            VersionOp::GreaterEqual
        } else if let Some(rest) = remaining.strip_prefix("<=") {
            remaining = rest;
            VersionOp::LessEqual
        } else if let Some(rest) = remaining.strip_prefix('>') {
            remaining = rest;
            VersionOp::Greater
        } else if let Some(rest) = remaining.strip_prefix('<') {
            remaining = rest;
            VersionOp::Less
        } else if let Some(rest) = remaining.strip_prefix('~') {
            remaining = rest;
            VersionOp::RevisionBump
        } else if let Some(rest) = remaining.strip_prefix('=') {
            remaining = rest;
            VersionOp::Equal
        } else {
            VersionOp::Any
        };

        // Extract USE deps [flag1,flag2]
        let mut use_deps = Vec::new();
        if let Some(start) = remaining.find('[') {
            if !remaining.ends_with(']') {
                return Err(ConfigError::InvalidAtom(format!("unclosed USE deps: {}", s)));
            }
            let use_str = &remaining[start + 1..remaining.len() - 1];
            for dep in use_str.split(',') {
                use_deps.push(dep.trim().parse()?);
            }
            remaining = &remaining[..start];
        }

        // Extract repository ::repo
        let mut repository = None;
        if let Some(idx) = remaining.find("::") {
            let repo = &remaining[idx + 2..];
            if repo.is_empty() {
                return Err(ConfigError::InvalidAtom(format!("empty repository: {}", s)));
            }
            repository = Some(repo.to_string());
            remaining = &remaining[..idx];
        }

        // Extract slot :slot/subslot
        let mut slot = None;
        let mut subslot = None;
        if let Some(idx) = remaining.find(':') {
            let slot_str = &remaining[idx + 1..];
            match slot_str.split_once('/') {
                Some((s, sub)) => {
                    slot = Some(s.to_string());
                    subslot = Some(sub.to_string());
                }
                None => slot = Some(slot_str.to_string()),
            }
            if slot.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::InvalidAtom(format!("empty slot: {}", s)));
            }
            remaining = &remaining[..idx];
        }

        // Trailing * turns = into a version glob
        let operator = match remaining.strip_suffix('*') {
            Some(rest) if operator == VersionOp::Equal => {
                remaining = rest;
                VersionOp::GlobEqual
            }
            _ => operator,
        };

        // Parse category/name-version
        let (category, name_version) = remaining
            .split_once('/')
            .ok_or_else(|| ConfigError::InvalidAtom(format!("missing category: {}", s)))?;

        let (name, version) = if operator != VersionOp::Any {
            let (name, ver) = split_name_version(name_version)
                .ok_or_else(|| ConfigError::InvalidAtom(format!("missing version: {}", s)))?;
            let ver = Version::parse(ver)
                .map_err(|_| ConfigError::InvalidAtom(format!("invalid version: {}", s)))?;
            (name, Some(ver))
        } else {
            (name_version, None)
        };

        let allow_wildcard = operator == VersionOp::Any;
        if !valid_name(category, allow_wildcard) || !valid_name(name, allow_wildcard) {
            return Err(ConfigError::InvalidAtom(format!("invalid atom: {}", s)));
        }

        Ok(PackageAtom {
            operator,
            category: category.to_string(),
            name: name.to_string(),
            version,
            slot,
            subslot,
            repository,
            use_deps,
        })
    }
}

impl TryFrom<String> for PackageAtom {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PackageAtom> for String {
    fn from(atom: PackageAtom) -> Self {
        atom.to_string()
    }
}

impl fmt::Display for PackageAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Write operator
        match self.operator {
            VersionOp::Any => {}
            VersionOp::Equal | VersionOp::GlobEqual => write!(f, "=")?,
            VersionOp::Greater => write!(f, ">")?,
            VersionOp::GreaterEqual => write!(f, ">=")?,
            VersionOp::Less => write!(f, "<")?,
            VersionOp::LessEqual => write!(f, "<=")?,
            VersionOp::RevisionBump => write!(f, "~")?,
        }

        write!(f, "{}/{}", self.category, self.name)?;

        if let Some(ref ver) = self.version {
            write!(f, "-{}", ver)?;
        }

        if self.operator == VersionOp::GlobEqual {
            write!(f, "*")?;
        }

        if let Some(ref slot) = self.slot {
            write!(f, ":{}", slot)?;
            if let Some(ref subslot) = self.subslot {
                write!(f, "/{}", subslot)?;
            }
        }

        if let Some(ref repo) = self.repository {
            write!(f, "::{}", repo)?;
        }

        if !self.use_deps.is_empty() {
            write!(f, "[")?;
            for (i, dep) in self.use_deps.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", dep)?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

/// USE flag dependency in an atom
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UseDep {
    /// The USE flag name
    pub flag: String,
    /// Whether the flag must be enabled (true) or disabled (false)
    pub enabled: bool,
    /// Assumed state when the package does not declare the flag
    pub default: Option<bool>,
    /// Whether this is a conditional dependency (`flag?` / `flag=`)
    pub conditional: bool,
}

impl UseDep {
    /// Check the dependency against a package's recorded USE
    ///
    /// Conditional deps only make sense relative to a parent package and
    /// always hold when matching a package in isolation.
    pub fn matches(&self, pkg: &Package) -> bool {
        if self.conditional {
            return true;
        }
        let state = if pkg.iuse_stripped().any(|f| f == self.flag) {
            pkg.use_flags.contains(&self.flag)
        } else if let Some(default) = self.default {
            default
        } else {
            return false;
        };
        state == self.enabled
    }
}

impl FromStr for UseDep {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidUseFlag("empty USE dep".to_string()));
        }

        let mut flag = s;
        let mut enabled = true;
        let mut default = None;

        let conditional = match flag.strip_suffix('?').or_else(|| flag.strip_suffix('=')) {
            Some(rest) => {
                flag = rest;
                true
            }
            None => false,
        };

        // Check for default values (flag(+) or flag(-))
        if let Some(rest) = flag.strip_suffix("(+)") {
            default = Some(true);
            flag = rest;
        } else if let Some(rest) = flag.strip_suffix("(-)") {
            default = Some(false);
            flag = rest;
        }

        if let Some(rest) = flag.strip_prefix('-').or_else(|| flag.strip_prefix('!')) {
            enabled = false;
            flag = rest;
        }

        if !valid_name(flag, false) {
            return Err(ConfigError::InvalidUseFlag(s.to_string()));
        }

        Ok(UseDep {
            flag: flag.to_string(),
            enabled,
            default,
            conditional,
        })
    }
}

impl fmt::Display for UseDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            write!(f, "{}", if self.conditional { "!" } else { "-" })?;
        }
        write!(f, "{}", self.flag)?;
        if let Some(def) = self.default {
            write!(f, "({})", if def { "+" } else { "-" })?;
        }
        if self.conditional {
            write!(f, "?")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(cpv: &str) -> Package {
        Package::parse(cpv).unwrap()
    }

    #[test]
    fn test_parse_simple_atom() {
        let atom: PackageAtom = "sys-apps/systemd".parse().unwrap();
        assert_eq!(atom.category, "sys-apps");
        assert_eq!(atom.name, "systemd");
        assert_eq!(atom.operator, VersionOp::Any);
        assert_eq!(atom.key(), "sys-apps/systemd");
    }

    #[test]
    fn test_parse_versioned_atom() {
        let atom: PackageAtom = ">=sys-apps/systemd-250-r1".parse().unwrap();
        assert_eq!(atom.name, "systemd");
        assert_eq!(atom.version.as_ref().unwrap().as_str(), "250-r1");
        assert_eq!(atom.operator, VersionOp::GreaterEqual);
    }

    #[test]
    fn test_parse_glob_atom() {
        let atom: PackageAtom = "=dev-lang/python-3.1*".parse().unwrap();
        assert_eq!(atom.operator, VersionOp::GlobEqual);
        assert!(atom.matches(&pkg("dev-lang/python-3.11.4")));
        assert!(!atom.matches(&pkg("dev-lang/python-3.2")));
    }

    #[test]
    fn test_parse_slot_repo_use() {
        let atom: PackageAtom = "dev-lang/python:3.11/3.11::gentoo[ssl,-tk(+)]"
            .parse()
            .unwrap();
        assert_eq!(atom.slot.as_deref(), Some("3.11"));
        assert_eq!(atom.subslot.as_deref(), Some("3.11"));
        assert_eq!(atom.repository.as_deref(), Some("gentoo"));
        assert_eq!(atom.use_deps.len(), 2);
        assert!(!atom.use_deps[1].enabled);
        assert_eq!(atom.use_deps[1].default, Some(true));
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<PackageAtom>().is_err());
        assert!("systemd".parse::<PackageAtom>().is_err());
        assert!(">=sys-apps/systemd".parse::<PackageAtom>().is_err());
        assert!("sys-apps/systemd[ssl".parse::<PackageAtom>().is_err());
        assert!(">=sys-apps/*-1.0".parse::<PackageAtom>().is_err());
    }

    #[test]
    fn test_wildcard_atom() {
        let atom: PackageAtom = "games-*/*".parse().unwrap();
        assert!(atom.is_wildcard());
        let atom: PackageAtom = "sys-apps/systemd".parse().unwrap();
        assert!(!atom.is_wildcard());
    }

    #[test]
    fn test_version_operators() {
        let p = pkg("app-misc/foo-1.2-r1");
        assert!("app-misc/foo".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(">app-misc/foo-1.2".parse::<PackageAtom>().unwrap().matches(&p));
        assert!("~app-misc/foo-1.2".parse::<PackageAtom>().unwrap().matches(&p));
        assert!("<=app-misc/foo-1.2-r1".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"=app-misc/foo-1.2".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"<app-misc/foo-1.2".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"app-misc/bar".parse::<PackageAtom>().unwrap().matches(&p));
    }

    #[test]
    fn test_slot_and_repo_matching() {
        let p = pkg("dev-lang/python-3.11.4").with_slot("3.11").with_repo("gentoo");
        assert!("dev-lang/python:3.11".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"dev-lang/python:3.12".parse::<PackageAtom>().unwrap().matches(&p));
        assert!("dev-lang/python::gentoo".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"dev-lang/python::overlay".parse::<PackageAtom>().unwrap().matches(&p));
    }

    #[test]
    fn test_use_dep_matching() {
        let p = pkg("dev-lang/python-3.11.4")
            .with_iuse(["ssl", "tk"])
            .with_use(["ssl"]);
        assert!("dev-lang/python[ssl]".parse::<PackageAtom>().unwrap().matches(&p));
        assert!("dev-lang/python[-tk]".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"dev-lang/python[tk]".parse::<PackageAtom>().unwrap().matches(&p));
        // undeclared flags fall back to the (+)/(-) default
        assert!("dev-lang/python[gdbm(+)]".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"dev-lang/python[gdbm(-)]".parse::<PackageAtom>().unwrap().matches(&p));
        assert!(!"dev-lang/python[gdbm]".parse::<PackageAtom>().unwrap().matches(&p));
    }

    #[test]
    fn test_atom_display() {
        let atom = PackageAtom::new("sys-apps", "systemd")
            .with_version(VersionOp::GreaterEqual, Version::parse("250").unwrap())
            .with_slot("0");
        assert_eq!(atom.to_string(), ">=sys-apps/systemd-250:0");

        let atom: PackageAtom = "=dev-lang/python-3.1*:3.1::gentoo[ssl]".parse().unwrap();
        assert_eq!(atom.to_string(), "=dev-lang/python-3.1*:3.1::gentoo[ssl]");
    }
}
