//! License expressions, license groups and ACCEPT_LICENSE evaluation
//!
//! Implements Gentoo-style license handling:
//! - `LICENSE` strings with `||` groups and USE conditionals
//! - License groups (@FREE, @OSI-APPROVED, etc.), possibly nested
//! - Per-package license acceptance

use crate::restriction::Restriction;
use crate::use_flags::UseResolver;
use crate::{ConfigError, Package, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// A parsed `LICENSE` expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum LicenseExpr {
    Literal(String),
    /// All of the children
    And(Vec<LicenseExpr>),
    /// Any of the children (`|| ( ... )`)
    Or(Vec<LicenseExpr>),
    /// `flag? ( ... )` or `!flag? ( ... )`
    Conditional {
        flag: String,
        negated: bool,
        body: Vec<LicenseExpr>,
    },
}

impl Default for LicenseExpr {
    fn default() -> Self {
        LicenseExpr::And(Vec::new())
    }
}

impl LicenseExpr {
    /// Resolve USE conditionals against a set of enabled flags
    pub fn evaluate(&self, use_flags: &BTreeSet<String>) -> LicenseExpr {
        let eval_all = |items: &[LicenseExpr]| -> Vec<LicenseExpr> {
            items.iter().map(|e| e.evaluate(use_flags)).collect()
        };
        match self {
            LicenseExpr::Literal(_) => self.clone(),
            LicenseExpr::And(items) => LicenseExpr::And(eval_all(items)),
            LicenseExpr::Or(items) => LicenseExpr::Or(eval_all(items)),
            LicenseExpr::Conditional { flag, negated, body } => {
                if use_flags.contains(flag) != *negated {
                    LicenseExpr::And(eval_all(body))
                } else {
                    LicenseExpr::And(Vec::new())
                }
            }
        }
    }

    /// Disjunctive normal form: the expression holds if every license of any clause is accepted
    ///
    /// Unevaluated conditionals are treated as if their condition held.
    pub fn to_dnf(&self) -> Vec<Vec<String>> {
        match self {
            LicenseExpr::Literal(name) => vec![vec![name.clone()]],
            LicenseExpr::And(items) | LicenseExpr::Conditional { body: items, .. } => {
                let mut acc: Vec<Vec<String>> = vec![Vec::new()];
                for item in items {
                    let solutions = item.to_dnf();
                    acc = acc
                        .iter()
                        .flat_map(|prefix| {
                            solutions.iter().map(move |clause| {
                                let mut merged = prefix.clone();
                                merged.extend(clause.iter().cloned());
                                merged
                            })
                        })
                        .collect();
                }
                acc
            }
            LicenseExpr::Or(items) if items.is_empty() => vec![Vec::new()],
            LicenseExpr::Or(items) => items.iter().flat_map(LicenseExpr::to_dnf).collect(),
        }
    }

    fn fmt_group(f: &mut fmt::Formatter<'_>, items: &[LicenseExpr]) -> fmt::Result {
        write!(f, "(")?;
        for item in items {
            write!(f, " {}", item)?;
        }
        write!(f, " )")
    }
}

fn parse_group<'a, I>(tokens: &mut I, src: &str, nested: bool) -> Result<Vec<LicenseExpr>>
where
    I: Iterator<Item = &'a str>,
{
    let invalid = |msg: &str| ConfigError::InvalidLicense(format!("{}: {}", msg, src));
    let expect_open = |tokens: &mut I| match tokens.next() {
        Some("(") => Ok(()),
        _ => Err(invalid("expected '('")),
    };

    let mut items = Vec::new();
    while let Some(token) = tokens.next() {
        match token {
            ")" if nested => return Ok(items),
            ")" => return Err(invalid("unbalanced ')'")),
            "(" => items.push(LicenseExpr::And(parse_group(tokens, src, true)?)),
            "||" => {
                expect_open(tokens)?;
                items.push(LicenseExpr::Or(parse_group(tokens, src, true)?));
            }
            t if t.ends_with('?') => {
                let flag = &t[..t.len() - 1];
                let (negated, flag) = match flag.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, flag),
                };
                if flag.is_empty() {
                    return Err(invalid("empty conditional"));
                }
                expect_open(tokens)?;
                items.push(LicenseExpr::Conditional {
                    flag: flag.to_string(),
                    negated,
                    body: parse_group(tokens, src, true)?,
                });
            }
            t if t.contains(|c: char| matches!(c, '(' | ')' | '|' | '?')) => {
                return Err(invalid("invalid token"));
            }
            t => items.push(LicenseExpr::Literal(t.to_string())),
        }
    }

    if nested {
        Err(invalid("unclosed '('"))
    } else {
        Ok(items)
    }
}

impl FromStr for LicenseExpr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let mut items = parse_group(&mut s.split_whitespace(), s, false)?;
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(LicenseExpr::And(items))
        }
    }
}

impl fmt::Display for LicenseExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LicenseExpr::Literal(name) => write!(f, "{}", name),
            LicenseExpr::And(items) => LicenseExpr::fmt_group(f, items),
            LicenseExpr::Or(items) => {
                write!(f, "|| ")?;
                LicenseExpr::fmt_group(f, items)
            }
            LicenseExpr::Conditional { flag, negated, body } => {
                write!(f, "{}{}? ", if *negated { "!" } else { "" }, flag)?;
                LicenseExpr::fmt_group(f, body)
            }
        }
    }
}

impl From<LicenseExpr> for String {
    fn from(expr: LicenseExpr) -> Self {
        // top level conjunctions are written without parentheses
        match expr {
            LicenseExpr::And(items) => items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string(),
        }
    }
}

/// Built-in license groups, in `license_groups` file format
const BUILTIN_GROUPS: &str = "
FREE-SOFTWARE GPL-1 GPL-1+ GPL-2 GPL-2+ GPL-3 GPL-3+ LGPL-2 LGPL-2+ LGPL-2.1 LGPL-2.1+
  LGPL-3 LGPL-3+ AGPL-3 AGPL-3+ BSD BSD-2 BSD-3 BSD-4 MIT ISC Apache-1.0 Apache-1.1
  Apache-2.0 MPL-1.0 MPL-1.1 MPL-2.0 Artistic Artistic-2 PSF-2 Ruby Zlib libpng openssl
  public-domain Unlicense WTFPL-2 CC0-1.0 0BSD HPND RSA
FREE-DOCUMENTS FDL-1.1 FDL-1.1+ FDL-1.2 FDL-1.2+ FDL-1.3 FDL-1.3+ CC-BY-1.0 CC-BY-2.0
  CC-BY-2.5 CC-BY-3.0 CC-BY-4.0 CC-BY-SA-1.0 CC-BY-SA-2.0 CC-BY-SA-2.5 CC-BY-SA-3.0
  CC-BY-SA-4.0 OPL man-pages
FREE @FREE-SOFTWARE @FREE-DOCUMENTS
OSI-APPROVED Apache-2.0 BSD-2 BSD-3 GPL-2 GPL-2+ GPL-3 GPL-3+ LGPL-2.1 LGPL-2.1+ LGPL-3
  LGPL-3+ MIT MPL-2.0 ISC Artistic-2 CDDL CPL-1.0 EPL-1.0 EPL-2.0 EUPL-1.1 EUPL-1.2
  PostgreSQL PSF-2 Zlib Unlicense 0BSD
FSF-APPROVED GPL-1 GPL-1+ GPL-2 GPL-2+ GPL-3 GPL-3+ LGPL-2 LGPL-2+ LGPL-2.1 LGPL-2.1+
  LGPL-3 LGPL-3+ AGPL-3 AGPL-3+ Apache-2.0 Artistic-2 BSD-3 MIT MPL-2.0 CC0-1.0 public-domain
GPL-COMPATIBLE GPL-2 GPL-2+ GPL-3 GPL-3+ LGPL-2.1 LGPL-2.1+ LGPL-3 LGPL-3+ Apache-2.0
  BSD-2 BSD-3 MIT ISC MPL-2.0 public-domain CC0-1.0 Zlib Unlicense 0BSD
BINARY-REDISTRIBUTABLE @FREE NVIDIA AMD-AMDGPU-PRO intel-microcode linux-firmware
  microcode-intel Oracle-BCLA-JavaSE
EULA EULA Steam GOG-EULA Epic-Games Vivaldi google-chrome NVIDIA-CUDA
";

/// Named license sets, members may reference other groups with `@`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseGroups {
    groups: IndexMap<String, Vec<String>>,
}

impl LicenseGroups {
    /// The built-in groups (@FREE, @EULA, ...)
    pub fn builtin() -> Self {
        Self::parse(BUILTIN_GROUPS)
    }

    /// Parse `license_groups` content: `GROUP member @OTHER ...`
    ///
    /// Lines starting with whitespace continue the previous group.
    pub fn parse(content: &str) -> Self {
        let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut current: Option<String> = None;

        for line in content.lines() {
            let continued = line.starts_with(char::is_whitespace);
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace().map(str::to_string);
            let name = match (&current, continued) {
                (Some(name), true) => name.clone(),
                _ => match tokens.next() {
                    Some(name) => name,
                    None => continue,
                },
            };
            groups.entry(name.clone()).or_default().extend(tokens);
            current = Some(name);
        }

        Self { groups }
    }

    /// Load a `license_groups` file
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Layer `other` on top, replacing groups it redefines
    pub fn merged(&self, other: &LicenseGroups) -> Self {
        let mut groups = self.groups.clone();
        for (name, members) in &other.groups {
            groups.insert(name.clone(), members.clone());
        }
        Self { groups }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Transitively expand a group (name without `@`) into primitive licenses
    pub fn expand(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut visited = HashSet::new();
        self.expand_into(name, &mut out, &mut visited);
        out
    }

    fn expand_into<'a>(&'a self, name: &'a str, out: &mut BTreeSet<String>, visited: &mut HashSet<&'a str>) {
        if !visited.insert(name) {
            return;
        }
        let Some(members) = self.groups.get(name) else {
            warn!("unknown license group @{}", name);
            return;
        };
        for member in members {
            match member.strip_prefix('@') {
                Some(group) => self.expand_into(group, out, visited),
                None => {
                    out.insert(member.clone());
                }
            }
        }
    }
}

/// Licenses accepted while checking one DNF clause
///
/// `*` accepts every license of the clause, `-*` clears, `@group` tokens
/// expand through `groups` and `-token` removes.
pub fn accepted_for_clause(tokens: &[String], clause: &[String], groups: &LicenseGroups) -> BTreeSet<String> {
    let mut accepted = BTreeSet::new();
    for token in tokens {
        let (negate, name) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token.as_str()),
        };

        let licenses: BTreeSet<String> = if name == "*" {
            if negate {
                accepted.clear();
                continue;
            }
            clause.iter().cloned().collect()
        } else if let Some(group) = name.strip_prefix('@') {
            groups.expand(group)
        } else {
            std::iter::once(name.to_string()).collect()
        };

        if negate {
            for license in &licenses {
                accepted.remove(license);
            }
        } else {
            accepted.extend(licenses);
        }
    }
    accepted
}

/// License acceptance filter
#[derive(Debug, Clone)]
pub struct LicenseFilter {
    accept: Vec<String>,
    package: Vec<(Restriction, Vec<String>)>,
    default_groups: Arc<LicenseGroups>,
    repo_groups: HashMap<String, Arc<LicenseGroups>>,
    use_resolver: Option<Arc<UseResolver>>,
}

impl LicenseFilter {
    /// Create a filter from raw ACCEPT_LICENSE tokens
    pub fn new(accept: Vec<String>, default_groups: Arc<LicenseGroups>) -> Self {
        Self {
            accept,
            package: Vec::new(),
            default_groups,
            repo_groups: HashMap::new(),
            use_resolver: None,
        }
    }

    /// Evaluate LICENSE USE conditionals against resolved USE instead of recorded USE
    pub fn with_use_resolver(mut self, resolver: Arc<UseResolver>) -> Self {
        self.use_resolver = Some(resolver);
        self
    }

    /// Add per-package license acceptance (package.license)
    pub fn add_package_license(&mut self, restriction: Restriction, licenses: Vec<String>) {
        self.package.push((restriction, licenses));
    }

    /// Use a repository's own license groups for its packages
    pub fn set_repo_groups(&mut self, repo_id: impl Into<String>, groups: Arc<LicenseGroups>) {
        self.repo_groups.insert(repo_id.into(), groups);
    }

    /// Whether any clause of the package's license is fully accepted
    pub fn accepts(&self, pkg: &Package) -> bool {
        let mut tokens = self.accept.clone();
        for (restriction, licenses) in &self.package {
            if restriction.matches(pkg) {
                tokens.extend(licenses.iter().cloned());
            }
        }

        let groups = self
            .repo_groups
            .get(&pkg.repo_id)
            .unwrap_or(&self.default_groups);

        let solutions = match &self.use_resolver {
            Some(resolver) => pkg
                .license
                .evaluate(&resolver.resolve(pkg, true).enabled)
                .to_dnf(),
            None => pkg.license_solutions(),
        };

        solutions.iter().any(|clause| {
            let accepted = accepted_for_clause(&tokens, clause, groups);
            clause.iter().all(|license| accepted.contains(license))
        })
    }

    /// Wrap the filter as a visibility restriction
    pub fn into_restriction(self) -> Restriction {
        let filter = Arc::new(self);
        Restriction::delegate("license", move |pkg, _| filter.accepts(pkg))
    }
}
