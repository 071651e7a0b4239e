//! Package version parsing and ordering
//!
//! Implements Gentoo-style versions:
//! - numeric components (`1.2.3`)
//! - an optional trailing letter (`1.2b`)
//! - suffixes (`_alpha`, `_beta`, `_pre`, `_rc`, `_p`, each with an optional number)
//! - a revision (`-r2`)

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version suffix, in ascending order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Suffix {
    Alpha,
    Beta,
    Pre,
    Rc,
    P,
}

impl Suffix {
    fn as_str(&self) -> &'static str {
        match self {
            Suffix::Alpha => "alpha",
            Suffix::Beta => "beta",
            Suffix::Pre => "pre",
            Suffix::Rc => "rc",
            Suffix::P => "p",
        }
    }
}

/// A parsed package version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    numbers: Vec<String>,
    letter: Option<char>,
    suffixes: Vec<(Suffix, u64)>,
    revision: u64,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || ConfigError::InvalidVersion(s.to_string());
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid());
        }

        let (body, revision) = match s.rfind("-r") {
            Some(idx) => {
                let rev = &s[idx + 2..];
                if rev.is_empty() || !rev.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                (&s[..idx], rev.parse::<u64>().map_err(|_| invalid())?)
            }
            None => (s, 0),
        };

        let mut parts = body.split('_');
        let head = parts.next().ok_or_else(invalid)?;

        // numeric components, optionally followed by a single letter
        let (numeric, letter) = match head.chars().last() {
            Some(c) if c.is_ascii_lowercase() => (&head[..head.len() - 1], Some(c)),
            _ => (head, None),
        };
        let numbers: Vec<String> = numeric.split('.').map(str::to_string).collect();
        if numbers
            .iter()
            .any(|n| n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(invalid());
        }

        let mut suffixes = Vec::new();
        for part in parts {
            let split = part
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(part.len());
            let (name, num) = part.split_at(split);
            let suffix = match name {
                "alpha" => Suffix::Alpha,
                "beta" => Suffix::Beta,
                "pre" => Suffix::Pre,
                "rc" => Suffix::Rc,
                "p" => Suffix::P,
                _ => return Err(invalid()),
            };
            let num = if num.is_empty() {
                0
            } else {
                num.parse::<u64>().map_err(|_| invalid())?
            };
            suffixes.push((suffix, num));
        }

        Ok(Self {
            raw: s.to_string(),
            numbers,
            letter,
            suffixes,
            revision,
        })
    }

    /// The version as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The revision number (`-rN`), zero when absent
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The version without its revision (the `PV` part of `PVR`)
    pub fn base(&self) -> String {
        match self.raw.rfind("-r") {
            Some(idx) => self.raw[..idx].to_string(),
            None => self.raw.clone(),
        }
    }

    /// Compare two versions ignoring their revisions
    pub fn cmp_base(&self, other: &Self) -> Ordering {
        compare_numbers(&self.numbers, &other.numbers)
            .then_with(|| self.letter.cmp(&other.letter))
            .then_with(|| compare_suffixes(&self.suffixes, &other.suffixes))
    }

    /// Whether this version string starts with `prefix` (for `=cat/pkg-1.2*`)
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.raw.starts_with(prefix)
    }
}

/// Compare two unbounded decimal strings numerically
fn compare_decimal(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_numbers(a: &[String], b: &[String]) -> Ordering {
    let first = compare_decimal(&a[0], &b[0]);
    if first != Ordering::Equal {
        return first;
    }

    for i in 1..a.len().max(b.len()) {
        let ord = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => {
                // components with a leading zero compare as fractions
                if x.starts_with('0') || y.starts_with('0') {
                    x.trim_end_matches('0').cmp(y.trim_end_matches('0'))
                } else {
                    compare_decimal(x, y)
                }
            }
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_suffixes(a: &[(Suffix, u64)], b: &[(Suffix, u64)]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let ord = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => x.0.cmp(&y.0).then_with(|| x.1.cmp(&y.1)),
            (Some((suffix, _)), None) => {
                if *suffix == Suffix::P {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (None, Some((suffix, _))) => {
                if *suffix == Suffix::P {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_base(other)
            .then_with(|| self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let ver = v("1.2.3b_rc2_p1-r4");
        assert_eq!(ver.revision(), 4);
        assert_eq!(ver.base(), "1.2.3b_rc2_p1");
        assert_eq!(ver.to_string(), "1.2.3b_rc2_p1-r4");
    }

    #[test]
    fn test_base_keeps_written_suffixes() {
        assert_eq!(v("1.0_p0").base(), "1.0_p0");
        assert_eq!(v("1.0_p0-r2").base(), "1.0_p0");
        assert_eq!(v("1.0-r0").base(), "1.0");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("abc").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.0_gamma").is_err());
        assert!(Version::parse("1.0-rx").is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.99"));
        assert!(v("1.0.1") > v("1.0"));
        assert!(v("1.01") < v("1.1"));
    }

    #[test]
    fn test_suffix_ordering() {
        assert!(v("1.0_alpha") < v("1.0_beta"));
        assert!(v("1.0_beta") < v("1.0_pre"));
        assert!(v("1.0_pre") < v("1.0_rc"));
        assert!(v("1.0_rc1") < v("1.0"));
        assert!(v("1.0") < v("1.0_p1"));
        assert!(v("1.0_rc1") < v("1.0_rc2"));
    }

    #[test]
    fn test_letter_and_revision() {
        assert!(v("1.0a") > v("1.0"));
        assert!(v("1.0-r1") > v("1.0"));
        assert_eq!(v("1.0-r0"), v("1.0"));
        assert_eq!(v("1.0-r3").cmp_base(&v("1.0")), Ordering::Equal);
    }
}
