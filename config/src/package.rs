//! Package metadata consumed by the visibility filters

use crate::atom::{split_name_version, valid_name};
use crate::license::LicenseExpr;
use crate::version::Version;
use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A concrete package version as seen by the domain
#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub category: String,
    pub name: String,
    pub version: Version,
    pub slot: String,
    pub subslot: Option<String>,
    /// Declared keywords (`arch`, `~arch`, `-arch`)
    pub keywords: Vec<String>,
    /// Declared USE flags, with optional `+`/`-` default markers
    pub iuse: Vec<String>,
    pub license: LicenseExpr,
    /// USE recorded at build time (installed packages only)
    #[serde(rename = "use")]
    pub use_flags: BTreeSet<String>,
    /// Id of the owning repository
    pub repo_id: String,
}

impl Package {
    /// Parse a `category/name-version` string into a bare package
    pub fn parse(cpv: &str) -> Result<Self> {
        let invalid = || ConfigError::InvalidAtom(format!("invalid cpv: {}", cpv));
        let (category, rest) = cpv.trim().split_once('/').ok_or_else(invalid)?;
        let (name, version) = split_name_version(rest).ok_or_else(invalid)?;
        if !valid_name(category, false) || !valid_name(name, false) {
            return Err(invalid());
        }

        Ok(Self {
            category: category.to_string(),
            name: name.to_string(),
            version: Version::parse(version)?,
            slot: "0".to_string(),
            subslot: None,
            keywords: Vec::new(),
            iuse: Vec::new(),
            license: LicenseExpr::default(),
            use_flags: BTreeSet::new(),
            repo_id: String::new(),
        })
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    pub fn with_subslot(mut self, subslot: impl Into<String>) -> Self {
        self.subslot = Some(subslot.into());
        self
    }

    pub fn with_repo(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = repo_id.into();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_iuse<I, S>(mut self, iuse: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.iuse = iuse.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_use<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.use_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the license from its `LICENSE` string form
    pub fn with_license(mut self, license: &str) -> Result<Self> {
        self.license = license.parse()?;
        Ok(self)
    }

    /// Package key (category/name)
    pub fn key(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// `category/name-version`
    pub fn cpv(&self) -> String {
        format!("{}/{}-{}", self.category, self.name, self.version)
    }

    /// `name-version` without the revision
    pub fn p(&self) -> String {
        format!("{}-{}", self.name, self.version.base())
    }

    /// `name-version` including the revision as written
    pub fn pf(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Sub-slot, which defaults to the slot
    pub fn subslot(&self) -> &str {
        self.subslot.as_deref().unwrap_or(&self.slot)
    }

    /// IUSE without default markers
    pub fn iuse_stripped(&self) -> impl Iterator<Item = &str> + '_ {
        self.iuse
            .iter()
            .map(|f| f.trim_start_matches(|c: char| c == '+' || c == '-'))
    }

    /// Flags declared `+flag` in IUSE
    pub fn iuse_defaults(&self) -> impl Iterator<Item = &str> + '_ {
        self.iuse.iter().filter_map(|f| f.strip_prefix('+'))
    }

    /// License solutions after evaluating USE conditionals against recorded USE
    pub fn license_solutions(&self) -> Vec<Vec<String>> {
        self.license.evaluate(&self.use_flags).to_dnf()
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cpv())?;
        if !self.repo_id.is_empty() {
            write!(f, "::{}", self.repo_id)?;
        }
        Ok(())
    }
}

/// On-disk package record, as stored in a repository index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub cpv: String,
    #[serde(default = "default_slot")]
    pub slot: String,
    #[serde(default)]
    pub subslot: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub iuse: Vec<String>,
    #[serde(default)]
    pub license: String,
    #[serde(default, rename = "use")]
    pub use_flags: Vec<String>,
}

fn default_slot() -> String {
    "0".to_string()
}

impl PackageRecord {
    /// Build the package, tagging it with the owning repository
    pub fn into_package(self, repo_id: &str) -> Result<Package> {
        let mut pkg = Package::parse(&self.cpv)?
            .with_slot(self.slot)
            .with_keywords(self.keywords)
            .with_iuse(self.iuse)
            .with_use(self.use_flags)
            .with_repo(repo_id)
            .with_license(&self.license)?;
        pkg.subslot = self.subslot;
        Ok(pkg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpv() {
        let pkg = Package::parse("dev-libs/foo-bar-2.0b_rc1-r3").unwrap();
        assert_eq!(pkg.key(), "dev-libs/foo-bar");
        assert_eq!(pkg.version.as_str(), "2.0b_rc1-r3");
        assert_eq!(pkg.p(), "foo-bar-2.0b_rc1");
        assert_eq!(pkg.pf(), "foo-bar-2.0b_rc1-r3");
        assert_eq!(pkg.slot, "0");
        assert_eq!(pkg.subslot(), "0");
    }

    #[test]
    fn test_parse_cpv_invalid() {
        assert!(Package::parse("foo-1.0").is_err());
        assert!(Package::parse("dev-libs/foo").is_err());
        assert!(Package::parse("dev-libs/foo-x1").is_err());
    }

    #[test]
    fn test_iuse_helpers() {
        let pkg = Package::parse("a/b-1")
            .unwrap()
            .with_iuse(["+ssl", "-tk", "gdbm"]);
        assert_eq!(pkg.iuse_stripped().collect::<Vec<_>>(), vec!["ssl", "tk", "gdbm"]);
        assert_eq!(pkg.iuse_defaults().collect::<Vec<_>>(), vec!["ssl"]);
    }

    #[test]
    fn test_record_into_package() {
        let record: PackageRecord = toml::from_str(
            r#"
            cpv = "app-misc/foo-1.0"
            slot = "2"
            keywords = ["~amd64"]
            license = "|| ( MIT GPL-2 )"
            use = ["doc"]
            "#,
        )
        .unwrap();
        let pkg = record.into_package("gentoo").unwrap();
        assert_eq!(pkg.slot, "2");
        assert_eq!(pkg.repo_id, "gentoo");
        assert_eq!(pkg.to_string(), "app-misc/foo-1.0::gentoo");
        assert_eq!(pkg.license_solutions().len(), 2);
    }
}
