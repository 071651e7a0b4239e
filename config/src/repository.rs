//! Package repositories
//!
//! A raw repository declares which domain objects it needs to be configured
//! and which masks it ships. Configuring it yields a [`PackageRepository`],
//! which the domain wraps in a [`FilteredRepository`] carrying the composed
//! visibility restriction.

use crate::license::LicenseGroups;
use crate::loader::read_lines_if_exists;
use crate::mask::{parse_mask_entries, MaskEntry};
use crate::package::PackageRecord;
use crate::profile::Profile;
use crate::restriction::Restriction;
use crate::settings::Settings;
use crate::{ConfigError, Package, Result};
use indexmap::IndexSet;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Domain object a repository asks for when it is configured
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Configurable {
    /// Domain-level facts (arch, default keywords, config root)
    Domain,
    /// The final settings snapshot
    Settings,
    /// The resolved profile
    Profile,
    /// A single settings variable, which must be set
    Setting(String),
}

impl fmt::Display for Configurable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Configurable::Domain => write!(f, "domain"),
            Configurable::Settings => write!(f, "settings"),
            Configurable::Profile => write!(f, "profile"),
            Configurable::Setting(name) => write!(f, "setting {}", name),
        }
    }
}

/// Domain facts handed to repositories at configuration time
#[derive(Debug, Clone, Copy)]
pub struct DomainContext<'a> {
    pub arch: &'a str,
    pub default_keywords: &'a IndexSet<String>,
    pub config_root: &'a Path,
}

/// A supplied configurable, in the order the repository declared them
#[derive(Debug, Clone, Copy)]
pub enum ConfigureArg<'a> {
    Domain(DomainContext<'a>),
    Settings(&'a Settings),
    Profile(&'a Profile),
    Setting(&'a str),
}

/// An unconfigured repository
pub trait RawRepository: Send + Sync {
    fn repo_id(&self) -> &str;

    /// Declared master repositories; `None` when none were declared
    fn masters(&self) -> Option<&[String]>;

    /// Objects this repository must be given by [`RawRepository::configure`]
    fn configurables(&self) -> &[Configurable] {
        &[]
    }

    /// Build the usable repository from the requested objects
    fn configure(&self, args: &[ConfigureArg<'_>]) -> Result<Arc<dyn PackageRepository>>;

    /// Repository-level `(masks, unmasks)`
    fn visibility_limiters(&self) -> (Vec<Restriction>, Vec<Restriction>) {
        (Vec::new(), Vec::new())
    }

    /// License groups defined by the repository, if any
    fn license_groups(&self) -> Option<Arc<LicenseGroups>> {
        None
    }
}

/// A configured repository that can be queried for packages
pub trait PackageRepository: Send + Sync + fmt::Debug {
    fn repo_id(&self) -> &str;

    fn packages(&self) -> Box<dyn Iterator<Item = &Package> + '_>;

    /// Packages matching a restriction
    fn itermatch<'a>(&'a self, restriction: &'a Restriction) -> Box<dyn Iterator<Item = &'a Package> + 'a> {
        Box::new(self.packages().filter(move |pkg| restriction.matches(pkg)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PackageIndex {
    #[serde(default)]
    package: Vec<PackageRecord>,
}

/// Repository held in memory, optionally loaded from an index directory
///
/// An index directory holds `packages.toml` (a list of `[[package]]` tables)
/// and optionally `profiles/package.mask`, `profiles/package.unmask` and
/// `profiles/license_groups`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    id: String,
    location: Option<PathBuf>,
    masters: Option<Vec<String>>,
    packages: Vec<Package>,
    masks: Vec<MaskEntry>,
    unmasks: Vec<MaskEntry>,
    license_groups: Option<Arc<LicenseGroups>>,
    configurables: Vec<Configurable>,
}

impl InMemoryRepository {
    /// Create a repository holding `packages`, retagged with this repository's id
    pub fn new(id: impl Into<String>, packages: Vec<Package>) -> Self {
        let id = id.into();
        let packages = packages.into_iter().map(|p| p.with_repo(id.clone())).collect();
        Self {
            id,
            packages,
            ..Default::default()
        }
    }

    /// Load an index repository from a directory
    pub fn load(id: impl Into<String>, location: &Path) -> Result<Self> {
        let id = id.into();
        if !location.is_dir() {
            return Err(ConfigError::MissingFile(location.to_path_buf()));
        }

        let index_path = location.join("packages.toml");
        let index: PackageIndex = if index_path.is_file() {
            toml::from_str(&std::fs::read_to_string(&index_path)?)?
        } else {
            debug!("repository {} has no package index", id);
            PackageIndex::default()
        };
        let packages = index
            .package
            .into_iter()
            .map(|record| record.into_package(&id))
            .collect::<Result<Vec<_>>>()?;

        let profiles = location.join("profiles");
        let masks = parse_mask_entries(&read_lines_if_exists(&profiles.join("package.mask"))?)?;
        let unmasks = parse_mask_entries(&read_lines_if_exists(&profiles.join("package.unmask"))?)?;

        let groups_path = profiles.join("license_groups");
        let license_groups = if groups_path.is_file() {
            Some(Arc::new(LicenseGroups::load(&groups_path)?))
        } else {
            None
        };

        debug!(
            "loaded repository {} from {}: {} packages, {} masks",
            id,
            location.display(),
            packages.len(),
            masks.len()
        );

        Ok(Self {
            id,
            location: Some(location.to_path_buf()),
            masters: None,
            packages,
            masks,
            unmasks,
            license_groups,
            configurables: Vec::new(),
        })
    }

    pub fn with_masters(mut self, masters: Vec<String>) -> Self {
        self.masters = Some(masters);
        self
    }

    pub fn with_masks(mut self, masks: Vec<MaskEntry>) -> Self {
        self.masks = masks;
        self
    }

    pub fn with_unmasks(mut self, unmasks: Vec<MaskEntry>) -> Self {
        self.unmasks = unmasks;
        self
    }

    pub fn with_license_groups(mut self, groups: LicenseGroups) -> Self {
        self.license_groups = Some(Arc::new(groups));
        self
    }

    pub fn with_configurables(mut self, configurables: Vec<Configurable>) -> Self {
        self.configurables = configurables;
        self
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }
}

impl RawRepository for InMemoryRepository {
    fn repo_id(&self) -> &str {
        &self.id
    }

    fn masters(&self) -> Option<&[String]> {
        self.masters.as_deref()
    }

    fn configurables(&self) -> &[Configurable] {
        &self.configurables
    }

    fn configure(&self, args: &[ConfigureArg<'_>]) -> Result<Arc<dyn PackageRepository>> {
        if args.len() != self.configurables.len() {
            return Err(ConfigError::failure(format!(
                "repository {} expects {} configurables, got {}",
                self.id,
                self.configurables.len(),
                args.len()
            )));
        }
        for arg in args {
            match arg {
                ConfigureArg::Domain(ctx) => debug!("repository {} configured for arch {}", self.id, ctx.arch),
                ConfigureArg::Settings(settings) => {
                    debug!("repository {} configured with {} settings", self.id, settings.vars().len())
                }
                ConfigureArg::Profile(profile) => {
                    debug!("repository {} configured with profile {}", self.id, profile.path().display())
                }
                ConfigureArg::Setting(value) => debug!("repository {} configured with {:?}", self.id, value),
            }
        }
        Ok(Arc::new(self.clone()))
    }

    fn visibility_limiters(&self) -> (Vec<Restriction>, Vec<Restriction>) {
        (
            self.masks.iter().map(|m| m.restriction.clone()).collect(),
            self.unmasks.iter().map(|m| m.restriction.clone()).collect(),
        )
    }

    fn license_groups(&self) -> Option<Arc<LicenseGroups>> {
        self.license_groups.clone()
    }
}

impl PackageRepository for InMemoryRepository {
    fn repo_id(&self) -> &str {
        &self.id
    }

    fn packages(&self) -> Box<dyn Iterator<Item = &Package> + '_> {
        Box::new(self.packages.iter())
    }
}

/// A repository view exposing only packages its filter accepts
#[derive(Debug, Clone)]
pub struct FilteredRepository {
    inner: Arc<dyn PackageRepository>,
    filter: Arc<Restriction>,
}

impl FilteredRepository {
    pub fn new(inner: Arc<dyn PackageRepository>, filter: Restriction) -> Self {
        Self {
            inner,
            filter: Arc::new(filter),
        }
    }

    /// The visibility restriction
    pub fn filter(&self) -> &Restriction {
        &self.filter
    }

    /// The unfiltered repository
    pub fn inner(&self) -> &Arc<dyn PackageRepository> {
        &self.inner
    }

    pub fn is_visible(&self, pkg: &Package) -> bool {
        self.filter.matches(pkg)
    }
}

impl PackageRepository for FilteredRepository {
    fn repo_id(&self) -> &str {
        self.inner.repo_id()
    }

    fn packages(&self) -> Box<dyn Iterator<Item = &Package> + '_> {
        Box::new(self.inner.packages().filter(move |pkg| self.filter.matches(pkg)))
    }
}
