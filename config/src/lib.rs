//! Package Domain Configuration
//!
//! This crate builds the package visibility domain: a profile stack and a
//! user configuration root are layered into one settings snapshot, and every
//! configured repository is wrapped in a filter deciding which packages are
//! visible under the active masks, keywords and licenses.
//!
//! # Overview
//!
//! - [`settings`]: make.defaults/make.conf parsing and the layered settings snapshot
//! - [`incremental`]: incremental variable expansion (`-flag`, `-*`)
//! - [`chunked`]: ordered per-package data folding
//! - [`restriction`]: restriction combinators over packages
//! - [`atom`]: package atoms and version constraints
//! - [`mask`]: package.mask/package.unmask and filter composition
//! - [`keywords`]: ACCEPT_KEYWORDS acceptance
//! - [`license`]: license expressions, groups and ACCEPT_LICENSE acceptance
//! - [`use_flags`]: per-package USE resolution
//! - [`profile`]: profile stacks
//! - [`loader`]: user configuration loading
//! - [`repos`] and [`repository`]: repos.conf and repository views
//! - [`bashrc`]: build environment sources
//! - [`domain`]: the [`Domain`] tying it all together
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pkgdomain_config::{Domain, Package};
//! use std::path::Path;
//!
//! let domain = Domain::load(
//!     Path::new("/etc/portage/make.profile"),
//!     Path::new("/etc/portage"),
//! )
//! .unwrap();
//!
//! println!("USE: {:?}", domain.use_flags());
//!
//! let pkg = Package::parse("app-editors/vim-9.0").unwrap();
//! let state = domain.get_package_use_unconfigured(&pkg, true);
//! println!("enabled: {:?}", state.enabled);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! /etc/portage/
//! ├── make.conf                 # User settings
//! ├── repos.conf                # Repository configuration
//! ├── package.use               # Per-package USE flags
//! ├── package.accept_keywords   # Per-package accepted keywords
//! ├── package.keywords          # Per-package keyword overrides
//! ├── package.license           # Per-package licenses
//! ├── package.mask              # Package masks
//! ├── package.unmask            # Package unmasks
//! ├── package.env               # Per-package env files
//! └── env/                      # Env files and per-package hooks
//! ```

pub mod atom;
pub mod bashrc;
pub mod chunked;
pub mod domain;
pub mod error;
pub mod incremental;
pub mod keywords;
pub mod license;
pub mod loader;
pub mod mask;
pub mod package;
pub mod profile;
pub mod repos;
pub mod repository;
pub mod restriction;
pub mod settings;
pub mod use_flags;
pub mod version;

// Re-exports for convenience
pub use atom::{PackageAtom, UseDep, VersionOp};
pub use bashrc::{BashrcSource, Bashrcs};
pub use chunked::{ChunkedDataDict, Delta};
pub use domain::{Domain, DomainConfig};
pub use error::{ConfigError, Result};
pub use incremental::{collapse_incremental, expand_incremental};
pub use keywords::KeywordFilter;
pub use license::{LicenseExpr, LicenseFilter, LicenseGroups};
pub use loader::{ConfigLoader, PackageFile, UserConfig};
pub use mask::{generate_filter, MaskEntry, MaskSet};
pub use package::{Package, PackageRecord};
pub use profile::{Profile, ProfileNode};
pub use repos::{parse_repos_conf, RepoConfig, ReposConfig};
pub use repository::{
    Configurable, ConfigureArg, DomainContext, FilteredRepository, InMemoryRepository, PackageRepository,
    RawRepository,
};
pub use restriction::{MatchMode, Restriction};
pub use settings::Settings;
pub use use_flags::{UseResolver, UseState};
pub use version::Version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ConfigError, ConfigLoader, Domain, DomainConfig, InMemoryRepository, Package, PackageAtom,
        PackageRepository, Profile, RawRepository, Restriction, Result, UseState,
    };
}
