//! The domain: one profile plus user configuration applied to a set of repositories
//!
//! Construction is a single pass. Settings are layered, default keywords
//! derived, the keyword, license and USE components built, and every
//! installable repository wrapped in its visibility filter. Any failure
//! aborts construction.

use crate::bashrc::Bashrcs;
use crate::keywords::{default_keywords, validate_keyword, KeywordFilter};
use crate::license::{LicenseFilter, LicenseGroups};
use crate::loader::{AtomEntry, ConfigLoader, UserConfig};
use crate::mask::{generate_filter, MaskSet};
use crate::profile::Profile;
use crate::repos::parse_repos_conf;
use crate::repository::{
    ConfigureArg, Configurable, DomainContext, FilteredRepository, InMemoryRepository, PackageRepository,
    RawRepository,
};
use crate::restriction::Restriction;
use crate::settings::{Settings, UserEnv};
use crate::use_flags::{UseResolver, UseState};
use crate::{ConfigError, Package, Result};
use indexmap::IndexSet;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a domain is built from
pub struct DomainConfig {
    pub profile: Profile,
    pub user: UserConfig,
    /// Root the user configuration was read from
    pub config_root: PathBuf,
    /// Installable repositories, in configuration order
    pub repos: Vec<Arc<dyn RawRepository>>,
    /// Installed-package databases
    pub vdb: Vec<Arc<dyn RawRepository>>,
}

impl DomainConfig {
    /// Load profile, user configuration and repos.conf repositories from disk
    pub fn load(profile: &Path, config_root: &Path) -> Result<Self> {
        let profile = Profile::load(profile)?;
        let user = ConfigLoader::new(config_root)
            .scope(profile.default_env().vars().clone())
            .load()?;

        let mut repos: Vec<Arc<dyn RawRepository>> = Vec::new();
        if let Some(ref repos_conf) = user.repos_conf {
            for repo in parse_repos_conf(repos_conf)?.repos.values() {
                repos.push(Arc::new(repo.open()?));
            }
        }

        Ok(Self {
            profile,
            user,
            config_root: config_root.to_path_buf(),
            repos,
            vdb: Vec::new(),
        })
    }

    /// Add an index repository of installed packages
    pub fn with_vdb(mut self, id: impl Into<String>, location: &Path) -> Result<Self> {
        self.vdb.push(Arc::new(InMemoryRepository::load(id, location)?));
        Ok(self)
    }

    pub fn with_repo(mut self, repo: Arc<dyn RawRepository>) -> Self {
        self.repos.push(repo);
        self
    }
}

/// Supply a repository's configurables in declaration order
fn configure_args<'a>(
    raw: &dyn RawRepository,
    ctx: DomainContext<'a>,
    settings: &'a Settings,
    profile: &'a Profile,
) -> Result<Vec<ConfigureArg<'a>>> {
    raw.configurables()
        .iter()
        .map(|configurable| match configurable {
            Configurable::Domain => Ok(ConfigureArg::Domain(ctx)),
            Configurable::Settings => Ok(ConfigureArg::Settings(settings)),
            Configurable::Profile => Ok(ConfigureArg::Profile(profile)),
            Configurable::Setting(name) => settings.get(name).map(ConfigureArg::Setting).ok_or_else(|| {
                ConfigError::failure(format!(
                    "repository {} requires {}, which the domain cannot supply",
                    raw.repo_id(),
                    configurable
                ))
            }),
        })
        .collect()
}

/// Resolved visibility and USE configuration
#[derive(Debug)]
pub struct Domain {
    settings: Settings,
    profile: Profile,
    config_root: PathBuf,
    stable_arch: String,
    unstable_arch: String,
    default_keywords: IndexSet<String>,
    use_resolver: Arc<UseResolver>,
    package_env: Vec<AtomEntry>,
    env_dir: Option<PathBuf>,
    repos: Vec<FilteredRepository>,
    vdb: Vec<Arc<dyn PackageRepository>>,
}

impl Domain {
    /// Load everything from disk and build the domain
    pub fn load(profile: &Path, config_root: &Path) -> Result<Self> {
        Self::new(DomainConfig::load(profile, config_root)?)
    }

    pub fn new(config: DomainConfig) -> Result<Self> {
        let DomainConfig {
            profile,
            user,
            config_root,
            repos: raw_repos,
            vdb: raw_vdb,
        } = config;

        let user_env = UserEnv::new(user.make_conf.clone(), profile.default_env());
        let settings = Settings::build(profile.default_env(), &user_env)?;

        let default_keywords = default_keywords(&settings)?;
        let stable_arch = settings.arch().to_string();
        let unstable_arch = format!("~{}", stable_arch);
        let stable = !default_keywords.contains(&unstable_arch);

        for var in &user.package_use_expand_vars {
            if !settings.use_expand().contains(var) {
                warn!("package.use references unknown USE_EXPAND variable {}", var);
            }
        }

        let keywords = Self::keyword_filter(&profile, &user, &default_keywords, stable, &unstable_arch)?;

        let use_resolver = Arc::new(UseResolver::new(&settings, &default_keywords, &profile, &user.package_use));

        let default_groups = LicenseGroups::builtin();
        let mut license = LicenseFilter::new(settings.stack("ACCEPT_LICENSE").to_vec(), Arc::new(default_groups.clone()))
            .with_use_resolver(use_resolver.clone());
        for entry in &user.package_license {
            license.add_package_license(entry.restriction.clone(), entry.values.clone());
        }
        for raw in &raw_repos {
            if let Some(groups) = raw.license_groups() {
                license.set_repo_groups(raw.repo_id(), Arc::new(default_groups.merged(&groups)));
            }
        }


        let ctx = DomainContext {
            arch: &stable_arch,
            default_keywords: &default_keywords,
            config_root: &config_root,
        };
        let visibility = vec![keywords.into_restriction(), license.into_restriction()];

        let by_id: HashMap<&str, &Arc<dyn RawRepository>> =
            raw_repos.iter().map(|r| (r.repo_id(), r)).collect();

        let mut repos = Vec::with_capacity(raw_repos.len());
        for raw in &raw_repos {
            let configured = raw.configure(&configure_args(raw.as_ref(), ctx, &settings, &profile)?)?;

            let (mut masks, mut unmasks) = raw.visibility_limiters();
            if let Some(masters) = raw.masters() {
                for master in masters {
                    let master_repo = by_id.get(master.as_str()).ok_or_else(|| {
                        ConfigError::failure(format!("repository {} has unknown master {}", raw.repo_id(), master))
                    })?;
                    let (master_masks, master_unmasks) = master_repo.visibility_limiters();
                    masks.extend(master_masks);
                    unmasks.extend(master_unmasks);
                }
            }
            masks.extend(profile.incremental_masks().iter().map(|m| m.restriction.clone()));
            masks.extend(user.package_mask.iter().map(|m| m.restriction.clone()));
            unmasks.extend(profile.incremental_unmasks().iter().map(|m| m.restriction.clone()));
            unmasks.extend(user.package_unmask.iter().map(|m| m.restriction.clone()));

            debug!(
                "repository {}: {} masks, {} unmasks",
                raw.repo_id(),
                masks.len(),
                unmasks.len()
            );

            let filter = generate_filter(
                masks.into_iter().collect::<MaskSet>(),
                unmasks.into_iter().collect::<MaskSet>(),
                visibility.clone(),
            );
            repos.push(FilteredRepository::new(configured, filter));
        }

        let mut vdb = Vec::with_capacity(raw_vdb.len() + 1);
        for raw in &raw_vdb {
            vdb.push(raw.configure(&configure_args(raw.as_ref(), ctx, &settings, &profile)?)?);
        }
        if let Some(provided) = profile.provides_repo() {
            vdb.push(Arc::new(provided) as Arc<dyn PackageRepository>);
        }

        info!(
            "domain built for {} ({} repos, {} vdb)",
            stable_arch,
            repos.len(),
            vdb.len()
        );

        Ok(Self {
            package_env: user.package_env,
            env_dir: user.env_dir,
            settings,
            profile,
            config_root,
            stable_arch,
            unstable_arch,
            default_keywords,
            use_resolver,
            repos,
            vdb,
        })
    }

    fn keyword_filter(
        profile: &Profile,
        user: &UserConfig,
        defaults: &IndexSet<String>,
        stable: bool,
        unstable_arch: &str,
    ) -> Result<KeywordFilter> {
        let mut filter = KeywordFilter::new(defaults.clone());

        for entry in profile.accept_keywords().iter().chain(&user.package_accept_keywords) {
            let values: Vec<String> = if !entry.values.is_empty() {
                entry.values.clone()
            } else if stable {
                vec![unstable_arch.to_string()]
            } else {
                defaults.iter().cloned().collect()
            };
            for value in &values {
                validate_keyword(value)?;
            }
            filter.add_accept(entry.restriction.clone(), &values);
        }

        for entry in profile.keywords().iter().chain(&user.package_keywords) {
            for value in &entry.values {
                validate_keyword(value)?;
            }
            filter.add_override(entry.restriction.clone(), entry.values.clone());
        }

        Ok(filter)
    }

    /// Filtered installable repositories, in configuration order
    pub fn repos(&self) -> &[FilteredRepository] {
        &self.repos
    }

    /// Installed-package repositories, never mask-filtered
    pub fn vdb(&self) -> &[Arc<dyn PackageRepository>] {
        &self.vdb
    }

    pub fn repo(&self, repo_id: &str) -> Option<&FilteredRepository> {
        self.repos.iter().find(|r| r.repo_id() == repo_id)
    }

    /// The composed visibility restriction of a repository
    pub fn visibility_filter(&self, repo_id: &str) -> Option<&Restriction> {
        self.repo(repo_id).map(FilteredRepository::filter)
    }

    /// Whether `pkg` is visible through the named repository
    pub fn is_visible(&self, repo_id: &str, pkg: &Package) -> bool {
        self.repo(repo_id).is_some_and(|r| r.is_visible(pkg))
    }

    /// Resolved global USE
    pub fn use_flags(&self) -> IndexSet<String> {
        self.settings.global_use()
    }

    /// Resolve `(immutable, enabled, disabled)` USE for a package
    pub fn get_package_use_unconfigured(&self, pkg: &Package, for_metadata: bool) -> UseState {
        self.use_resolver.resolve(pkg, for_metadata)
    }

    /// USE applied at build time but invisible to metadata
    pub fn get_package_use_buildable(&self, pkg: &Package) -> BTreeSet<String> {
        self.use_resolver.buildable(pkg)
    }

    /// Bashrc sources for a package, computed lazily
    pub fn get_package_bashrcs<'a>(&'a self, pkg: &'a Package) -> Bashrcs<'a> {
        Bashrcs::new(pkg, self.profile.bashrcs(), &self.package_env, self.env_dir.as_deref())
    }

    pub fn arch(&self) -> &str {
        &self.stable_arch
    }

    pub fn stable_arch(&self) -> &str {
        &self.stable_arch
    }

    pub fn unstable_arch(&self) -> &str {
        &self.unstable_arch
    }

    pub fn default_keywords(&self) -> &IndexSet<String> {
        &self.default_keywords
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn config_root(&self) -> &Path {
        &self.config_root
    }
}
