//! Profile stacks
//!
//! Implements Gentoo-style profiles:
//! - profile inheritance through `parent` files
//! - cascading make.defaults, masks and USE tables
//! - stable-only USE force/mask tables
//! - package.provided and profile.bashrc

use crate::chunked::{ChunkedDataDict, Delta};
use crate::incremental::expand_incremental;
use crate::loader::{parse_atom_entries, read_lines_if_exists, AtomEntry, Line};
use crate::mask::{apply_incremental_masks, MaskEntry};
use crate::repository::InMemoryRepository;
use crate::settings::{load_assignments, ProfileEnv};
use crate::{ConfigError, Package, Result};
use indexmap::IndexSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Repository id given to packages listed in package.provided
pub const PROVIDED_REPO_ID: &str = "package.provided";

fn flat_tokens(lines: &[Line]) -> Vec<String> {
    lines.iter().flat_map(|l| l.tokens.iter().cloned()).collect()
}

/// A single profile directory
#[derive(Debug, Clone, Default)]
pub struct ProfileNode {
    pub path: PathBuf,
    /// Parent entries as written, relative to this node
    pub parents: Vec<String>,
    pub eapi: Option<String>,
    pub deprecated: Option<String>,
    pub make_defaults: Option<PathBuf>,
    pub package_mask: Vec<Line>,
    pub package_unmask: Vec<Line>,
    pub use_force: Vec<String>,
    pub use_mask: Vec<String>,
    pub use_stable_force: Vec<String>,
    pub use_stable_mask: Vec<String>,
    pub package_use: Vec<AtomEntry>,
    pub package_use_force: Vec<AtomEntry>,
    pub package_use_mask: Vec<AtomEntry>,
    pub package_use_stable_force: Vec<AtomEntry>,
    pub package_use_stable_mask: Vec<AtomEntry>,
    pub package_accept_keywords: Vec<AtomEntry>,
    pub package_keywords: Vec<AtomEntry>,
    pub package_provided: Vec<Package>,
    pub bashrc: Option<PathBuf>,
}

impl ProfileNode {
    /// Load profile node from a directory
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(ConfigError::ProfileNotFound(path.display().to_string()));
        }
        debug!("loading profile node {}", path.display());

        let mut node = Self {
            path: path.to_path_buf(),
            ..Default::default()
        };

        node.parents = flat_tokens(&read_lines_if_exists(&path.join("parent"))?);

        let eapi = path.join("eapi");
        if eapi.is_file() {
            node.eapi = Some(std::fs::read_to_string(eapi)?.trim().to_string());
        }
        let deprecated = path.join("deprecated");
        if deprecated.is_file() {
            let message = std::fs::read_to_string(deprecated)?;
            warn!("profile {} is deprecated: {}", path.display(), message.trim());
            node.deprecated = Some(message);
        }

        let make_defaults = path.join("make.defaults");
        if make_defaults.is_file() {
            node.make_defaults = Some(make_defaults);
        }

        node.package_mask = read_lines_if_exists(&path.join("package.mask"))?;
        node.package_unmask = read_lines_if_exists(&path.join("package.unmask"))?;

        node.use_force = flat_tokens(&read_lines_if_exists(&path.join("use.force"))?);
        node.use_mask = flat_tokens(&read_lines_if_exists(&path.join("use.mask"))?);
        node.use_stable_force = flat_tokens(&read_lines_if_exists(&path.join("use.stable.force"))?);
        node.use_stable_mask = flat_tokens(&read_lines_if_exists(&path.join("use.stable.mask"))?);

        let entries = |name: &str| -> Result<Vec<AtomEntry>> {
            parse_atom_entries(&read_lines_if_exists(&path.join(name))?)
        };
        node.package_use = entries("package.use")?;
        node.package_use_force = entries("package.use.force")?;
        node.package_use_mask = entries("package.use.mask")?;
        node.package_use_stable_force = entries("package.use.stable.force")?;
        node.package_use_stable_mask = entries("package.use.stable.mask")?;
        node.package_accept_keywords = entries("package.accept_keywords")?;
        node.package_keywords = entries("package.keywords")?;

        for line in read_lines_if_exists(&path.join("package.provided"))? {
            for cpv in &line.tokens {
                let pkg = Package::parse(cpv).map_err(|e| line.error(e))?;
                node.package_provided.push(pkg.with_repo(PROVIDED_REPO_ID));
            }
        }

        let bashrc = path.join("profile.bashrc");
        if bashrc.is_file() {
            node.bashrc = Some(bashrc);
        }

        Ok(node)
    }
}

/// A resolved profile stack
#[derive(Debug, Clone, Default)]
pub struct Profile {
    path: PathBuf,
    nodes: Vec<PathBuf>,
    default_env: ProfileEnv,
    use_expand: IndexSet<String>,
    pkg_use: ChunkedDataDict,
    forced_use: ChunkedDataDict,
    stable_forced_use: ChunkedDataDict,
    masked_use: ChunkedDataDict,
    stable_masked_use: ChunkedDataDict,
    accept_keywords: Vec<AtomEntry>,
    keywords: Vec<AtomEntry>,
    masks: Vec<MaskEntry>,
    unmasks: Vec<MaskEntry>,
    provided: Vec<Package>,
    bashrcs: Vec<PathBuf>,
}

fn collect_nodes(path: &Path, chain: &mut Vec<PathBuf>, nodes: &mut Vec<ProfileNode>) -> Result<()> {
    if chain.iter().any(|p| p == path) {
        let cycle: Vec<String> = chain
            .iter()
            .chain(std::iter::once(&path.to_path_buf()))
            .map(|p| p.display().to_string())
            .collect();
        return Err(ConfigError::CircularProfile(cycle.join(" -> ")));
    }

    chain.push(path.to_path_buf());
    let node = ProfileNode::load(path)?;
    for parent in &node.parents {
        let joined = path.join(parent);
        let resolved = joined
            .canonicalize()
            .map_err(|_| ConfigError::ProfileNotFound(joined.display().to_string()))?;
        collect_nodes(&resolved, chain, nodes)?;
    }
    chain.pop();

    nodes.push(node);
    Ok(())
}

/// Fold bare and per-package tokens into a chunked table
fn add_use_table(table: &mut ChunkedDataDict, bare: &[String], per_package: &[AtomEntry]) {
    table.add_bare_global(Delta::from_tokens(bare));
    for entry in per_package {
        table.add(entry.restriction.clone(), Delta::from_tokens(&entry.values));
    }
}

impl Profile {
    /// Load profile from path, following parent links
    pub fn load(path: &Path) -> Result<Self> {
        let root = path
            .canonicalize()
            .map_err(|_| ConfigError::ProfileNotFound(path.display().to_string()))?;

        let mut nodes = Vec::new();
        collect_nodes(&root, &mut Vec::new(), &mut nodes)?;
        let profile = Self::from_nodes(root, nodes)?;

        info!(
            "loaded profile {} ({} nodes)",
            profile.path.display(),
            profile.nodes.len()
        );
        Ok(profile)
    }

    /// Combine nodes ordered parent first
    pub fn from_nodes(path: PathBuf, nodes: Vec<ProfileNode>) -> Result<Self> {
        let mut profile = Self {
            path,
            ..Default::default()
        };

        for node in &nodes {
            if let Some(ref make_defaults) = node.make_defaults {
                let vars = load_assignments(make_defaults, profile.default_env.vars())?;
                profile.default_env.stack(vars);
            }

            add_use_table(&mut profile.pkg_use, &[], &node.package_use);
            add_use_table(&mut profile.forced_use, &node.use_force, &node.package_use_force);
            add_use_table(&mut profile.masked_use, &node.use_mask, &node.package_use_mask);

            add_use_table(&mut profile.stable_forced_use, &node.use_force, &node.package_use_force);
            add_use_table(
                &mut profile.stable_forced_use,
                &node.use_stable_force,
                &node.package_use_stable_force,
            );
            add_use_table(&mut profile.stable_masked_use, &node.use_mask, &node.package_use_mask);
            add_use_table(
                &mut profile.stable_masked_use,
                &node.use_stable_mask,
                &node.package_use_stable_mask,
            );

            profile.accept_keywords.extend(node.package_accept_keywords.iter().cloned());
            profile.keywords.extend(node.package_keywords.iter().cloned());

            apply_incremental_masks(&mut profile.masks, &node.package_mask)?;
            apply_incremental_masks(&mut profile.unmasks, &node.package_unmask)?;

            profile.provided.extend(node.package_provided.iter().cloned());
            profile.bashrcs.extend(node.bashrc.iter().cloned());
            profile.nodes.push(node.path.clone());
        }

        profile.use_expand = expand_incremental(
            profile
                .default_env
                .get("USE_EXPAND")
                .unwrap_or("")
                .split_whitespace(),
        );

        Ok(profile)
    }

    /// Get the profile path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Node directories, parents first
    pub fn nodes(&self) -> &[PathBuf] {
        &self.nodes
    }

    pub fn default_env(&self) -> &ProfileEnv {
        &self.default_env
    }

    pub fn use_expand(&self) -> &IndexSet<String> {
        &self.use_expand
    }

    pub fn pkg_use(&self) -> &ChunkedDataDict {
        &self.pkg_use
    }

    pub fn forced_use(&self) -> &ChunkedDataDict {
        &self.forced_use
    }

    pub fn stable_forced_use(&self) -> &ChunkedDataDict {
        &self.stable_forced_use
    }

    pub fn masked_use(&self) -> &ChunkedDataDict {
        &self.masked_use
    }

    pub fn stable_masked_use(&self) -> &ChunkedDataDict {
        &self.stable_masked_use
    }

    pub(crate) fn default_env_mut(&mut self) -> &mut ProfileEnv {
        &mut self.default_env
    }

    pub(crate) fn masked_use_mut(&mut self) -> &mut ChunkedDataDict {
        &mut self.masked_use
    }

    pub(crate) fn stable_masked_use_mut(&mut self) -> &mut ChunkedDataDict {
        &mut self.stable_masked_use
    }

    /// package.accept_keywords entries of the whole stack
    pub fn accept_keywords(&self) -> &[AtomEntry] {
        &self.accept_keywords
    }

    /// package.keywords entries of the whole stack
    pub fn keywords(&self) -> &[AtomEntry] {
        &self.keywords
    }

    /// Masks left after child nodes dropped inherited ones
    pub fn incremental_masks(&self) -> &[MaskEntry] {
        &self.masks
    }

    pub fn incremental_unmasks(&self) -> &[MaskEntry] {
        &self.unmasks
    }

    /// Packages the profile declares as provided
    pub fn provides_repo(&self) -> Option<InMemoryRepository> {
        if self.provided.is_empty() {
            return None;
        }
        Some(InMemoryRepository::new(PROVIDED_REPO_ID, self.provided.clone()))
    }

    /// profile.bashrc files, parents first
    pub fn bashrcs(&self) -> &[PathBuf] {
        &self.bashrcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::PackageRepository;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn stack() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("base");
        let child = tmp.path().join("child");

        write(&base, "make.defaults", "ARCH=amd64\nUSE=\"a b\"\nUSE_EXPAND=VIDEO_CARDS\n");
        write(&base, "package.mask", "cat/one\ncat/two\n");
        write(&base, "use.mask", "m1\n");
        write(&base, "use.stable.mask", "s1\n");
        write(&base, "use.force", "f1\n");
        write(&base, "profile.bashrc", "true\n");

        write(&child, "parent", "../base\n");
        write(&child, "make.defaults", "USE=\"-a c\"\nCHOST=\"x86_64-pc-linux-gnu\"\n");
        write(&child, "package.mask", "-cat/one\ncat/three\n");
        write(&child, "use.mask", "-m1\nm2\n");
        write(&child, "package.use", "cat/pkg x -y\n");
        write(&child, "package.provided", "virtual/libc-1\n");
        tmp
    }

    #[test]
    fn test_profile_stacking() {
        let tmp = stack();
        let profile = Profile::load(&tmp.path().join("child")).unwrap();

        assert_eq!(profile.nodes().len(), 2);
        assert_eq!(profile.default_env().get("USE"), Some("a b -a c"));
        assert_eq!(profile.default_env().get("ARCH"), Some("amd64"));
        assert!(profile.use_expand().contains("VIDEO_CARDS"));

        let masks: Vec<&str> = profile.incremental_masks().iter().map(|m| m.atom.as_str()).collect();
        assert_eq!(masks, vec!["cat/two", "cat/three"]);
        assert_eq!(profile.bashrcs().len(), 1);
    }

    #[test]
    fn test_use_tables() {
        let tmp = stack();
        let profile = Profile::load(&tmp.path().join("child")).unwrap();
        let pkg = Package::parse("cat/pkg-1").unwrap();

        assert_eq!(profile.masked_use().pull_data(&pkg, Vec::<String>::new()), set(&["m2"]));
        assert_eq!(
            profile.stable_masked_use().pull_data(&pkg, Vec::<String>::new()),
            set(&["m2", "s1"])
        );
        assert_eq!(profile.forced_use().pull_data(&pkg, Vec::<String>::new()), set(&["f1"]));
        assert_eq!(profile.pkg_use().pull_data(&pkg, ["y"]), set(&["x"]));
    }

    #[test]
    fn test_provided() {
        let tmp = stack();
        let profile = Profile::load(&tmp.path().join("child")).unwrap();
        let repo = profile.provides_repo().unwrap();
        assert_eq!(repo.repo_id(), PROVIDED_REPO_ID);
        assert_eq!(repo.packages().count(), 1);
    }

    #[test]
    fn test_missing_profile_and_parent() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            Profile::load(&tmp.path().join("nope")),
            Err(ConfigError::ProfileNotFound(_))
        ));

        write(&tmp.path().join("orphan"), "parent", "../missing\n");
        assert!(matches!(
            Profile::load(&tmp.path().join("orphan")),
            Err(ConfigError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_circular_profile() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("a"), "parent", "../b\n");
        write(&tmp.path().join("b"), "parent", "../a\n");
        assert!(matches!(
            Profile::load(&tmp.path().join("a")),
            Err(ConfigError::CircularProfile(_))
        ));
    }

    #[test]
    fn test_diamond_is_not_circular() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("base"), "make.defaults", "ARCH=amd64\n");
        write(&tmp.path().join("left"), "parent", "../base\n");
        write(&tmp.path().join("right"), "parent", "../base\n");
        write(&tmp.path().join("top"), "parent", "../left\n../right\n");

        let profile = Profile::load(&tmp.path().join("top")).unwrap();
        assert_eq!(profile.nodes().len(), 5);
    }
}
