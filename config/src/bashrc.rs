//! Build environment sources for a package
//!
//! Sources come in three groups: every profile.bashrc, then the env files
//! package.env maps onto the package, then per-package hook files under the
//! user's `env/` directory.

use crate::loader::AtomEntry;
use crate::Package;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where a bashrc source came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "kebab-case")]
pub enum BashrcSource {
    Profile(PathBuf),
    PackageEnv(PathBuf),
    Hook(PathBuf),
}

impl BashrcSource {
    pub fn path(&self) -> &Path {
        match self {
            BashrcSource::Profile(p) | BashrcSource::PackageEnv(p) | BashrcSource::Hook(p) => p,
        }
    }
}

const NO_FILES: &[String] = &[];

/// Hook file names under `env/<category>/`, least specific first
///
/// Without a revision `p` and `pf` coincide and the name is listed once.
fn hook_names(pkg: &Package) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(4);
    for name in [
        pkg.name.clone(),
        format!("{}:{}", pkg.name, pkg.slot),
        pkg.p(),
        pkg.pf(),
    ] {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Lazy sequence of bashrc sources
///
/// Cloning restarts from the clone point, and nothing is read from disk
/// until the hook stage is reached.
#[derive(Debug, Clone)]
pub struct Bashrcs<'a> {
    pkg: &'a Package,
    profile: std::slice::Iter<'a, PathBuf>,
    entries: std::slice::Iter<'a, AtomEntry>,
    files: std::slice::Iter<'a, String>,
    env_dir: Option<&'a Path>,
    hook: usize,
}

impl<'a> Bashrcs<'a> {
    pub fn new(
        pkg: &'a Package,
        profile_bashrcs: &'a [PathBuf],
        package_env: &'a [AtomEntry],
        env_dir: Option<&'a Path>,
    ) -> Self {
        Self {
            pkg,
            profile: profile_bashrcs.iter(),
            entries: package_env.iter(),
            files: NO_FILES.iter(),
            env_dir,
            hook: 0,
        }
    }
}

impl Iterator for Bashrcs<'_> {
    type Item = BashrcSource;

    fn next(&mut self) -> Option<BashrcSource> {
        if let Some(path) = self.profile.next() {
            return Some(BashrcSource::Profile(path.clone()));
        }

        loop {
            if let Some(file) = self.files.next() {
                return Some(BashrcSource::PackageEnv(PathBuf::from(file)));
            }
            match self.entries.next() {
                Some(entry) if entry.restriction.matches(self.pkg) => self.files = entry.values.iter(),
                Some(_) => {}
                None => break,
            }
        }

        let env_dir = self.env_dir?;
        let names = hook_names(self.pkg);
        while self.hook < names.len() {
            let path = env_dir.join(&self.pkg.category).join(&names[self.hook]);
            self.hook += 1;
            if path.is_file() {
                return Some(BashrcSource::Hook(path));
            }
        }
        None
    }
}
