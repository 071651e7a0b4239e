//! USE flag resolution
//!
//! Combines profile forced/masked USE, IUSE defaults, the global USE stack
//! and package.use into the final per-package flag sets.

use crate::chunked::{ChunkedDataDict, Delta};
use crate::loader::AtomEntry;
use crate::profile::Profile;
use crate::settings::Settings;
use crate::Package;
use indexmap::IndexSet;
use serde::Serialize;
use std::collections::BTreeSet;

/// Resolved USE of one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UseState {
    /// Forced flags, which cannot be turned off
    pub immutable: BTreeSet<String>,
    pub enabled: BTreeSet<String>,
    /// Masked flags, which cannot be turned on
    pub disabled: BTreeSet<String>,
}

/// Per-package USE resolver
#[derive(Debug, Clone)]
pub struct UseResolver {
    arch: String,
    unstable_accepted: bool,
    /// `lower(VAR)_` prefix of every USE_EXPAND variable, with whether VAR is set globally
    expand_prefixes: Vec<(String, bool)>,
    enabled: ChunkedDataDict,
    forced: ChunkedDataDict,
    stable_forced: ChunkedDataDict,
    masked: ChunkedDataDict,
    stable_masked: ChunkedDataDict,
}

impl UseResolver {
    /// Build the resolver from settings, profile and user package.use
    pub fn new(
        settings: &Settings,
        default_keywords: &IndexSet<String>,
        profile: &Profile,
        package_use: &[AtomEntry],
    ) -> Self {
        let arch = settings.arch().to_string();
        let unstable_accepted = default_keywords.contains(&format!("~{}", arch));

        let expand_prefixes = settings
            .use_expand()
            .iter()
            .map(|var| {
                let set = settings.get(var).is_some_and(|v| !v.trim().is_empty());
                (format!("{}_", var.to_lowercase()), set)
            })
            .collect::<Vec<_>>();

        let mut enabled = ChunkedDataDict::new();
        enabled.add_bare_global(Delta::from_tokens(settings.use_tokens()));
        enabled.merge(profile.pkg_use());
        for entry in package_use {
            enabled.add(entry.restriction.clone(), Delta::from_tokens(&entry.values));
        }

        Self {
            arch,
            unstable_accepted,
            expand_prefixes,
            enabled,
            forced: profile.forced_use().clone(),
            stable_forced: profile.stable_forced_use().clone(),
            masked: profile.masked_use().clone(),
            stable_masked: profile.stable_masked_use().clone(),
        }
    }

    /// IUSE defaults, dropping USE_EXPAND defaults whose variable is set globally
    fn iuse_defaults<'a>(&self, pkg: &'a Package) -> Vec<&'a str> {
        pkg.iuse_defaults()
            .filter(|flag| {
                !self
                    .expand_prefixes
                    .iter()
                    .any(|(prefix, set)| *set && flag.starts_with(prefix.as_str()))
            })
            .collect()
    }

    fn is_stable(&self, pkg: &Package) -> bool {
        !self.unstable_accepted && pkg.keywords.iter().any(|k| *k == self.arch)
    }

    /// Resolve `(immutable, enabled, disabled)` for a package
    ///
    /// In metadata mode `enabled` is limited to IUSE, forced flags are added
    /// and masked flags removed.
    pub fn resolve(&self, pkg: &Package, for_metadata: bool) -> UseState {
        let (masked, forced) = if self.is_stable(pkg) {
            (&self.stable_masked, &self.stable_forced)
        } else {
            (&self.masked, &self.forced)
        };

        let disabled = masked.pull_data(pkg, Vec::<String>::new());
        let mut immutable = forced.pull_data(pkg, Vec::<String>::new());
        immutable.insert(self.arch.clone());

        let mut enabled = self.enabled.pull_data(pkg, self.iuse_defaults(pkg));

        // USE_EXPAND globs such as `video_cards_*`
        let globs: Vec<String> = enabled.iter().filter(|f| f.ends_with('*')).cloned().collect();
        for glob in globs {
            enabled.remove(&glob);
            let prefix = &glob[..glob.len() - 1];
            enabled.extend(
                pkg.iuse_stripped()
                    .filter(|f| f.starts_with(prefix))
                    .map(str::to_string),
            );
        }

        if for_metadata {
            let iuse: BTreeSet<&str> = pkg.iuse_stripped().collect();
            enabled.retain(|f| iuse.contains(f.as_str()));
            enabled.extend(immutable.iter().cloned());
            for flag in &disabled {
                enabled.remove(flag);
            }
        }

        UseState {
            immutable,
            enabled,
            disabled,
        }
    }

    /// Flags applied at build time but invisible to metadata, plus recorded USE
    pub fn buildable(&self, pkg: &Package) -> BTreeSet<String> {
        let metadata = self.resolve(pkg, true).enabled;
        let raw = self.resolve(pkg, false).enabled;
        let mut out: BTreeSet<String> = raw.difference(&metadata).cloned().collect();
        out.extend(pkg.use_flags.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restriction::Restriction;
    use crate::settings::{parse_assignments, ProfileEnv, UserEnv};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn resolver(make_defaults: &str, profile: Profile, package_use: &[(&str, &str)]) -> UseResolver {
        let mut env = ProfileEnv::new();
        env.stack(parse_assignments(make_defaults, Path::new("make.defaults"), &IndexMap::new()).unwrap());
        let settings = Settings::build(&env, &UserEnv::default()).unwrap();
        let keywords = crate::keywords::default_keywords(&settings).unwrap();
        let entries: Vec<AtomEntry> = package_use
            .iter()
            .map(|(atom, flags)| AtomEntry {
                restriction: Restriction::parse(atom).unwrap(),
                values: flags.split_whitespace().map(str::to_string).collect(),
            })
            .collect();
        UseResolver::new(&settings, &keywords, &profile, &entries)
    }

    fn pkg(iuse: &[&str]) -> Package {
        Package::parse("app-misc/foo-1.0")
            .unwrap()
            .with_iuse(iuse.iter().copied())
            .with_keywords(["amd64"])
    }

    #[test]
    fn test_iuse_default_enabled() {
        let r = resolver("ARCH=amd64\nACCEPT_KEYWORDS=amd64", Profile::default(), &[]);
        let state = r.resolve(&pkg(&["+foo", "bar"]), true);
        assert_eq!(state.enabled, set(&["amd64", "foo"]));
        assert_eq!(state.immutable, set(&["amd64"]));
    }

    #[test]
    fn test_masked_beats_package_use() {
        let mut profile = Profile::default();
        profile.masked_use_mut().add_bare_global(Delta::from_tokens(["foo"]));
        let r = resolver("ARCH=amd64\nACCEPT_KEYWORDS=~amd64", profile, &[("app-misc/foo", "foo")]);

        let state = r.resolve(&pkg(&["foo"]), true);
        assert!(!state.enabled.contains("foo"));
        assert!(state.disabled.contains("foo"));
    }

    #[test]
    fn test_stable_tables() {
        let mut profile = Profile::default();
        profile.masked_use_mut().add_bare_global(Delta::from_tokens(["general"]));
        profile.stable_masked_use_mut().add_bare_global(Delta::from_tokens(["stable"]));

        let stable = resolver("ARCH=amd64\nACCEPT_KEYWORDS=amd64", profile.clone(), &[]);
        assert_eq!(stable.resolve(&pkg(&[]), true).disabled, set(&["stable"]));
        // a package without the stable keyword uses the general tables
        let testing = Package::parse("app-misc/foo-1.0").unwrap().with_keywords(["~amd64"]);
        assert_eq!(stable.resolve(&testing, true).disabled, set(&["general"]));

        let unstable = resolver("ARCH=amd64\nACCEPT_KEYWORDS=~amd64", profile, &[]);
        assert_eq!(unstable.resolve(&pkg(&[]), true).disabled, set(&["general"]));
    }

    #[test]
    fn test_use_expand_defaults() {
        let base = "ARCH=amd64\nACCEPT_KEYWORDS=amd64\nUSE_EXPAND=\"VIDEO_CARDS PYTHON_TARGETS\"";
        let iuse = ["+video_cards_intel", "+python_targets_py3", "video_cards_radeon"];

        // nothing set globally: defaults survive
        let r = resolver(base, Profile::default(), &[]);
        assert_eq!(
            r.resolve(&pkg(&iuse), true).enabled,
            set(&["amd64", "python_targets_py3", "video_cards_intel"])
        );

        // VIDEO_CARDS set globally: only its defaults are suppressed
        let r = resolver(&format!("{}\nVIDEO_CARDS=radeon", base), Profile::default(), &[]);
        assert_eq!(
            r.resolve(&pkg(&iuse), true).enabled,
            set(&["amd64", "python_targets_py3", "video_cards_radeon"])
        );

        // package.use folds on top of surviving defaults
        let r = resolver(base, Profile::default(), &[("app-misc/foo", "-video_cards_intel")]);
        assert_eq!(r.resolve(&pkg(&iuse), true).enabled, set(&["amd64", "python_targets_py3"]));
    }

    #[test]
    fn test_use_expand_globs() {
        let r = resolver(
            "ARCH=amd64\nACCEPT_KEYWORDS=amd64",
            Profile::default(),
            &[("app-misc/foo", "video_cards_*")],
        );
        let state = r.resolve(&pkg(&["video_cards_intel", "video_cards_radeon", "doc"]), false);
        assert_eq!(state.enabled, set(&["video_cards_intel", "video_cards_radeon"]));
    }

    #[test]
    fn test_buildable() {
        let r = resolver("ARCH=amd64\nACCEPT_KEYWORDS=amd64\nUSE=\"hidden doc\"", Profile::default(), &[]);
        let p = pkg(&["doc"]).with_use(["recorded"]);
        assert_eq!(r.buildable(&p), set(&["hidden", "recorded"]));
    }
}
