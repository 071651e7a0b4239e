//! Configuration loading utilities
//!
//! Reads the line-oriented `package.*` files (single files or directories of
//! files) and assembles the user configuration found under a config root.

use crate::mask::{parse_mask_entries, MaskEntry};
use crate::restriction::Restriction;
use crate::settings::load_assignments;
use crate::{ConfigError, Result};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One non-comment line of a config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub path: PathBuf,
    pub number: usize,
    pub tokens: Vec<String>,
    /// The comment block directly above the line
    pub comments: Vec<String>,
}

impl Line {
    /// Attach this line's location to an error
    pub fn error(&self, err: ConfigError) -> ConfigError {
        err.at(&self.path, self.number)
    }

    /// Parse the first token as an atom and return it with the remaining tokens
    pub fn atom_entry(&self) -> Result<AtomEntry> {
        let (first, rest) = self
            .tokens
            .split_first()
            .ok_or_else(|| self.error(ConfigError::failure("empty line")))?;
        let restriction = Restriction::parse(first).map_err(|e| self.error(e))?;
        Ok(AtomEntry {
            restriction,
            values: rest.to_vec(),
        })
    }
}

/// An atom followed by values (flags, keywords, licenses, env files)
#[derive(Debug, Clone)]
pub struct AtomEntry {
    pub restriction: Restriction,
    pub values: Vec<String>,
}

fn parse_lines(content: &str, path: &Path) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut comments = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            comments.clear();
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            comments.push(comment.trim().to_string());
            continue;
        }

        let body = trimmed.split('#').next().unwrap_or("");
        lines.push(Line {
            path: path.to_path_buf(),
            number: idx + 1,
            tokens: body.split_whitespace().map(str::to_string).collect(),
            comments: std::mem::take(&mut comments),
        });
    }

    lines
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Read a line file, or every file of a directory in sorted order
///
/// Hidden files are skipped. A missing path is a [`ConfigError::MissingFile`].
pub fn read_lines(path: &Path) -> Result<Vec<Line>> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }

    if path.is_dir() {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry_path = entry?.path();
            if !is_hidden(&entry_path) {
                entries.push(entry_path);
            }
        }
        entries.sort();

        let mut lines = Vec::new();
        for entry in entries {
            lines.extend(read_lines(&entry)?);
        }
        return Ok(lines);
    }

    debug!("reading {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Ok(parse_lines(&content, path))
}

/// Like [`read_lines`], but a missing path yields nothing
pub fn read_lines_if_exists(path: &Path) -> Result<Vec<Line>> {
    if path.exists() {
        read_lines(path)
    } else {
        Ok(Vec::new())
    }
}

/// Parse `atom value...` lines
pub fn parse_atom_entries(lines: &[Line]) -> Result<Vec<AtomEntry>> {
    lines.iter().map(Line::atom_entry).collect()
}

/// Expand `VAR: value` shorthand in package.use values
///
/// `cat/pkg VIDEO_CARDS: intel -radeon` yields `video_cards_intel -video_cards_radeon`.
pub fn expand_use_shorthand(values: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len());
    let mut prefix: Option<String> = None;

    for value in values {
        if let Some(var) = value.strip_suffix(':') {
            prefix = Some(var.to_lowercase());
            continue;
        }
        match &prefix {
            Some(prefix) => match value.strip_prefix('-') {
                Some(flag) => out.push(format!("-{}_{}", prefix, flag)),
                None => out.push(format!("{}_{}", prefix, value)),
            },
            None => out.push(value.clone()),
        }
    }

    out
}

/// The per-package files of a config root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageFile {
    Mask,
    Unmask,
    Use,
    AcceptKeywords,
    Keywords,
    License,
    Env,
}

impl PackageFile {
    pub const ALL: [PackageFile; 7] = [
        PackageFile::Mask,
        PackageFile::Unmask,
        PackageFile::Use,
        PackageFile::AcceptKeywords,
        PackageFile::Keywords,
        PackageFile::License,
        PackageFile::Env,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            PackageFile::Mask => "package.mask",
            PackageFile::Unmask => "package.unmask",
            PackageFile::Use => "package.use",
            PackageFile::AcceptKeywords => "package.accept_keywords",
            PackageFile::Keywords => "package.keywords",
            PackageFile::License => "package.license",
            PackageFile::Env => "package.env",
        }
    }
}

/// User configuration (make.conf and package.* files)
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub make_conf: IndexMap<String, String>,
    pub package_mask: Vec<MaskEntry>,
    pub package_unmask: Vec<MaskEntry>,
    pub package_use: Vec<AtomEntry>,
    /// USE_EXPAND variables named by `VAR:` shorthand in package.use
    pub package_use_expand_vars: BTreeSet<String>,
    /// Entries with no values accept the unstable arch
    pub package_accept_keywords: Vec<AtomEntry>,
    pub package_keywords: Vec<AtomEntry>,
    pub package_license: Vec<AtomEntry>,
    /// Values are resolved env file paths
    pub package_env: Vec<AtomEntry>,
    pub env_dir: Option<PathBuf>,
    pub repos_conf: Option<PathBuf>,
}

impl UserConfig {
    /// Load everything present under a config root
    pub fn load(root: &Path) -> Result<Self> {
        ConfigLoader::new(root).load()
    }
}

/// Configuration loader for a config root
pub struct ConfigLoader {
    /// Root path for configuration
    root: PathBuf,
    /// Variables visible to `${VAR}` expansion in make.conf
    scope: IndexMap<String, String>,
    /// Explicitly configured files, which must exist
    explicit: IndexMap<PackageFile, Vec<PathBuf>>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scope: IndexMap::new(),
            explicit: IndexMap::new(),
        }
    }

    /// Expand make.conf against these variables (normally the profile's)
    pub fn scope(mut self, scope: IndexMap<String, String>) -> Self {
        self.scope = scope;
        self
    }

    /// Read `kind` from `path` instead of discovering it under the root
    pub fn file(mut self, kind: PackageFile, path: impl Into<PathBuf>) -> Self {
        self.explicit.entry(kind).or_default().push(path.into());
        self
    }

    /// Get the configuration root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, kind: PackageFile) -> Result<Vec<PathBuf>> {
        if let Some(paths) = self.explicit.get(&kind) {
            for path in paths {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path.clone()));
                }
            }
            return Ok(paths.clone());
        }
        let discovered = self.root.join(kind.file_name());
        Ok(if discovered.exists() { vec![discovered] } else { Vec::new() })
    }

    fn lines(&self, kind: PackageFile) -> Result<Vec<Line>> {
        let mut lines = Vec::new();
        for path in self.paths(kind)? {
            lines.extend(read_lines(&path)?);
        }
        Ok(lines)
    }

    /// Load the user configuration
    pub fn load(&self) -> Result<UserConfig> {
        let mut config = UserConfig::default();

        let make_conf = self.root.join("make.conf");
        if make_conf.exists() {
            config.make_conf = load_assignments(&make_conf, &self.scope)?;
        }

        config.package_mask = parse_mask_entries(&self.lines(PackageFile::Mask)?)?;
        config.package_unmask = parse_mask_entries(&self.lines(PackageFile::Unmask)?)?;

        config.package_use = parse_atom_entries(&self.lines(PackageFile::Use)?)?;
        for entry in &mut config.package_use {
            config.package_use_expand_vars.extend(
                entry
                    .values
                    .iter()
                    .filter_map(|v| v.strip_suffix(':'))
                    .map(str::to_uppercase),
            );
            entry.values = expand_use_shorthand(&entry.values);
        }

        config.package_accept_keywords = parse_atom_entries(&self.lines(PackageFile::AcceptKeywords)?)?;
        config.package_keywords = parse_atom_entries(&self.lines(PackageFile::Keywords)?)?;
        config.package_license = parse_atom_entries(&self.lines(PackageFile::License)?)?;

        let env_dir = self.root.join("env");
        for line in self.lines(PackageFile::Env)? {
            let mut entry = line.atom_entry()?;
            let mut files = Vec::with_capacity(entry.values.len());
            for name in &entry.values {
                let path = env_dir.join(name);
                if !path.exists() {
                    return Err(line.error(ConfigError::MissingFile(path)));
                }
                files.push(path.to_string_lossy().into_owned());
            }
            entry.values = files;
            config.package_env.push(entry);
        }
        if env_dir.is_dir() {
            config.env_dir = Some(env_dir);
        }

        let repos_conf = self.root.join("repos.conf");
        if repos_conf.exists() {
            config.repos_conf = Some(repos_conf);
        }

        debug!(
            "loaded user config from {}: {} masks, {} unmasks, {} package.use entries",
            self.root.display(),
            config.package_mask.len(),
            config.package_unmask.len(),
            config.package_use.len()
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_lines_comments() {
        let lines = parse_lines("# block\n# more\ncat/pkg a b # trailing\n\n# other\n\ncat/x\n", Path::new("f"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 3);
        assert_eq!(lines[0].tokens, vec!["cat/pkg", "a", "b"]);
        assert_eq!(lines[0].comments, vec!["block", "more"]);
        assert!(lines[1].comments.is_empty());
    }

    #[test]
    fn test_read_lines_directory() {
        let dir = TempDir::new().unwrap();
        let mask_dir = dir.path().join("package.mask");
        fs::create_dir(&mask_dir).unwrap();
        fs::write(mask_dir.join("b"), "cat/b\n").unwrap();
        fs::write(mask_dir.join("a"), "cat/a\n").unwrap();
        fs::write(mask_dir.join(".hidden"), "cat/hidden\n").unwrap();

        let lines = read_lines(&mask_dir).unwrap();
        let tokens: Vec<&str> = lines.iter().map(|l| l.tokens[0].as_str()).collect();
        assert_eq!(tokens, vec!["cat/a", "cat/b"]);

        assert!(matches!(
            read_lines(&dir.path().join("nope")),
            Err(ConfigError::MissingFile(_))
        ));
        assert!(read_lines_if_exists(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_use_shorthand() {
        let values: Vec<String> = ["doc", "VIDEO_CARDS:", "intel", "-radeon", "INPUT_DEVICES:", "libinput"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            expand_use_shorthand(&values),
            vec!["doc", "video_cards_intel", "-video_cards_radeon", "input_devices_libinput"]
        );
    }

    #[test]
    fn test_load_user_config() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("make.conf"), "USE=\"${EXTRA} bar\"\n").unwrap();
        fs::write(root.join("package.use"), "app-misc/foo -doc VIDEO_CARDS: intel\n").unwrap();
        fs::write(root.join("package.accept_keywords"), "app-misc/foo\n").unwrap();
        fs::create_dir(root.join("env")).unwrap();
        fs::write(root.join("env/debug.conf"), "CFLAGS=-g\n").unwrap();
        fs::write(root.join("package.env"), "app-misc/foo debug.conf\n").unwrap();

        let scope: IndexMap<String, String> = [("EXTRA".to_string(), "foo".to_string())].into_iter().collect();
        let config = ConfigLoader::new(root).scope(scope).load().unwrap();

        assert_eq!(config.make_conf["USE"], "foo bar");
        assert_eq!(config.package_use[0].values, vec!["-doc", "video_cards_intel"]);
        assert!(config.package_use_expand_vars.contains("VIDEO_CARDS"));
        assert!(config.package_accept_keywords[0].values.is_empty());
        assert!(config.package_env[0].values[0].ends_with("env/debug.conf"));
        assert!(config.env_dir.is_some());
        assert!(config.repos_conf.is_none());
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let err = ConfigLoader::new(dir.path())
            .file(PackageFile::Mask, dir.path().join("custom.mask"))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));

        // nothing configured and nothing on disk is fine
        assert!(UserConfig::load(dir.path()).is_ok());
    }

    #[test]
    fn test_missing_env_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.env"), "app-misc/foo nope.conf\n").unwrap();
        assert!(matches!(
            UserConfig::load(dir.path()),
            Err(ConfigError::MissingFile(_))
        ));
    }

    #[test]
    fn test_malformed_line() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.use"), "\nnot-an-atom flag\n").unwrap();
        match UserConfig::load(dir.path()) {
            Err(ConfigError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
