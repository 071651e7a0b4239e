//! Repository configuration (repos.conf)

use crate::repository::InMemoryRepository;
use crate::{ConfigError, Result};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Repositories configuration
#[derive(Debug, Clone, Default)]
pub struct ReposConfig {
    /// Default repository name
    pub main_repo: Option<String>,
    /// Repositories in file order
    pub repos: IndexMap<String, RepoConfig>,
}

/// One repository section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    pub location: PathBuf,
    /// `None` when the section has no `masters` key
    pub masters: Option<Vec<String>>,
    pub priority: i32,
}

impl RepoConfig {
    /// Load the index repository at this location
    pub fn open(&self) -> Result<InMemoryRepository> {
        let repo = InMemoryRepository::load(&self.name, &self.location)?;
        Ok(match &self.masters {
            Some(masters) => repo.with_masters(masters.clone()),
            None => repo,
        })
    }
}

impl ReposConfig {
    /// Repositories by descending priority, ties kept in file order
    pub fn repos_by_priority(&self) -> Vec<&RepoConfig> {
        let mut repos: Vec<_> = self.repos.values().collect();
        repos.sort_by_key(|r| std::cmp::Reverse(r.priority));
        repos
    }

    pub fn get_repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.get(name)
    }

    /// Get the main repository, falling back to the highest priority one
    pub fn main_repo(&self) -> Option<&RepoConfig> {
        match &self.main_repo {
            Some(name) => self.repos.get(name),
            None => self.repos_by_priority().first().copied(),
        }
    }
}

/// Parse a repos.conf file or a directory of `.conf` files
///
/// Relative locations are resolved against the directory holding the file.
pub fn parse_repos_conf(path: &Path) -> Result<ReposConfig> {
    let mut config = ReposConfig::default();

    if path.is_dir() {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry_path = entry?.path();
            if entry_path.extension().is_some_and(|ext| ext == "conf") {
                entries.push(entry_path);
            }
        }
        entries.sort();

        for entry in entries {
            let content = std::fs::read_to_string(&entry)?;
            parse_repos_conf_content(&content, path, &entry, &mut config)?;
        }
    } else if path.is_file() {
        let base = path.parent().unwrap_or(Path::new("."));
        let content = std::fs::read_to_string(path)?;
        parse_repos_conf_content(&content, base, path, &mut config)?;
    } else {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }

    Ok(config)
}

/// Parse repos.conf content (INI-like format)
fn parse_repos_conf_content(content: &str, base: &Path, path: &Path, config: &mut ReposConfig) -> Result<()> {
    let mut current: Option<(String, usize)> = None;
    let mut values: IndexMap<String, String> = IndexMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            if let Some((section, number)) = current.take() {
                save_section(&section, &values, base, config).map_err(|e| e.at(path, number))?;
            }
            current = Some((line[1..line.len() - 1].trim().to_string(), idx + 1));
            values.clear();
            continue;
        }

        match line.split_once('=') {
            Some((key, value)) if current.is_some() => {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => {
                return Err(ConfigError::failure(format!("unexpected line: {}", line)).at(path, idx + 1));
            }
        }
    }

    if let Some((section, number)) = current {
        save_section(&section, &values, base, config).map_err(|e| e.at(path, number))?;
    }

    Ok(())
}

fn save_section(section: &str, values: &IndexMap<String, String>, base: &Path, config: &mut ReposConfig) -> Result<()> {
    if section == "DEFAULT" {
        if let Some(v) = values.get("main-repo") {
            config.main_repo = Some(v.clone());
        }
        return Ok(());
    }

    let location = values
        .get("location")
        .ok_or_else(|| ConfigError::failure(format!("repository {} has no location", section)))?;
    let priority = match values.get("priority") {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::failure(format!("invalid priority for {}: {}", section, v)))?,
        None => 0,
    };

    let repo = RepoConfig {
        name: section.to_string(),
        location: base.join(location),
        masters: values
            .get("masters")
            .map(|v| v.split_whitespace().map(str::to_string).collect()),
        priority,
    };
    config.repos.insert(repo.name.clone(), repo);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_repos_conf() {
        let tmp = TempDir::new().unwrap();
        let conf = tmp.path().join("repos.conf");
        fs::write(
            &conf,
            r#"
[DEFAULT]
main-repo = gentoo

[gentoo]
location = /var/db/repos/gentoo
priority = 10

[overlay]
location = overlay
masters = gentoo
priority = 50

[standalone]
location = /srv/standalone
masters =
"#,
        )
        .unwrap();

        let config = parse_repos_conf(&conf).unwrap();
        assert_eq!(config.main_repo().unwrap().name, "gentoo");

        let gentoo = config.get_repo("gentoo").unwrap();
        assert_eq!(gentoo.location, PathBuf::from("/var/db/repos/gentoo"));
        assert_eq!(gentoo.masters, None);

        let overlay = config.get_repo("overlay").unwrap();
        assert_eq!(overlay.location, tmp.path().join("overlay"));
        assert_eq!(overlay.masters, Some(vec!["gentoo".to_string()]));

        assert_eq!(config.get_repo("standalone").unwrap().masters, Some(vec![]));

        let order: Vec<&str> = config.repos_by_priority().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["overlay", "gentoo", "standalone"]);
    }

    #[test]
    fn test_repos_conf_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("repos.conf");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("b.conf"), "[b]\nlocation = /b\n").unwrap();
        fs::write(dir.join("a.conf"), "[a]\nlocation = /a\n").unwrap();
        fs::write(dir.join("README"), "not parsed\n").unwrap();

        let config = parse_repos_conf(&dir).unwrap();
        let names: Vec<&String> = config.repos.keys().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_repos_conf_errors() {
        let tmp = TempDir::new().unwrap();
        let conf = tmp.path().join("repos.conf");

        fs::write(&conf, "[broken]\npriority = 1\n").unwrap();
        assert!(matches!(
            parse_repos_conf(&conf),
            Err(ConfigError::Malformed { line: 1, .. })
        ));

        fs::write(&conf, "location = /nowhere\n").unwrap();
        assert!(matches!(
            parse_repos_conf(&conf),
            Err(ConfigError::Malformed { line: 1, .. })
        ));

        assert!(matches!(
            parse_repos_conf(&tmp.path().join("missing")),
            Err(ConfigError::MissingFile(_))
        ));
    }
}
