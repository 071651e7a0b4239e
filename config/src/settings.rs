//! Layered settings (make.defaults / make.conf)
//!
//! Settings are built once from three layers: built-in defaults, the
//! resolved profile and the user's `make.conf`. Incremental variables stack
//! across the layers, everything else is overridden by the later layer.
//! The result is an immutable [`Settings`] snapshot.

use crate::incremental::{expand_incremental, is_incremental, UNEXPANDED_INCREMENTALS};
use crate::{ConfigError, Result};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::BTreeSet;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;
use tracing::{debug, warn};

/// Variables only a profile may set
pub const PROFILE_ONLY_VARIABLES: &[&str] = &["ARCH", "ELIBC", "KERNEL", "USERLAND"];

/// Built-in defaults, applied below the profile
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[("ACCEPT_LICENSE", "* -@EULA")];

/// Read a `$VAR` or `${VAR}` reference, the `$` already consumed
fn read_reference(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut name = String::new();
    if chars.peek() == Some(&'{') {
        chars.next();
        for c in chars.by_ref() {
            if c == '}' {
                return Some(name);
            }
            name.push(c);
        }
        return None;
    }
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            name.push(c);
            chars.next();
        } else {
            break;
        }
    }
    Some(name)
}

/// Parse shell-style `KEY="value"` assignments
///
/// `${VAR}` and `$VAR` expand against earlier assignments in the same file,
/// then against `scope`; unknown variables expand to nothing. Single quotes
/// suppress expansion.
pub fn parse_assignments(
    content: &str,
    path: &Path,
    scope: &IndexMap<String, String>,
) -> Result<IndexMap<String, String>> {
    let mut vars: IndexMap<String, String> = IndexMap::new();
    let mut chars = content.chars().peekable();
    let mut line = 1;

    let malformed = |message: &str, line: usize| ConfigError::failure(message).at(path, line);

    loop {
        match chars.peek() {
            None => break,
            Some('\n') => {
                line += 1;
                chars.next();
                continue;
            }
            Some(c) if c.is_whitespace() => {
                chars.next();
                continue;
            }
            Some('#') => {
                while chars.peek().is_some_and(|c| *c != '\n') {
                    chars.next();
                }
                continue;
            }
            Some(_) => {}
        }

        let start = line;
        let mut key = String::new();
        loop {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    key.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if key == "export" && chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
                key.clear();
                while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
                    chars.next();
                }
                continue;
            }
            break;
        }
        if key.is_empty() || chars.next() != Some('=') {
            return Err(malformed("expected KEY=value assignment", start));
        }

        let mut value = String::new();
        let lookup = |name: &str, vars: &IndexMap<String, String>| {
            vars.get(name)
                .or_else(|| scope.get(name))
                .cloned()
                .unwrap_or_default()
        };

        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            match c {
                '"' => loop {
                    match chars.next() {
                        None => return Err(malformed("unterminated double quote", start)),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('\n') => line += 1,
                            Some(escaped) => value.push(escaped),
                            None => return Err(malformed("dangling escape", start)),
                        },
                        Some('$') => match read_reference(&mut chars) {
                            Some(name) if name.is_empty() => value.push('$'),
                            Some(name) => value.push_str(&lookup(&name, &vars)),
                            None => return Err(malformed("unterminated ${", start)),
                        },
                        Some(other) => {
                            if other == '\n' {
                                line += 1;
                            }
                            value.push(other);
                        }
                    }
                },
                '\'' => loop {
                    match chars.next() {
                        None => return Err(malformed("unterminated single quote", start)),
                        Some('\'') => break,
                        Some(other) => {
                            if other == '\n' {
                                line += 1;
                            }
                            value.push(other);
                        }
                    }
                },
                '\\' => match chars.next() {
                    Some('\n') => line += 1,
                    Some(escaped) => value.push(escaped),
                    None => return Err(malformed("dangling escape", start)),
                },
                '$' => match read_reference(&mut chars) {
                    Some(name) if name.is_empty() => value.push('$'),
                    Some(name) => value.push_str(&lookup(&name, &vars)),
                    None => return Err(malformed("unterminated ${", start)),
                },
                other => value.push(other),
            }
        }

        vars.insert(key, value);
    }

    Ok(vars)
}

/// Load an assignments file
pub fn load_assignments(path: &Path, scope: &IndexMap<String, String>) -> Result<IndexMap<String, String>> {
    debug!("loading settings from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse_assignments(&content, path, scope)
}

fn tokens(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split_whitespace().map(str::to_string)
}

/// Variables of a resolved profile stack
///
/// Incrementals are concatenated parent to child, other variables are
/// overridden by the child.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileEnv {
    vars: IndexMap<String, String>,
}

impl ProfileEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack one profile node's `make.defaults` on top
    pub fn stack(&mut self, node: IndexMap<String, String>) {
        let use_expand = expand_incremental(
            tokens(self.get("USE_EXPAND").unwrap_or(""))
                .chain(tokens(node.get("USE_EXPAND").map(String::as_str).unwrap_or(""))),
        );

        for (key, value) in node {
            match self.vars.get_mut(&key) {
                Some(existing) if is_incremental(&key, &use_expand) => {
                    existing.push(' ');
                    existing.push_str(&value);
                }
                _ => {
                    self.vars.insert(key, value);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Names of the variables a user may not override
    pub fn profile_only(&self) -> BTreeSet<String> {
        PROFILE_ONLY_VARIABLES
            .iter()
            .map(|s| s.to_string())
            .chain(expand_incremental(tokens(self.get("PROFILE_ONLY_VARIABLES").unwrap_or(""))))
            .collect()
    }
}

/// Variables from the user's `make.conf`
///
/// Construction drops the variables the profile reserves, so a `UserEnv`
/// can never override them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserEnv {
    vars: IndexMap<String, String>,
}

impl UserEnv {
    pub fn new(vars: IndexMap<String, String>, profile: &ProfileEnv) -> Self {
        let reserved = profile.profile_only();
        let vars = vars
            .into_iter()
            .filter(|(key, _)| {
                let keep = !reserved.contains(key);
                if !keep {
                    warn!("ignoring profile-only variable {} set in make.conf", key);
                }
                keep
            })
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }
}

/// Immutable snapshot of the final configuration
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    vars: IndexMap<String, String>,
    stacks: IndexMap<String, Vec<String>>,
    use_expand: IndexSet<String>,
}

impl Settings {
    /// Combine defaults, profile and user layers
    pub fn build(profile: &ProfileEnv, user: &UserEnv) -> Result<Self> {
        let defaults: IndexMap<String, String> = DEFAULT_SETTINGS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let layers = [&defaults, profile.vars(), user.vars()];

        let use_expand = expand_incremental(
            layers
                .iter()
                .flat_map(|layer| layer.get("USE_EXPAND").map(|v| tokens(v).collect::<Vec<_>>()))
                .flatten(),
        );

        let mut vars = IndexMap::new();
        let mut stacks: IndexMap<String, Vec<String>> = IndexMap::new();
        for layer in layers {
            for (key, value) in layer {
                if is_incremental(key, &use_expand) {
                    stacks.entry(key.clone()).or_default().extend(tokens(value));
                } else {
                    vars.insert(key.clone(), value.clone());
                }
            }
        }

        for (key, stack) in &stacks {
            let value = if UNEXPANDED_INCREMENTALS.contains(&key.as_str()) {
                stack.join(" ")
            } else {
                expand_incremental(stack).into_iter().collect::<Vec<_>>().join(" ")
            };
            vars.insert(key.clone(), value);
        }

        let settings = Self {
            vars,
            stacks,
            use_expand,
        };

        if settings.get("ARCH").map_or(true, str::is_empty) {
            return Err(ConfigError::failure("ARCH is not set by the profile"));
        }
        if settings.expanded("ACCEPT_KEYWORDS").is_empty() {
            return Err(ConfigError::failure("ACCEPT_KEYWORDS is not set"));
        }

        Ok(settings)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Domain architecture
    pub fn arch(&self) -> &str {
        self.get("ARCH").unwrap_or_default()
    }

    /// Raw stacked tokens of an incremental variable, negations included
    pub fn stack(&self, key: &str) -> &[String] {
        self.stacks.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incrementally expanded values of a variable
    pub fn expanded(&self, key: &str) -> IndexSet<String> {
        expand_incremental(self.stack(key))
    }

    pub fn use_expand(&self) -> &IndexSet<String> {
        &self.use_expand
    }

    /// USE tokens including USE_EXPAND contributions, negations kept
    pub fn use_tokens(&self) -> Vec<String> {
        let unprefixed = self.expanded("USE_EXPAND_UNPREFIXED");
        let mut out = self.stack("USE").to_vec();
        for var in &self.use_expand {
            let values = self.expanded(var);
            if unprefixed.contains(var) {
                out.extend(values);
            } else {
                let prefix = var.to_lowercase();
                out.extend(values.into_iter().map(|v| format!("{}_{}", prefix, v)));
            }
        }
        for var in &unprefixed {
            if !self.use_expand.contains(var) {
                out.extend(tokens(self.get(var).unwrap_or("")));
            }
        }
        out
    }

    /// Resolved global USE
    pub fn global_use(&self) -> IndexSet<String> {
        expand_incremental(self.use_tokens())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(content: &str) -> IndexMap<String, String> {
        parse_assignments(content, Path::new("make.conf"), &IndexMap::new()).unwrap()
    }

    fn profile(content: &str) -> ProfileEnv {
        let mut env = ProfileEnv::new();
        env.stack(parse(content));
        env
    }

    #[test]
    fn test_parse_assignments() {
        let vars = parse(
            "# comment\nCFLAGS=\"-O2 -pipe\"\nCXXFLAGS=\"${CFLAGS} -g\"\nexport MAKEOPTS=-j4\nLIT='$CFLAGS'\nUSE=\"a\n  b\"\n",
        );
        assert_eq!(vars["CFLAGS"], "-O2 -pipe");
        assert_eq!(vars["CXXFLAGS"], "-O2 -pipe -g");
        assert_eq!(vars["MAKEOPTS"], "-j4");
        assert_eq!(vars["LIT"], "$CFLAGS");
        assert_eq!(tokens(&vars["USE"]).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_scope_and_errors() {
        let scope: IndexMap<String, String> = [("ROOT".to_string(), "/mnt".to_string())].into_iter().collect();
        let vars = parse_assignments("DIR=$ROOT/x\nNONE=${MISSING}", Path::new("x"), &scope).unwrap();
        assert_eq!(vars["DIR"], "/mnt/x");
        assert_eq!(vars["NONE"], "");

        let err = parse_assignments("A=1\nB=\"open\n", Path::new("make.conf"), &IndexMap::new()).unwrap_err();
        match err {
            ConfigError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_assignments("just words", Path::new("x"), &IndexMap::new()).is_err());
    }

    #[test]
    fn test_profile_stacking() {
        let mut env = profile("ARCH=amd64\nUSE=\"a b\"\nCHOST=x86_64\nUSE_EXPAND=VIDEO_CARDS\nVIDEO_CARDS=intel");
        env.stack(parse("USE=\"-a c\"\nCHOST=other\nVIDEO_CARDS=radeon"));
        assert_eq!(env.get("USE"), Some("a b -a c"));
        assert_eq!(env.get("CHOST"), Some("other"));
        assert_eq!(env.get("VIDEO_CARDS"), Some("intel radeon"));
    }

    #[test]
    fn test_user_cannot_override_profile_only() {
        let env = profile("ARCH=amd64\nPROFILE_ONLY_VARIABLES=CHOST\nACCEPT_KEYWORDS=amd64");
        let user = UserEnv::new(parse("ARCH=x86\nCHOST=foo\nCFLAGS=-O2"), &env);
        assert_eq!(user.get("ARCH"), None);
        assert_eq!(user.get("CHOST"), None);
        assert_eq!(user.get("CFLAGS"), Some("-O2"));
    }

    #[test]
    fn test_settings_layers() {
        let env = profile("ARCH=amd64\nACCEPT_KEYWORDS=amd64\nUSE=foo\nFEATURES=\"sandbox strict\"");
        let user = UserEnv::new(
            parse("USE=\"-foo bar\"\nACCEPT_KEYWORDS=~amd64\nFEATURES=-strict\nACCEPT_LICENSE=\"-* MIT\""),
            &env,
        );
        let settings = Settings::build(&env, &user).unwrap();

        assert_eq!(settings.arch(), "amd64");
        assert_eq!(settings.get("USE"), Some("foo -foo bar"));
        assert_eq!(settings.get("FEATURES"), Some("sandbox"));
        assert_eq!(settings.get("ACCEPT_KEYWORDS"), Some("amd64 ~amd64"));
        assert_eq!(settings.get("ACCEPT_LICENSE"), Some("* -@EULA -* MIT"));
        assert_eq!(settings.global_use().into_iter().collect::<Vec<_>>(), vec!["bar"]);
    }

    #[test]
    fn test_use_expand_tokens() {
        let env = profile(
            "ARCH=amd64\nACCEPT_KEYWORDS=amd64\nUSE_EXPAND=\"VIDEO_CARDS ELIBC\"\nUSE_EXPAND_UNPREFIXED=ARCH\nVIDEO_CARDS=\"intel radeon\"\nELIBC=glibc",
        );
        let user = UserEnv::new(parse("VIDEO_CARDS=\"-radeon nouveau\""), &env);
        let settings = Settings::build(&env, &user).unwrap();

        let global: Vec<String> = settings.global_use().into_iter().collect();
        assert_eq!(
            global,
            vec!["video_cards_intel", "video_cards_nouveau", "elibc_glibc", "amd64"]
        );
    }

    #[test]
    fn test_required_settings() {
        let env = profile("ACCEPT_KEYWORDS=amd64");
        let user = UserEnv::new(IndexMap::new(), &env);
        assert!(matches!(Settings::build(&env, &user), Err(ConfigError::Failure(_))));

        let env = profile("ARCH=amd64");
        let user = UserEnv::new(IndexMap::new(), &env);
        assert!(matches!(Settings::build(&env, &user), Err(ConfigError::Failure(_))));
    }
}
