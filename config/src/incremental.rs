//! Incremental variable stacking
//!
//! Incremental settings accumulate across layers: each token adds a value,
//! `-value` removes a previously added one and `-*` clears everything added
//! so far. A negation never forbids later additions.

use indexmap::IndexSet;

/// Variables whose values stack across the default, profile and user layers
pub const INCREMENTALS: &[&str] = &[
    "ACCEPT_KEYWORDS",
    "ACCEPT_LICENSE",
    "CONFIG_PROTECT",
    "CONFIG_PROTECT_MASK",
    "ENV_UNSET",
    "FEATURES",
    "IUSE_IMPLICIT",
    "PROFILE_ONLY_VARIABLES",
    "USE",
    "USE_EXPAND",
    "USE_EXPAND_HIDDEN",
    "USE_EXPAND_IMPLICIT",
    "USE_EXPAND_UNPREFIXED",
];

/// Incrementals whose negations must survive until evaluation time
pub const UNEXPANDED_INCREMENTALS: &[&str] = &["USE", "ACCEPT_LICENSE"];

/// Expand a token stream into the resulting ordered set
pub fn expand_incremental<I, S>(tokens: I) -> IndexSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = IndexSet::new();
    for token in tokens {
        let token = token.as_ref();
        match token.strip_prefix('-') {
            Some("*") => out.clear(),
            Some(value) => {
                out.shift_remove(value);
            }
            None => {
                out.insert(token.to_string());
            }
        }
    }
    out
}

/// Collapse a token stream into `(enabled, disabled)` deltas
///
/// Unlike [`expand_incremental`] this keeps negations: a value removed and
/// never re-added ends up in `disabled`, and `-*` records `*` as disabled so
/// the reset can be replayed on top of earlier data.
pub fn collapse_incremental<I, S>(tokens: I) -> (IndexSet<String>, IndexSet<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut enabled = IndexSet::new();
    let mut disabled = IndexSet::new();
    for token in tokens {
        let token = token.as_ref();
        match token.strip_prefix('-') {
            Some("*") => {
                enabled.clear();
                disabled.clear();
                disabled.insert("*".to_string());
            }
            Some(value) => {
                enabled.shift_remove(value);
                disabled.insert(value.to_string());
            }
            None => {
                disabled.shift_remove(token);
                enabled.insert(token.to_string());
            }
        }
    }
    (enabled, disabled)
}

/// Whether `name` stacks incrementally given the configured USE_EXPAND variables
pub fn is_incremental(name: &str, use_expand: &IndexSet<String>) -> bool {
    INCREMENTALS.contains(&name) || use_expand.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(tokens: &[&str]) -> Vec<String> {
        expand_incremental(tokens).into_iter().collect()
    }

    #[test]
    fn test_readd_after_negation() {
        assert_eq!(expand(&["a", "-a", "a"]), vec!["a"]);
    }

    #[test]
    fn test_reset() {
        assert_eq!(expand(&["a", "b", "-*", "c"]), vec!["c"]);
    }

    #[test]
    fn test_order_dependence() {
        assert_eq!(expand(&["foo", "-foo", "bar"]), vec!["bar"]);
        assert_eq!(expand(&["foo", "bar", "-foo", "foo"]), vec!["bar", "foo"]);
        assert!(expand(&["-missing"]).is_empty());
    }

    #[test]
    fn test_idempotent() {
        let once = expand(&["x", "y", "-x", "z", "x"]);
        let twice: Vec<String> = expand_incremental(&once).into_iter().collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_collapse_keeps_negations() {
        let (enabled, disabled) = collapse_incremental(["a", "b", "-a", "-c"]);
        assert_eq!(enabled.into_iter().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(disabled.into_iter().collect::<Vec<_>>(), vec!["a", "c"]);

        let (enabled, disabled) = collapse_incremental(["a", "-*", "b"]);
        assert_eq!(enabled.into_iter().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(disabled.into_iter().collect::<Vec<_>>(), vec!["*"]);
    }

    #[test]
    fn test_is_incremental() {
        let use_expand: IndexSet<String> = ["VIDEO_CARDS".to_string()].into_iter().collect();
        assert!(is_incremental("USE", &use_expand));
        assert!(is_incremental("VIDEO_CARDS", &use_expand));
        assert!(!is_incremental("CFLAGS", &use_expand));
    }
}
