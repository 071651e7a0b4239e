//! Ordered per-package data folding
//!
//! A [`ChunkedDataDict`] is an ordered list of `(restriction, delta)` pairs.
//! Chunks are indexed by package key where the restriction has one, but
//! folding always happens in insertion order, so a later chunk can undo what
//! an earlier one set.

use crate::incremental::collapse_incremental;
use crate::package::Package;
use crate::restriction::Restriction;
use std::collections::{BTreeSet, HashMap};

/// Flags added and removed by one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub enabled: Vec<String>,
    /// Removed flags; `*` clears everything accumulated so far
    pub disabled: Vec<String>,
}

impl Delta {
    /// Build a delta from incremental tokens (`flag`, `-flag`, `-*`)
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (enabled, disabled) = collapse_incremental(tokens);
        Self {
            enabled: enabled.into_iter().collect(),
            disabled: disabled.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }

    fn apply(&self, acc: &mut BTreeSet<String>) {
        for flag in &self.disabled {
            if flag == "*" {
                acc.clear();
            } else {
                acc.remove(flag);
            }
        }
        acc.extend(self.enabled.iter().cloned());
    }
}

#[derive(Debug, Clone)]
struct Chunk {
    restriction: Restriction,
    delta: Delta,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkedDataDict {
    chunks: Vec<Chunk>,
    by_key: HashMap<String, Vec<usize>>,
    unkeyed: Vec<usize>,
}

impl ChunkedDataDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add data that applies to every package
    pub fn add_bare_global(&mut self, delta: Delta) {
        self.add(Restriction::AlwaysTrue, delta);
    }

    /// Append a chunk
    pub fn add(&mut self, restriction: Restriction, delta: Delta) {
        if delta.is_empty() {
            return;
        }
        let idx = self.chunks.len();
        match restriction.atom_key() {
            Some(key) => self.by_key.entry(key).or_default().push(idx),
            None => self.unkeyed.push(idx),
        }
        self.chunks.push(Chunk { restriction, delta });
    }

    /// Append every chunk of `other` after this dict's chunks
    pub fn merge(&mut self, other: &ChunkedDataDict) {
        for chunk in &other.chunks {
            self.add(chunk.restriction.clone(), chunk.delta.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Fold every chunk that matches `pkg`, in insertion order
    pub fn pull_data<I, S>(&self, pkg: &Package, pre_defaults: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut acc: BTreeSet<String> = pre_defaults.into_iter().map(Into::into).collect();

        let keyed = self.by_key.get(&pkg.key()).map(Vec::as_slice).unwrap_or(&[]);
        let mut indices: Vec<usize> = keyed.iter().chain(&self.unkeyed).copied().collect();
        indices.sort_unstable();

        for idx in indices {
            let chunk = &self.chunks[idx];
            if chunk.restriction.matches(pkg) {
                chunk.delta.apply(&mut acc);
            }
        }
        acc
    }
}
