//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::collections::BTreeMap;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// A metadata side-table mapping string keys to lists of string values.
///
/// One of these exists at CFG scope, one per block, and one per
/// instruction slot. Instruction-scoped maps live next to the instruction
/// inside its block, so they move when instructions are inserted or removed
/// around them and survive in-place `replace`.
///
/// Metadata is orthogonal to semantics: nothing in the data model, the
/// interpreter or the pass manager reads metadata to decide program
/// behavior. It exists so passes can communicate. By convention a pass
/// namespaces the keys it owns as `<pass-id>/<key>`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct MetaMap {
    // ordered so iteration (and therefore the writer's output) is stable
    entries: BTreeMap<String, Vec<String>>,
}

impl MetaMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the values stored under `key`.
    pub fn set<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(key.into(), values.into_iter().map(Into::into).collect());
    }

    /// Appends values to the list stored under `key`, creating it if absent.
    pub fn append<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// Gets the values stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Gets the values stored under `key`, or `default` when absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a [String]) -> &'a [String] {
        self.get(key).unwrap_or(default)
    }

    /// Removes `key`, returning its values if it was present.
    pub fn delete(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(key)
    }

    /// Iterates over all `(key, values)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every key for which `pred` returns false.
    pub fn retain_keys(&mut self, mut pred: impl FnMut(&str) -> bool) {
        self.entries.retain(|k, _| pred(k));
    }
}

/// Identifies one of the three metadata scopes when iterating a whole CFG's
/// metadata at once.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum MetaPath {
    /// CFG-scoped metadata
    Cfg,
    /// Metadata of the named block
    Block(String),
    /// Metadata of the instruction at the given index in the named block.
    /// The block's terminator sits at index `num_insts()`.
    Inst(String, usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_append_extends() {
        let mut meta = MetaMap::new();

        meta.set("k", ["a", "b"]);
        assert_eq!(meta.get("k"), Some(&["a".to_string(), "b".to_string()][..]));

        meta.append("k", ["c"]);
        assert_eq!(meta.get("k").unwrap().len(), 3);

        meta.set("k", ["z"]);
        assert_eq!(meta.get("k"), Some(&["z".to_string()][..]));
    }

    #[test]
    fn get_or_falls_back() {
        let meta = MetaMap::new();
        let default = ["d".to_string()];

        assert_eq!(meta.get("missing"), None);
        assert_eq!(meta.get_or("missing", &default), &default);
    }

    #[test]
    fn delete_and_iteration_order() {
        let mut meta = MetaMap::new();
        meta.set("b", ["2"]);
        meta.set("a", ["1"]);
        meta.set("c", ["3"]);

        assert!(meta.delete("b").is_some());
        assert!(meta.delete("b").is_none());

        let keys: Vec<_> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "c"]);
    }
}
