// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tag context: which tags apply to tests reported from now on.

use std::collections::BTreeSet;

/// The set of tags in effect for subsequently reported tests.
///
/// Tags persist until changed. Scopes nest: [`push_scope`](Self::push_scope) starts a child scope
/// that inherits the current tags, and [`pop_scope`](Self::pop_scope) restores the parent's tags
/// exactly, discarding every change made in the child.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagContext {
    current: BTreeSet<String>,
    parents: Vec<BTreeSet<String>>,
}

impl TagContext {
    /// Creates an empty tag context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every tag in `new_tags`, then removes every tag in `gone_tags`.
    ///
    /// A tag named in both sets therefore ends up removed.
    pub fn apply<'a, N, G>(&mut self, new_tags: N, gone_tags: G)
    where
        N: IntoIterator<Item = &'a String>,
        G: IntoIterator<Item = &'a String>,
    {
        self.current.extend(new_tags.into_iter().cloned());
        for tag in gone_tags {
            self.current.remove(tag);
        }
    }

    /// Returns the current tags.
    pub fn current(&self) -> &BTreeSet<String> {
        &self.current
    }

    /// Returns a copy of the current tags, to be attached to a test.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.current.clone()
    }

    /// Starts a child scope.
    pub fn push_scope(&mut self) {
        self.parents.push(self.current.clone());
    }

    /// Ends the innermost child scope, restoring the tags in effect when it started.
    ///
    /// Returns false, leaving the tags unchanged, if there is no child scope.
    pub fn pop_scope(&mut self) -> bool {
        match self.parents.pop() {
            Some(parent) => {
                self.current = parent;
                true
            }
            None => false,
        }
    }

    /// The number of child scopes currently open.
    pub fn depth(&self) -> usize {
        self.parents.len()
    }
}
