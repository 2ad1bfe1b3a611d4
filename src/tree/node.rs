// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Node types for the document tree
//!
//! A node is a heading, an operation, or a content run. Hierarchy is not
//! stored; it is derived from the node order plus `level`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// What a node represents in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A Markdown heading (`#` .. `######`)
    Heading,
    /// A YAML-bodied `@name` operation block
    Operation,
    /// A run of plain Markdown lines
    Content,
}

/// Provenance of a node's text, used when replaying the tree as chat turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Original document text or caller-provided input
    #[default]
    User,
    /// Generated by an operation
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// The unit of the document tree.
///
/// `key` is an 8-hex-char identity issued once and never reassigned. A node
/// built outside a tree (a fragment) carries an empty key until it is
/// spliced in.
#[derive(Debug, Clone)]
pub struct Node {
    pub key: String,
    pub kind: NodeKind,
    /// Heading: 1-6. Operation: level of the nearest enclosing heading.
    /// Content: inherited. Nodes before the first heading sit at level 0.
    pub level: usize,
    /// Heading slug or synthesized `op-<key>`; content nodes have none.
    pub id: Option<String>,
    /// Heading display text or operation name; empty for content.
    pub name: String,
    /// Raw Markdown, header line included for headings.
    pub text: String,
    /// Parsed YAML map; only meaningful for operations.
    pub params: serde_yaml::Mapping,
    pub role: Role,
    pub enabled: bool,
}

impl Node {
    /// Build a heading node. `text` is the full header line.
    pub fn heading(level: usize, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: String::new(),
            kind: NodeKind::Heading,
            level,
            id: None,
            name: name.into(),
            text: text.into(),
            params: serde_yaml::Mapping::new(),
            role: Role::User,
            enabled: true,
        }
    }

    /// Build a content node at the given level.
    pub fn content(level: usize, text: impl Into<String>) -> Self {
        Self {
            key: String::new(),
            kind: NodeKind::Content,
            level,
            id: None,
            name: String::new(),
            text: text.into(),
            params: serde_yaml::Mapping::new(),
            role: Role::User,
            enabled: true,
        }
    }

    /// Build an operation node. `text` is the raw `@name` line plus body.
    pub fn operation(
        name: impl Into<String>,
        level: usize,
        params: serde_yaml::Mapping,
        text: impl Into<String>,
    ) -> Self {
        Self {
            key: String::new(),
            kind: NodeKind::Operation,
            level,
            id: None,
            name: name.into(),
            text: text.into(),
            params,
            role: Role::User,
            enabled: true,
        }
    }

    /// Set the id, builder-style.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the role, builder-style.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Whether a key has been issued for this node.
    pub fn is_keyed(&self) -> bool {
        !self.key.is_empty()
    }

    pub fn is_heading(&self) -> bool {
        self.kind == NodeKind::Heading
    }

    pub fn is_operation(&self) -> bool {
        self.kind == NodeKind::Operation
    }
}

/// Issues 8-hex-char node keys, unique within one run.
///
/// A run-wide counter is folded with a random salt so keys from the same
/// run never collide and keys from different runs rarely look alike. One
/// generator is shared by the root tree and every `@run` child tree.
#[derive(Debug)]
pub struct KeyGen {
    salt: u32,
    counter: AtomicU32,
}

impl KeyGen {
    pub fn new() -> Self {
        Self {
            salt: rand::random::<u32>(),
            counter: AtomicU32::new(0),
        }
    }

    /// Deterministic generator for tests.
    pub fn with_salt(salt: u32) -> Self {
        Self {
            salt,
            counter: AtomicU32::new(0),
        }
    }

    /// Next key. XOR with the salt keeps the mapping injective, so
    /// uniqueness within a run follows from the counter.
    pub fn next_key(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{:08x}", self.salt ^ n)
    }
}

impl Default for KeyGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Kebab-case a heading title into a block id.
///
/// Lowercases, trims, and collapses runs of non-alphanumerics into `-`.
/// Returns `None` when nothing id-like survives (e.g. an all-symbol title).
pub fn slugify(title: &str) -> Option<String> {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in title.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    // Ids must start with a letter
    let slug = slug.trim_start_matches(|c: char| c.is_ascii_digit()).to_string();
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// Validate an explicit `{id=...}` slug.
pub fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
