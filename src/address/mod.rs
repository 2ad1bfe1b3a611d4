// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Block path resolution
//!
//! Resolves the `block`, `to` and `from` parameters of operations against
//! a tree. Grammar:
//!
//! ```text
//! path    := segment ('/' segment)* ('/*')?
//! segment := id-or-key
//! array   := [path, path, ...]
//! ```
//!
//! A bare segment matches by id first, then by key. `a/b` finds `a`
//! anywhere, then `b` among `a`'s children one level deeper. A trailing
//! `/*` widens the result from the named node (with its direct prose) to
//! the node's entire descendant region. Arrays concatenate results in
//! order, preserving duplicates. Resolution always operates on the tree
//! as it is at the moment of evaluation.

use serde_yaml::Value;

use crate::error::{Result, TangleError};
use crate::tree::{NodeIdx, NodeKind, Tree};

/// A parsed block path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPath {
    pub segments: Vec<String>,
    pub wildcard: bool,
    raw: String,
}

impl BlockPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TangleError::parse("block path cannot be empty"));
        }

        let mut segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        let wildcard = segments.last().map(|s| s == "*").unwrap_or(false);
        if wildcard {
            segments.pop();
        }
        if segments.is_empty() {
            return Err(TangleError::parse(format!(
                "block path '{}' names no block",
                trimmed
            )));
        }
        for segment in &segments {
            if segment.is_empty() || segment.contains('*') {
                return Err(TangleError::parse(format!(
                    "invalid block path '{}': bad segment '{}'",
                    trimmed, segment
                )));
            }
        }
        Ok(Self {
            segments,
            wildcard,
            raw: trimmed.to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for BlockPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Read a `block`-style parameter: a single path string or an array.
pub fn paths_from_value(value: &Value) -> Result<Vec<BlockPath>> {
    match value {
        Value::String(s) => Ok(vec![BlockPath::parse(s)?]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => BlockPath::parse(s),
                _ => Err(TangleError::parse("block path arrays hold strings")),
            })
            .collect(),
        _ => Err(TangleError::parse(
            "block path must be a string or an array of strings",
        )),
    }
}

/// Resolve one path to its ordered node selection.
///
/// Errors with `BlockNotFound` when any segment fails to resolve; callers
/// reading content may prefer [`resolve_for_read`], which skips misses.
pub fn resolve(tree: &Tree, path: &BlockPath) -> Result<Vec<NodeIdx>> {
    let node = locate(tree, path)?;
    Ok(selection(tree, node, path.wildcard))
}

/// Resolve many paths for reading, concatenating results in order and
/// skipping paths that match nothing.
pub fn resolve_for_read(tree: &Tree, paths: &[BlockPath]) -> Vec<NodeIdx> {
    let mut out = Vec::new();
    for path in paths {
        match resolve(tree, path) {
            Ok(indices) => out.extend(indices),
            Err(err) => {
                tracing::debug!(path = %path, %err, "block path matched nothing; skipping")
            }
        }
    }
    out
}

/// Resolve a path that must name a single node to act on (a merge target
/// or jump destination). A trailing `/*` is accepted and ignored: merge
/// semantics already operate on the node's region.
pub fn resolve_target(tree: &Tree, path: &BlockPath) -> Result<NodeIdx> {
    locate(tree, path)
}

/// Walk the segments to the named node.
fn locate(tree: &Tree, path: &BlockPath) -> Result<NodeIdx> {
    let first = &path.segments[0];
    let mut current = tree
        .find_by_id_or_key(first)
        .ok_or_else(|| TangleError::BlockNotFound(path.raw.clone()))?;

    for segment in &path.segments[1..] {
        let base = tree.node(current).level;
        let mut cursor = tree.next(current);
        let mut found = None;
        while let Some(idx) = cursor {
            let node = tree.node(idx);
            // A sibling or shallower heading closes the search region;
            // operations at the base level do not
            if node.is_heading() && node.level <= base {
                break;
            }
            if node.level == base + 1
                && (node.id.as_deref() == Some(segment) || node.key == *segment)
            {
                found = Some(idx);
                break;
            }
            cursor = tree.next(idx);
        }
        current = found.ok_or_else(|| TangleError::BlockNotFound(path.raw.clone()))?;
    }
    Ok(current)
}

/// The ordered selection for a resolved node.
///
/// Without the wildcard: the node plus its direct prose (content nodes up
/// to the first heading or operation). With it: the node and its whole
/// descendant region. Operation nodes are never part of a selection; they
/// are statements, not content.
fn selection(tree: &Tree, node: NodeIdx, wildcard: bool) -> Vec<NodeIdx> {
    let base = tree.node(node).level;
    let mut out = vec![node];
    let mut cursor = tree.next(node);
    while let Some(idx) = cursor {
        let n = tree.node(idx);
        if n.level <= base {
            break;
        }
        match n.kind {
            NodeKind::Content if !wildcard => out.push(idx),
            NodeKind::Content | NodeKind::Heading if wildcard => out.push(idx),
            NodeKind::Operation if wildcard => {} // scanned past, not selected
            _ => break,
        }
        cursor = tree.next(idx);
    }
    out
}
