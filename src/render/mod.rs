// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tree renderer
//!
//! Serializes a tree back to Markdown. Heading and content nodes are
//! emitted verbatim from their raw text; operation nodes are emitted as
//! `@name` followed by canonicalised YAML of their parameters. Re-parsing
//! the output yields a tree whose non-operation content is byte-identical
//! and whose operation parameters are semantically equal.

use crate::tree::{Node, NodeKind, Role, Tree};

/// Render a tree to Markdown.
pub fn render(tree: &Tree) -> String {
    let parts: Vec<String> = tree.iter().map(|idx| node_text(tree.node(idx))).collect();
    join_blocks(parts)
}

/// Render a detached fragment to Markdown.
pub fn render_fragment(nodes: &[Node]) -> String {
    join_blocks(nodes.iter().map(node_text).collect())
}

/// Context emission variant: role markers are interleaved wherever the
/// role changes, and operation nodes are skipped, so the output can be
/// replayed as chat history.
pub fn render_context(tree: &Tree) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<Role> = None;
    for idx in tree.iter() {
        let node = tree.node(idx);
        if node.kind == NodeKind::Operation {
            continue;
        }
        if current != Some(node.role) {
            parts.push(format!("<!-- role: {} -->", node.role));
            current = Some(node.role);
        }
        parts.push(node.text.clone());
    }
    join_blocks(parts)
}

fn join_blocks(parts: Vec<String>) -> String {
    if parts.is_empty() {
        return String::new();
    }
    let mut out = parts.join("\n");
    out.push('\n');
    out
}

/// Raw Markdown for one node. Headings and content come back verbatim;
/// operations are re-emitted from their parsed parameters.
pub fn node_text(node: &Node) -> String {
    match node.kind {
        NodeKind::Operation => {
            let mut out = format!("@{}", node.name);
            let body = canonical_yaml(&node.params);
            if !body.is_empty() {
                out.push('\n');
                out.push_str(&body);
            }
            out
        }
        _ => node.text.clone(),
    }
}

/// Canonical single-block YAML for an operation body.
///
/// Multi-line strings are emitted as double-quoted escaped scalars rather
/// than block scalars: a block scalar containing a blank line would split
/// the operation body at re-parse time, since a body always ends at the
/// first blank line.
fn canonical_yaml(params: &serde_yaml::Mapping) -> String {
    let mut lines: Vec<String> = Vec::new();
    for (key, value) in params {
        let key = key.as_str().unwrap_or_default();
        match value {
            serde_yaml::Value::String(s) if s.contains('\n') => {
                let escaped = serde_json::to_string(s).unwrap_or_default();
                lines.push(format!("{}: {}", key, escaped));
            }
            other => {
                let mut single = serde_yaml::Mapping::new();
                single.insert(key.into(), other.clone());
                match serde_yaml::to_string(&single) {
                    Ok(rendered) => {
                        lines.extend(rendered.trim_end().lines().map(String::from))
                    }
                    Err(_) => lines.push(format!("{}: null", key)),
                }
            }
        }
    }
    lines.join("\n")
}
