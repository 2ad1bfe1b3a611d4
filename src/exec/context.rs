// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Context construction for `@llm` and `@run`
//!
//! The three cases are normative and deterministic:
//!
//! 1. `block` without `prompt`: the concatenated content under the
//!    resolved path(s), preserving per-node roles.
//! 2. `prompt` without `block`: all nodes preceding the operation in
//!    document order, preserving roles, then a final user turn carrying
//!    the prompt.
//! 3. both: the resolved block(s) as in 1, then a final user turn.
//!
//! Operation nodes are statements, not content; they never contribute
//! text. `@llm` receives the result as chat turns, `@run` as a Markdown
//! node fragment.

use crate::address;
use crate::error::{Result, TangleError};
use crate::exec::block_paths;
use crate::llm::message::Message;
use crate::tree::{Node, NodeIdx, Role, Tree};

/// Build chat turns for an `@llm` operation.
pub(crate) fn chat_context(
    tree: &Tree,
    op: NodeIdx,
    params: &serde_yaml::Mapping,
) -> Result<Vec<Message>> {
    let indices = selected_indices(tree, op, params)?;
    let mut messages = group_into_messages(tree, &indices);

    if let Some(prompt) = params.get("prompt").and_then(|v| v.as_str()) {
        messages.push(Message::user(prompt));
    }
    if messages.is_empty() {
        return Err(TangleError::BlockNotFound(
            "@llm context is empty: no block content and no prompt".to_string(),
        ));
    }
    Ok(messages)
}

/// Build the input fragment for an `@run` operation: the same selection
/// rules, producing detached Markdown nodes instead of chat turns.
pub(crate) fn input_fragment(
    tree: &Tree,
    op: NodeIdx,
    params: &serde_yaml::Mapping,
) -> Result<Vec<Node>> {
    let indices = selected_indices(tree, op, params)?;
    let mut fragment = tree.clone_fragment(&indices);

    if let Some(prompt) = params.get("prompt").and_then(|v| v.as_str()) {
        let level = fragment.last().map(|n| n.level).unwrap_or(1);
        fragment.push(Node::content(level.max(1), prompt).with_role(Role::User));
    }
    Ok(fragment)
}

/// The node selection shared by both builders: resolved blocks when
/// `block` is present, else everything preceding the operation when
/// `prompt` stands alone.
fn selected_indices(
    tree: &Tree,
    op: NodeIdx,
    params: &serde_yaml::Mapping,
) -> Result<Vec<NodeIdx>> {
    if let Some(paths) = block_paths(params)? {
        return Ok(address::resolve_for_read(tree, &paths));
    }
    Ok(preceding_content(tree, op))
}

/// Heading and content nodes before `op` in document order.
fn preceding_content(tree: &Tree, op: NodeIdx) -> Vec<NodeIdx> {
    tree.iter()
        .take_while(|&idx| idx != op)
        .filter(|&idx| !tree.node(idx).is_operation())
        .collect()
}

/// Concatenate consecutive same-role nodes into single chat turns.
fn group_into_messages(tree: &Tree, indices: &[NodeIdx]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    let mut current_role: Option<Role> = None;
    let mut buffer: Vec<&str> = Vec::new();

    let flush = |role: Option<Role>, buffer: &mut Vec<&str>, messages: &mut Vec<Message>| {
        if buffer.is_empty() {
            return;
        }
        let text = buffer.join("\n");
        buffer.clear();
        match role {
            Some(Role::Assistant) => messages.push(Message::assistant(text)),
            _ => messages.push(Message::user(text)),
        }
    };

    for &idx in indices {
        let node = tree.node(idx);
        if current_role != Some(node.role) {
            flush(current_role, &mut buffer, &mut messages);
            current_role = Some(node.role);
        }
        buffer.push(&node.text);
    }
    flush(current_role, &mut buffer, &mut messages);
    messages
}
