// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Markdown parser
//!
//! Turns a document into a tree in two passes: pass one tokenizes lines
//! into headings, operation openers and content runs; pass two parses each
//! operation's YAML body and validates it against the operation schema.
//!
//! A YAML body always ends at the first blank line. That is a parser
//! invariant: YAML is never continued across blanks even where YAML itself
//! would allow it.

use std::collections::HashSet;

use regex::Regex;

use crate::error::{Result, TangleError};
use crate::exec::schema;
use crate::tree::{is_valid_id, slugify, KeyGen, Node, Role, Tree};

/// Recognized operation names.
pub const OPERATIONS: [&str; 6] = ["import", "llm", "shell", "run", "return", "goto"];

fn heading_re() -> Regex {
    Regex::new(r"^(#{1,6})\s+(.*)$").unwrap()
}

fn operation_re() -> Regex {
    Regex::new(r"^@([a-z][a-z0-9_-]*)\s*$").unwrap()
}

fn id_suffix_re() -> Regex {
    Regex::new(r"\{id=([^}]*)\}\s*$").unwrap()
}

/// Parse a document into a tree, issuing node keys from `keygen`.
pub fn parse_document(source: &str, keygen: &KeyGen) -> Result<Tree> {
    let nodes = parse_nodes(source)?;
    Ok(Tree::from_nodes(nodes, keygen))
}

/// Parse a document into a detached, unkeyed node list.
///
/// Used directly when the result is a fragment to be spliced into an
/// existing tree (`@run` input, generated output).
pub fn parse_nodes(source: &str) -> Result<Vec<Node>> {
    let heading = heading_re();
    let operation = operation_re();
    let lines: Vec<&str> = source.lines().collect();

    let mut nodes: Vec<Node> = Vec::new();
    let mut current_level = 0usize;
    // Scope stack for sibling id dedup: (heading level, ids used directly
    // under that heading). The level-0 entry is the document root.
    let mut scopes: Vec<(usize, HashSet<String>)> = vec![(0, HashSet::new())];
    let mut content_run: Vec<&str> = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = heading.captures(line) {
            flush_content(&mut nodes, &mut content_run, current_level);

            let level = caps[1].len();
            let title = caps[2].to_string();
            let (display, id) = heading_id(&title, i + 1)?;
            let id = id.map(|raw| dedup_id(raw, level, &mut scopes));

            current_level = level;
            let mut node = Node::heading(level, display, line.to_string());
            node.id = id;
            nodes.push(node);
            i += 1;
            continue;
        }

        if let Some(caps) = operation.captures(line) {
            flush_content(&mut nodes, &mut content_run, current_level);

            let name = caps[1].to_string();
            let op_line = i + 1;
            if !OPERATIONS.contains(&name.as_str()) {
                return Err(TangleError::parse_at(
                    format!("unknown operation '@{}'", name),
                    op_line,
                ));
            }

            // Body runs to the first blank line
            let mut body_lines: Vec<&str> = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim().is_empty() {
                body_lines.push(lines[i]);
                i += 1;
            }

            let body = body_lines.join("\n");
            let params = parse_yaml_body(&body, op_line)?;
            schema::validate(&name, &params).map_err(|e| at_line(e, op_line))?;

            let mut text = format!("@{}", name);
            if !body.is_empty() {
                text.push('\n');
                text.push_str(&body);
            }
            nodes.push(Node::operation(name, current_level, params, text));
            continue;
        }

        content_run.push(line);
        i += 1;
    }
    flush_content(&mut nodes, &mut content_run, current_level);

    Ok(nodes)
}

/// Parse a single header line (as given in `use-header`) into a heading
/// node. A line without `#` markers becomes a level-1 heading. An invalid
/// explicit id falls back to the derived slug.
pub fn heading_node_from_line(line: &str) -> Node {
    let line = line.trim();
    if let Some(caps) = heading_re().captures(line) {
        let level = caps[1].len();
        let title = caps[2].to_string();
        let (display, id) = match heading_id(&title, 0) {
            Ok(parsed) => parsed,
            Err(_) => (title.clone(), slugify(&title)),
        };
        let mut node = Node::heading(level, display, line.to_string());
        node.id = id;
        return node;
    }
    let mut node = Node::heading(1, line.to_string(), format!("# {}", line));
    node.id = slugify(line);
    node
}

fn flush_content(nodes: &mut Vec<Node>, run: &mut Vec<&str>, heading_level: usize) {
    if run.is_empty() {
        return;
    }
    let text = run.join("\n");
    run.clear();
    // Prose sits one level below its heading so the heading owns it;
    // preamble before any heading stays at level 0
    let level = if heading_level == 0 { 0 } else { heading_level + 1 };
    nodes.push(Node::content(level, text).with_role(Role::User));
}

/// Split a heading title into display text and id: an explicit `{id=...}`
/// suffix wins, otherwise the title is kebab-cased.
fn heading_id(title: &str, line: usize) -> Result<(String, Option<String>)> {
    if let Some(caps) = id_suffix_re().captures(title) {
        let id = caps[1].to_string();
        if !is_valid_id(&id) {
            return Err(TangleError::parse_at(
                format!("invalid block id '{}': ids match [A-Za-z][A-Za-z0-9_-]*", id),
                line,
            ));
        }
        let display = id_suffix_re().replace(title, "").trim_end().to_string();
        return Ok((display, Some(id)));
    }
    Ok((title.to_string(), slugify(title)))
}

/// Resolve id collisions among siblings by appending `-2`, `-3`, ... in
/// document order.
fn dedup_id(raw: String, level: usize, scopes: &mut Vec<(usize, HashSet<String>)>) -> String {
    while scopes.last().map(|(l, _)| *l >= level).unwrap_or(false) && scopes.len() > 1 {
        scopes.pop();
    }
    let siblings = &mut scopes.last_mut().unwrap().1;
    let id = if siblings.contains(&raw) {
        let mut n = 2usize;
        loop {
            let candidate = format!("{}-{}", raw, n);
            if !siblings.contains(&candidate) {
                break candidate;
            }
            n += 1;
        }
    } else {
        raw
    };
    siblings.insert(id.clone());
    scopes.push((level, HashSet::new()));
    id
}

fn parse_yaml_body(body: &str, op_line: usize) -> Result<serde_yaml::Mapping> {
    if body.trim().is_empty() {
        return Ok(serde_yaml::Mapping::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(body)
        .map_err(|e| at_line(TangleError::from(e), op_line))?;
    match value {
        serde_yaml::Value::Mapping(map) => Ok(map),
        _ => Err(TangleError::parse_at(
            "operation body must be a YAML mapping",
            op_line,
        )),
    }
}

/// Re-anchor an error to the operation's line when it carries none.
fn at_line(err: TangleError, line: usize) -> TangleError {
    match err {
        TangleError::Parse { message, line: None } => TangleError::Parse {
            message,
            line: Some(line),
        },
        other => other,
    }
}
