// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The `@run` operation
//!
//! Parses the target file into a fresh child tree (never sharing nodes
//! with the caller), prepends the computed input fragment under
//! `# Input Parameters {id=input-parameters}`, and executes the child
//! recursively. The child's return value is its `@return` fragment when it
//! halted explicitly, otherwise the entire final child tree. A child
//! failure surfaces as `ChildFailed` wrapping the original error.

use crate::error::{Result, TangleError};
use crate::exec::{context, header_choice, merge_output, Directive, OpContext};
use crate::parser;
use crate::tree::{Node, Role, Tree};

/// Header for the input fragment prepended to the child document.
pub const INPUT_HEADER: &str = "# Input Parameters {id=input-parameters}";

pub(crate) async fn execute(ctx: &mut OpContext<'_>) -> Result<Directive> {
    let file = ctx
        .node
        .params
        .get("file")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TangleError::parse("@run: 'file' is required"))?;
    let child_path = ctx.dir.join(file);
    let source = std::fs::read_to_string(&child_path)
        .map_err(|_| TangleError::FileNotFound(child_path.clone()))?;

    let input = input_for_child(ctx)?;
    let child_tree = match build_child_tree(ctx, &source, input) {
        Ok(tree) => tree,
        Err(err) => {
            return Err(TangleError::ChildFailed {
                file: child_path,
                source: Box::new(err),
            })
        }
    };

    tracing::debug!(file = %child_path.display(), depth = ctx.depth + 1, "entering child run");
    let outcome = ctx
        .executor
        .run_tree(
            child_tree,
            child_path.clone(),
            ctx.depth + 1,
            Some(ctx.node.key.clone()),
        )
        .await;
    ctx.frame.push_child(outcome.frame);

    if let Some(err) = outcome.error {
        return Err(TangleError::ChildFailed {
            file: child_path,
            source: Box::new(err),
        });
    }

    let mut fragment: Vec<Node> = if outcome.explicit_return {
        outcome.return_fragment
    } else {
        // Operations are statements of the child, not its output
        let indices: Vec<_> = outcome
            .tree
            .iter()
            .filter(|&i| !outcome.tree.node(i).is_operation())
            .collect();
        outcome.tree.clone_fragment(&indices)
    };
    for node in &mut fragment {
        node.key.clear();
        node.role = Role::Assistant;
    }

    merge_output(ctx, fragment)?;
    Ok(Directive::Advance)
}

/// Push every fragment node one level deeper, rewriting heading markers
/// to match. Heading levels cap at 6.
fn demote(fragment: &mut [Node]) {
    for node in fragment.iter_mut() {
        node.level += 1;
        if node.is_heading() {
            node.level = node.level.min(6);
            let rest = node.text.trim_start_matches('#').trim_start();
            node.text = format!("{} {}", "#".repeat(node.level), rest);
        }
    }
}

/// Build the child's input fragment from the caller tree, or `None` when
/// the operation supplies neither `prompt` nor `block`.
fn input_for_child(ctx: &OpContext<'_>) -> Result<Option<Vec<Node>>> {
    let params = &ctx.node.params;
    if !params.contains_key("prompt") && !params.contains_key("block") {
        return Ok(None);
    }
    let fragment = context::input_fragment(ctx.tree, ctx.op, params)?;
    if fragment.is_empty() {
        return Ok(None);
    }
    Ok(Some(fragment))
}

fn build_child_tree(
    ctx: &OpContext<'_>,
    source: &str,
    input: Option<Vec<Node>>,
) -> Result<Tree> {
    let keygen = ctx.executor.keygen();
    let mut child = parser::parse_document(source, keygen)?;

    if let Some(mut fragment) = input {
        if let Some(header_line) = header_choice(&ctx.node.params, INPUT_HEADER) {
            // Demote the fragment one level so it nests under the header
            // and stays addressable as input-parameters/*
            demote(&mut fragment);
            let mut with_header = vec![parser::heading_node_from_line(&header_line)];
            with_header.append(&mut fragment);
            fragment = with_header;
        }
        match child.head() {
            Some(head) => {
                child.insert(head, fragment, crate::tree::MergeMode::Prepend, keygen)?;
            }
            None => {
                for node in fragment {
                    child.push_back(node, keygen);
                }
            }
        }
    }
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exec::Executor;
    use crate::llm::provider::ProviderRegistry;
    use crate::session::MemorySnapshotStore;
    use crate::tools::ToolRegistry;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn executor(temp: &TempDir) -> Executor {
        let settings = Settings::default();
        let registry = Arc::new(ToolRegistry::new(temp.path().join("tools"), &settings));
        Executor::new(
            settings,
            ProviderRegistry::new(),
            registry,
            Arc::new(MemorySnapshotStore::new()),
        )
    }

    fn write(temp: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = temp.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_return_fragment_through_run_scenario() {
        let temp = TempDir::new().unwrap();
        write(&temp, "child.md", "# out {id=out}\nDATA\n@return\nblock: out\n");
        let parent = write(
            &temp,
            "parent.md",
            "# here {id=here}\n@run\nfile: child.md\nto: here\nmode: append\n",
        );

        let report = executor(&temp).execute(&parent).await.unwrap();
        let tree = &report.tree;
        tree.check_integrity().unwrap();

        let here = tree.find_by_id_or_key("here").unwrap();
        let texts: Vec<String> = tree.iter().map(|i| tree.node(i).text.clone()).collect();

        // The returned fragment landed under `here`
        assert!(texts.contains(&"# out {id=out}".to_string()));
        assert!(texts.contains(&"DATA".to_string()));
        // Nothing else from child.md was merged
        assert!(!texts.iter().any(|t| t.starts_with("@return")));

        // The out heading sits right after the region of `here`
        let out = tree.find_by_id_or_key("out").unwrap();
        assert!(tree.iter().position(|i| i == out).unwrap()
            > tree.iter().position(|i| i == here).unwrap());
        assert_eq!(tree.node(out).role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_run_without_return_merges_whole_tree() {
        let temp = TempDir::new().unwrap();
        write(&temp, "child.md", "# Child Output {id=co}\nresult text\n");
        let parent = write(&temp, "parent.md", "# P\n@run\nfile: child.md\n");

        let report = executor(&temp).execute(&parent).await.unwrap();
        let texts: Vec<String> = report
            .tree
            .iter()
            .map(|i| report.tree.node(i).text.clone())
            .collect();
        assert!(texts.contains(&"# Child Output {id=co}".to_string()));
        assert!(texts.contains(&"result text".to_string()));
    }

    #[tokio::test]
    async fn test_run_prepends_input_parameters() {
        let temp = TempDir::new().unwrap();
        // The child echoes back whether it saw the input block
        write(
            &temp,
            "child.md",
            "# C\nchild body\n@return\nblock: input-parameters/*\n",
        );
        let parent = write(
            &temp,
            "parent.md",
            "# Data {id=data}\npayload\n@run\nfile: child.md\nblock: data\n",
        );

        let report = executor(&temp).execute(&parent).await.unwrap();
        let texts: Vec<String> = report
            .tree
            .iter()
            .map(|i| report.tree.node(i).text.clone())
            .collect();
        // The returned fragment is the input header with the payload
        assert!(texts.contains(&INPUT_HEADER.to_string()));
        assert_eq!(texts.iter().filter(|t| *t == "payload").count(), 2);
    }

    #[tokio::test]
    async fn test_run_isolation_caller_unchanged_before_merge() {
        let temp = TempDir::new().unwrap();
        // The child replaces its own content; the caller must keep its own
        write(
            &temp,
            "child.md",
            "# Mine {id=mine}\nchild private\n@return\nprompt: done\n",
        );
        let parent = write(
            &temp,
            "parent.md",
            "# Keep {id=keep}\ncaller text\n@run\nfile: child.md\nuse-header: none\n",
        );

        let report = executor(&temp).execute(&parent).await.unwrap();
        let keep = report.tree.find_by_id_or_key("keep").unwrap();
        assert_eq!(report.tree.node(keep).text, "# Keep {id=keep}");
        let texts: Vec<String> = report
            .tree
            .iter()
            .map(|i| report.tree.node(i).text.clone())
            .collect();
        assert!(texts.contains(&"caller text".to_string()));
        assert!(texts.contains(&"done".to_string()));
        // Child-private content stayed in the child
        assert!(!texts.contains(&"child private".to_string()));
    }

    #[tokio::test]
    async fn test_run_missing_file_fatal() {
        let temp = TempDir::new().unwrap();
        let parent = write(&temp, "parent.md", "# P\n@run\nfile: ghost.md\n");

        let err = executor(&temp).execute(&parent).await.unwrap_err();
        assert_eq!(err.kind(), "FileNotFound");
    }

    #[tokio::test]
    async fn test_child_failure_wrapped() {
        let temp = TempDir::new().unwrap();
        write(&temp, "child.md", "# C\n@shell\nprompt: exit 7\n");
        let parent = write(&temp, "parent.md", "# P\n@run\nfile: child.md\n");

        let err = executor(&temp).execute(&parent).await.unwrap_err();
        assert_eq!(err.kind(), "ChildFailed");
        assert_eq!(err.root().kind(), "ShellError");
        // Caller's partial state still recorded
        assert!(parent.with_extension("ctx").exists());
    }

    #[tokio::test]
    async fn test_child_parse_error_wrapped() {
        let temp = TempDir::new().unwrap();
        write(&temp, "child.md", "@unknown\nx: 1\n");
        let parent = write(&temp, "parent.md", "# P\n@run\nfile: child.md\n");

        let err = executor(&temp).execute(&parent).await.unwrap_err();
        assert_eq!(err.kind(), "ChildFailed");
        assert_eq!(err.root().kind(), "ParseError");
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_call_tree_records_child_frame() {
        let temp = TempDir::new().unwrap();
        write(&temp, "child.md", "# C\ncontent\n");
        let parent = write(&temp, "parent.md", "# P\n@run\nfile: child.md\n");

        let report = executor(&temp).execute(&parent).await.unwrap();
        assert_eq!(report.call_tree.children.len(), 1);
        let child_frame = &report.call_tree.children[0];
        assert!(child_frame.file.ends_with("child.md"));
        assert!(child_frame.caller_operation_key.is_some());
    }
}
