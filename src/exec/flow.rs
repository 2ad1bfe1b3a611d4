// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The `@return` and `@goto` operations
//!
//! `@return` builds a fragment from its resolved blocks and prompt and
//! halts the current run with it. `@goto` jumps the cursor to a heading in
//! the current tree; combined with the run-once guard it is the only loop
//! construct.

use crate::address;
use crate::error::{Result, TangleError};
use crate::exec::{block_paths, header_choice, Directive, OpContext};
use crate::parser;
use crate::tree::{Node, Role};

pub(crate) fn execute_return(ctx: &mut OpContext<'_>) -> Result<Directive> {
    let params = &ctx.node.params;
    let mut fragment: Vec<Node> = Vec::new();

    if let Some(paths) = block_paths(params)? {
        let indices = address::resolve_for_read(ctx.tree, &paths);
        fragment.extend(ctx.tree.clone_fragment(&indices));
    }
    if let Some(prompt) = params.get("prompt").and_then(|v| v.as_str()) {
        let level = fragment.last().map(|n| n.level).unwrap_or(1).max(1);
        fragment.push(Node::content(level, prompt).with_role(Role::User));
    }

    if let Some(header_line) = header_choice(params, "").filter(|h| !h.is_empty()) {
        let heading = parser::heading_node_from_line(&header_line);
        fragment.insert(0, heading);
    }

    tracing::debug!(nodes = fragment.len(), "explicit return");
    Ok(Directive::Halt(fragment))
}

pub(crate) fn execute_goto(ctx: &mut OpContext<'_>) -> Result<Directive> {
    let target_id = ctx
        .node
        .params
        .get("block")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TangleError::parse("@goto: 'block' is required"))?;

    let target = ctx
        .tree
        .find_by_id_or_key(target_id)
        .ok_or_else(|| TangleError::BlockNotFound(target_id.to_string()))?;
    if !ctx.tree.node(target).is_heading() {
        return Err(TangleError::BlockNotFound(format!(
            "@goto target '{}' is not a heading",
            target_id
        )));
    }

    tracing::debug!(target = %target_id, "jump");
    Ok(Directive::Jump(target))
}

#[cfg(test)]
mod tests {
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
    async fn test_return_halts_run() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "ret.md",
            "# A {id=a}\nkept\n@return\nblock: a\n@shell\nprompt: echo never\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        assert!(report.explicit_return);
        let texts: Vec<&str> = report
            .return_fragment
            .iter()
            .map(|n| n.text.as_str())
            .collect();
        assert_eq!(texts, vec!["# A {id=a}", "kept"]);

        // The shell after the return never ran
        let rendered = crate::render::render(&report.tree);
        assert!(!rendered.contains("never\n"));
    }

    #[tokio::test]
    async fn test_return_prompt_only() {
        let temp = TempDir::new().unwrap();
        let doc = write(&temp, "ret.md", "# A\n@return\nprompt: the result\n");

        let report = executor(&temp).execute(&doc).await.unwrap();
        assert!(report.explicit_return);
        assert_eq!(report.return_fragment.len(), 1);
        assert_eq!(report.return_fragment[0].text, "the result");
    }

    #[tokio::test]
    async fn test_return_blocks_then_prompt_order() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "ret.md",
            "# A {id=a}\nfirst\n@return\nblock: a\nprompt: second\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        let texts: Vec<&str> = report
            .return_fragment
            .iter()
            .map(|n| n.text.as_str())
            .collect();
        assert_eq!(texts, vec!["# A {id=a}", "first", "second"]);
    }

    #[tokio::test]
    async fn test_return_with_header() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "ret.md",
            "# A\n@return\nprompt: body\nuse-header: \"# Result {id=result}\"\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        assert_eq!(report.return_fragment[0].id.as_deref(), Some("result"));
    }

    #[tokio::test]
    async fn test_goto_with_run_once_scenario() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "loop.md",
            "# loop {id=loop}\n@shell\nprompt: echo tick\n\n@goto\nblock: loop\nrun-once: true\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        report.tree.check_integrity().unwrap();

        // Exactly one tick content node exists and the run terminated
        let ticks = report
            .tree
            .iter()
            .filter(|&i| report.tree.node(i).text == "tick")
            .count();
        assert_eq!(ticks, 1);
    }

    #[tokio::test]
    async fn test_goto_missing_target_fatal() {
        let temp = TempDir::new().unwrap();
        let doc = write(&temp, "go.md", "# A\n@goto\nblock: nowhere\n");

        let err = executor(&temp).execute(&doc).await.unwrap_err();
        assert_eq!(err.kind(), "BlockNotFound");
    }

    #[tokio::test]
    async fn test_goto_without_run_once_terminates_via_fired_guard() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "loop.md",
            "# loop {id=loop}\n@shell\nprompt: echo once\n\n@goto\nblock: loop\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        let count = report
            .tree
            .iter()
            .filter(|&i| report.tree.node(i).text == "once")
            .count();
        assert_eq!(count, 1);
    }
}
