// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! End-to-end workflow tests
//!
//! Drives whole documents through the executor with a mock chat provider
//! and real subprocess tools in a temp directory.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use tangle::config::{ProviderConfig, Settings};
use tangle::exec::Executor;
use tangle::llm::mock_provider::MockProvider;
use tangle::llm::provider::{ChatProvider, ProviderRegistry};
use tangle::render;
use tangle::session::MemorySnapshotStore;
use tangle::tools::ToolRegistry;
use tangle::tree::{NodeKind, Role};

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn write_echo_tool(tools_dir: &Path) {
    std::fs::create_dir_all(tools_dir).unwrap();
    let script = tools_dir.join("echo_tool.sh");
    std::fs::write(
        &script,
        r#"#!/bin/bash
if [ "$1" = '{"__test__": true}' ]; then
  echo '{"name": "echo_tool", "description": "Echoes its msg back", "properties": {"msg": {"type": "string"}}, "required": ["msg"]}'
else
  msg=$(echo "$1" | sed 's/.*"msg"[: ]*"\([^"]*\)".*/\1/')
  echo "{\"result\": \"$msg\"}"
fi
"#,
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();
}

struct Harness {
    temp: TempDir,
    store: Arc<MemorySnapshotStore>,
    mock: MockProvider,
    executor: Executor,
}

impl Harness {
    async fn new(mock: MockProvider) -> Self {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.default_provider = "mock".to_string();
        settings.providers.insert(
            "mock".to_string(),
            ProviderConfig {
                model: "mock-model".to_string(),
                ..Default::default()
            },
        );
        settings.timeouts.probe_ms = 5000;
        settings.limits.max_run_depth = 8;

        let mut providers = ProviderRegistry::new();
        let registered = mock.clone();
        providers.register("mock", move |_config| {
            Ok(Arc::new(registered.clone()) as Arc<dyn ChatProvider>)
        });

        let tools_dir = temp.path().join("tools");
        write_echo_tool(&tools_dir);
        let registry = Arc::new(ToolRegistry::new(tools_dir, &settings));
        registry.rescan().await.unwrap();

        let store = Arc::new(MemorySnapshotStore::new());
        let executor = Executor::new(settings, providers, registry, store.clone());
        Self {
            temp,
            store,
            mock,
            executor,
        }
    }

    fn dir(&self) -> &Path {
        self.temp.path()
    }
}

// Scenario 1: hello-shell

#[tokio::test]
async fn test_hello_shell() {
    let h = Harness::new(MockProvider::new()).await;
    let doc = write(h.dir(), "hello.md", "# A\n@shell\nprompt: echo hi\n");

    let report = h.executor.execute(&doc).await.unwrap();
    let tree = &report.tree;
    let nodes: Vec<_> = tree.iter().map(|i| tree.node(i).clone()).collect();

    assert_eq!(nodes[0].text, "# A");
    assert_eq!(nodes[1].kind, NodeKind::Operation);
    assert_eq!(nodes[2].text, "# OS Shell Tool response block");
    assert_eq!(nodes[2].role, Role::Assistant);
    assert_eq!(nodes[3].text, "hi");
}

// Scenario 2: goto with run-once

#[tokio::test]
async fn test_goto_with_run_once() {
    let h = Harness::new(MockProvider::new()).await;
    let doc = write(
        h.dir(),
        "loop.md",
        "# loop {id=loop}\n@shell\nprompt: echo tick\n\n@goto\nblock: loop\nrun-once: true\n",
    );

    let report = h.executor.execute(&doc).await.unwrap();
    let ticks = report
        .tree
        .iter()
        .filter(|&i| report.tree.node(i).text == "tick")
        .count();
    assert_eq!(ticks, 1);
}

// Scenario 3: import with replace

#[tokio::test]
async fn test_import_replace() {
    let h = Harness::new(MockProvider::new()).await;
    write(h.dir(), "t.md", "# x\nBODY\n");
    let main = write(
        h.dir(),
        "main.md",
        "# slot {id=slot}\nplaceholder\n@import\nfile: t.md\nblock: x\nmode: replace\nto: slot\n",
    );

    let report = h.executor.execute(&main).await.unwrap();
    let tree = &report.tree;

    assert!(tree.find_by_id_or_key("slot").is_none());
    assert!(tree.find_by_id_or_key("x").is_some());
    let rendered = render::render(tree);
    assert!(rendered.contains("BODY"));
    assert!(!rendered.contains("placeholder"));
}

// Scenario 4: return fragment through @run

#[tokio::test]
async fn test_return_fragment_through_run() {
    let h = Harness::new(MockProvider::new()).await;
    write(
        h.dir(),
        "child.md",
        "# out {id=out}\nDATA\n@return\nblock: out\n",
    );
    let parent = write(
        h.dir(),
        "parent.md",
        "# here {id=here}\n@run\nfile: child.md\nto: here\nmode: append\n",
    );

    let report = h.executor.execute(&parent).await.unwrap();
    let tree = &report.tree;

    let out = tree.find_by_id_or_key("out").unwrap();
    let children = tree.children_under(out);
    assert_eq!(children.len(), 1);
    assert_eq!(tree.node(children[0]).text, "DATA");

    // Nothing else from child.md was merged
    let rendered = render::render(tree);
    assert!(!rendered.contains("@return"));
}

// Scenario 5: LLM with tool loop

#[tokio::test]
async fn test_llm_with_tool_loop() {
    let mock = MockProvider::new().with_tool_call_then_text(
        "echo_tool",
        serde_json::json!({"msg": "hi"}),
        "the tool replied with hi",
    );
    let h = Harness::new(mock).await;
    let doc = write(
        h.dir(),
        "tooluse.md",
        "# Task\n@llm\nprompt: call echo_tool with {msg:hi} then summarize\ntools: [echo_tool]\n",
    );

    let report = h.executor.execute(&doc).await.unwrap();

    // Assistant heading and text mentioning hi
    let tree = &report.tree;
    let heading = tree
        .iter()
        .find(|&i| tree.node(i).text == "# LLM response block")
        .unwrap();
    assert_eq!(tree.node(heading).role, Role::Assistant);
    let rendered = render::render(tree);
    assert!(rendered.contains("hi"));

    // The trace records exactly one call with the right payloads
    let calls = report.call_tree.all_tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "echo_tool");
    assert_eq!(calls[0].arguments, serde_json::json!({"msg": "hi"}));
    assert_eq!(calls[0].result, serde_json::json!({"result": "hi"}));

    // The .trc on disk carries the same record
    let trc = std::fs::read_to_string(report.artifacts.trc_path.unwrap()).unwrap();
    assert!(trc.contains("echo_tool"));

    // Tool-call turn plus the summarizing turn
    assert_eq!(h.mock.call_count(), 2);
}

// Scenario 6: parse failure

#[tokio::test]
async fn test_parse_failure() {
    let h = Harness::new(MockProvider::new()).await;
    let doc = write(h.dir(), "bad.md", "@unknown\nfoo: 1\n");

    let err = h.executor.execute(&doc).await.unwrap_err();
    assert_eq!(err.kind(), "ParseError");
    assert_eq!(err.exit_code(), 1);

    // No partially-executed tree was persisted
    assert!(!doc.with_extension("ctx").exists());
    assert!(!doc.with_extension("trc").exists());
}

// Runaway mutual recursion terminates only via the depth limit

#[tokio::test]
async fn test_runaway_mutual_run_hits_depth_limit() {
    let h = Harness::new(MockProvider::new()).await;
    write(h.dir(), "a.md", "# A\n@run\nfile: b.md\n");
    write(h.dir(), "b.md", "# B\n@run\nfile: a.md\n");
    let doc = h.dir().join("a.md");

    let err = h.executor.execute(&doc).await.unwrap_err();
    assert_eq!(err.kind(), "ChildFailed");
    assert_eq!(err.root().kind(), "Internal");
    assert!(err.root().to_string().contains("depth"));
}

// Quantified properties after a real multi-operation run

#[tokio::test]
async fn test_key_uniqueness_and_link_integrity_after_run() {
    let h = Harness::new(MockProvider::new()).await;
    write(h.dir(), "part.md", "# Part {id=part}\nimported text\n");
    let doc = write(
        h.dir(),
        "main.md",
        "# Work {id=work}\nsome prose\n@import\nfile: part.md\nblock: part\n\n@shell\nprompt: echo done\n",
    );

    let report = h.executor.execute(&doc).await.unwrap();
    let tree = &report.tree;

    // Key uniqueness
    let keys: std::collections::HashSet<String> =
        tree.iter().map(|i| tree.node(i).key.clone()).collect();
    assert_eq!(keys.len(), tree.len());

    // Link integrity: n.prev.next == n and n.next.prev == n
    for idx in tree.iter().collect::<Vec<_>>() {
        if let Some(p) = tree.prev(idx) {
            assert_eq!(tree.next(p), Some(idx));
        }
        if let Some(n) = tree.next(idx) {
            assert_eq!(tree.prev(n), Some(idx));
        }
    }
    tree.check_integrity().unwrap();
}

#[tokio::test]
async fn test_replace_leaves_no_premerge_nodes() {
    let h = Harness::new(MockProvider::new()).await;
    write(h.dir(), "new.md", "# Fresh {id=fresh}\nnew content\n");
    let doc = write(
        h.dir(),
        "main.md",
        "# Old {id=old}\nstale one\n## Nested\nstale two\n# Anchor\n@import\nfile: new.md\nmode: replace\nto: old\n",
    );

    let report = h.executor.execute(&doc).await.unwrap();
    let tree = &report.tree;

    assert!(tree.find_by_id_or_key("old").is_none());
    assert!(tree.find_by_id_or_key("nested").is_none());
    let rendered = render::render(tree);
    assert!(!rendered.contains("stale"));
    assert!(rendered.contains("new content"));
}

#[tokio::test]
async fn test_round_trip_of_executed_tree() {
    let h = Harness::new(MockProvider::new()).await;
    let doc = write(h.dir(), "rt.md", "# A {id=a}\nprose\n@shell\nprompt: echo out\n");

    let report = h.executor.execute(&doc).await.unwrap();
    let rendered = render::render(&report.tree);

    let reparsed = tangle::parser::parse_document(
        &rendered,
        &tangle::tree::KeyGen::with_salt(99),
    )
    .unwrap();
    let rerendered = render::render(&reparsed);
    assert_eq!(rendered, rerendered);
}

#[tokio::test]
async fn test_ctx_file_written_on_success_and_failure() {
    let h = Harness::new(MockProvider::new()).await;
    let ok_doc = write(h.dir(), "ok.md", "# A\n@shell\nprompt: echo fine\n");
    h.executor.execute(&ok_doc).await.unwrap();
    let ctx = std::fs::read_to_string(ok_doc.with_extension("ctx")).unwrap();
    assert!(ctx.contains("fine"));

    let bad_doc = write(
        h.dir(),
        "fails.md",
        "# A\n@shell\nprompt: echo partial\n\n@shell\nprompt: exit 2\n",
    );
    let err = h.executor.execute(&bad_doc).await.unwrap_err();
    assert_eq!(err.kind(), "ShellError");
    // Partial mutations preserved for debugging
    let ctx = std::fs::read_to_string(bad_doc.with_extension("ctx")).unwrap();
    assert!(ctx.contains("partial"));
}

#[tokio::test]
async fn test_snapshot_labels_recorded() {
    let h = Harness::new(MockProvider::new()).await;
    let doc = write(h.dir(), "snap.md", "# A\nnothing to do\n");

    h.executor.execute(&doc).await.unwrap();
    let labels = h.store.labels();
    assert_eq!(labels.len(), 2);
    let re = regex::Regex::new(r"^\d{14}_[0-9a-f]{8}_snap").unwrap();
    assert!(re.is_match(&labels[0]), "bad label {}", labels[0]);
    assert!(labels[1].contains("snap-done"));
}

#[tokio::test]
async fn test_llm_streaming_without_tools_records_no_fan_out() {
    let mock = MockProvider::new().with_response("plain streamed answer");
    let h = Harness::new(mock).await;
    let doc = write(h.dir(), "plain.md", "# Q\nquestion text\n@llm\nprompt: answer\n");

    let report = h.executor.execute(&doc).await.unwrap();
    assert!(report.call_tree.all_tool_calls().is_empty());
    let rendered = render::render(&report.tree);
    assert!(rendered.contains("plain streamed answer"));
}

#[tokio::test]
async fn test_run_uses_context_inheritance() {
    let h = Harness::new(MockProvider::new()).await;
    // The child returns everything it received as input
    write(
        h.dir(),
        "child.md",
        "# C\n@return\nblock: input-parameters/*\n",
    );
    let parent = write(
        h.dir(),
        "parent.md",
        "# Facts {id=facts}\nthe caller knows this\n@run\nfile: child.md\nprompt: child instructions\n",
    );

    let report = h.executor.execute(&parent).await.unwrap();
    let rendered = render::render(&report.tree);
    // The child saw both the caller's document and the prompt
    assert_eq!(rendered.matches("the caller knows this").count(), 2);
    assert!(rendered.contains("child instructions"));
}

#[tokio::test]
async fn test_mock_provider_sees_roles_from_generated_content() {
    let mock = MockProvider::new().with_response("second answer");
    let recorder = mock.clone();
    let h = Harness::new(mock).await;
    // First @llm produces assistant content; the second one's context must
    // carry it as an assistant turn
    let doc = write(
        h.dir(),
        "twice.md",
        "# Q\nfirst question\n@llm\nprompt: one\n\n@llm\nprompt: two\n",
    );

    h.executor.execute(&doc).await.unwrap();
    let requests = recorder.recorded_requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    use tangle::llm::ChatRole;
    let roles: Vec<ChatRole> = second.messages.iter().map(|m| m.role).collect();
    assert!(roles.contains(&ChatRole::Assistant));
    assert_eq!(*roles.last().unwrap(), ChatRole::User);
}
