// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The `@shell` operation
//!
//! Spawns a shell in the current document's directory with the inherited
//! environment plus the configured variables, feeds the prompt to its
//! standard input, and collects stdout until completion. Stderr never
//! enters the tree; it goes to the log. A non-zero exit status is fatal.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{Result, TangleError};
use crate::exec::{header_choice, merge_output, wrap_output, Directive, OpContext};

/// Header wrapped around shell output unless suppressed.
pub const DEFAULT_HEADER: &str = "# OS Shell Tool response block";

pub(crate) async fn execute(ctx: &mut OpContext<'_>) -> Result<Directive> {
    let prompt = ctx
        .node
        .params
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TangleError::parse("@shell: 'prompt' is required"))?;

    let shell_timeout = Duration::from_secs(ctx.executor.settings().timeouts.shell_secs);
    let stdout = run_shell(
        prompt,
        ctx.dir,
        &ctx.executor.settings().environment,
        shell_timeout,
    )
    .await?;

    let header = header_choice(&ctx.node.params, DEFAULT_HEADER);
    let fragment = wrap_output(&stdout, header.as_deref(), ctx.node.level);
    merge_output(ctx, fragment)?;
    Ok(Directive::Advance)
}

async fn run_shell(
    prompt: &str,
    dir: &std::path::Path,
    environment: &std::collections::HashMap<String, String>,
    shell_timeout: Duration,
) -> Result<String> {
    let mut child = Command::new("sh")
        .current_dir(dir)
        .envs(environment)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child.stdin.take();
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let prompt = prompt.to_string();

    let waited = timeout(shell_timeout, async move {
        if let Some(pipe) = stdin.as_mut() {
            pipe.write_all(prompt.as_bytes()).await?;
        }
        drop(stdin);

        // Drain both pipes concurrently; a sequential read deadlocks a
        // child that fills the other pipe's buffer
        let mut stdout = String::new();
        let mut stderr = String::new();
        let stdout_read = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let stderr_read = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                pipe.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (stdout_result, stderr_result) = tokio::join!(stdout_read, stderr_read);
        stdout_result?;
        stderr_result?;

        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    })
    .await;

    match waited {
        Ok(Ok((status, stdout, stderr))) => {
            if !stderr.is_empty() {
                tracing::debug!(stderr = %stderr.trim_end(), "shell stderr");
            }
            if !status.success() {
                return Err(TangleError::Shell {
                    status: status.code().unwrap_or(-1),
                    stderr,
                });
            }
            Ok(stdout)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(TangleError::Cancelled(format!(
            "shell command timed out after {}s",
            shell_timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exec::Executor;
    use crate::llm::provider::ProviderRegistry;
    use crate::session::MemorySnapshotStore;
    use crate::tools::ToolRegistry;
    use crate::tree::{NodeKind, Role};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn executor_with(temp: &TempDir, settings: Settings) -> Executor {
        let registry = Arc::new(ToolRegistry::new(temp.path().join("tools"), &settings));
        Executor::new(
            settings,
            ProviderRegistry::new(),
            registry,
            Arc::new(MemorySnapshotStore::new()),
        )
    }

    fn executor(temp: &TempDir) -> Executor {
        executor_with(temp, Settings::default())
    }

    fn write(temp: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = temp.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_hello_shell_scenario() {
        let temp = TempDir::new().unwrap();
        let doc = write(&temp, "hello.md", "# A\n@shell\nprompt: echo hi\n");

        let report = executor(&temp).execute(&doc).await.unwrap();
        let tree = &report.tree;
        tree.check_integrity().unwrap();

        let nodes: Vec<_> = tree.iter().map(|i| tree.node(i).clone()).collect();
        assert_eq!(nodes[0].text, "# A");
        assert_eq!(nodes[1].kind, NodeKind::Operation);
        assert_eq!(nodes[2].text, DEFAULT_HEADER);
        assert_eq!(nodes[2].kind, NodeKind::Heading);
        assert_eq!(nodes[2].role, Role::Assistant);
        assert_eq!(nodes[3].text, "hi");
        assert_eq!(nodes[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_shell_runs_in_document_directory() {
        let temp = TempDir::new().unwrap();
        write(&temp, "marker.txt", "present");
        let doc = write(&temp, "dir.md", "# A\n@shell\nprompt: cat marker.txt\n");

        let report = executor(&temp).execute(&doc).await.unwrap();
        let texts: Vec<String> = report
            .tree
            .iter()
            .map(|i| report.tree.node(i).text.clone())
            .collect();
        assert!(texts.contains(&"present".to_string()));
    }

    #[tokio::test]
    async fn test_shell_environment_exported() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings
            .environment
            .insert("TANGLE_TEST_VAR".to_string(), "from-config".to_string());
        let doc = write(&temp, "env.md", "# A\n@shell\nprompt: printf \"%s\" \"$TANGLE_TEST_VAR\"\n");

        let report = executor_with(&temp, settings).execute(&doc).await.unwrap();
        let texts: Vec<String> = report
            .tree
            .iter()
            .map(|i| report.tree.node(i).text.clone())
            .collect();
        assert!(texts.contains(&"from-config".to_string()));
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit_fatal() {
        let temp = TempDir::new().unwrap();
        let doc = write(&temp, "fail.md", "# A\n@shell\nprompt: exit 3\n");

        let err = executor(&temp).execute(&doc).await.unwrap_err();
        assert_eq!(err.kind(), "ShellError");
        assert!(err.to_string().contains("3"));
        // The recorder preserved the partial state
        assert!(doc.with_extension("ctx").exists());
    }

    #[tokio::test]
    async fn test_shell_stderr_not_in_tree() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "err.md",
            "# A\n@shell\nprompt: echo visible; echo hidden 1>&2\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        let rendered = crate::render::render(&report.tree);
        assert!(rendered.contains("visible"));
        assert!(!rendered.contains("hidden"));
    }

    #[tokio::test]
    async fn test_shell_large_stderr_does_not_deadlock() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.timeouts.shell_secs = 20;
        // Floods stderr well past the OS pipe buffer before exiting 0
        let doc = write(
            &temp,
            "flood.md",
            "# A\n@shell\nprompt: |\n  i=0\n  while [ $i -lt 20000 ]; do\n    echo stderr-flood-line 1>&2\n    i=$((i+1))\n  done\n  echo ok\n",
        );

        let report = executor_with(&temp, settings).execute(&doc).await.unwrap();
        let tree = &report.tree;
        let output = tree
            .iter()
            .find(|&i| tree.node(i).role == Role::Assistant && !tree.node(i).is_heading())
            .unwrap();
        // Stdout came through whole and none of the stderr flood did
        assert_eq!(tree.node(output).text, "ok");
    }

    #[tokio::test]
    async fn test_shell_use_header_none() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "bare.md",
            "# A\n@shell\nprompt: echo raw\nuse-header: none\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        let rendered = crate::render::render(&report.tree);
        assert!(rendered.contains("raw"));
        assert!(!rendered.contains(DEFAULT_HEADER));
    }

    #[tokio::test]
    async fn test_shell_custom_header() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "custom.md",
            "# A\n@shell\nprompt: echo out\nuse-header: \"## Captured {id=captured}\"\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        let captured = report.tree.find_by_id_or_key("captured").unwrap();
        assert_eq!(report.tree.node(captured).level, 2);
    }

    #[tokio::test]
    async fn test_shell_timeout_is_cancelled() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.timeouts.shell_secs = 1;
        let doc = write(&temp, "slow.md", "# A\n@shell\nprompt: sleep 30\n");

        let err = executor_with(&temp, settings)
            .execute(&doc)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_shell_merge_to_target() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "target.md",
            "# Sink {id=sink}\nexisting\n# Work\n@shell\nprompt: echo routed\nto: sink\nuse-header: none\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        let sink = report.tree.find_by_id_or_key("sink").unwrap();
        let children = report.tree.children_under(sink);
        let texts: Vec<&str> = children
            .iter()
            .map(|&i| report.tree.node(i).text.as_str())
            .collect();
        assert!(texts.contains(&"existing"));
        assert!(texts.contains(&"routed"));
    }

    #[tokio::test]
    async fn test_shell_multiline_prompt() {
        let temp = TempDir::new().unwrap();
        let doc = write(
            &temp,
            "multi.md",
            "# A\n@shell\nprompt: |\n  echo one\n  echo two\n",
        );

        let report = executor(&temp).execute(&doc).await.unwrap();
        let rendered = crate::render::render(&report.tree);
        assert!(rendered.contains("one\ntwo"));
    }
}
