// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The `@import` operation
//!
//! Parses a source file, selects the referenced fragment with fresh keys,
//! and merges it at the target. Cycles are not prevented here: the source
//! is a static file, and mutual imports of identical content terminate
//! only because the run-once guard deduplicates imported operation copies.

use crate::address;
use crate::error::{Result, TangleError};
use crate::exec::{block_paths, merge_output, Directive, OpContext};
use crate::parser;

pub(crate) async fn execute(ctx: &mut OpContext<'_>) -> Result<Directive> {
    let file = ctx
        .node
        .params
        .get("file")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TangleError::parse("@import: 'file' is required"))?;
    let path = ctx.dir.join(file);
    let source = std::fs::read_to_string(&path)
        .map_err(|_| TangleError::FileNotFound(path.clone()))?;
    let source_tree = parser::parse_document(&source, ctx.executor.keygen())?;

    let fragment = match block_paths(&ctx.node.params)? {
        Some(paths) => {
            // An unresolved block is fatal for an import
            let mut indices = Vec::new();
            for block_path in &paths {
                indices.extend(address::resolve(&source_tree, block_path)?);
            }
            source_tree.clone_fragment(&indices)
        }
        None => {
            let all: Vec<_> = source_tree.iter().collect();
            source_tree.clone_fragment(&all)
        }
    };

    tracing::debug!(
        file = %path.display(),
        nodes = fragment.len(),
        "importing fragment"
    );
    merge_output(ctx, fragment)?;
    Ok(Directive::Advance)
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
    async fn test_import_whole_file_appends() {
        let temp = TempDir::new().unwrap();
        write(&temp, "t.md", "# X {id=x}\nBODY\n");
        let main = write(&temp, "main.md", "# A\n@import\nfile: t.md\n");

        let report = executor(&temp).execute(&main).await.unwrap();
        let texts: Vec<String> = report
            .tree
            .iter()
            .map(|i| report.tree.node(i).text.clone())
            .collect();
        assert!(texts.contains(&"# X {id=x}".to_string()));
        assert!(texts.contains(&"BODY".to_string()));
    }

    #[tokio::test]
    async fn test_import_block_replace_scenario() {
        let temp = TempDir::new().unwrap();
        write(&temp, "t.md", "# x\nBODY\n");
        let main = write(
            &temp,
            "main.md",
            "# slot {id=slot}\nplaceholder\n@import\nfile: t.md\nblock: x\nmode: replace\nto: slot\n",
        );

        let report = executor(&temp).execute(&main).await.unwrap();
        let tree = &report.tree;
        tree.check_integrity().unwrap();

        // The slot subtree is gone, replaced by the imported x subtree
        assert!(tree.find_by_id_or_key("slot").is_none());
        let x = tree.find_by_id_or_key("x").unwrap();
        assert_eq!(tree.node(x).text, "# x");

        let texts: Vec<String> = tree.iter().map(|i| tree.node(i).text.clone()).collect();
        assert!(texts.contains(&"BODY".to_string()));
        assert!(!texts.contains(&"placeholder".to_string()));
        // The operation itself survived the replace
        assert!(texts.iter().any(|t| t.starts_with("@import")));
    }

    #[tokio::test]
    async fn test_import_missing_file_fatal() {
        let temp = TempDir::new().unwrap();
        let main = write(&temp, "main.md", "# A\n@import\nfile: nope.md\n");

        let err = executor(&temp).execute(&main).await.unwrap_err();
        assert_eq!(err.kind(), "FileNotFound");
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_import_missing_block_fatal() {
        let temp = TempDir::new().unwrap();
        write(&temp, "t.md", "# X {id=x}\nBODY\n");
        let main = write(&temp, "main.md", "# A\n@import\nfile: t.md\nblock: ghost\n");

        let err = executor(&temp).execute(&main).await.unwrap_err();
        assert_eq!(err.kind(), "BlockNotFound");
    }

    #[tokio::test]
    async fn test_import_preserves_user_role() {
        let temp = TempDir::new().unwrap();
        write(&temp, "t.md", "# X {id=x}\nBODY\n");
        let main = write(&temp, "main.md", "# A\n@import\nfile: t.md\nblock: x\n");

        let report = executor(&temp).execute(&main).await.unwrap();
        let x = report.tree.find_by_id_or_key("x").unwrap();
        assert_eq!(report.tree.node(x).role, crate::tree::Role::User);
    }

    #[tokio::test]
    async fn test_import_block_array() {
        let temp = TempDir::new().unwrap();
        write(&temp, "t.md", "# One {id=one}\nfirst\n# Two {id=two}\nsecond\n");
        let main = write(&temp, "main.md", "# A\n@import\nfile: t.md\nblock: [two, one]\n");

        let report = executor(&temp).execute(&main).await.unwrap();
        let texts: Vec<String> = report
            .tree
            .iter()
            .map(|i| report.tree.node(i).text.clone())
            .collect();
        let two_pos = texts.iter().position(|t| t == "second").unwrap();
        let one_pos = texts.iter().position(|t| t == "first").unwrap();
        // Array order preserved: two before one
        assert!(two_pos < one_pos);
    }

    #[tokio::test]
    async fn test_imported_run_once_operation_fires_once() {
        let temp = TempDir::new().unwrap();
        // The imported file carries an @import of itself, guarded by
        // run-once; the copies dedupe by signature and the run terminates
        write(
            &temp,
            "self.md",
            "# S\npayload\n@import\nfile: self.md\nrun-once: true\n",
        );
        let main = write(&temp, "main.md", "# A\n@import\nfile: self.md\n");

        let report = executor(&temp).execute(&main).await.unwrap();
        let payloads = report
            .tree
            .iter()
            .filter(|&i| report.tree.node(i).text == "payload")
            .count();
        // Once from the outer import, once from the single guarded fire
        assert_eq!(payloads, 2);
    }
}
