// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Operation interpreter
//!
//! The driver walks the tree with a cursor: non-operation nodes are
//! skipped, operations dispatch to their handlers, and a handler answers
//! with a directive (advance, jump, or halt). Handlers that produce output
//! hand back a fragment which is merged relative to the operation node, or
//! at an explicit `to` target.
//!
//! Every operation node records whether it has fired in the current run;
//! the cursor skips fired operations when `@goto` re-enters earlier parts
//! of the document. Operations carrying `run-once: true` are additionally
//! deduplicated by content signature, which is what brakes cycles of
//! imported copies of the same operation.

pub mod context;
pub mod flow;
pub mod import;
pub mod llm_op;
pub mod run_op;
pub mod schema;
pub mod shell;

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde_yaml::Mapping;

use crate::address::{self, BlockPath};
use crate::config::Settings;
use crate::error::{Result, TangleError};
use crate::llm::provider::ProviderRegistry;
use crate::parser;
use crate::session::{CallTreeNode, ProgressSender, SessionArtifacts, SessionRecorder, SnapshotStore};
use crate::tools::ToolRegistry;
use crate::tree::{KeyGen, MergeMode, Node, NodeIdx, Role, Tree};

/// What a handler tells the driver to do next.
#[derive(Debug)]
pub enum Directive {
    /// Move the cursor to the next node
    Advance,
    /// Move the cursor to the target node
    Jump(NodeIdx),
    /// Terminate the run; the fragment is the run's return value
    Halt(Vec<Node>),
}

/// Result of executing one tree. Partial mutations are preserved in
/// `tree` even when the run failed, so the recorder can capture the state
/// at failure.
#[derive(Debug)]
pub struct TreeOutcome {
    pub tree: Tree,
    pub explicit_return: bool,
    pub return_fragment: Vec<Node>,
    pub frame: CallTreeNode,
    pub error: Option<TangleError>,
}

/// Result of a top-level document execution.
#[derive(Debug)]
pub struct ExecutionReport {
    pub tree: Tree,
    pub explicit_return: bool,
    pub return_fragment: Vec<Node>,
    pub call_tree: CallTreeNode,
    pub artifacts: SessionArtifacts,
    pub snapshot_label: String,
}

/// Per-run interpreter state: the run-once guard.
#[derive(Default)]
struct RunState {
    fired_keys: HashSet<String>,
    fired_signatures: HashSet<String>,
}

impl RunState {
    fn should_skip(&self, node: &Node) -> bool {
        if self.fired_keys.contains(&node.key) {
            return true;
        }
        run_once(&node.params) && self.fired_signatures.contains(&signature(node))
    }

    fn mark_fired(&mut self, node: &Node) {
        self.fired_keys.insert(node.key.clone());
        if run_once(&node.params) {
            self.fired_signatures.insert(signature(node));
        }
    }
}

fn run_once(params: &Mapping) -> bool {
    params
        .get("run-once")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Content signature of an operation: name plus canonical parameters.
fn signature(node: &Node) -> String {
    let params = serde_yaml::to_string(&node.params).unwrap_or_default();
    format!("{}\u{0}{}", node.name, params)
}

/// Everything a handler needs for one dispatch.
pub(crate) struct OpContext<'a> {
    pub tree: &'a mut Tree,
    pub op: NodeIdx,
    pub node: &'a Node,
    /// Directory of the current document; relative paths resolve here
    pub dir: &'a Path,
    pub executor: &'a Executor,
    pub frame: &'a mut CallTreeNode,
    pub depth: usize,
}

/// Executes documents: owns the configuration, the provider registry, the
/// tool registry and the snapshot store. One executor runs one workflow at
/// a time; the tool registry may be shared.
pub struct Executor {
    settings: Settings,
    providers: ProviderRegistry,
    registry: Arc<ToolRegistry>,
    keygen: Arc<KeyGen>,
    store: Arc<dyn SnapshotStore>,
    progress: Option<ProgressSender>,
}

impl Executor {
    pub fn new(
        settings: Settings,
        providers: ProviderRegistry,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            settings,
            providers,
            registry,
            keygen: Arc::new(KeyGen::new()),
            store,
            progress: None,
        }
    }

    /// Attach a progress event consumer.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub(crate) fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub(crate) fn keygen(&self) -> &KeyGen {
        &self.keygen
    }

    pub(crate) fn progress(&self) -> Option<&ProgressSender> {
        self.progress.as_ref()
    }

    fn emit(&self, stage: &str, progress: f32, message: String) {
        if let Some(sender) = &self.progress {
            let event = crate::session::ProgressEvent {
                stage: stage.to_string(),
                progress,
                message,
                timestamp: chrono::Utc::now(),
            };
            let _ = sender.send(event);
        }
    }

    /// Execute a document end to end, recording the session.
    pub async fn execute(&self, document: &Path) -> Result<ExecutionReport> {
        self.execute_with_input(document, None).await
    }

    /// Execute a document, optionally prepending `parameter_text` as
    /// `# Input Parameters {id=input-parameters}` before execution.
    pub async fn execute_with_input(
        &self,
        document: &Path,
        parameter_text: Option<&str>,
    ) -> Result<ExecutionReport> {
        let mut recorder = SessionRecorder::new(document, self.store.clone(), self.progress.clone());
        let snapshot_label = recorder.start()?;

        // Parsing happens before a tree exists; a parse failure produces
        // no .ctx, only the initial snapshot
        let tree = match self.load_document(document, parameter_text) {
            Ok(tree) => tree,
            Err(err) => {
                let mut frame = CallTreeNode::new(document.to_path_buf(), None);
                frame.error = Some(format!("{}: {}", err.kind(), err));
                recorder.fail(None, &frame, &err)?;
                return Err(err);
            }
        };

        let outcome = self.run_tree(tree, document.to_path_buf(), 0, None).await;
        match outcome.error {
            None => {
                let artifacts = recorder.finish(&outcome.tree, &outcome.frame)?;
                Ok(ExecutionReport {
                    tree: outcome.tree,
                    explicit_return: outcome.explicit_return,
                    return_fragment: outcome.return_fragment,
                    call_tree: outcome.frame,
                    artifacts,
                    snapshot_label,
                })
            }
            Some(err) => {
                recorder.fail(Some(&outcome.tree), &outcome.frame, &err)?;
                Err(err)
            }
        }
    }

    fn load_document(&self, document: &Path, parameter_text: Option<&str>) -> Result<Tree> {
        let source = std::fs::read_to_string(document)
            .map_err(|_| TangleError::FileNotFound(document.to_path_buf()))?;
        self.emit("parse", 0.0, format!("parsing {}", document.display()));
        let mut tree = parser::parse_document(&source, &self.keygen)?;

        if let Some(text) = parameter_text {
            let mut fragment = vec![parser::heading_node_from_line(
                "# Input Parameters {id=input-parameters}",
            )];
            fragment.extend(parser::parse_nodes(text)?);
            prepend_fragment(&mut tree, fragment, &self.keygen)?;
        }
        Ok(tree)
    }

    /// Execute one tree; the recursion point for `@run`.
    pub(crate) fn run_tree<'a>(
        &'a self,
        tree: Tree,
        file: PathBuf,
        depth: usize,
        caller_operation_key: Option<String>,
    ) -> Pin<Box<dyn Future<Output = TreeOutcome> + Send + 'a>> {
        Box::pin(async move {
            let mut tree = tree;
            let mut frame = CallTreeNode::new(file.clone(), caller_operation_key);

            if depth > self.settings.limits.max_run_depth {
                let err = TangleError::Internal(format!(
                    "run depth exceeded the limit of {}",
                    self.settings.limits.max_run_depth
                ));
                frame.error = Some(format!("{}: {}", err.kind(), err));
                return TreeOutcome {
                    tree,
                    explicit_return: false,
                    return_fragment: Vec::new(),
                    frame,
                    error: Some(err),
                };
            }
            let dir = file
                .parent()
                .map(Path::to_path_buf)
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| PathBuf::from("."));

            let mut state = RunState::default();
            let mut executed = 0usize;
            let mut cursor = tree.head();

            while let Some(idx) = cursor {
                let Some(node) = tree.get(idx).cloned() else {
                    // The cursor's node was replaced out from under it
                    break;
                };
                if !node.is_operation() {
                    cursor = tree.next(idx);
                    continue;
                }
                if state.should_skip(&node) {
                    tracing::debug!(op = %node.name, key = %node.key, "skipping fired operation");
                    cursor = tree.next(idx);
                    continue;
                }

                state.mark_fired(&node);
                executed += 1;
                let remaining = tree
                    .iter()
                    .filter(|&i| tree.node(i).is_operation())
                    .filter(|&i| !state.fired_keys.contains(&tree.node(i).key))
                    .count();
                self.emit(
                    "operation",
                    executed as f32 / (executed + remaining) as f32,
                    format!("@{} ({})", node.name, node.key),
                );

                let mut ctx = OpContext {
                    tree: &mut tree,
                    op: idx,
                    node: &node,
                    dir: &dir,
                    executor: self,
                    frame: &mut frame,
                    depth,
                };

                let directive = match node.name.as_str() {
                    "import" => import::execute(&mut ctx).await,
                    "shell" => shell::execute(&mut ctx).await,
                    "llm" => llm_op::execute(&mut ctx).await,
                    "run" => run_op::execute(&mut ctx).await,
                    "return" => flow::execute_return(&mut ctx),
                    "goto" => flow::execute_goto(&mut ctx),
                    other => Err(TangleError::Internal(format!(
                        "no handler for operation '@{}'",
                        other
                    ))),
                };

                match directive {
                    Ok(Directive::Advance) => cursor = tree.next(idx),
                    Ok(Directive::Jump(target)) => cursor = Some(target),
                    Ok(Directive::Halt(fragment)) => {
                        return TreeOutcome {
                            tree,
                            explicit_return: true,
                            return_fragment: fragment,
                            frame,
                            error: None,
                        };
                    }
                    Err(err) => {
                        tracing::error!(op = %node.name, key = %node.key, %err, "operation failed");
                        frame.error = Some(format!("{}: {}", err.kind(), err));
                        return TreeOutcome {
                            tree,
                            explicit_return: false,
                            return_fragment: Vec::new(),
                            frame,
                            error: Some(err),
                        };
                    }
                }
            }

            TreeOutcome {
                tree,
                explicit_return: false,
                return_fragment: Vec::new(),
                frame,
                error: None,
            }
        })
    }
}

/// Splice a fragment before the tree head.
fn prepend_fragment(tree: &mut Tree, fragment: Vec<Node>, keygen: &KeyGen) -> Result<()> {
    match tree.head() {
        Some(head) => {
            tree.insert(head, fragment, MergeMode::Prepend, keygen)?;
        }
        None => {
            for node in fragment {
                tree.push_back(node, keygen);
            }
        }
    }
    Ok(())
}

/// Merge a handler's output fragment. The target defaults to the operation
/// node itself; `to` redirects it. The merge mode comes from `mode`, else
/// the configured default.
pub(crate) fn merge_output(ctx: &mut OpContext<'_>, fragment: Vec<Node>) -> Result<()> {
    let mode = merge_mode(ctx)?;
    let target = match ctx.node.params.get("to") {
        Some(value) => {
            let paths = address::paths_from_value(value)?;
            let path = paths.first().ok_or_else(|| {
                TangleError::parse("'to' must name a block")
            })?;
            address::resolve_target(ctx.tree, path)?
        }
        None => ctx.op,
    };
    ctx.tree
        .insert(target, fragment, mode, ctx.executor.keygen())?;
    Ok(())
}

pub(crate) fn merge_mode(ctx: &OpContext<'_>) -> Result<MergeMode> {
    match ctx.node.params.get("mode").and_then(|v| v.as_str()) {
        Some(mode) => mode.parse(),
        None => Ok(ctx.executor.settings().default_operation),
    }
}

/// Read the `use-header` parameter: `None` when suppressed with "none"
/// (case-insensitive), otherwise the header line to use.
pub(crate) fn header_choice(params: &Mapping, default: &str) -> Option<String> {
    match params.get("use-header").and_then(|v| v.as_str()) {
        Some(value) if value.eq_ignore_ascii_case("none") => None,
        Some(value) => Some(value.to_string()),
        None => Some(default.to_string()),
    }
}

/// Wrap generated text as a content-only fragment, optionally under a
/// heading parsed from the header line. All nodes carry role assistant.
pub(crate) fn wrap_output(text: &str, header: Option<&str>, op_level: usize) -> Vec<Node> {
    let mut fragment = Vec::new();
    let body = text.trim_end_matches('\n');

    match header {
        Some(line) => {
            let heading = parser::heading_node_from_line(line).with_role(Role::Assistant);
            let content_level = heading.level + 1;
            fragment.push(heading);
            if !body.is_empty() {
                fragment.push(Node::content(content_level, body).with_role(Role::Assistant));
            }
        }
        None => {
            if !body.is_empty() {
                fragment.push(Node::content(op_level + 1, body).with_role(Role::Assistant));
            }
        }
    }
    fragment
}

/// Read the optional `block` parameter as parsed paths.
pub(crate) fn block_paths(params: &Mapping) -> Result<Option<Vec<BlockPath>>> {
    match params.get("block") {
        Some(value) => Ok(Some(address::paths_from_value(value)?)),
        None => Ok(None),
    }
}
