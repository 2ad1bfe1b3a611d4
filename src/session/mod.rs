// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session recorder
//!
//! On workflow start, takes a labelled snapshot of the execution
//! directory; during execution, streams progress events to an optional
//! consumer; on completion or failure, renders the final tree to
//! `<doc>.ctx`, writes the call tree to `<doc>.trc` and snapshots again
//! with a completion label. The version store itself is external; we
//! consume its `snapshot(paths, label) -> id` interface.

pub mod trace;

pub use trace::{CallTreeNode, ToolFanOut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::render;
use crate::tree::Tree;

/// Abstract version store interface.
pub trait SnapshotStore: Send + Sync {
    /// Capture the given paths under a label, returning the snapshot id.
    fn snapshot(&self, paths: &[PathBuf], label: &str) -> Result<String>;
}

/// Store that records nothing; the label doubles as the id.
pub struct NullSnapshotStore;

impl SnapshotStore for NullSnapshotStore {
    fn snapshot(&self, _paths: &[PathBuf], label: &str) -> Result<String> {
        Ok(label.to_string())
    }
}

/// In-memory store for tests: remembers every snapshot request.
#[derive(Default)]
pub struct MemorySnapshotStore {
    labels: Mutex<Vec<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        match self.labels.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn snapshot(&self, _paths: &[PathBuf], label: &str) -> Result<String> {
        match self.labels.lock() {
            Ok(mut guard) => guard.push(label.to_string()),
            Err(poisoned) => poisoned.into_inner().push(label.to_string()),
        }
        Ok(label.to_string())
    }
}

/// A progress event streamed to the consumer (the HTTP façade).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub progress: f32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Consumer half of the progress stream.
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<ProgressEvent>;

/// Build a snapshot label: `YYYYMMDDHHMMSS_<hex>_<slug>`.
pub fn snapshot_label(slug: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let hex: u32 = rand::random();
    format!("{}_{:08x}_{}", timestamp, hex, slug)
}

/// Files persisted for a completed (or failed) run.
#[derive(Debug, Clone)]
pub struct SessionArtifacts {
    pub ctx_path: Option<PathBuf>,
    pub trc_path: Option<PathBuf>,
    pub snapshot_label: String,
}

/// Records one workflow session.
pub struct SessionRecorder {
    document: PathBuf,
    execution_dir: PathBuf,
    slug: String,
    store: Arc<dyn SnapshotStore>,
    progress: Option<ProgressSender>,
    start_label: Option<String>,
}

impl SessionRecorder {
    pub fn new(
        document: &Path,
        store: Arc<dyn SnapshotStore>,
        progress: Option<ProgressSender>,
    ) -> Self {
        let execution_dir = document
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let slug = document
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "run".to_string());
        Self {
            document: document.to_path_buf(),
            execution_dir,
            slug,
            store,
            progress,
            start_label: None,
        }
    }

    /// Snapshot the execution directory under a start label.
    pub fn start(&mut self) -> Result<String> {
        let label = snapshot_label(&self.slug);
        let id = self
            .store
            .snapshot(&[self.execution_dir.clone()], &label)?;
        self.start_label = Some(label.clone());
        self.emit("start", 0.0, format!("snapshot {}", id));
        Ok(label)
    }

    /// Stream a progress event; dropped consumers are ignored.
    pub fn emit(&self, stage: &str, progress: f32, message: impl Into<String>) {
        if let Some(sender) = &self.progress {
            let event = ProgressEvent {
                stage: stage.to_string(),
                progress,
                message: message.into(),
                timestamp: Utc::now(),
            };
            if sender.send(event).is_err() {
                tracing::debug!("progress consumer dropped");
            }
        }
    }

    /// Write `.ctx`/`.trc` and take the completion snapshot.
    pub fn finish(&self, tree: &Tree, call_tree: &CallTreeNode) -> Result<SessionArtifacts> {
        let artifacts = self.write_artifacts(Some(tree), call_tree, "done")?;
        self.emit("done", 1.0, format!("snapshot {}", artifacts.snapshot_label));
        Ok(artifacts)
    }

    /// Record a failed run. The tree, when there is one, captures the
    /// partially-mutated state for debugging; a parse failure has no tree
    /// and produces no `.ctx`.
    pub fn fail(
        &self,
        tree: Option<&Tree>,
        call_tree: &CallTreeNode,
        error: &crate::error::TangleError,
    ) -> Result<SessionArtifacts> {
        self.emit("failed", 1.0, format!("{}: {}", error.kind(), error));
        self.write_artifacts(tree, call_tree, "failed")
    }

    fn write_artifacts(
        &self,
        tree: Option<&Tree>,
        call_tree: &CallTreeNode,
        suffix: &str,
    ) -> Result<SessionArtifacts> {
        let ctx_path = match tree {
            Some(tree) => {
                let path = self.document.with_extension("ctx");
                std::fs::write(&path, render::render(tree))?;
                Some(path)
            }
            None => None,
        };

        let trc_path = match tree {
            Some(_) => {
                let path = self.document.with_extension("trc");
                std::fs::write(&path, call_tree.to_json()?)?;
                Some(path)
            }
            None => None,
        };

        let label = snapshot_label(&format!("{}-{}", self.slug, suffix));
        self.store.snapshot(&[self.execution_dir.clone()], &label)?;
        Ok(SessionArtifacts {
            ctx_path,
            trc_path,
            snapshot_label: label,
        })
    }

    pub fn start_label(&self) -> Option<&str> {
        self.start_label.as_deref()
    }
}
