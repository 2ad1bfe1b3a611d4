// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool manifest parsing
//!
//! A tool may carry a declarative JSON manifest adjacent to its script
//! (`my_tool.json` next to `my_tool.py`) naming it, describing it for the
//! LLM, declaring its parameter schema and stating how it is executed.
//! Manifest entries take priority over probed discovery.
//!
//! # Example manifest
//!
//! ```json
//! {
//!   "name": "fetch_issue",
//!   "description": "Fetch an issue by number",
//!   "kind": "python-cli",
//!   "entry": "fetch_issue.py",
//!   "input_schema": {
//!     "type": "object",
//!     "properties": {
//!       "number": { "type": "integer", "description": "Issue number" }
//!     },
//!     "required": ["number"]
//!   },
//!   "timeout_ms": 30000
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TangleError};
use crate::llm::provider::{ToolDefinition, ToolInputSchema};

/// How a locally-declared tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutableKind {
    /// Invoked through `python3` with `--flag value` pairs
    #[serde(rename = "python-cli")]
    PythonCli,
    /// Invoked through `bash` with `--flag value` pairs
    #[serde(rename = "bash-cli")]
    BashCli,
    /// Invoked with a single JSON argument, returning JSON on stdout
    #[serde(rename = "simple-json")]
    SimpleJson,
}

/// Manifest for a local tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Tool name (must be unique, used by the LLM to invoke)
    pub name: String,

    /// Human-readable description for the LLM
    pub description: String,

    /// How the entry point is executed
    pub kind: ExecutableKind,

    /// Script path, resolved relative to the manifest's directory
    pub entry: PathBuf,

    /// JSON Schema for tool input
    pub input_schema: ManifestInputSchema,

    /// Timeout in milliseconds (default: 30000)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Environment variables to pass to the tool
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_timeout() -> u64 {
    30000
}

/// Input schema from a manifest (mirrors JSON Schema structure)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestInputSchema {
    /// Schema type (always "object" for tool inputs)
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolManifest {
    /// Load a manifest from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TangleError::Config(format!("failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse a manifest from a JSON string.
    pub fn parse(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)
            .map_err(|e| TangleError::Config(format!("failed to parse tool manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TangleError::Config(
                "tool manifest: name cannot be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(TangleError::Config(format!(
                "tool manifest: name '{}' must contain only alphanumerics and underscores",
                self.name
            )));
        }
        if self.description.is_empty() {
            return Err(TangleError::Config(
                "tool manifest: description cannot be empty".to_string(),
            ));
        }
        if self.entry.as_os_str().is_empty() {
            return Err(TangleError::Config(
                "tool manifest: entry cannot be empty".to_string(),
            ));
        }
        if self.input_schema.schema_type != "object" {
            return Err(TangleError::Config(
                "tool manifest: input_schema type must be 'object'".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert to a ToolDefinition for the LLM.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: ToolInputSchema {
                schema_type: self.input_schema.schema_type.clone(),
                properties: self.input_schema.properties.clone(),
                required: self.input_schema.required.clone(),
            },
        }
    }

    /// Resolve the entry path against the manifest's directory.
    pub fn resolve_entry(&self, manifest_dir: &Path) -> PathBuf {
        if self.entry.is_absolute() {
            self.entry.clone()
        } else {
            manifest_dir.join(&self.entry)
        }
    }

    /// The argv prefix that executes the entry point.
    pub fn program(&self, manifest_dir: &Path) -> Vec<String> {
        let entry = self.resolve_entry(manifest_dir);
        let entry = entry.to_string_lossy().to_string();
        match self.kind {
            ExecutableKind::PythonCli => vec!["python3".to_string(), entry],
            ExecutableKind::BashCli => vec!["bash".to_string(), entry],
            ExecutableKind::SimpleJson => interpreter_chain(&self.resolve_entry(manifest_dir)),
        }
    }
}

/// The argv prefix for running a script directly: `python3` for `.py`,
/// `bash` for `.sh`, otherwise the file itself.
pub fn interpreter_chain(path: &Path) -> Vec<String> {
    let file = path.to_string_lossy().to_string();
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => vec!["python3".to_string(), file],
        Some("sh") => vec!["bash".to_string(), file],
        _ => vec![file],
    }
}
