// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The call tree
//!
//! A per-run record of workflow nesting and tool fan-out: each `@run`
//! pushes a frame naming the file, the caller's operation key and the
//! child run id; each `@llm` with tool use records its calls under the
//! operation key. The recorder serializes this to the `.trc` file; it is
//! never consulted during execution.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::llm::mediator::ToolCallRecord;

/// Tool fan-out of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFanOut {
    /// Key of the `@llm` operation node that made the calls
    pub operation_key: String,
    pub calls: Vec<ToolCallRecord>,
}

/// One run frame: a document execution, possibly nested under a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTreeNode {
    /// Document that was executed
    pub file: PathBuf,

    /// Unique id of this run
    pub run_id: String,

    /// Key of the caller's `@run` operation node; absent at top level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_operation_key: Option<String>,

    /// Tool calls recorded under their operation keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_fan_out: Vec<ToolFanOut>,

    /// Nested `@run` frames, in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CallTreeNode>,

    /// Error that ended this run, when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallTreeNode {
    pub fn new(file: PathBuf, caller_operation_key: Option<String>) -> Self {
        Self {
            file,
            run_id: uuid::Uuid::new_v4().to_string(),
            caller_operation_key,
            tool_fan_out: Vec::new(),
            children: Vec::new(),
            error: None,
        }
    }

    /// Record the tool calls an `@llm` operation made.
    pub fn record_tool_calls(&mut self, operation_key: &str, calls: Vec<ToolCallRecord>) {
        if calls.is_empty() {
            return;
        }
        self.tool_fan_out.push(ToolFanOut {
            operation_key: operation_key.to_string(),
            calls,
        });
    }

    /// Attach a completed child run frame.
    pub fn push_child(&mut self, child: CallTreeNode) {
        self.children.push(child);
    }

    /// All tool calls in this frame, across operations.
    pub fn all_tool_calls(&self) -> Vec<&ToolCallRecord> {
        self.tool_fan_out
            .iter()
            .flat_map(|f| f.calls.iter())
            .collect()
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
