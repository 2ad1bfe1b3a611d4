// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Auto-discovery of tool scripts
//!
//! Scripts in the tools directory that carry no manifest are probed, in
//! order, stopping at the first success:
//!
//! 1. **Simple JSON probe**: invoke with the single argument
//!    `{"__test__": true}`; a JSON reply is taken as the schema and the
//!    tool is registered as simple-json.
//! 2. **Schema dump**: invoke with `--tangle-dump-schema` (one tool) or
//!    `--tangle-dump-multi-schema` (an array of tools).
//! 3. **Help parse**: invoke with `--help`; the description is the first
//!    non-blank line and parameters come from `--flag` patterns.
//!
//! Every probe runs under a strict timeout. A probe that times out, exits
//! non-zero or prints invalid JSON moves on to the next; a file whose
//! probes all fail is skipped, logged, and discovery continues. The
//! timeout exists because naive introspection hangs on scripts that do
//! heavy work at import.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TangleError};
use crate::llm::provider::{ToolDefinition, ToolInputSchema};
use crate::tools::capture_stdout;
use crate::tools::manifest::interpreter_chain;

/// Probe argument answered by simple-json tools.
pub const SIMPLE_JSON_PROBE: &str = r#"{"__test__": true}"#;

/// Flag dumping a single tool schema.
pub const DUMP_SCHEMA_FLAG: &str = "--tangle-dump-schema";

/// Flag dumping an array of tool schemas.
pub const DUMP_MULTI_SCHEMA_FLAG: &str = "--tangle-dump-multi-schema";

/// A tool found by probing, along with how to call it.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub definition: ToolDefinition,
    /// Argv prefix that executes the script
    pub program: Vec<String>,
    /// Whether the tool takes a single JSON argument (simple-json) or
    /// `--flag value` pairs (CLI)
    pub simple_json: bool,
}

/// Probe one script. Returns the discovered tools (a multi-schema dump may
/// declare several) or `None` when every probe fails.
pub async fn probe_script(path: &Path, probe_timeout: Duration) -> Option<Vec<DiscoveredTool>> {
    let program = interpreter_chain(path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    match simple_json_probe(&program, &stem, probe_timeout).await {
        Ok(tool) => return Some(vec![tool]),
        Err(err) => tracing::debug!(path = %path.display(), %err, "simple-json probe failed"),
    }
    match schema_dump_probe(&program, &stem, probe_timeout).await {
        Ok(tools) => return Some(tools),
        Err(err) => tracing::debug!(path = %path.display(), %err, "schema dump probe failed"),
    }
    match help_probe(&program, &stem, probe_timeout).await {
        Ok(tool) => return Some(vec![tool]),
        Err(err) => tracing::debug!(path = %path.display(), %err, "help probe failed"),
    }

    tracing::warn!(path = %path.display(), "no probe succeeded; skipping tool script");
    None
}

async fn simple_json_probe(
    program: &[String],
    stem: &str,
    probe_timeout: Duration,
) -> Result<DiscoveredTool> {
    let stdout = run_probe(program, &[SIMPLE_JSON_PROBE], probe_timeout).await?;
    let reply: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| TangleError::Tool(format!("probe reply is not JSON: {}", e)))?;

    let definition = definition_from_value(&reply, stem)?;
    Ok(DiscoveredTool {
        definition,
        program: program.to_vec(),
        simple_json: true,
    })
}

async fn schema_dump_probe(
    program: &[String],
    stem: &str,
    probe_timeout: Duration,
) -> Result<Vec<DiscoveredTool>> {
    if let Ok(stdout) = run_probe(program, &[DUMP_SCHEMA_FLAG], probe_timeout).await {
        let value: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| TangleError::Tool(format!("schema dump is not JSON: {}", e)))?;
        let definition = definition_from_value(&value, stem)?;
        return Ok(vec![DiscoveredTool {
            definition,
            program: program.to_vec(),
            simple_json: false,
        }]);
    }

    let stdout = run_probe(program, &[DUMP_MULTI_SCHEMA_FLAG], probe_timeout).await?;
    let value: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| TangleError::Tool(format!("multi-schema dump is not JSON: {}", e)))?;
    let entries = value
        .as_array()
        .ok_or_else(|| TangleError::Tool("multi-schema dump is not an array".to_string()))?;
    if entries.is_empty() {
        return Err(TangleError::Tool("multi-schema dump is empty".to_string()));
    }

    let mut tools = Vec::with_capacity(entries.len());
    for entry in entries {
        tools.push(DiscoveredTool {
            definition: definition_from_value(entry, stem)?,
            program: program.to_vec(),
            simple_json: false,
        });
    }
    Ok(tools)
}

async fn help_probe(
    program: &[String],
    stem: &str,
    probe_timeout: Duration,
) -> Result<DiscoveredTool> {
    let stdout = run_probe(program, &["--help"], probe_timeout).await?;

    let description = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("No description")
        .to_string();

    let flag_re = Regex::new(r"--([a-z][a-z0-9_-]*)").unwrap();
    let mut properties = serde_json::Map::new();
    for caps in flag_re.captures_iter(&stdout) {
        let flag = caps[1].to_string();
        if flag == "help" {
            continue;
        }
        properties.entry(flag).or_insert_with(|| {
            serde_json::json!({
                "type": "string",
                "description": "Command line flag"
            })
        });
    }

    Ok(DiscoveredTool {
        definition: ToolDefinition {
            name: stem.to_string(),
            description,
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: serde_json::Value::Object(properties),
                required: Vec::new(),
            },
        },
        program: program.to_vec(),
        simple_json: false,
    })
}

/// Build a ToolDefinition from a probe reply. Accepts either a full
/// definition (`input_schema`) or a bare schema (`properties`/`required`).
fn definition_from_value(value: &serde_json::Value, stem: &str) -> Result<ToolDefinition> {
    let object = value
        .as_object()
        .ok_or_else(|| TangleError::Tool("tool schema is not an object".to_string()))?;

    let name = object
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(stem)
        .to_string();
    if name.is_empty() {
        return Err(TangleError::Tool("tool schema has no name".to_string()));
    }
    let description = object
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("No description")
        .to_string();

    let schema_source = object.get("input_schema").unwrap_or(value);
    let properties = schema_source
        .get("properties")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let required = schema_source
        .get("required")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Ok(ToolDefinition {
        name,
        description,
        input_schema: ToolInputSchema {
            schema_type: "object".to_string(),
            properties,
            required,
        },
    })
}

/// Run a probe command, enforcing the timeout and a zero exit status.
async fn run_probe(program: &[String], args: &[&str], probe_timeout: Duration) -> Result<String> {
    capture_stdout(program, args, &HashMap::new(), probe_timeout).await
}
