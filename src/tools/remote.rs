// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Remote tool server client
//!
//! Talks JSON-RPC 2.0 over HTTP to a long-running tool server: `list_tools`
//! enumerates what it offers and `call_tool(name, arguments)` invokes one.
//! Results must be JSON serializable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, TangleError};
use crate::llm::provider::{ToolDefinition, ToolInputSchema};

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A tool as advertised by a remote server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

impl RemoteTool {
    pub fn to_tool_definition(&self) -> ToolDefinition {
        let schema = self.input_schema.clone().unwrap_or_else(|| {
            serde_json::json!({"type": "object", "properties": {}})
        });
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: schema
                    .get("properties")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({})),
                required: schema
                    .get("required")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
        }
    }
}

/// Client for one remote tool server endpoint.
pub struct RemoteToolClient {
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RemoteToolClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Enumerate the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        let result = self.call("list_tools", None).await?;
        // Servers answer either a bare array or {"tools": [...]}
        let tools_value = result.get("tools").cloned().unwrap_or(result);
        serde_json::from_value(tools_value)
            .map_err(|e| TangleError::Tool(format!("invalid list_tools reply: {}", e)))
    }

    /// Invoke a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.call(
            "call_tool",
            Some(serde_json::json!({"name": name, "arguments": arguments})),
        )
        .await
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| TangleError::Tool(format!("{}: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TangleError::Tool(format!(
                "{} returned HTTP {}",
                self.endpoint, status
            )));
        }

        let rpc: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TangleError::Tool(format!("invalid JSON-RPC reply: {}", e)))?;

        if let Some(error) = rpc.error {
            return Err(TangleError::Tool(format!(
                "{} ({}): {}",
                method, error.code, error.message
            )));
        }
        rpc.result
            .ok_or_else(|| TangleError::Tool(format!("{}: reply has no result", method)))
    }
}
