// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool system for Tangle
//!
//! Aggregates three sources into one registry, in descending priority:
//! explicit manifests adjacent to tool scripts, auto-discovered scripts in
//! the tools directory, and remote tool servers. Local entries win name
//! collisions. All registered tools present a uniform callable surface:
//! `call(name, json_args) -> json_result`.
//!
//! The registry is shared across workflows: reads are concurrent, and
//! `rescan` takes the write half exclusively.

pub mod discovery;
pub mod manifest;
pub mod remote;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::config::{McpServerConfig, Settings};
use crate::error::{Result, TangleError};
use crate::llm::provider::ToolDefinition;
use manifest::{ExecutableKind, ToolManifest};
use remote::RemoteToolClient;

/// Where a registered tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    Manifest,
    Probed,
    Remote,
}

impl std::fmt::Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolSource::Manifest => write!(f, "manifest"),
            ToolSource::Probed => write!(f, "probed"),
            ToolSource::Remote => write!(f, "remote"),
        }
    }
}

/// The `tools` parameter of `@llm`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolSelection {
    /// No tools offered (the default)
    #[default]
    None,
    /// Every registered tool
    All,
    /// The named tools only
    Named(Vec<String>),
}

impl ToolSelection {
    pub fn is_none(&self) -> bool {
        matches!(self, ToolSelection::None)
    }

    /// Parse the YAML `tools` value.
    pub fn from_value(value: &serde_yaml::Value) -> Result<Self> {
        match value {
            serde_yaml::Value::String(s) if s == "none" => Ok(ToolSelection::None),
            serde_yaml::Value::String(s) if s == "all" => Ok(ToolSelection::All),
            serde_yaml::Value::Sequence(items) => {
                let names = items
                    .iter()
                    .map(|v| {
                        v.as_str().map(String::from).ok_or_else(|| {
                            TangleError::parse("tool names must be strings")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ToolSelection::Named(names))
            }
            _ => Err(TangleError::parse(
                "tools must be \"none\", \"all\" or a list of names",
            )),
        }
    }
}

/// How to execute a registered tool.
#[derive(Clone)]
enum ToolRunner {
    /// Single JSON argument, JSON reply on stdout
    SimpleJson {
        program: Vec<String>,
        env: HashMap<String, String>,
    },
    /// `--flag value` pairs derived from the schema, stdout is the result
    Cli {
        program: Vec<String>,
        env: HashMap<String, String>,
    },
    /// JSON-RPC `call_tool` on a remote server
    Remote { client: Arc<RemoteToolClient> },
}

/// A tool registered in the registry.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub source: ToolSource,
    runner: ToolRunner,
    timeout: Duration,
}

/// Registry of callable tools.
pub struct ToolRegistry {
    tools_dir: PathBuf,
    remotes: Vec<McpServerConfig>,
    probe_timeout: Duration,
    default_timeout: Duration,
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    /// Create a registry for the given tools directory. Call
    /// [`rescan`](Self::rescan) to populate it.
    pub fn new(tools_dir: PathBuf, settings: &Settings) -> Self {
        Self {
            tools_dir,
            remotes: settings.mcp_servers.clone(),
            probe_timeout: Duration::from_millis(settings.timeouts.probe_ms),
            default_timeout: Duration::from_secs(settings.timeouts.tool_secs),
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the registry from all three sources. Returns the number of
    /// registered tools.
    pub async fn rescan(&self) -> Result<usize> {
        let mut registered: HashMap<String, Arc<RegisteredTool>> = HashMap::new();

        self.scan_manifests(&mut registered);
        self.scan_scripts(&mut registered).await;
        self.scan_remotes(&mut registered).await;

        let count = registered.len();
        let mut tools = self.tools.write().await;
        *tools = registered;
        Ok(count)
    }

    fn scan_manifests(&self, registered: &mut HashMap<String, Arc<RegisteredTool>>) {
        for path in self.dir_entries("json") {
            match ToolManifest::from_file(&path) {
                Ok(manifest) => {
                    let program = manifest.program(&self.tools_dir);
                    let runner = match manifest.kind {
                        ExecutableKind::SimpleJson => ToolRunner::SimpleJson {
                            program,
                            env: manifest.env.clone(),
                        },
                        ExecutableKind::PythonCli | ExecutableKind::BashCli => ToolRunner::Cli {
                            program,
                            env: manifest.env.clone(),
                        },
                    };
                    let tool = RegisteredTool {
                        definition: manifest.to_tool_definition(),
                        source: ToolSource::Manifest,
                        runner,
                        timeout: Duration::from_millis(manifest.timeout_ms),
                    };
                    registered.insert(manifest.name.clone(), Arc::new(tool));
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping invalid tool manifest")
                }
            }
        }
    }

    async fn scan_scripts(&self, registered: &mut HashMap<String, Arc<RegisteredTool>>) {
        for path in self
            .dir_entries("py")
            .into_iter()
            .chain(self.dir_entries("sh"))
        {
            // A script with an adjacent manifest is covered already
            if path.with_extension("json").exists() {
                continue;
            }
            let Some(discovered) = discovery::probe_script(&path, self.probe_timeout).await
            else {
                continue;
            };
            for tool in discovered {
                if registered.contains_key(&tool.definition.name) {
                    continue;
                }
                let runner = if tool.simple_json {
                    ToolRunner::SimpleJson {
                        program: tool.program.clone(),
                        env: HashMap::new(),
                    }
                } else {
                    ToolRunner::Cli {
                        program: tool.program.clone(),
                        env: HashMap::new(),
                    }
                };
                registered.insert(
                    tool.definition.name.clone(),
                    Arc::new(RegisteredTool {
                        definition: tool.definition,
                        source: ToolSource::Probed,
                        runner,
                        timeout: self.default_timeout,
                    }),
                );
            }
        }
    }

    async fn scan_remotes(&self, registered: &mut HashMap<String, Arc<RegisteredTool>>) {
        for server in &self.remotes {
            let client = Arc::new(RemoteToolClient::new(server.url.clone()));
            match client.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        if registered.contains_key(&tool.name) {
                            tracing::debug!(
                                tool = %tool.name,
                                server = %server.name,
                                "local tool shadows remote tool"
                            );
                            continue;
                        }
                        registered.insert(
                            tool.name.clone(),
                            Arc::new(RegisteredTool {
                                definition: tool.to_tool_definition(),
                                source: ToolSource::Remote,
                                runner: ToolRunner::Remote {
                                    client: client.clone(),
                                },
                                timeout: self.default_timeout,
                            }),
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(server = %server.name, %err, "remote tool server unavailable")
                }
            }
        }
    }

    fn dir_entries(&self, extension: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.tools_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(extension)
                {
                    paths.push(path);
                }
            }
        }
        paths.sort();
        paths
    }

    /// Tool definitions matching a selection, sorted by name.
    pub async fn definitions(&self, selection: &ToolSelection) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDefinition> = match selection {
            ToolSelection::None => Vec::new(),
            ToolSelection::All => tools.values().map(|t| t.definition.clone()).collect(),
            ToolSelection::Named(names) => names
                .iter()
                .filter_map(|name| tools.get(name).map(|t| t.definition.clone()))
                .collect(),
        };
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All registered tools, sorted by name; for listing.
    pub async fn list(&self) -> Vec<RegisteredTool> {
        let tools = self.tools.read().await;
        let mut all: Vec<RegisteredTool> = tools.values().map(|t| (**t).clone()).collect();
        all.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        all
    }

    /// Whether a tool name is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Invoke a tool with JSON arguments and return its JSON result.
    pub async fn call(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let tool = {
            let tools = self.tools.read().await;
            tools
                .get(name)
                .cloned()
                .ok_or_else(|| TangleError::Tool(format!("unknown tool: {}", name)))?
        };

        match &tool.runner {
            ToolRunner::SimpleJson { program, env } => {
                let arg = serde_json::to_string(&args)?;
                let stdout =
                    capture_stdout(program, &[arg.as_str()], env, tool.timeout).await?;
                serde_json::from_str(stdout.trim()).map_err(|e| {
                    TangleError::Tool(format!("{} returned non-JSON output: {}", name, e))
                })
            }
            ToolRunner::Cli { program, env } => {
                let flags = cli_flags(&args)?;
                let flag_refs: Vec<&str> = flags.iter().map(String::as_str).collect();
                let stdout = capture_stdout(program, &flag_refs, env, tool.timeout).await?;
                let trimmed = stdout.trim();
                Ok(serde_json::from_str(trimmed)
                    .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string())))
            }
            ToolRunner::Remote { client } => client.call_tool(name, args).await,
        }
    }
}

/// Turn a JSON argument object into `--flag value` pairs.
fn cli_flags(args: &serde_json::Value) -> Result<Vec<String>> {
    let object = args
        .as_object()
        .ok_or_else(|| TangleError::Tool("CLI tool arguments must be an object".to_string()))?;

    let mut flags = Vec::new();
    for (key, value) in object {
        match value {
            serde_json::Value::Bool(true) => flags.push(format!("--{}", key)),
            serde_json::Value::Bool(false) | serde_json::Value::Null => {}
            serde_json::Value::String(s) => {
                flags.push(format!("--{}", key));
                flags.push(s.clone());
            }
            other => {
                flags.push(format!("--{}", key));
                flags.push(other.to_string());
            }
        }
    }
    Ok(flags)
}

/// Run a tool process, enforcing the timeout and a zero exit status, and
/// return its stdout.
pub(crate) async fn capture_stdout(
    program: &[String],
    args: &[&str],
    env: &HashMap<String, String>,
    run_timeout: Duration,
) -> Result<String> {
    let (cmd, rest) = program
        .split_first()
        .ok_or_else(|| TangleError::Tool("empty tool command".to_string()))?;

    let mut child = Command::new(cmd)
        .args(rest)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TangleError::Tool(format!("failed to spawn {}: {}", cmd, e)))?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let waited = timeout(run_timeout, async {
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
        Ok(Ok((status, stdout, _))) if status.success() => Ok(stdout),
        Ok(Ok((status, _, stderr))) => Err(TangleError::Tool(format!(
            "{} exited with status {}: {}",
            cmd,
            status.code().unwrap_or(-1),
            stderr.trim()
        ))),
        Ok(Err(e)) => Err(TangleError::Tool(format!("{} IO failed: {}", cmd, e))),
        Err(_) => Err(TangleError::Tool(format!(
            "{} timed out after {}ms",
            cmd,
            run_timeout.as_millis()
        ))),
    }
}
