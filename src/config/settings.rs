// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Tangle
//!
//! Handles loading settings from ~/.tangle/settings.json, with an optional
//! per-directory override file (`tangle.json`) next to the document being
//! executed. Keys are camelCase on disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TangleError};
use crate::tree::MergeMode;

/// Main settings structure, stored in ~/.tangle/settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    /// Provider used when an `@llm` names none
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Merge mode used when an operation names none
    #[serde(default)]
    pub default_operation: MergeMode,

    /// Per-provider configuration, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Environment variables exported into `@shell` sessions
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Remote tool server endpoints
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    /// Suspension-point timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Interpreter limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// LLM transport retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// System prompt used for every `@llm` call when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_system_prompt: Option<String>,
}

/// Configuration for one LLM provider
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Default model for this provider
    #[serde(default)]
    pub model: String,

    /// API key stored directly (not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL override for custom endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model prefixes that reject sampling parameters (temperature,
    /// top_p); the mediator drops those values before calling
    #[serde(default)]
    pub restricted_sampling_models: Vec<String>,
}

impl ProviderConfig {
    /// Resolve the API key: environment variable wins over the stored one.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .or_else(|| self.api_key.clone())
    }

    /// Whether `model` accepts sampling parameters.
    pub fn allows_sampling(&self, model: &str) -> bool {
        !self
            .restricted_sampling_models
            .iter()
            .any(|prefix| model.starts_with(prefix.as_str()))
    }
}

/// A remote tool server endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    pub name: String,
    pub url: String,
}

/// Timeouts for the interpreter's suspension points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// `@shell` execution, seconds
    #[serde(default = "default_shell_secs")]
    pub shell_secs: u64,

    /// One tool invocation, seconds
    #[serde(default = "default_tool_secs")]
    pub tool_secs: u64,

    /// One LLM call, seconds
    #[serde(default = "default_llm_secs")]
    pub llm_secs: u64,

    /// One discovery probe, milliseconds
    #[serde(default = "default_probe_ms")]
    pub probe_ms: u64,
}

/// Interpreter limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    /// Maximum `@run` nesting depth
    #[serde(default = "default_max_run_depth")]
    pub max_run_depth: usize,

    /// Default cap on the tool-call loop of one `@llm`
    #[serde(default = "default_tools_turns_max")]
    pub tools_turns_max: usize,
}

/// Retry policy for LLM transport failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds (exponentially increased)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction (0.0 to 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_operation: MergeMode::default(),
            providers: HashMap::new(),
            environment: HashMap::new(),
            mcp_servers: Vec::new(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            retry: RetryConfig::default(),
            default_system_prompt: None,
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_shell_secs() -> u64 {
    60
}

fn default_tool_secs() -> u64 {
    30
}

fn default_llm_secs() -> u64 {
    300
}

fn default_probe_ms() -> u64 {
    2000
}

fn default_max_run_depth() -> usize {
    16
}

fn default_tools_turns_max() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            shell_secs: default_shell_secs(),
            tool_secs: default_tool_secs(),
            llm_secs: default_llm_secs(),
            probe_ms: default_probe_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_run_depth: default_max_run_depth(),
            tools_turns_max: default_tools_turns_max(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Name of the per-directory override file.
pub const LOCAL_SETTINGS_FILE: &str = "tangle.json";

impl Settings {
    /// Get the default settings file path
    pub fn default_path() -> PathBuf {
        Self::tangle_home().join("settings.json")
    }

    /// Get the tangle home directory (~/.tangle)
    pub fn tangle_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tangle")
    }

    /// Load settings from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            TangleError::Config(format!("invalid settings {}: {}", path.display(), e))
        })
    }

    /// Load settings for a document: the home settings, overridden by a
    /// `tangle.json` in the document's directory when one exists.
    pub fn load_for_document(document_dir: &Path) -> Result<Self> {
        let local = document_dir.join(LOCAL_SETTINGS_FILE);
        if local.exists() {
            Self::load_from(&local)
        } else {
            Self::load()
        }
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Provider configuration by name, defaulted when absent.
    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers.get(name).cloned().unwrap_or_default()
    }
}
