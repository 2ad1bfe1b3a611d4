// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Tangle
//!
//! This module defines all error types used throughout the application.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Tangle operations
#[derive(Error, Debug)]
pub enum TangleError {
    /// Markdown or YAML malformed, unknown operation, invalid parameters
    #[error("Parse error: {message}{}", fmt_line(.line))]
    Parse {
        message: String,
        line: Option<usize>,
    },

    /// Address resolution failed where presence was required
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Source document for `@import` or `@run` is missing
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Tool returned non-JSON, exited non-zero, or exceeded its timeout
    #[error("Tool error: {0}")]
    Tool(String),

    /// Provider rejected the request or transport failed after retries
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// `@shell` exited non-zero
    #[error("Shell error: command exited with status {status}")]
    Shell { status: i32, stderr: String },

    /// Operation aborted by timeout or external cancel
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A child `@run` failed; wraps the original error
    #[error("Child run of {} failed: {source}", .file.display())]
    ChildFailed {
        file: PathBuf,
        #[source]
        source: Box<TangleError>,
    },

    /// Invariant violation; a bug
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn fmt_line(line: &Option<usize>) -> String {
    match line {
        Some(n) => format!(" (line {})", n),
        None => String::new(),
    }
}

/// LLM transport and provider errors, separated so retry
/// classification can match on variants
#[derive(Error, Debug)]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the provider
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Provider rejected a request parameter
    #[error("Unsupported parameter for model {model}: {parameter}")]
    UnsupportedParameter { model: String, parameter: String },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed response from the provider
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Provider returned an error status
    #[error("Provider error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

impl TangleError {
    /// Shorthand for a parse error without a line number.
    pub fn parse(message: impl Into<String>) -> Self {
        TangleError::Parse {
            message: message.into(),
            line: None,
        }
    }

    /// Shorthand for a parse error citing a 1-based line number.
    pub fn parse_at(message: impl Into<String>, line: usize) -> Self {
        TangleError::Parse {
            message: message.into(),
            line: Some(line),
        }
    }

    /// Stable kind string used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TangleError::Parse { .. } => "ParseError",
            TangleError::BlockNotFound(_) => "BlockNotFound",
            TangleError::FileNotFound(_) => "FileNotFound",
            TangleError::Tool(_) => "ToolError",
            TangleError::Llm(_) => "LLMError",
            TangleError::Shell { .. } => "ShellError",
            TangleError::Cancelled(_) => "Cancelled",
            TangleError::ChildFailed { .. } => "ChildFailed",
            TangleError::Internal(_) => "Internal",
            TangleError::Config(_) => "ConfigError",
            TangleError::Io(_) => "IoError",
            TangleError::Json(_) => "JsonError",
        }
    }

    /// Process exit code for the CLI: 1 parse/validation, 3 cancelled,
    /// 2 any other runtime failure.
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            TangleError::Parse { .. } | TangleError::Config(_) => 1,
            TangleError::Cancelled(_) => 3,
            _ => 2,
        }
    }

    /// Unwrap `ChildFailed` chains down to the originating error.
    pub fn root(&self) -> &TangleError {
        match self {
            TangleError::ChildFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_yaml::Error> for TangleError {
    fn from(err: serde_yaml::Error) -> Self {
        let line = err.location().map(|l| l.line());
        TangleError::Parse {
            message: format!("YAML: {}", err),
            line,
        }
    }
}

/// Result type alias for Tangle operations
pub type Result<T> = std::result::Result<T, TangleError>;
