// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Operation parameter schemas
//!
//! Every operation's YAML body is checked against its declared schema
//! before execution begins: unknown keys, missing required keys and type
//! mismatches are parse-time errors.

use serde_yaml::{Mapping, Value};

use crate::error::{Result, TangleError};

/// Accepted value shape for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    Str,
    Bool,
    Int,
    Float,
    /// A block path: a string or an array of strings
    Path,
    /// An array of strings
    StrList,
    /// `"none"`, `"all"` or an array of tool names
    ToolSelection,
    /// One of `append`, `prepend`, `replace`
    Mode,
}

struct ParamSpec {
    name: &'static str,
    ty: ParamType,
    required: bool,
}

const fn req(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: true,
    }
}

const fn opt(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: false,
    }
}

fn spec_for(operation: &str) -> Option<&'static [ParamSpec]> {
    use ParamType::*;
    static IMPORT: &[ParamSpec] = &[
        req("file", Str),
        opt("block", Path),
        opt("mode", Mode),
        opt("to", Path),
        opt("run-once", Bool),
    ];
    static SHELL: &[ParamSpec] = &[
        req("prompt", Str),
        opt("use-header", Str),
        opt("mode", Mode),
        opt("to", Path),
        opt("run-once", Bool),
    ];
    static LLM: &[ParamSpec] = &[
        opt("prompt", Str),
        opt("block", Path),
        opt("media", StrList),
        opt("provider", Str),
        opt("model", Str),
        opt("temperature", Float),
        opt("stop-sequences", StrList),
        opt("tools", ToolSelection),
        opt("tools-turns-max", Int),
        opt("save-to-file", Str),
        opt("use-header", Str),
        opt("mode", Mode),
        opt("to", Path),
        opt("run-once", Bool),
    ];
    static RUN: &[ParamSpec] = &[
        req("file", Str),
        opt("prompt", Str),
        opt("block", Path),
        opt("use-header", Str),
        opt("mode", Mode),
        opt("to", Path),
        opt("run-once", Bool),
    ];
    static RETURN: &[ParamSpec] = &[
        opt("prompt", Str),
        opt("block", Path),
        opt("use-header", Str),
    ];
    static GOTO: &[ParamSpec] = &[req("block", Str), opt("run-once", Bool)];

    match operation {
        "import" => Some(IMPORT),
        "shell" => Some(SHELL),
        "llm" => Some(LLM),
        "run" => Some(RUN),
        "return" => Some(RETURN),
        "goto" => Some(GOTO),
        _ => None,
    }
}

/// Validate `params` against the schema of `operation`.
pub fn validate(operation: &str, params: &Mapping) -> Result<()> {
    let specs = spec_for(operation).ok_or_else(|| {
        TangleError::parse(format!("unknown operation '@{}'", operation))
    })?;

    for (key, value) in params {
        let key = key.as_str().ok_or_else(|| {
            TangleError::parse(format!("@{}: parameter keys must be strings", operation))
        })?;
        let spec = specs.iter().find(|s| s.name == key).ok_or_else(|| {
            TangleError::parse(format!("@{}: unknown parameter '{}'", operation, key))
        })?;
        check_type(operation, key, spec.ty, value)?;
    }

    for spec in specs.iter().filter(|s| s.required) {
        if !params.contains_key(spec.name) {
            return Err(TangleError::parse(format!(
                "@{}: missing required parameter '{}'",
                operation, spec.name
            )));
        }
    }

    // Cross-parameter rules
    match operation {
        "llm" | "return" => {
            if !params.contains_key("prompt") && !params.contains_key("block") {
                return Err(TangleError::parse(format!(
                    "@{}: at least one of 'prompt' or 'block' is required",
                    operation
                )));
            }
        }
        "goto" => {
            if let Some(target) = params.get("block").and_then(|v| v.as_str()) {
                if target.contains('/') || target.contains('*') {
                    return Err(TangleError::parse(
                        "@goto: 'block' must be a simple id (no '/' or '*')",
                    ));
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_type(operation: &str, key: &str, ty: ParamType, value: &Value) -> Result<()> {
    let ok = match ty {
        ParamType::Str => value.is_string(),
        ParamType::Bool => value.is_bool(),
        ParamType::Int => value.is_i64() || value.is_u64(),
        ParamType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
        ParamType::Path => value.is_string() || is_string_list(value),
        ParamType::StrList => is_string_list(value),
        ParamType::ToolSelection => match value {
            Value::String(s) => s == "none" || s == "all",
            other => is_string_list(other),
        },
        ParamType::Mode => matches!(
            value.as_str(),
            Some("append") | Some("prepend") | Some("replace")
        ),
    };
    if ok {
        Ok(())
    } else {
        Err(TangleError::parse(format!(
            "@{}: parameter '{}' has the wrong type",
            operation, key
        )))
    }
}

fn is_string_list(value: &Value) -> bool {
    match value {
        Value::Sequence(items) => items.iter().all(|v| v.is_string()),
        _ => false,
    }
}
