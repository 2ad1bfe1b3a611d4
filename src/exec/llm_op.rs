// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The `@llm` operation
//!
//! Builds chat context per the construction rules, hands it to the
//! mediator, and merges the assistant's final text at the target. Tool
//! fan-out is recorded in the call tree under the operation's key.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{Result, TangleError};
use crate::exec::{context, header_choice, merge_output, wrap_output, Directive, OpContext};
use crate::llm::mediator::{Mediator, TokenSink};
use crate::llm::provider::CompletionRequest;
use crate::tools::ToolSelection;

/// Header wrapped around assistant output unless suppressed.
pub const DEFAULT_HEADER: &str = "# LLM response block";

/// System prompt used when the configuration provides none.
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Provide clear, accurate, and helpful responses.";

pub(crate) async fn execute(ctx: &mut OpContext<'_>) -> Result<Directive> {
    let params = &ctx.node.params;
    let settings = ctx.executor.settings();

    let provider_name = params
        .get("provider")
        .and_then(|v| v.as_str())
        .unwrap_or(&settings.default_provider)
        .to_string();
    let provider_config = settings.provider(&provider_name);
    let provider = ctx
        .executor
        .providers()
        .create(&provider_name, &provider_config)?;

    let model = params
        .get("model")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| provider_config.model.clone());
    if model.is_empty() {
        return Err(TangleError::Config(format!(
            "no model configured for provider '{}'",
            provider_name
        )));
    }

    let messages = context::chat_context(ctx.tree, ctx.op, params)?;
    let mut request = CompletionRequest::new(model.clone(), messages).with_system(
        settings
            .default_system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
    );
    if let Some(temperature) = params.get("temperature").and_then(|v| v.as_f64()) {
        request = request.with_temperature(temperature as f32);
    }
    if let Some(stops) = params.get("stop-sequences").and_then(|v| v.as_sequence()) {
        let stops: Vec<String> = stops
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        request = request.with_stop_sequences(stops);
    }

    let selection = match params.get("tools") {
        Some(value) => ToolSelection::from_value(value)?,
        None => ToolSelection::None,
    };
    let turns_max = params
        .get("tools-turns-max")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(settings.limits.tools_turns_max);
    let media: Vec<PathBuf> = params
        .get("media")
        .and_then(|v| v.as_sequence())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|p| ctx.dir.join(p))
                .collect()
        })
        .unwrap_or_default();

    let mediator = Mediator::new(
        provider,
        ctx.executor.registry().clone(),
        settings.retry.clone(),
        turns_max,
    );
    let token_sink = ctx.executor.progress().cloned().map(|sender| {
        let sink: TokenSink = Arc::new(move |token: &str| {
            let event = crate::session::ProgressEvent {
                stage: "llm-stream".to_string(),
                progress: 0.5,
                message: token.to_string(),
                timestamp: chrono::Utc::now(),
            };
            let _ = sender.send(event);
        });
        sink
    });

    let llm_timeout = Duration::from_secs(settings.timeouts.llm_secs);
    let outcome = timeout(
        llm_timeout,
        mediator.run(
            request,
            &selection,
            media,
            provider_config.allows_sampling(&model),
            token_sink,
        ),
    )
    .await
    .map_err(|_| {
        TangleError::Cancelled(format!(
            "llm call timed out after {}s",
            llm_timeout.as_secs()
        ))
    })??;

    ctx.frame
        .record_tool_calls(&ctx.node.key, outcome.tool_calls.clone());

    if let Some(path) = params.get("save-to-file").and_then(|v| v.as_str()) {
        std::fs::write(ctx.dir.join(path), &outcome.text)?;
    }

    let header = header_choice(params, DEFAULT_HEADER);
    let fragment = wrap_output(&outcome.text, header.as_deref(), ctx.node.level);
    merge_output(ctx, fragment)?;
    Ok(Directive::Advance)
}
