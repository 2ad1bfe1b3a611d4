// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM mediator
//!
//! Drives one `@llm` conversation: issues the chat call, executes any tool
//! calls through the registry, feeds results back, and repeats until the
//! model answers with plain text or the turn cap is reached. When no tools
//! are offered the assistant output is streamed token by token so the
//! session recorder can surface progress.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RetryConfig;
use crate::error::Result;
use crate::llm::message::{ContentBlock, Message};
use crate::llm::provider::{ChatProvider, CompletionRequest, StreamEvent};
use crate::llm::retry::with_retry;
use crate::tools::{ToolRegistry, ToolSelection};

/// One tool invocation made during a chat, for the call tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

/// The assistant's final output plus the tool fan-out that produced it.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Callback receiving streamed assistant tokens.
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Mediates between the interpreter and a chat provider.
pub struct Mediator {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    retry: RetryConfig,
    turns_max: usize,
}

impl Mediator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
        retry: RetryConfig,
        turns_max: usize,
    ) -> Self {
        Self {
            provider,
            registry,
            retry,
            turns_max,
        }
    }

    /// Run the conversation to completion.
    ///
    /// `media` files attach to the first user message. When
    /// `sampling_allowed` is false the temperature is dropped before the
    /// request goes out.
    pub async fn run(
        &self,
        mut request: CompletionRequest,
        selection: &ToolSelection,
        media: Vec<PathBuf>,
        sampling_allowed: bool,
        on_token: Option<TokenSink>,
    ) -> Result<ChatOutcome> {
        if !sampling_allowed && request.temperature.take().is_some() {
            tracing::debug!(model = %request.model, "model rejects sampling parameters; dropping temperature");
        }
        if !media.is_empty() {
            attach_media(&mut request.messages, media);
        }
        request.tools = self.registry.definitions(selection).await;

        if selection.is_none() {
            return self.run_streaming(request, on_token).await;
        }
        self.run_tool_loop(request).await
    }

    async fn run_streaming(
        &self,
        request: CompletionRequest,
        on_token: Option<TokenSink>,
    ) -> Result<ChatOutcome> {
        let provider = self.provider.clone();
        let mut stream = with_retry(
            || {
                let provider = provider.clone();
                let request = request.clone();
                async move { provider.complete_stream(request).await }
            },
            &self.retry,
            "llm stream",
        )
        .await?;

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta { text: delta } => {
                    if let Some(sink) = &on_token {
                        sink(&delta);
                    }
                    text.push_str(&delta);
                }
                StreamEvent::Stop => break,
            }
        }
        Ok(ChatOutcome {
            text,
            tool_calls: Vec::new(),
        })
    }

    async fn run_tool_loop(&self, mut request: CompletionRequest) -> Result<ChatOutcome> {
        let mut records = Vec::new();
        let mut turn = 0usize;

        loop {
            let provider = self.provider.clone();
            let attempt = request.clone();
            let response = with_retry(
                || {
                    let provider = provider.clone();
                    let request = attempt.clone();
                    async move { provider.complete(request).await }
                },
                &self.retry,
                "llm completion",
            )
            .await?;

            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if tool_uses.is_empty() {
                return Ok(ChatOutcome {
                    text: response.text(),
                    tool_calls: records,
                });
            }
            if turn == self.turns_max {
                tracing::warn!(
                    turns = self.turns_max,
                    "tool-call loop cap reached; returning last response text"
                );
                return Ok(ChatOutcome {
                    text: response.text(),
                    tool_calls: records,
                });
            }

            // Echo the assistant turn, then answer each call in order
            let mut blocks: Vec<ContentBlock> = Vec::new();
            let text = response.text();
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text });
            }
            for (id, name, input) in &tool_uses {
                blocks.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            request.messages.push(Message::assistant_blocks(blocks));

            for (id, name, input) in tool_uses {
                let reply = if !input.is_object() {
                    // Malformed arguments get a synthesized reply instead
                    // of failing the run
                    let error = serde_json::json!({"error": "bad arguments"});
                    records.push(ToolCallRecord {
                        name: name.clone(),
                        arguments: input,
                        result: error.clone(),
                    });
                    Message::tool_result(&id, error.to_string(), true)
                } else {
                    tracing::debug!(tool = %name, "executing tool call");
                    let result = self.registry.call(&name, input.clone()).await?;
                    records.push(ToolCallRecord {
                        name: name.clone(),
                        arguments: input,
                        result: result.clone(),
                    });
                    Message::tool_result(&id, result.to_string(), false)
                };
                request.messages.push(reply);
            }
            turn += 1;
        }
    }
}

/// Attach media files to the first user message.
fn attach_media(messages: &mut [Message], media: Vec<PathBuf>) {
    use crate::llm::message::ChatRole;
    if let Some(first_user) = messages.iter_mut().find(|m| m.role == ChatRole::User) {
        first_user.attachments = media
            .into_iter()
            .map(|path| crate::llm::message::Attachment { path })
            .collect();
    }
}
