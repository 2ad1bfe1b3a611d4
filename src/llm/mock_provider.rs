// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock chat provider for testing
//!
//! A configurable implementation of the ChatProvider trait usable in unit
//! and integration tests without real API calls. Responses are queued and
//! returned in order; every request is recorded for assertions.

use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{LlmError, Result};
use crate::llm::provider::{
    ChatProvider, CompletionRequest, CompletionResponse, ContentBlockResponse, EventStream,
    StopReason, StreamEvent,
};

/// A mock chat provider for testing
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    responses: Arc<Mutex<Vec<MockResponse>>>,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

/// A pre-configured response for the mock provider
#[derive(Clone, Debug, Default)]
pub struct MockResponse {
    /// Text content to return
    pub text: String,
    /// Tool calls to return before the text
    pub tool_calls: Vec<MockToolCall>,
}

/// A mock tool call
#[derive(Clone, Debug)]
pub struct MockToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: Arc::new(Mutex::new(vec![MockResponse {
                text: "mock response".to_string(),
                ..Default::default()
            }])),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replace the queue with a single text response.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.set_responses(vec![MockResponse {
            text: text.into(),
            ..Default::default()
        }]);
        self
    }

    /// Queue multiple responses, returned in order. The last one repeats
    /// if the queue runs dry.
    pub fn with_queued(self, responses: Vec<MockResponse>) -> Self {
        self.set_responses(responses);
        self
    }

    /// Queue a tool-call turn followed by a text turn.
    pub fn with_tool_call_then_text(
        self,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        text: impl Into<String>,
    ) -> Self {
        self.set_responses(vec![
            MockResponse {
                text: String::new(),
                tool_calls: vec![MockToolCall {
                    id: "toolu_mock_1".to_string(),
                    name: tool_name.into(),
                    input,
                }],
            },
            MockResponse {
                text: text.into(),
                ..Default::default()
            },
        ]);
        self
    }

    fn set_responses(&self, responses: Vec<MockResponse>) {
        let mut guard = self.lock_responses();
        *guard = responses;
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, Vec<MockResponse>> {
        match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// How many completion calls have been made.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in order.
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        match self.recorded_requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn next_response(&self, request: &CompletionRequest) -> MockResponse {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        match self.recorded_requests.lock() {
            Ok(mut guard) => guard.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        let responses = self.lock_responses();
        responses
            .get(call)
            .or_else(|| responses.last())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let response = self.next_response(&request);

        let mut content = Vec::new();
        for call in &response.tool_calls {
            content.push(ContentBlockResponse::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        if !response.text.is_empty() {
            content.push(ContentBlockResponse::Text {
                text: response.text.clone(),
            });
        }

        let stop_reason = if response.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        Ok(CompletionResponse {
            content,
            stop_reason: Some(stop_reason),
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let response = self.next_response(&request);
        if !response.tool_calls.is_empty() {
            return Err(LlmError::StreamError(
                "mock provider does not stream tool calls".to_string(),
            )
            .into());
        }

        // Chunk the text to exercise delta accumulation
        let mut events: Vec<Result<StreamEvent>> = response
            .text
            .as_bytes()
            .chunks(4)
            .map(|chunk| {
                Ok(StreamEvent::TextDelta {
                    text: String::from_utf8_lossy(chunk).to_string(),
                })
            })
            .collect();
        events.push(Ok(StreamEvent::Stop));

        Ok(Box::pin(stream::iter(events)))
    }
}
