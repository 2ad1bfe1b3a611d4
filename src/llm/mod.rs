// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM abstraction layer
//!
//! Execution consumes an abstract chat interface; concrete provider SDKs
//! live behind the [`provider::ChatProvider`] trait and are registered by
//! name in a [`provider::ProviderRegistry`].

pub mod mediator;
pub mod message;
pub mod mock_provider;
pub mod provider;
pub mod retry;

pub use mediator::{ChatOutcome, Mediator, TokenSink, ToolCallRecord};
pub use message::{ChatRole, Message};
pub use provider::{ChatProvider, CompletionRequest, ProviderRegistry};
